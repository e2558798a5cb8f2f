//! Registration coordinator.
//!
//! Orchestrates one registration attempt as a state machine over a single
//! store transaction:
//!
//! `Received → DuplicateChecked → PrerequisitesValidated → Allocated →
//! Persisted → ConfirmationIssued → Committed`, with `Aborted(reason)`
//! reachable from any non-terminal state.
//!
//! Any failure rolls the whole transaction back; the caller gets exactly one
//! typed reason and the store keeps no trace of the attempt. Only capacity
//! conflicts are retried, a bounded number of times, before surfacing
//! `CapacityConflict`.
//!
//! Two deliberate policies:
//!
//! * **Strict prerequisite aggregation**: a mandatory failure on *any*
//!   requested preference rejects the whole registration, even if a later
//!   preference would pass cleanly.
//! * **Strict cohort / best-effort workshop asymmetry**: a requested cohort
//!   that cannot be assigned aborts the registration (the applicant chose it
//!   explicitly), while finding no workshop with free capacity merely leaves
//!   the registration unassigned and `pending`.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::allocation::{allocate, Allocation};
use crate::config::EngineConfig;
use crate::confirmation::confirmation_code;
use crate::error::{RegistrationError, Result};
use crate::store::{NewAttendee, RegistrationStore, RegistrationTransaction};
use crate::types::{
    CapacitySummary, RegistrationOutcome, RegistrationRequest, RegistrationStatus, WorkshopId,
};
use crate::validation::{validate_workshop, EligibilityProvider, OpenEligibility};

/// Coordinator states, used for transition logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    DuplicateChecked,
    PrerequisitesValidated,
    Allocated,
    Persisted,
    ConfirmationIssued,
    Committed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DuplicateChecked => "duplicate_checked",
            Self::PrerequisitesValidated => "prerequisites_validated",
            Self::Allocated => "allocated",
            Self::Persisted => "persisted",
            Self::ConfirmationIssued => "confirmation_issued",
            Self::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// Drives registration attempts against a store.
pub struct RegistrationCoordinator<S> {
    store: S,
    provider: Arc<dyn EligibilityProvider>,
    engine: EngineConfig,
}

impl<S> RegistrationCoordinator<S>
where
    S: RegistrationStore,
{
    /// Create a coordinator with the default (open) eligibility provider.
    #[must_use]
    pub fn new(store: S, engine: EngineConfig) -> Self {
        Self {
            store,
            provider: Arc::new(OpenEligibility),
            engine,
        }
    }

    /// Replace the eligibility provider (assessment/completion/inventory
    /// collaborators).
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn EligibilityProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// The underlying store, for advisory availability reads.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Process one registration submission to a terminal outcome.
    ///
    /// On success the registration is committed and the confirmation code is
    /// permanent. On failure nothing was written. Capacity conflicts are
    /// retried up to the configured budget before being surfaced.
    ///
    /// # Errors
    ///
    /// Returns exactly one [`RegistrationError`] naming the step that
    /// failed; see the variant docs.
    #[tracing::instrument(
        skip_all,
        fields(program_id = %request.program_id, email = %request.email)
    )]
    pub async fn register(&self, request: &RegistrationRequest) -> Result<RegistrationOutcome> {
        // Received: input shape is checked before any transaction opens.
        request.validate()?;

        let mut attempt = 0;
        loop {
            match self.try_register(request).await {
                Err(err) if err.is_retryable() && attempt < self.engine.max_capacity_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, "capacity conflict, retrying registration");
                }
                Err(err) => {
                    if err.is_user_error() {
                        tracing::info!(error = %err, "registration rejected");
                    } else {
                        tracing::error!(error = %err, "registration failed");
                    }
                    return Err(err);
                }
                Ok(outcome) => {
                    tracing::info!(
                        stage = %Stage::Committed,
                        code = %outcome.confirmation_code,
                        "registration committed"
                    );
                    return Ok(outcome);
                }
            }
        }
    }

    /// One transactional attempt: commit on success, roll back on any error.
    async fn try_register(&self, request: &RegistrationRequest) -> Result<RegistrationOutcome> {
        let mut tx = self.store.begin().await?;
        match self.run_states(&mut tx, request).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                // Surface the original error; a rollback failure only gets
                // logged (the store discards the writes either way).
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// The state machine body, from `Received` up to (but excluding) commit.
    async fn run_states<T>(
        &self,
        tx: &mut T,
        request: &RegistrationRequest,
    ) -> Result<RegistrationOutcome>
    where
        T: RegistrationTransaction,
    {
        // Received → DuplicateChecked
        let program = tx
            .load_program(request.program_id)
            .await?
            .ok_or(RegistrationError::ProgramNotFound {
                program_id: request.program_id,
            })?;
        if !program.registration_open {
            return Err(RegistrationError::RegistrationClosed {
                program_id: program.id,
            });
        }
        if tx
            .find_attendee_by_email(request.program_id, &request.email)
            .await?
            .is_some()
        {
            return Err(RegistrationError::DuplicateRegistration);
        }
        tracing::debug!(stage = %Stage::DuplicateChecked);

        // DuplicateChecked → PrerequisitesValidated
        let workshops = tx.load_workshops(&request.workshop_preferences).await?;
        let today = Utc::now().date_naive();
        let mut reports = HashMap::with_capacity(workshops.len());
        let mut failures = Vec::new();
        for workshop in &workshops {
            let report = validate_workshop(request, workshop, self.provider.as_ref(), today);
            if !report.satisfied {
                failures.push(format!("{}: {}", workshop.title, report.failed.join(", ")));
            }
            reports.insert(workshop.id, report);
        }
        if !failures.is_empty() {
            // Policy: any mandatory failure on any requested preference
            // blocks the whole registration.
            return Err(RegistrationError::PrerequisitesNotMet { failures });
        }
        tracing::debug!(stage = %Stage::PrerequisitesValidated);

        // PrerequisitesValidated → Allocated
        let allocation = self.allocate_capacity(tx, request, &reports).await?;
        if let Some(cohort_id) = request.cohort_id {
            let cohort = tx.lock_cohort(cohort_id).await?.ok_or_else(|| {
                RegistrationError::CohortAssignmentFailed {
                    reason: format!("cohort {cohort_id} does not exist"),
                }
            })?;
            if cohort.program_id != program.id {
                return Err(RegistrationError::CohortAssignmentFailed {
                    reason: format!("cohort {cohort_id} belongs to a different program"),
                });
            }
            if !cohort.accepts_assignments() {
                return Err(RegistrationError::CohortAssignmentFailed {
                    reason: format!("cohort {} is full or closed", cohort.name),
                });
            }
        }
        tracing::debug!(stage = %Stage::Allocated, assigned = allocation.assigned().is_some());

        // Allocated → Persisted
        let assigned = allocation.assigned();
        let prerequisites_met: BTreeMap<WorkshopId, bool> = reports
            .iter()
            .map(|(&id, report)| (id, report.satisfied))
            .collect();
        let attendee_id = tx
            .insert_attendee(&NewAttendee {
                program_id: request.program_id,
                first_name: request.first_name.trim().to_string(),
                last_name: request.last_name.trim().to_string(),
                email: request.email.trim().to_string(),
                phone: request.phone.trim().to_string(),
                date_of_birth: request.date_of_birth,
                gender: request.gender.clone(),
                workshop_preferences: request.workshop_preferences.clone(),
                cohort_id: request.cohort_id,
                assigned_workshop_id: assigned.map(|d| d.workshop_id),
                assigned_preference_rank: assigned.map(|d| d.preference_rank),
                prerequisites_met,
                status: RegistrationStatus::Pending,
            })
            .await?;
        if let Some(cohort_id) = request.cohort_id {
            tx.increment_cohort(cohort_id).await?;
        }
        tracing::debug!(stage = %Stage::Persisted, %attendee_id);

        // Persisted → ConfirmationIssued
        let code = confirmation_code(request.program_id, attendee_id);
        tx.set_confirmation_code(attendee_id, &code).await?;
        tracing::debug!(stage = %Stage::ConfirmationIssued);

        Ok(RegistrationOutcome {
            confirmation_code: code,
            attendee_id,
            attendee_name: request.display_name(),
            assignments: allocation.decisions,
        })
    }

    /// Lock capacity for every validated preference and run first-fit.
    ///
    /// Rows are locked in id order regardless of preference order so two
    /// applicants with opposite preference lists cannot deadlock each other;
    /// the allocation itself still follows the applicant's declared order.
    async fn allocate_capacity<T>(
        &self,
        tx: &mut T,
        request: &RegistrationRequest,
        reports: &HashMap<WorkshopId, crate::validation::PrerequisiteReport>,
    ) -> Result<Allocation>
    where
        T: RegistrationTransaction,
    {
        let mut candidates: Vec<WorkshopId> = request
            .workshop_preferences
            .iter()
            .copied()
            .filter(|id| reports.get(id).is_some_and(|r| r.satisfied))
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        let mut capacities: HashMap<WorkshopId, CapacitySummary> = HashMap::new();
        for workshop_id in candidates {
            if let Some(summary) = tx.lock_workshop_capacity(workshop_id).await? {
                capacities.insert(workshop_id, summary);
            }
        }

        Ok(allocate(
            &request.workshop_preferences,
            |id| reports.get(&id).is_some_and(|r| r.satisfied),
            |id| capacities.get(&id).copied(),
        ))
    }
}
