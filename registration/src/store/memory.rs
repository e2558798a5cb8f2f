//! In-memory registration store.
//!
//! Test double and local-development store. A transaction takes ownership of
//! the store mutex for its whole lifetime, so transactions are serialized:
//! the capacity reads a transaction performs cannot be invalidated by a
//! concurrent commit, which is the same guarantee the Postgres store gets
//! from row locks. Writes are staged on a working copy and only published on
//! commit; dropping a transaction discards them.
//!
//! Supports failure injection at chosen steps so tests can verify that an
//! abort anywhere leaves the store byte-for-byte unchanged, and bounded
//! capacity-conflict injection so the coordinator's retry budget can be
//! exercised without real lock contention.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    AttendeeRecord, NewAttendee, RegistrationStore, RegistrationTransaction, WorkshopAvailability,
};
use crate::error::{RegistrationError, Result};
use crate::types::{
    AttendeeId, CapacitySummary, Cohort, CohortId, Program, ProgramId, Workshop, WorkshopId,
};

/// A step at which the memory store can be made to fail, for atomicity tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Fail the attendee insert
    InsertAttendee,
    /// Fail the cohort counter increment
    IncrementCohort,
    /// Fail writing the confirmation code
    SetConfirmationCode,
    /// Fail the final commit
    Commit,
}

impl FailurePoint {
    const fn as_flag(self) -> u8 {
        match self {
            Self::InsertAttendee => 1,
            Self::IncrementCohort => 2,
            Self::SetConfirmationCode => 3,
            Self::Commit => 4,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    programs: HashMap<ProgramId, Program>,
    workshops: HashMap<WorkshopId, Workshop>,
    cohorts: HashMap<CohortId, Cohort>,
    attendees: BTreeMap<AttendeeId, AttendeeRecord>,
    next_attendee_id: i64,
}

/// In-memory [`RegistrationStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    failure_flag: Arc<AtomicU8>,
    conflict_budget: Arc<AtomicU32>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a program.
    pub async fn add_program(&self, program: Program) {
        self.state.lock().await.programs.insert(program.id, program);
    }

    /// Seed a workshop (with its prerequisites).
    pub async fn add_workshop(&self, workshop: Workshop) {
        self.state
            .lock()
            .await
            .workshops
            .insert(workshop.id, workshop);
    }

    /// Seed a cohort.
    pub async fn add_cohort(&self, cohort: Cohort) {
        self.state.lock().await.cohorts.insert(cohort.id, cohort);
    }

    /// Make the next transactions fail at `point`. Cleared with
    /// [`clear_failure`](Self::clear_failure).
    pub fn fail_at(&self, point: FailurePoint) {
        self.failure_flag.store(point.as_flag(), Ordering::SeqCst);
    }

    /// Stop injecting failures.
    pub fn clear_failure(&self) {
        self.failure_flag.store(0, Ordering::SeqCst);
    }

    /// Make the next `count` capacity lock attempts fail with a retryable
    /// [`RegistrationError::CapacityConflict`], mimicking a lock timeout
    /// under contention.
    pub fn inject_capacity_conflicts(&self, count: u32) {
        self.conflict_budget.store(count, Ordering::SeqCst);
    }

    /// All committed attendee rows, in id order.
    pub async fn attendees(&self) -> Vec<AttendeeRecord> {
        self.state.lock().await.attendees.values().cloned().collect()
    }

    /// A committed cohort row.
    pub async fn cohort(&self, cohort_id: CohortId) -> Option<Cohort> {
        self.state.lock().await.cohorts.get(&cohort_id).cloned()
    }

    /// Committed assignments into one workshop.
    pub async fn enrollment(&self, workshop_id: WorkshopId) -> u32 {
        enrollment_of(&*self.state.lock().await, workshop_id)
    }

    fn should_fail(&self, point: FailurePoint) -> bool {
        self.failure_flag.load(Ordering::SeqCst) == point.as_flag()
    }

    fn take_conflict(&self) -> bool {
        self.conflict_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[allow(clippy::cast_possible_truncation)] // test-double enrollment counts are tiny
fn enrollment_of(state: &MemoryState, workshop_id: WorkshopId) -> u32 {
    state
        .attendees
        .values()
        .filter(|rec| rec.attendee.assigned_workshop_id == Some(workshop_id))
        .count() as u32
}

fn injected_failure(point: FailurePoint) -> RegistrationError {
    RegistrationError::Persistence {
        detail: format!("injected failure at {point:?}"),
    }
}

/// A serialized transaction over the memory store.
///
/// Holds the store mutex until commit or drop.
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    store: MemoryStore,
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryTransaction {
            guard,
            staged,
            store: self.clone(),
        })
    }

    async fn workshop_availability(
        &self,
        program_id: ProgramId,
    ) -> Result<Vec<WorkshopAvailability>> {
        let state = self.state.lock().await;
        let mut rows: Vec<WorkshopAvailability> = state
            .workshops
            .values()
            .filter(|w| w.program_id == program_id)
            .map(|w| WorkshopAvailability {
                workshop_id: w.id,
                title: w.title.clone(),
                capacity: CapacitySummary {
                    max_participants: w.max_participants,
                    enrolled: enrollment_of(&state, w.id),
                },
            })
            .collect();
        rows.sort_by_key(|r| r.workshop_id);
        Ok(rows)
    }

    async fn cohort_availability(&self, program_id: ProgramId) -> Result<Vec<Cohort>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Cohort> = state
            .cohorts
            .values()
            .filter(|c| c.program_id == program_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.id);
        Ok(rows)
    }
}

#[async_trait]
impl RegistrationTransaction for MemoryTransaction {
    async fn find_attendee_by_email(
        &mut self,
        program_id: ProgramId,
        email: &str,
    ) -> Result<Option<AttendeeId>> {
        Ok(self
            .staged
            .attendees
            .values()
            .find(|rec| {
                rec.attendee.program_id == program_id
                    && rec.attendee.email.eq_ignore_ascii_case(email)
            })
            .map(|rec| rec.id))
    }

    async fn load_program(&mut self, program_id: ProgramId) -> Result<Option<Program>> {
        Ok(self.staged.programs.get(&program_id).cloned())
    }

    async fn load_workshops(&mut self, ids: &[WorkshopId]) -> Result<Vec<Workshop>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.staged.workshops.get(id).cloned())
            .collect())
    }

    async fn lock_workshop_capacity(
        &mut self,
        workshop_id: WorkshopId,
    ) -> Result<Option<CapacitySummary>> {
        if self.store.take_conflict() {
            return Err(RegistrationError::CapacityConflict);
        }
        Ok(self.staged.workshops.get(&workshop_id).map(|w| {
            CapacitySummary {
                max_participants: w.max_participants,
                enrolled: enrollment_of(&self.staged, workshop_id),
            }
        }))
    }

    async fn lock_cohort(&mut self, cohort_id: CohortId) -> Result<Option<Cohort>> {
        Ok(self.staged.cohorts.get(&cohort_id).cloned())
    }

    async fn insert_attendee(&mut self, attendee: &NewAttendee) -> Result<AttendeeId> {
        if self.store.should_fail(FailurePoint::InsertAttendee) {
            return Err(injected_failure(FailurePoint::InsertAttendee));
        }
        // Unique-key backstop, same as the Postgres (program_id, email) index.
        if self
            .find_attendee_by_email(attendee.program_id, &attendee.email)
            .await?
            .is_some()
        {
            return Err(RegistrationError::DuplicateRegistration);
        }
        self.staged.next_attendee_id += 1;
        let id = AttendeeId::new(self.staged.next_attendee_id);
        self.staged.attendees.insert(
            id,
            AttendeeRecord {
                id,
                attendee: attendee.clone(),
                confirmation_code: None,
            },
        );
        Ok(id)
    }

    async fn increment_cohort(&mut self, cohort_id: CohortId) -> Result<()> {
        if self.store.should_fail(FailurePoint::IncrementCohort) {
            return Err(injected_failure(FailurePoint::IncrementCohort));
        }
        let cohort = self.staged.cohorts.get_mut(&cohort_id).ok_or_else(|| {
            RegistrationError::Persistence {
                detail: format!("cohort {cohort_id} vanished mid-transaction"),
            }
        })?;
        cohort.current_participants += 1;
        Ok(())
    }

    async fn set_confirmation_code(&mut self, attendee_id: AttendeeId, code: &str) -> Result<()> {
        if self.store.should_fail(FailurePoint::SetConfirmationCode) {
            return Err(injected_failure(FailurePoint::SetConfirmationCode));
        }
        let record = self.staged.attendees.get_mut(&attendee_id).ok_or_else(|| {
            RegistrationError::Persistence {
                detail: format!("attendee {attendee_id} vanished mid-transaction"),
            }
        })?;
        record.confirmation_code = Some(code.to_string());
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        if self.store.should_fail(FailurePoint::Commit) {
            return Err(injected_failure(FailurePoint::Commit));
        }
        *self.guard = self.staged;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        // Dropping the guard discards the staged copy.
        Ok(())
    }
}
