//! Storage abstraction for the registration engine.
//!
//! The coordinator talks to a [`RegistrationStore`], which opens
//! [`RegistrationTransaction`]s: every read and write of one registration
//! attempt happens through a single transaction that either commits fully or
//! leaves no trace. Two implementations ship:
//!
//! * [`postgres::PostgresStore`]: production store; row-locks workshop and
//!   cohort rows (`SELECT ... FOR UPDATE` under a bounded `lock_timeout`) so
//!   concurrent registrations cannot both claim the last slot.
//! * [`memory::MemoryStore`]: test double and local-development store; a
//!   transaction owns the whole store for its duration, which gives the same
//!   observable guarantees with none of the infrastructure.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::{
    AttendeeId, CapacitySummary, Cohort, CohortId, Program, ProgramId, RegistrationStatus,
    Workshop, WorkshopId,
};

/// The attendee row as written by a successful registration.
///
/// The preference list and prerequisite snapshot are typed here; they are
/// serialized (JSONB) only inside the store implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttendee {
    /// Program being registered for
    pub program_id: ProgramId,
    /// Applicant first name
    pub first_name: String,
    /// Applicant last name
    pub last_name: String,
    /// Applicant email (unique per program)
    pub email: String,
    /// Contact phone number
    pub phone: String,
    /// Date of birth
    pub date_of_birth: NaiveDate,
    /// Self-reported gender
    pub gender: String,
    /// Workshop preferences in declared order
    pub workshop_preferences: Vec<WorkshopId>,
    /// Cohort the attendee is bound to, if one was requested
    pub cohort_id: Option<CohortId>,
    /// Workshop the allocator assigned, if any
    pub assigned_workshop_id: Option<WorkshopId>,
    /// 1-based preference rank of the assigned workshop
    pub assigned_preference_rank: Option<u32>,
    /// Prerequisite-satisfaction snapshot per requested workshop
    pub prerequisites_met: BTreeMap<WorkshopId, bool>,
    /// Review status; always `Pending` at creation
    pub status: RegistrationStatus,
}

/// A stored attendee row, as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendeeRecord {
    /// Store-assigned identifier
    pub id: AttendeeId,
    /// The written registration data
    pub attendee: NewAttendee,
    /// Confirmation code; present only on committed registrations
    pub confirmation_code: Option<String>,
}

/// Per-workshop availability for the registration form collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkshopAvailability {
    /// Workshop identifier
    pub workshop_id: WorkshopId,
    /// Display title
    pub title: String,
    /// Capacity snapshot at read time (advisory only)
    pub capacity: CapacitySummary,
}

/// Opens registration transactions and serves advisory availability reads.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// The transaction type this store produces.
    type Transaction: RegistrationTransaction;

    /// Begin a registration transaction.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store is unreachable.
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Per-workshop capacity for a program, read outside any registration
    /// transaction. Advisory: a displayed free slot can still be lost to a
    /// concurrent applicant.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the read fails.
    async fn workshop_availability(
        &self,
        program_id: ProgramId,
    ) -> Result<Vec<WorkshopAvailability>>;

    /// Cohorts of a program with their current counters, for display.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the read fails.
    async fn cohort_availability(&self, program_id: ProgramId) -> Result<Vec<Cohort>>;
}

/// One atomic registration attempt against the store.
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// every staged write; no intermediate state is ever observable by other
/// transactions.
#[async_trait]
pub trait RegistrationTransaction: Send {
    /// Look up an existing attendee by program and email (duplicate check).
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the read fails.
    async fn find_attendee_by_email(
        &mut self,
        program_id: ProgramId,
        email: &str,
    ) -> Result<Option<AttendeeId>>;

    /// Load a program's reference data.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the read fails.
    async fn load_program(&mut self, program_id: ProgramId) -> Result<Option<Program>>;

    /// Load the requested workshops with their prerequisite rules.
    ///
    /// Unknown ids are silently absent from the result; the allocator skips
    /// them.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the read fails.
    async fn load_workshops(&mut self, ids: &[WorkshopId]) -> Result<Vec<Workshop>>;

    /// Lock a workshop's capacity for the rest of this transaction and
    /// return its current enrollment snapshot.
    ///
    /// The snapshot stays valid until commit: no concurrent transaction can
    /// assign into this workshop in between. Returns `None` for an unknown
    /// workshop.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityConflict`](crate::RegistrationError::CapacityConflict)
    /// when the lock cannot be acquired within the configured bound, or a
    /// persistence error for driver faults.
    async fn lock_workshop_capacity(
        &mut self,
        workshop_id: WorkshopId,
    ) -> Result<Option<CapacitySummary>>;

    /// Lock a cohort row for the rest of this transaction and return it.
    ///
    /// Returns `None` for an unknown cohort.
    ///
    /// # Errors
    ///
    /// Same contract as [`lock_workshop_capacity`](Self::lock_workshop_capacity).
    async fn lock_cohort(&mut self, cohort_id: CohortId) -> Result<Option<Cohort>>;

    /// Insert the attendee row and return its store-assigned sequential id.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateRegistration`](crate::RegistrationError::DuplicateRegistration)
    /// if a unique-key backstop fires, or a persistence error otherwise.
    async fn insert_attendee(&mut self, attendee: &NewAttendee) -> Result<AttendeeId>;

    /// Increment a cohort's participant counter by exactly one.
    ///
    /// The caller must hold the cohort lock (via [`lock_cohort`](Self::lock_cohort))
    /// and have verified capacity.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the write fails.
    async fn increment_cohort(&mut self, cohort_id: CohortId) -> Result<()>;

    /// Write the confirmation code onto the attendee row.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the write fails.
    async fn set_confirmation_code(&mut self, attendee_id: AttendeeId, code: &str) -> Result<()>;

    /// Commit every staged write atomically.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the commit fails; nothing was written
    /// in that case.
    async fn commit(self) -> Result<()>;

    /// Discard every staged write.
    ///
    /// Dropping the transaction has the same effect; this exists so rollback
    /// failures can be logged.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the rollback itself fails (the store
    /// still discards the writes).
    async fn rollback(self) -> Result<()>;
}
