//! Error types for registration operations.

use thiserror::Error;

use crate::types::ProgramId;

/// Result type alias for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

/// Error taxonomy for the registration allocation engine.
///
/// Every non-success path through the coordinator yields exactly one of these
/// after a full rollback; there is no partial success state. Business-rule
/// failures carry user-facing detail, while [`Persistence`] detail is meant
/// for operator logs, not end users.
///
/// [`Persistence`]: RegistrationError::Persistence
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    // ═══════════════════════════════════════════════════════════
    // Pre-transaction input errors
    // ═══════════════════════════════════════════════════════════

    /// Missing required fields or an empty preference list; caught before
    /// any transaction starts.
    #[error("invalid submission: {reason}")]
    Validation {
        /// What was missing or malformed
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Business-rule rejections (transaction rolled back)
    // ═══════════════════════════════════════════════════════════

    /// The requested program does not exist.
    #[error("program {program_id} not found")]
    ProgramNotFound {
        /// Program that was requested
        program_id: ProgramId,
    },

    /// The program exists but its registration window is closed.
    #[error("registration for program {program_id} is closed")]
    RegistrationClosed {
        /// Program that was requested
        program_id: ProgramId,
    },

    /// An attendee with the same email already exists for this program.
    #[error("an account with this email address already exists for this program")]
    DuplicateRegistration,

    /// One or more mandatory prerequisites are unsatisfied.
    ///
    /// Policy: any mandatory failure on any requested preference blocks the
    /// whole registration, even if a later preference would pass.
    #[error("prerequisites not met for the following workshops: {}", failures.join("; "))]
    PrerequisitesNotMet {
        /// Per-workshop aggregated failure descriptions
        failures: Vec<String>,
    },

    /// The explicitly requested cohort is full, closed, or gone.
    #[error("cohort assignment failed: {reason}")]
    CohortAssignmentFailed {
        /// Why the cohort could not be assigned
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Operational faults
    // ═══════════════════════════════════════════════════════════

    /// Concurrent capacity contention exceeded the retry budget.
    ///
    /// The whole submission may be retried by the caller.
    #[error("registration could not be completed due to concurrent demand, please retry")]
    CapacityConflict,

    /// The store rejected a write for reasons unrelated to business rules.
    ///
    /// Logged for operators; the detail is never shown verbatim to end users.
    #[error("persistence failure: {detail}")]
    Persistence {
        /// Driver-level detail for operator logs
        detail: String,
    },
}

impl RegistrationError {
    /// Convenience constructor for [`RegistrationError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Returns `true` if retrying the whole submission may succeed.
    ///
    /// Only capacity contention is retryable; business-rule rejections are
    /// deterministic and persistence faults need operator attention.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::CapacityConflict)
    }

    /// Returns `true` if this is a business-rule rejection whose message is
    /// safe to render to the applicant as-is.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::ProgramNotFound { .. }
                | Self::RegistrationClosed { .. }
                | Self::DuplicateRegistration
                | Self::PrerequisitesNotMet { .. }
                | Self::CohortAssignmentFailed { .. }
        )
    }
}

impl From<sqlx::Error> for RegistrationError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                // The (program_id, email) unique index is the duplicate-check
                // backstop for submissions racing the explicit check.
                return Self::DuplicateRegistration;
            }
            if let Some(code) = db_err.code() {
                // lock_not_available / deadlock_detected / serialization_failure
                if code == "55P03" || code == "40P01" || code == "40001" {
                    return Self::CapacityConflict;
                }
            }
        }
        Self::Persistence {
            detail: err.to_string(),
        }
    }
}
