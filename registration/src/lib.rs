//! # Program Registration Allocation Engine
//!
//! The core of a program-registration portal: given an applicant's workshop
//! preferences and a program's prerequisite rules, validate eligibility,
//! assign the applicant to at most one workshop under a hard capacity limit,
//! optionally bind them to a capacity-limited cohort, and commit everything
//! atomically with a unique, human-readable confirmation code, or fail
//! cleanly with no partial state.
//!
//! Rendering, sessions, the admin dashboard and email delivery are external
//! collaborators; this crate is the allocation engine they call into.
//!
//! ## Pipeline
//!
//! ```text
//! RegistrationRequest
//!   → duplicate check
//!   → PrerequisiteValidator (per requested workshop)
//!   → CapacityAllocator     (preference-ordered first-fit)
//!   → cohort assignment     (if requested; capacity-checked)
//!   → attendee row persisted (status: pending)
//!   → confirmation code     (HP<program>-<attendee:04>)
//!   → commit
//! ```
//!
//! Every step runs inside one store transaction. A failure anywhere rolls
//! the whole attempt back and yields exactly one typed
//! [`RegistrationError`]; concurrent registrations can never both claim the
//! last slot of a workshop or cohort.
//!
//! ## Example
//!
//! ```rust,ignore
//! use registration::{Config, RegistrationCoordinator, RegistrationRequest};
//! use registration::store::postgres::PostgresStore;
//!
//! let config = Config::from_env();
//! let store = PostgresStore::connect(&config).await?;
//! let coordinator = RegistrationCoordinator::new(store, config.engine);
//!
//! let outcome = coordinator.register(&request).await?;
//! println!("registered: {}", outcome.confirmation_code); // e.g. HP7-0042
//! ```

#![deny(missing_docs)]

pub mod allocation;
pub mod config;
pub mod confirmation;
pub mod coordinator;
pub mod error;
pub mod store;
pub mod types;
pub mod validation;

// Re-export main types for convenience
pub use config::{Config, EngineConfig};
pub use coordinator::RegistrationCoordinator;
pub use error::{RegistrationError, Result};
pub use types::{
    AssignmentDecision, AttendeeId, CohortId, ProgramId, RegistrationOutcome, RegistrationRequest,
    RegistrationStatus, WorkshopId,
};
pub use validation::{EligibilityProvider, OpenEligibility};
