//! Confirmation code derivation.
//!
//! Codes are deterministic, not sampled: `HP<programId>-<attendeeId>` with
//! the attendee id zero-padded to four digits. Uniqueness follows from the
//! store-assigned attendee id being unique and immutable, so no retry or
//! collision handling exists. Gaps in the attendee sequence (from rolled-back
//! attempts) are tolerated; a code is only ever surfaced once its
//! transaction has committed.

use crate::types::{AttendeeId, ProgramId};

/// Derive the permanent external reference for a committed registration.
///
/// Called only after the attendee row exists (the id is store-assigned) and
/// before the final commit. Ids wider than four digits widen the code; they
/// are never truncated.
///
/// ```
/// use registration::confirmation::confirmation_code;
/// use registration::types::{AttendeeId, ProgramId};
///
/// let code = confirmation_code(ProgramId::new(7), AttendeeId::new(42));
/// assert_eq!(code, "HP7-0042");
/// ```
#[must_use]
pub fn confirmation_code(program_id: ProgramId, attendee_id: AttendeeId) -> String {
    format!("HP{}-{:04}", program_id.get(), attendee_id.get())
}
