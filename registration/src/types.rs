//! Domain types for the registration allocation engine.
//!
//! Value objects, entities, and the request/outcome types exchanged with the
//! form and confirmation-page collaborators. Identifiers are store-assigned
//! sequential integers; the attendee identifier in particular must be
//! sequential because the confirmation code is derived from it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RegistrationError, Result};

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramId(i64);

impl ProgramId {
    /// Create a `ProgramId` from a raw store identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a workshop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkshopId(i64);

impl WorkshopId {
    /// Create a `WorkshopId` from a raw store identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for WorkshopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a cohort.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CohortId(i64);

impl CohortId {
    /// Create a `CohortId` from a raw store identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CohortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an attendee (a committed or in-flight registration).
///
/// Assigned by the store as a sequential value on insert; the confirmation
/// code embeds it, so it is never reused even across rolled-back attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttendeeId(i64);

impl AttendeeId {
    /// Create an `AttendeeId` from a raw store identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for AttendeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Reference data
// ============================================================================

/// A program open for registration.
///
/// Immutable during a registration attempt; the engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Program {
    /// Program identifier
    pub id: ProgramId,
    /// Display title
    pub title: String,
    /// Term the program runs in (e.g. "Winter 2026")
    pub term: String,
    /// Whether the registration window is currently open
    pub registration_open: bool,
    /// Program-wide participant limit
    pub max_participants: u32,
    /// Venue, if fixed
    pub location: Option<String>,
}

/// The kind of eligibility rule a prerequisite expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrerequisiteKind {
    /// Minimum age in whole years (inclusive boundary)
    Age,
    /// A named skill the applicant must hold
    Skill,
    /// A workshop the applicant must have completed previously
    WorkshopCompletion,
    /// Equipment the applicant must bring or own
    Equipment,
}

impl PrerequisiteKind {
    /// Stable string form used at the storage boundary.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Skill => "skill",
            Self::WorkshopCompletion => "workshop_completion",
            Self::Equipment => "equipment",
        }
    }

    /// Parse the storage string form.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Persistence`] for an unknown kind, since
    /// it can only come from corrupted reference data.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "age" => Ok(Self::Age),
            "skill" => Ok(Self::Skill),
            "workshop_completion" => Ok(Self::WorkshopCompletion),
            "equipment" => Ok(Self::Equipment),
            other => Err(RegistrationError::Persistence {
                detail: format!("unknown prerequisite kind: {other}"),
            }),
        }
    }
}

impl fmt::Display for PrerequisiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed eligibility rule attached to a workshop. Immutable reference data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prerequisite {
    /// The rule kind
    pub kind: PrerequisiteKind,
    /// Whether the rule blocks registration when unmet
    pub mandatory: bool,
    /// Comparison value; interpretation depends on `kind` (e.g. minimum age)
    pub requirement_value: String,
    /// Human-readable description surfaced on failure
    pub description: String,
}

/// A workshop with its ordered prerequisite rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workshop {
    /// Workshop identifier
    pub id: WorkshopId,
    /// Owning program
    pub program_id: ProgramId,
    /// Display title
    pub title: String,
    /// Hard capacity limit
    pub max_participants: u32,
    /// Eligibility rules, in display order
    pub prerequisites: Vec<Prerequisite>,
}

/// Lifecycle status of a cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortStatus {
    /// Accepting assignments
    Active,
    /// Full or administratively closed
    Closed,
}

impl CohortStatus {
    /// Stable string form used at the storage boundary.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

/// A capacity-limited sub-grouping of a program's attendees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cohort {
    /// Cohort identifier
    pub id: CohortId,
    /// Owning program
    pub program_id: ProgramId,
    /// Display name
    pub name: String,
    /// Lifecycle status; only `Active` cohorts accept assignments
    pub status: CohortStatus,
    /// Hard capacity limit
    pub max_participants: u32,
    /// Running counter, incremented exactly once per committed assignment
    pub current_participants: u32,
}

impl Cohort {
    /// Whether this cohort can accept one more attendee right now.
    #[must_use]
    pub const fn accepts_assignments(&self) -> bool {
        matches!(self.status, CohortStatus::Active)
            && self.current_participants < self.max_participants
    }
}

// ============================================================================
// Registration request (inbound)
// ============================================================================

/// A validated registration submission, passed by value into the coordinator.
///
/// Every field the engine needs arrives explicitly; the preference list is
/// an ordered sequence of typed workshop identifiers, serialized only at the
/// storage boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationRequest {
    /// Program being registered for
    pub program_id: ProgramId,
    /// Applicant first name
    pub first_name: String,
    /// Applicant last name
    pub last_name: String,
    /// Applicant email; duplicate-checked per program
    pub email: String,
    /// Contact phone number
    pub phone: String,
    /// Date of birth, used for age prerequisites
    pub date_of_birth: NaiveDate,
    /// Self-reported gender
    pub gender: String,
    /// Explicitly selected cohort, if any
    pub cohort_id: Option<CohortId>,
    /// Workshop preferences, first choice first
    pub workshop_preferences: Vec<WorkshopId>,
}

impl RegistrationRequest {
    /// Check required fields before any transaction is opened.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Validation`] when a required field is
    /// empty, the email is malformed, or no workshop preference was given.
    pub fn validate(&self) -> Result<()> {
        if self.first_name.trim().is_empty() {
            return Err(RegistrationError::validation("first name is required"));
        }
        if self.last_name.trim().is_empty() {
            return Err(RegistrationError::validation("last name is required"));
        }
        if !is_plausible_email(&self.email) {
            return Err(RegistrationError::validation("a valid email address is required"));
        }
        if self.workshop_preferences.is_empty() {
            return Err(RegistrationError::validation(
                "select at least one workshop preference",
            ));
        }
        Ok(())
    }

    /// Applicant display name, as shown on the confirmation page.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }
}

/// Basic email shape check: one `@` with non-empty local and domain parts.
///
/// Full RFC 5322 validation is the form collaborator's concern; this only
/// guards the duplicate-check key against obviously broken input.
fn is_plausible_email(email: &str) -> bool {
    if email.len() < 3 || email.len() > 255 {
        return false;
    }
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => !local.is_empty() && domain.contains('.'),
        _ => false,
    }
}

// ============================================================================
// Registration state and outcome
// ============================================================================

/// Review status of a stored registration.
///
/// The engine only ever writes `Pending`; later statuses belong to the
/// downstream review process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Awaiting review
    Pending,
    /// Approved by a reviewer
    Confirmed,
    /// Cancelled by the applicant or a reviewer
    Cancelled,
}

impl RegistrationStatus {
    /// Stable string form used at the storage boundary.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One allocation decision for a requested preference.
///
/// At most one decision in an outcome has `assigned == true`; the rest are
/// reported for display so the applicant can see which choices were skipped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignmentDecision {
    /// The requested workshop
    pub workshop_id: WorkshopId,
    /// 1-based rank in the applicant's preference order
    pub preference_rank: u32,
    /// Whether the applicant was assigned to this workshop
    pub assigned: bool,
}

/// The terminal success outcome of a committed registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationOutcome {
    /// Permanent external reference, e.g. `HP7-0042`
    pub confirmation_code: String,
    /// Store-assigned attendee identifier
    pub attendee_id: AttendeeId,
    /// Applicant display name for the confirmation page
    pub attendee_name: String,
    /// Per-preference allocation decisions, in preference order
    pub assignments: Vec<AssignmentDecision>,
}

/// Per-workshop capacity summary for the registration form collaborator.
///
/// Advisory only: read outside the registration transaction, so a displayed
/// free slot can still be lost to a concurrent applicant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacitySummary {
    /// Hard capacity limit
    pub max_participants: u32,
    /// Committed assignments counted right now
    pub enrolled: u32,
}

impl CapacitySummary {
    /// Remaining free slots, saturating at zero.
    #[must_use]
    pub const fn remaining(self) -> u32 {
        self.max_participants.saturating_sub(self.enrolled)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request() -> RegistrationRequest {
        RegistrationRequest {
            program_id: ProgramId::new(7),
            first_name: "Thandi".to_string(),
            last_name: "Mokoena".to_string(),
            email: "thandi@example.org".to_string(),
            phone: "+27 11 555 0100".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(2013, 6, 1).unwrap(),
            gender: "female".to_string(),
            cohort_id: None,
            workshop_preferences: vec![WorkshopId::new(1)],
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn blank_name_is_rejected() {
        let mut req = request();
        req.first_name = "   ".to_string();
        assert!(matches!(
            req.validate(),
            Err(RegistrationError::Validation { .. })
        ));
    }

    #[test]
    fn empty_preference_list_is_rejected() {
        let mut req = request();
        req.workshop_preferences.clear();
        assert!(matches!(
            req.validate(),
            Err(RegistrationError::Validation { .. })
        ));
    }

    #[test]
    fn malformed_email_is_rejected() {
        for bad in ["", "no-at-sign", "two@@ats.example", "user@nodot"] {
            let mut req = request();
            req.email = bad.to_string();
            assert!(req.validate().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn cohort_acceptance_respects_status_and_capacity() {
        let mut cohort = Cohort {
            id: CohortId::new(1),
            program_id: ProgramId::new(7),
            name: "C1".to_string(),
            status: CohortStatus::Active,
            max_participants: 2,
            current_participants: 1,
        };
        assert!(cohort.accepts_assignments());

        cohort.current_participants = 2;
        assert!(!cohort.accepts_assignments());

        cohort.current_participants = 0;
        cohort.status = CohortStatus::Closed;
        assert!(!cohort.accepts_assignments());
    }

    #[test]
    fn ids_serialize_transparently_for_the_jsonb_columns() {
        // The preference list lands in JSONB as a plain integer array and
        // the prerequisite snapshot as an object with stringified id keys.
        let prefs = vec![WorkshopId::new(3), WorkshopId::new(1)];
        assert_eq!(
            serde_json::to_value(&prefs).unwrap(),
            serde_json::json!([3, 1])
        );

        let snapshot =
            std::collections::BTreeMap::from([(WorkshopId::new(3), true)]);
        assert_eq!(serde_json::to_string(&snapshot).unwrap(), r#"{"3":true}"#);
    }

    #[test]
    fn prerequisite_kind_round_trips_through_storage_form() {
        for kind in [
            PrerequisiteKind::Age,
            PrerequisiteKind::Skill,
            PrerequisiteKind::WorkshopCompletion,
            PrerequisiteKind::Equipment,
        ] {
            assert_eq!(PrerequisiteKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(PrerequisiteKind::parse("astrology").is_err());
    }
}
