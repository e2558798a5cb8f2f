//! Prerequisite validation.
//!
//! Pure eligibility checking of one applicant against a workshop's rule set.
//! No I/O: the caller fetches the workshop (with its prerequisites) first and
//! the validator only reads. Each (applicant, requested-workshop) pair is
//! validated exactly once, before allocation.

use chrono::{Datelike, NaiveDate};

use crate::types::{Prerequisite, PrerequisiteKind, RegistrationRequest, Workshop};

/// External eligibility records for the non-age prerequisite kinds.
///
/// Rules of kind `skill`, `workshop_completion` and `equipment` consult
/// records the engine does not own. An assessment service, a completion
/// tracker, or an inventory system can implement this trait without touching
/// the validator.
pub trait EligibilityProvider: Send + Sync {
    /// Whether the applicant holds the named skill.
    fn has_skill(&self, applicant: &RegistrationRequest, requirement: &str) -> bool;

    /// Whether the applicant completed the named workshop previously.
    fn has_completed_workshop(&self, applicant: &RegistrationRequest, requirement: &str) -> bool;

    /// Whether the applicant can bring the named equipment.
    fn has_equipment(&self, applicant: &RegistrationRequest, requirement: &str) -> bool;
}

/// Provider with no external records: every non-age rule is satisfied.
///
/// Until the corresponding collaborators exist, these rule kinds are
/// informational only and never block a registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenEligibility;

impl EligibilityProvider for OpenEligibility {
    fn has_skill(&self, _applicant: &RegistrationRequest, _requirement: &str) -> bool {
        true
    }

    fn has_completed_workshop(&self, _applicant: &RegistrationRequest, _requirement: &str) -> bool {
        true
    }

    fn has_equipment(&self, _applicant: &RegistrationRequest, _requirement: &str) -> bool {
        true
    }
}

/// Outcome of validating one applicant against one workshop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerequisiteReport {
    /// `true` iff every mandatory prerequisite is satisfied
    pub satisfied: bool,
    /// Descriptions of every unmet mandatory prerequisite, in rule order
    pub failed: Vec<String>,
}

impl PrerequisiteReport {
    /// A report for a workshop with no mandatory rules.
    #[must_use]
    pub const fn satisfied() -> Self {
        Self {
            satisfied: true,
            failed: Vec::new(),
        }
    }
}

/// Evaluate every mandatory prerequisite of `workshop` against `applicant`.
///
/// Non-mandatory prerequisites are informational and never evaluated. The
/// report collects *every* unmet description, not just the first, for
/// user-facing display. `today` is the evaluation date, injected so age
/// boundaries are testable.
#[must_use]
pub fn validate_workshop(
    applicant: &RegistrationRequest,
    workshop: &Workshop,
    provider: &dyn EligibilityProvider,
    today: NaiveDate,
) -> PrerequisiteReport {
    let mut failed = Vec::new();

    for prereq in &workshop.prerequisites {
        if !prereq.mandatory {
            continue;
        }
        if !check_prerequisite(applicant, prereq, provider, today) {
            failed.push(prereq.description.clone());
        }
    }

    PrerequisiteReport {
        satisfied: failed.is_empty(),
        failed,
    }
}

/// Evaluate a single rule. Mandatory-ness is the caller's concern.
fn check_prerequisite(
    applicant: &RegistrationRequest,
    prereq: &Prerequisite,
    provider: &dyn EligibilityProvider,
    today: NaiveDate,
) -> bool {
    match prereq.kind {
        PrerequisiteKind::Age => {
            // An unparseable minimum age fails the rule: bad reference data
            // must not waive a mandatory check.
            let Ok(min_age) = prereq.requirement_value.trim().parse::<i32>() else {
                return false;
            };
            age_in_years(applicant.date_of_birth, today) >= min_age
        }
        PrerequisiteKind::Skill => provider.has_skill(applicant, &prereq.requirement_value),
        PrerequisiteKind::WorkshopCompletion => {
            provider.has_completed_workshop(applicant, &prereq.requirement_value)
        }
        PrerequisiteKind::Equipment => provider.has_equipment(applicant, &prereq.requirement_value),
    }
}

/// Whole calendar years between `date_of_birth` and `today`.
///
/// Calendar-aware: the year count only ticks once the birthday (month/day)
/// has passed, so it is exact across leap years, unlike a 365-day divisor.
/// A Feb 29 birthday counts on Mar 1 in non-leap years. Negative for a
/// date of birth in the future.
#[must_use]
pub fn age_in_years(date_of_birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - date_of_birth.year();
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        age -= 1;
    }
    age
}
