//! Capacity allocation.
//!
//! Preference-ordered first-fit: walk the applicant's declared order and
//! assign the first workshop that both passed prerequisite validation and has
//! a free slot. An applicant is assigned to at most one workshop even when
//! several preferences have space.
//!
//! The allocator itself is pure. The capacity snapshot it consults must be
//! produced by the same store transaction that will write the assignment
//! (row-locked in Postgres), otherwise two concurrent registrations can both
//! observe the last free slot and oversubscribe the workshop.

use crate::types::{AssignmentDecision, CapacitySummary, WorkshopId};

/// The outcome of one allocation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// One decision per requested preference, in preference order.
    /// At most one has `assigned == true`.
    pub decisions: Vec<AssignmentDecision>,
}

impl Allocation {
    /// The winning decision, if any preference was assigned.
    #[must_use]
    pub fn assigned(&self) -> Option<AssignmentDecision> {
        self.decisions.iter().copied().find(|d| d.assigned)
    }
}

/// Decide the single workshop (if any) for an applicant.
///
/// * `preferences`: workshop ids in the applicant's declared order.
/// * `is_satisfied`: the prerequisite validation verdict per workshop.
/// * `capacity_of`: capacity snapshot from the enclosing transaction;
///   `None` marks a workshop id that does not exist (skipped, never fatal).
///
/// Finding no assignable workshop is not an error: the registration may
/// still be stored unassigned, per coordinator policy.
pub fn allocate(
    preferences: &[WorkshopId],
    mut is_satisfied: impl FnMut(WorkshopId) -> bool,
    mut capacity_of: impl FnMut(WorkshopId) -> Option<CapacitySummary>,
) -> Allocation {
    let mut decisions = Vec::with_capacity(preferences.len());
    let mut assigned_one = false;

    for (index, &workshop_id) in preferences.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)] // preference lists are tiny
        let rank = (index + 1) as u32;
        let mut decision = AssignmentDecision {
            workshop_id,
            preference_rank: rank,
            assigned: false,
        };

        if !assigned_one && is_satisfied(workshop_id) {
            if let Some(capacity) = capacity_of(workshop_id) {
                if capacity.enrolled < capacity.max_participants {
                    decision.assigned = true;
                    assigned_one = true;
                }
            }
        }

        decisions.push(decision);
    }

    Allocation { decisions }
}
