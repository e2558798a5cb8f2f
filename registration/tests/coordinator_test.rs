//! End-to-end coordinator tests on the in-memory store.
//!
//! Cover the full state machine: duplicate rejection, strict prerequisite
//! aggregation, preference-ordered allocation, cohort binding, confirmation
//! codes, and the atomicity guarantee under injected failures.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use chrono::Utc;
use registration::store::memory::{FailurePoint, MemoryStore};
use registration::store::RegistrationStore;
use registration::types::{
    Cohort, CohortStatus, Prerequisite, PrerequisiteKind, Program, Workshop,
};
use registration::{
    CohortId, EngineConfig, ProgramId, RegistrationCoordinator, RegistrationError,
    RegistrationRequest, RegistrationStatus, WorkshopId,
};

const PROGRAM: ProgramId = ProgramId::new(7);
const WORKSHOP_A: WorkshopId = WorkshopId::new(1);
const WORKSHOP_B: WorkshopId = WorkshopId::new(2);
const COHORT_1: CohortId = CohortId::new(1);

fn min_age(years: u32, mandatory: bool) -> Prerequisite {
    Prerequisite {
        kind: PrerequisiteKind::Age,
        mandatory,
        requirement_value: years.to_string(),
        description: format!("Minimum age {years}"),
    }
}

/// Program 7 with two workshops and one cohort of capacity 1.
///
/// Workshop A requires age 10 (mandatory); workshop B lists age 15 as an
/// informational (non-mandatory) rule, so a younger applicant can still
/// request it without tripping the strict aggregate-then-reject policy.
async fn seed(store: &MemoryStore) {
    store
        .add_program(Program {
            id: PROGRAM,
            title: "Holiday Robotics Camp".to_string(),
            term: "Winter 2026".to_string(),
            registration_open: true,
            max_participants: 60,
            location: Some("Newtown Lab".to_string()),
        })
        .await;
    store
        .add_workshop(Workshop {
            id: WORKSHOP_A,
            program_id: PROGRAM,
            title: "Intro Robotics".to_string(),
            max_participants: 15,
            prerequisites: vec![min_age(10, true)],
        })
        .await;
    store
        .add_workshop(Workshop {
            id: WORKSHOP_B,
            program_id: PROGRAM,
            title: "Advanced Robotics".to_string(),
            max_participants: 15,
            prerequisites: vec![min_age(15, false)],
        })
        .await;
    store
        .add_cohort(Cohort {
            id: COHORT_1,
            program_id: PROGRAM,
            name: "Week 1".to_string(),
            status: CohortStatus::Active,
            max_participants: 1,
            current_participants: 0,
        })
        .await;
}

/// Route coordinator tracing through the test harness; `RUST_LOG` filters it.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn coordinator(store: MemoryStore) -> RegistrationCoordinator<MemoryStore> {
    init_tracing();
    RegistrationCoordinator::new(store, EngineConfig::default())
}

/// A twelve-year-old applicant requesting both workshops and the cohort.
fn twelve_year_old(email: &str) -> RegistrationRequest {
    let today = Utc::now().date_naive();
    RegistrationRequest {
        program_id: PROGRAM,
        first_name: "Thandi".to_string(),
        last_name: "Mokoena".to_string(),
        email: email.to_string(),
        phone: "+27 11 555 0100".to_string(),
        // A little over twelve years ago, whatever today is.
        date_of_birth: today - chrono::Duration::days(4400),
        gender: "female".to_string(),
        cohort_id: Some(COHORT_1),
        workshop_preferences: vec![WORKSHOP_A, WORKSHOP_B],
    }
}

#[tokio::test]
async fn twelve_year_old_end_to_end() {
    let store = MemoryStore::new();
    seed(&store).await;
    let coordinator = coordinator(store.clone());

    let outcome = coordinator
        .register(&twelve_year_old("thandi@example.org"))
        .await
        .unwrap();

    // Assigned to the first preference, at rank 1.
    assert_eq!(outcome.confirmation_code, "HP7-0001");
    assert_eq!(outcome.attendee_name, "Thandi Mokoena");
    assert_eq!(outcome.assignments.len(), 2);
    assert_eq!(outcome.assignments[0].workshop_id, WORKSHOP_A);
    assert_eq!(outcome.assignments[0].preference_rank, 1);
    assert!(outcome.assignments[0].assigned);
    assert!(!outcome.assignments[1].assigned);

    // Stored: pending, bound to the cohort, counter bumped exactly once.
    let rows = store.attendees().await;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.attendee.status, RegistrationStatus::Pending);
    assert_eq!(row.attendee.assigned_workshop_id, Some(WORKSHOP_A));
    assert_eq!(row.attendee.assigned_preference_rank, Some(1));
    assert_eq!(row.attendee.cohort_id, Some(COHORT_1));
    assert_eq!(row.confirmation_code.as_deref(), Some("HP7-0001"));
    assert_eq!(store.cohort(COHORT_1).await.unwrap().current_participants, 1);
    assert_eq!(store.enrollment(WORKSHOP_B).await, 0);
}

#[tokio::test]
async fn duplicate_email_rejected_with_no_extra_mutation() {
    let store = MemoryStore::new();
    seed(&store).await;
    let coordinator = coordinator(store.clone());

    coordinator
        .register(&twelve_year_old("dup@example.org"))
        .await
        .unwrap();
    let before_rows = store.attendees().await;
    let before_cohort = store.cohort(COHORT_1).await.unwrap();

    let mut second = twelve_year_old("dup@example.org");
    second.cohort_id = None; // even without the (full) cohort, the email blocks it
    let err = coordinator.register(&second).await.unwrap_err();

    assert_eq!(err, RegistrationError::DuplicateRegistration);
    assert_eq!(store.attendees().await, before_rows);
    assert_eq!(store.cohort(COHORT_1).await.unwrap(), before_cohort);
}

#[tokio::test]
async fn mandatory_failure_on_any_preference_blocks_everything() {
    let store = MemoryStore::new();
    seed(&store).await;
    // Harden workshop B's age rule into a mandatory one.
    store
        .add_workshop(Workshop {
            id: WORKSHOP_B,
            program_id: PROGRAM,
            title: "Advanced Robotics".to_string(),
            max_participants: 15,
            prerequisites: vec![min_age(15, true)],
        })
        .await;
    let coordinator = coordinator(store.clone());

    // Workshop A alone would pass, but policy aggregates across all
    // requested preferences and rejects the whole submission.
    let err = coordinator
        .register(&twelve_year_old("strict@example.org"))
        .await
        .unwrap_err();

    match err {
        RegistrationError::PrerequisitesNotMet { failures } => {
            assert_eq!(failures, vec!["Advanced Robotics: Minimum age 15".to_string()]);
        }
        other => panic!("expected PrerequisitesNotMet, got {other:?}"),
    }
    assert!(store.attendees().await.is_empty());
    assert_eq!(store.cohort(COHORT_1).await.unwrap().current_participants, 0);
}

#[tokio::test]
async fn first_preference_wins_when_both_have_space() {
    let store = MemoryStore::new();
    seed(&store).await;
    let coordinator = coordinator(store.clone());

    let mut request = twelve_year_old("order@example.org");
    request.cohort_id = None;
    let outcome = coordinator.register(&request).await.unwrap();

    assert_eq!(outcome.assignments[0].workshop_id, WORKSHOP_A);
    assert!(outcome.assignments[0].assigned);
}

#[tokio::test]
async fn full_first_preference_falls_through_to_second() {
    let store = MemoryStore::new();
    seed(&store).await;
    // Shrink workshop A to a single slot and take it.
    store
        .add_workshop(Workshop {
            id: WORKSHOP_A,
            program_id: PROGRAM,
            title: "Intro Robotics".to_string(),
            max_participants: 1,
            prerequisites: vec![min_age(10, true)],
        })
        .await;
    let coordinator = coordinator(store.clone());

    let mut first = twelve_year_old("first@example.org");
    first.cohort_id = None;
    coordinator.register(&first).await.unwrap();

    let mut second = twelve_year_old("second@example.org");
    second.cohort_id = None;
    let outcome = coordinator.register(&second).await.unwrap();

    let assigned = outcome.assignments.iter().find(|d| d.assigned).unwrap();
    assert_eq!(assigned.workshop_id, WORKSHOP_B);
    assert_eq!(assigned.preference_rank, 2);
    assert_eq!(store.enrollment(WORKSHOP_A).await, 1);
    assert_eq!(store.enrollment(WORKSHOP_B).await, 1);
}

#[tokio::test]
async fn no_capacity_anywhere_still_commits_unassigned() {
    let store = MemoryStore::new();
    seed(&store).await;
    for id in [WORKSHOP_A, WORKSHOP_B] {
        store
            .add_workshop(Workshop {
                id,
                program_id: PROGRAM,
                title: format!("Workshop {id}"),
                max_participants: 0,
                prerequisites: vec![],
            })
            .await;
    }
    let coordinator = coordinator(store.clone());

    let mut request = twelve_year_old("waitlist@example.org");
    request.cohort_id = None;
    let outcome = coordinator.register(&request).await.unwrap();

    // Unallocated is not fatal: the registration is stored pending.
    assert!(outcome.assignments.iter().all(|d| !d.assigned));
    assert_eq!(outcome.confirmation_code, "HP7-0001");
    let rows = store.attendees().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].attendee.assigned_workshop_id, None);
    assert_eq!(rows[0].attendee.status, RegistrationStatus::Pending);
}

#[tokio::test]
async fn requested_cohort_must_be_assignable() {
    let store = MemoryStore::new();
    seed(&store).await;
    let coordinator = coordinator(store.clone());

    // Fill the single cohort slot.
    coordinator
        .register(&twelve_year_old("taken@example.org"))
        .await
        .unwrap();

    // A full cohort is fatal even though a workshop slot was free: the
    // cohort was an explicit commitment.
    let err = coordinator
        .register(&twelve_year_old("late@example.org"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::CohortAssignmentFailed { .. }));
    assert_eq!(store.attendees().await.len(), 1);
    assert_eq!(store.enrollment(WORKSHOP_A).await, 1);
}

#[tokio::test]
async fn unknown_or_closed_cohort_is_fatal() {
    let store = MemoryStore::new();
    seed(&store).await;
    let coordinator = coordinator(store.clone());

    let mut ghost = twelve_year_old("ghost@example.org");
    ghost.cohort_id = Some(CohortId::new(99));
    assert!(matches!(
        coordinator.register(&ghost).await.unwrap_err(),
        RegistrationError::CohortAssignmentFailed { .. }
    ));

    store
        .add_cohort(Cohort {
            id: CohortId::new(2),
            program_id: PROGRAM,
            name: "Closed week".to_string(),
            status: CohortStatus::Closed,
            max_participants: 10,
            current_participants: 0,
        })
        .await;
    let mut closed = twelve_year_old("closed@example.org");
    closed.cohort_id = Some(CohortId::new(2));
    assert!(matches!(
        coordinator.register(&closed).await.unwrap_err(),
        RegistrationError::CohortAssignmentFailed { .. }
    ));

    assert!(store.attendees().await.is_empty());
}

#[tokio::test]
async fn unknown_program_and_closed_window_are_rejected() {
    let store = MemoryStore::new();
    seed(&store).await;
    let coordinator = coordinator(store.clone());

    let mut wrong_program = twelve_year_old("nowhere@example.org");
    wrong_program.program_id = ProgramId::new(99);
    wrong_program.cohort_id = None;
    assert!(matches!(
        coordinator.register(&wrong_program).await.unwrap_err(),
        RegistrationError::ProgramNotFound { .. }
    ));

    store
        .add_program(Program {
            id: PROGRAM,
            title: "Holiday Robotics Camp".to_string(),
            term: "Winter 2026".to_string(),
            registration_open: false,
            max_participants: 60,
            location: None,
        })
        .await;
    assert!(matches!(
        coordinator
            .register(&twelve_year_old("late-window@example.org"))
            .await
            .unwrap_err(),
        RegistrationError::RegistrationClosed { .. }
    ));
    assert!(store.attendees().await.is_empty());
}

#[tokio::test]
async fn invalid_submission_never_touches_the_store() {
    let store = MemoryStore::new();
    // Deliberately unseeded: a validation failure must not need the store.
    let coordinator = coordinator(store.clone());

    let mut request = twelve_year_old("novalid@example.org");
    request.workshop_preferences.clear();
    assert!(matches!(
        coordinator.register(&request).await.unwrap_err(),
        RegistrationError::Validation { .. }
    ));
}

#[tokio::test]
async fn unknown_workshop_ids_are_skipped() {
    let store = MemoryStore::new();
    seed(&store).await;
    let coordinator = coordinator(store.clone());

    let mut request = twelve_year_old("skipper@example.org");
    request.cohort_id = None;
    request.workshop_preferences = vec![WorkshopId::new(99), WORKSHOP_A];
    let outcome = coordinator.register(&request).await.unwrap();

    let assigned = outcome.assignments.iter().find(|d| d.assigned).unwrap();
    assert_eq!(assigned.workshop_id, WORKSHOP_A);
    assert_eq!(assigned.preference_rank, 2);
    assert!(!outcome.assignments[0].assigned);
}

#[tokio::test]
async fn confirmation_codes_follow_the_attendee_sequence() {
    let store = MemoryStore::new();
    seed(&store).await;
    let coordinator = coordinator(store.clone());

    let mut first = twelve_year_old("seq1@example.org");
    first.cohort_id = None;
    let mut second = twelve_year_old("seq2@example.org");
    second.cohort_id = None;

    let a = coordinator.register(&first).await.unwrap();
    let b = coordinator.register(&second).await.unwrap();
    assert_eq!(a.confirmation_code, "HP7-0001");
    assert_eq!(b.confirmation_code, "HP7-0002");
    assert_ne!(a.attendee_id, b.attendee_id);
}

/// Atomicity: a failure injected at any post-`Received` step leaves the
/// store exactly as it was, with no attendee row, cohort increment, or code.
#[tokio::test]
async fn injected_failure_at_any_step_rolls_everything_back() {
    for point in [
        FailurePoint::InsertAttendee,
        FailurePoint::IncrementCohort,
        FailurePoint::SetConfirmationCode,
        FailurePoint::Commit,
    ] {
        let store = MemoryStore::new();
        seed(&store).await;
        let coordinator = coordinator(store.clone());
        let pre_cohort = store.cohort(COHORT_1).await.unwrap();

        store.fail_at(point);
        let err = coordinator
            .register(&twelve_year_old("atomic@example.org"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, RegistrationError::Persistence { .. }),
            "unexpected error at {point:?}: {err:?}"
        );

        // Post-state == pre-state.
        assert!(store.attendees().await.is_empty(), "leak at {point:?}");
        assert_eq!(
            store.cohort(COHORT_1).await.unwrap(),
            pre_cohort,
            "cohort mutated at {point:?}"
        );
        assert_eq!(store.enrollment(WORKSHOP_A).await, 0);

        // And the store works again once the fault clears.
        store.clear_failure();
        let outcome = coordinator
            .register(&twelve_year_old("atomic@example.org"))
            .await
            .unwrap();
        assert!(!outcome.confirmation_code.is_empty());
    }
}

#[tokio::test]
async fn capacity_conflicts_are_retried_within_budget() {
    let store = MemoryStore::new();
    seed(&store).await;
    let coordinator = coordinator(store.clone());

    // Three conflicts fit exactly inside the default retry budget of three.
    store.inject_capacity_conflicts(3);
    let outcome = coordinator
        .register(&twelve_year_old("contended@example.org"))
        .await
        .unwrap();

    assert_eq!(outcome.confirmation_code, "HP7-0001");
    assert_eq!(store.attendees().await.len(), 1);
    assert_eq!(store.cohort(COHORT_1).await.unwrap().current_participants, 1);
}

#[tokio::test]
async fn exhausted_retry_budget_surfaces_capacity_conflict() {
    let store = MemoryStore::new();
    seed(&store).await;
    let coordinator = coordinator(store.clone());

    // One conflict more than the initial attempt plus three retries absorb.
    store.inject_capacity_conflicts(4);
    let err = coordinator
        .register(&twelve_year_old("starved@example.org"))
        .await
        .unwrap_err();

    assert_eq!(err, RegistrationError::CapacityConflict);
    assert!(store.attendees().await.is_empty());
    assert_eq!(store.cohort(COHORT_1).await.unwrap().current_participants, 0);
}

#[tokio::test]
async fn availability_reads_reflect_committed_state_only() {
    let store = MemoryStore::new();
    seed(&store).await;
    let coordinator = coordinator(store.clone());

    coordinator
        .register(&twelve_year_old("avail@example.org"))
        .await
        .unwrap();

    let workshops = coordinator
        .store()
        .workshop_availability(PROGRAM)
        .await
        .unwrap();
    let intro = workshops
        .iter()
        .find(|w| w.workshop_id == WORKSHOP_A)
        .unwrap();
    assert_eq!(intro.capacity.enrolled, 1);
    assert_eq!(intro.capacity.remaining(), 14);

    let cohorts = coordinator
        .store()
        .cohort_availability(PROGRAM)
        .await
        .unwrap();
    assert_eq!(cohorts[0].current_participants, 1);
}
