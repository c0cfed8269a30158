//! Quest progression integration tests
//!
//! Drives a live controller against in-memory collaborators under paused
//! tokio time:
//! - joining (immediate and scheduled starts)
//! - navigation, arrival, and step completion through to the XP award
//! - sequence and submission rejections
//! - stale route results and poller lifecycle

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;

use common::*;
use questwalk_client::{
    BackendError, PhaseKind, QuestError, QuestNotification, StepOutcome, Submission,
    SubmissionError,
};
use questwalk_shared::protocol::CompleteStepResponse;
use questwalk_shared::SequenceError;

fn step_response(quest_completed: bool, current_step: Option<u32>) -> CompleteStepResponse {
    CompleteStepResponse {
        quest_completed,
        current_step,
        total_steps: Some(2),
    }
}

/// Join, navigate to step 1, and walk onto its target.
async fn arrive_at_first_step(h: &Harness) {
    h.handle.join(quest(&[LOUVRE, NOTRE_DAME])).await.unwrap();
    h.handle.navigate().await.unwrap();
    assert_eq!(h.handle.update_location(LOUVRE).await.unwrap(), PhaseKind::Arrived);
}

// =============================================================================
// Joining
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_join_without_start_time_is_active() {
    let h = harness(0);

    let phase = h.handle.join(quest(&[LOUVRE, NOTRE_DAME])).await.unwrap();
    assert_eq!(phase, PhaseKind::Active);

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, PhaseKind::Active);
    assert_eq!(snapshot.current_step_number, Some(1));
    assert_eq!(snapshot.total_steps, Some(2));
    assert!(snapshot.active_route.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_quest_waits_until_start_time() {
    let h = harness(0);
    let mut q = quest(&[LOUVRE]);
    q.start_time = Some(Utc::now() + chrono::Duration::seconds(60));

    assert_eq!(h.handle.join(q).await.unwrap(), PhaseKind::Waiting);
    assert!(h.handle.snapshot().starts_at.is_some());

    let err = h.handle.navigate().await.unwrap_err();
    assert!(matches!(
        err,
        QuestError::InvalidTransition {
            phase: PhaseKind::Waiting,
            ..
        }
    ));

    tokio::time::sleep(Duration::from_secs(61)).await;
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, PhaseKind::Active);
    assert!(snapshot.starts_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_join_fetches_steps_when_missing() {
    let h = harness(0);
    let q = quest(&[]);
    *h.backend.detail.lock().unwrap() = vec![step(2, Some(NOTRE_DAME)), step(1, Some(LOUVRE))];

    h.handle.join(q).await.unwrap();
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.total_steps, Some(2));
    assert_eq!(snapshot.current_step_number, Some(1));
    assert_eq!(h.backend.started_quests.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_join_rejects_fetched_gapped_steps() {
    let h = harness(0);
    *h.backend.detail.lock().unwrap() = vec![step(1, Some(LOUVRE)), step(3, Some(NOTRE_DAME))];

    let err = h.handle.join(quest(&[])).await.unwrap_err();
    assert!(matches!(err, QuestError::InvalidQuest(_)));
    assert_eq!(h.handle.snapshot().phase, PhaseKind::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_join_rejects_gapped_steps() {
    let h = harness(0);
    let mut q = quest(&[LOUVRE]);
    q.steps.push(step(3, Some(NOTRE_DAME)));

    let err = h.handle.join(q).await.unwrap_err();
    assert!(matches!(err, QuestError::InvalidQuest(_)));
    assert_eq!(h.handle.snapshot().phase, PhaseKind::Idle);
    assert_eq!(h.backend.started_quests.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_join_rejects_out_of_range_target() {
    let h = harness(0);
    let q = quest(&[
        LOUVRE,
        questwalk_shared::Location {
            latitude: 95.0,
            longitude: 200.0,
        },
    ]);

    let err = h.handle.join(q).await.unwrap_err();
    assert!(matches!(err, QuestError::InvalidQuest(_)));
    assert_eq!(h.handle.snapshot().phase, PhaseKind::Idle);
    assert_eq!(h.backend.started_quests.load(Ordering::SeqCst), 0);
    assert_eq!(h.routes.calls(), 0);

    // Nothing is left half-joined.
    assert_eq!(h.handle.join(quest(&[LOUVRE])).await.unwrap(), PhaseKind::Active);
}

#[tokio::test(start_paused = true)]
async fn test_cannot_join_while_quest_in_progress() {
    let h = harness(0);
    h.handle.join(quest(&[LOUVRE])).await.unwrap();

    let err = h.handle.join(quest(&[NOTRE_DAME])).await.unwrap_err();
    assert!(matches!(
        err,
        QuestError::InvalidTransition {
            action: "join",
            phase: PhaseKind::Active
        }
    ));
}

// =============================================================================
// Full journey
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_step_quest_awards_xp_and_ranks_up() {
    let h = harness(190);
    let mut events = h.handle.subscribe();
    h.backend.script_step(Ok(step_response(false, Some(2))));
    h.backend.script_step(Ok(step_response(true, None)));

    h.handle.join(quest(&[LOUVRE, NOTRE_DAME])).await.unwrap();

    // Leg 1: the poller notices the arrival.
    let route = h.handle.navigate().await.unwrap();
    assert!(route.distance_m > 1000.0);
    assert_eq!(h.handle.snapshot().phase, PhaseKind::Navigating);

    h.location.set(LOUVRE);
    next_poll().await;
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, PhaseKind::Arrived);
    assert!(snapshot.active_route.is_none());

    // No polling once arrived.
    let polls = h.location.calls();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.location.calls(), polls);

    let outcome = h.handle.complete_task(1, Submission::empty()).await.unwrap();
    assert_eq!(
        outcome,
        StepOutcome::Advanced {
            completed_step: 1,
            next_step_number: 2
        }
    );
    assert_eq!(h.handle.snapshot().phase, PhaseKind::Active);

    // Leg 2
    h.handle.navigate().await.unwrap();
    h.location.set(NOTRE_DAME);
    next_poll().await;
    assert_eq!(h.handle.snapshot().phase, PhaseKind::Arrived);

    let outcome = h.handle.complete_task(2, Submission::empty()).await.unwrap();
    let (xp_reward, change) = match outcome {
        StepOutcome::QuestCompleted { xp_reward, change } => (xp_reward, change),
        other => panic!("expected quest completion, got {other:?}"),
    };
    assert_eq!(xp_reward, 25);
    assert_eq!(change.previous_xp, 190);
    assert_eq!(change.new_xp, 215);
    assert_eq!(change.previous_rank, 1);
    assert_eq!(change.new_rank, 2);
    assert!(change.leveled_up);

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, PhaseKind::Completed);
    assert_eq!(snapshot.total_xp, 215);
    assert_eq!(snapshot.rank, 2);
    assert_eq!(snapshot.rank_name, "Pathfinder");
    assert_eq!(h.backend.complete_step_calls(), 2);
    assert_eq!(h.backend.completed_quests.load(Ordering::SeqCst), 1);
    assert_eq!(h.submissions.uploads.load(Ordering::SeqCst), 2);
    assert!(h.backend.location_updates.load(Ordering::SeqCst) > 0);

    let mut completed = None;
    while let Ok(event) = events.try_recv() {
        if let QuestNotification::QuestCompleted { .. } = event {
            completed = Some(event);
        }
    }
    assert!(matches!(
        completed,
        Some(QuestNotification::QuestCompleted {
            total_xp: 215,
            rank: 2,
            leveled_up: true,
            ..
        })
    ));

    // A finished quest can be followed by another.
    assert_eq!(
        h.handle.join(quest(&[LOUVRE])).await.unwrap(),
        PhaseKind::Active
    );
}

#[tokio::test(start_paused = true)]
async fn test_quest_reward_used_when_complete_quest_fails() {
    let h = harness(0);
    *h.backend.quest_xp.lock().unwrap() = Err(BackendError::Transport("reset".into()));
    let mut q = quest(&[LOUVRE]);
    q.reward_xp = 40;

    h.handle.join(q).await.unwrap();
    h.handle.navigate().await.unwrap();
    h.handle.update_location(LOUVRE).await.unwrap();

    let outcome = h.handle.complete_task(1, Submission::empty()).await.unwrap();
    assert!(matches!(
        outcome,
        StepOutcome::QuestCompleted { xp_reward: 40, .. }
    ));
    assert_eq!(h.handle.snapshot().total_xp, 40);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_sequence_backend_step_falls_back_to_local() {
    let h = harness(0);
    h.backend.script_step(Ok(step_response(false, Some(5))));
    arrive_at_first_step(&h).await;

    let outcome = h.handle.complete_task(1, Submission::empty()).await.unwrap();
    assert_eq!(
        outcome,
        StepOutcome::Advanced {
            completed_step: 1,
            next_step_number: 2
        }
    );
    assert_eq!(h.handle.snapshot().current_step_number, Some(2));
}

// =============================================================================
// Rejections
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_skipping_a_step_is_rejected_without_backend_call() {
    let h = harness(0);
    arrive_at_first_step(&h).await;

    let err = h
        .handle
        .complete_task(3, Submission::empty())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        QuestError::OutOfSequence(SequenceError::OutOfSequence {
            expected: 1,
            attempted: 3
        })
    );
    assert_eq!(h.backend.complete_step_calls(), 0);
    assert_eq!(h.submissions.uploads.load(Ordering::SeqCst), 0);
    assert_eq!(h.handle.snapshot().phase, PhaseKind::Arrived);
}

#[tokio::test(start_paused = true)]
async fn test_complete_before_arrival_is_rejected() {
    let h = harness(0);
    h.handle.join(quest(&[LOUVRE])).await.unwrap();
    h.handle.navigate().await.unwrap();

    let err = h
        .handle
        .complete_task(1, Submission::empty())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QuestError::InvalidTransition {
            phase: PhaseKind::Navigating,
            ..
        }
    ));
    assert_eq!(h.backend.complete_step_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_skipping_ahead_from_second_step_is_rejected() {
    let h = harness(0);
    h.handle
        .join(quest(&[LOUVRE, NOTRE_DAME, START]))
        .await
        .unwrap();
    h.handle.navigate().await.unwrap();
    assert_eq!(h.handle.update_location(LOUVRE).await.unwrap(), PhaseKind::Arrived);
    assert_eq!(
        h.handle.complete_task(1, Submission::empty()).await.unwrap(),
        StepOutcome::Advanced {
            completed_step: 1,
            next_step_number: 2
        }
    );

    h.handle.navigate().await.unwrap();
    assert_eq!(
        h.handle.update_location(NOTRE_DAME).await.unwrap(),
        PhaseKind::Arrived
    );

    let err = h
        .handle
        .complete_task(3, Submission::empty())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        QuestError::OutOfSequence(SequenceError::OutOfSequence {
            expected: 2,
            attempted: 3
        })
    );
    assert_eq!(h.backend.complete_step_calls(), 1);
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, PhaseKind::Arrived);
    assert_eq!(snapshot.current_step_number, Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_photo_step_requires_photo() {
    let h = harness(0);
    let mut q = quest(&[LOUVRE]);
    q.steps[0].requires_photo = true;
    h.handle.join(q).await.unwrap();
    h.handle.navigate().await.unwrap();
    h.handle.update_location(LOUVRE).await.unwrap();

    let err = h
        .handle
        .complete_task(1, Submission::empty())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        QuestError::SubmissionIncomplete(SubmissionError::MissingPhoto)
    );

    let outcome = h
        .handle
        .complete_task(1, Submission::empty().with_photo("photos/louvre.jpg"))
        .await
        .unwrap();
    assert!(matches!(outcome, StepOutcome::QuestCompleted { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_submission_is_rejected() {
    let h = harness(0);
    *h.backend.step_delay.lock().unwrap() = Duration::from_secs(5);
    arrive_at_first_step(&h).await;

    let second = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.handle.complete_task(1, Submission::empty()).await
    };
    let (first, second) =
        futures::future::join(h.handle.complete_task(1, Submission::empty()), second).await;

    assert!(matches!(first, Ok(StepOutcome::Advanced { .. })));
    assert_eq!(second, Err(QuestError::SubmissionInProgress));
    assert_eq!(h.backend.complete_step_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_submission_returns_to_arrived() {
    let h = harness(0);
    h.backend
        .script_step(Err(BackendError::Http { status: 503 }));
    arrive_at_first_step(&h).await;

    let err = h
        .handle
        .complete_task(1, Submission::empty())
        .await
        .unwrap_err();
    assert_eq!(err, QuestError::Backend(BackendError::Http { status: 503 }));
    assert!(err.is_retryable());

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, PhaseKind::Arrived);
    assert_eq!(snapshot.current_step_number, Some(1));

    // Retrying the same step goes through.
    let outcome = h.handle.complete_task(1, Submission::empty()).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Advanced { .. }));
}

// =============================================================================
// Navigation failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_route_unavailable_keeps_active() {
    let h = harness(0);
    let mut events = h.handle.subscribe();
    h.routes.push(Duration::ZERO, None);
    h.handle.join(quest(&[LOUVRE])).await.unwrap();

    let err = h.handle.navigate().await.unwrap_err();
    assert_eq!(err, QuestError::RouteUnavailable);
    assert_eq!(h.handle.snapshot().phase, PhaseKind::Active);

    let mut reported = false;
    while let Ok(event) = events.try_recv() {
        if let QuestNotification::Error {
            action, retryable, ..
        } = event
        {
            assert_eq!(action, "navigate");
            assert!(retryable);
            reported = true;
        }
    }
    assert!(reported);

    // Retry succeeds once routing is back.
    h.handle.navigate().await.unwrap();
    assert_eq!(h.handle.snapshot().phase, PhaseKind::Navigating);
}

#[tokio::test(start_paused = true)]
async fn test_navigate_without_any_location_fails() {
    let h = harness(0);
    *h.location.position.lock().unwrap() = None;
    h.handle.join(quest(&[LOUVRE])).await.unwrap();

    let err = h.handle.navigate().await.unwrap_err();
    assert_eq!(err, QuestError::MissingLocation);
    assert_eq!(h.handle.snapshot().phase, PhaseKind::Active);
    assert_eq!(h.routes.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_navigate_to_step_without_target_fails() {
    let h = harness(0);
    let mut q = quest(&[LOUVRE]);
    q.steps[0].location = None;
    h.handle.join(q).await.unwrap();

    assert_eq!(
        h.handle.navigate().await.unwrap_err(),
        QuestError::MissingLocation
    );
    assert_eq!(h.routes.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_route_refresh_is_dropped() {
    let h = harness(0);
    let mut events = h.handle.subscribe();
    h.routes.push(Duration::ZERO, Some(route(1000.0)));
    h.routes.push(Duration::from_secs(20), Some(route(111.0)));
    h.routes.push(Duration::ZERO, Some(route(333.0)));

    h.handle.join(quest(&[LOUVRE])).await.unwrap();
    h.handle.navigate().await.unwrap();

    // Drifting off the route origin starts a slow refresh for leg 1.
    h.location.set(DRIFTED);
    next_poll().await;
    assert_eq!(h.routes.calls(), 2);

    h.handle.end_route().await.unwrap();
    let leg_two = h.handle.navigate().await.unwrap();
    assert_eq!(leg_two.distance_m, 333.0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, PhaseKind::Navigating);
    assert_eq!(snapshot.active_route.map(|r| r.distance_m), Some(333.0));
    assert_eq!(h.routes.calls(), 3);

    while let Ok(event) = events.try_recv() {
        if let QuestNotification::RouteUpdated { distance_m, .. } = event {
            assert_ne!(distance_m, 111.0);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_refresh_landing_after_arrival_is_dropped() {
    let h = harness(0);
    let mut events = h.handle.subscribe();
    h.routes.push(Duration::ZERO, Some(route(1000.0)));
    h.routes.push(Duration::from_secs(20), Some(route(111.0)));

    h.handle.join(quest(&[LOUVRE])).await.unwrap();
    h.handle.navigate().await.unwrap();
    h.location.set(DRIFTED);
    next_poll().await;
    assert_eq!(h.routes.calls(), 2);

    assert_eq!(h.handle.update_location(LOUVRE).await.unwrap(), PhaseKind::Arrived);

    tokio::time::sleep(Duration::from_secs(30)).await;
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, PhaseKind::Arrived);
    assert!(snapshot.active_route.is_none());

    while let Ok(event) = events.try_recv() {
        if let QuestNotification::RouteUpdated { distance_m, .. } = event {
            assert_ne!(distance_m, 111.0);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_route_refresh_replaces_route_on_same_leg() {
    let h = harness(0);
    h.routes.push(Duration::ZERO, Some(route(1000.0)));
    h.routes.push(Duration::from_secs(2), Some(route(800.0)));

    h.handle.join(quest(&[LOUVRE])).await.unwrap();
    h.handle.navigate().await.unwrap();
    h.location.set(DRIFTED);
    next_poll().await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, PhaseKind::Navigating);
    assert_eq!(snapshot.active_route.map(|r| r.distance_m), Some(800.0));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_end_route_stops_polling() {
    let h = harness(0);
    h.handle.join(quest(&[LOUVRE])).await.unwrap();
    h.handle.navigate().await.unwrap();
    next_poll().await;

    h.handle.end_route().await.unwrap();
    assert_eq!(h.handle.snapshot().phase, PhaseKind::Active);
    assert!(h.handle.snapshot().active_route.is_none());

    let polls = h.location.calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.location.calls(), polls);
}

#[tokio::test(start_paused = true)]
async fn test_abandon_ends_quest_and_allows_rejoin() {
    let h = harness(0);
    h.handle.join(quest(&[LOUVRE])).await.unwrap();
    h.handle.navigate().await.unwrap();

    h.handle.abandon_quest().await.unwrap();
    assert_eq!(h.handle.snapshot().phase, PhaseKind::Ended);

    let polls = h.location.calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.location.calls(), polls);

    assert!(h.handle.navigate().await.is_err());
    assert_eq!(
        h.handle.join(quest(&[NOTRE_DAME])).await.unwrap(),
        PhaseKind::Active
    );
}

#[tokio::test(start_paused = true)]
async fn test_end_route_from_active_is_invalid() {
    let h = harness(0);
    h.handle.join(quest(&[LOUVRE])).await.unwrap();

    let err = h.handle.end_route().await.unwrap_err();
    assert!(matches!(
        err,
        QuestError::InvalidTransition {
            phase: PhaseKind::Active,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_background_stops_navigation() {
    let h = harness(0);
    h.handle.join(quest(&[LOUVRE])).await.unwrap();
    h.handle.navigate().await.unwrap();

    assert_eq!(h.handle.background().await.unwrap(), PhaseKind::Active);

    let polls = h.location.calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.location.calls(), polls);
}

#[tokio::test(start_paused = true)]
async fn test_step_result_after_background_is_dropped() {
    let h = harness(0);
    *h.backend.step_delay.lock().unwrap() = Duration::from_secs(5);
    arrive_at_first_step(&h).await;

    let background = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.handle.background().await
    };
    let (outcome, phase) =
        futures::future::join(h.handle.complete_task(1, Submission::empty()), background).await;

    assert_eq!(outcome, Err(QuestError::Cancelled));
    assert_eq!(phase.unwrap(), PhaseKind::Arrived);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, PhaseKind::Arrived);
    assert_eq!(snapshot.current_step_number, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_route_result_after_background_is_dropped() {
    let h = harness(0);
    h.routes.push(Duration::from_secs(5), Some(route(1000.0)));
    h.handle.join(quest(&[LOUVRE])).await.unwrap();

    let background = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.handle.background().await
    };
    let (route, phase) = futures::future::join(h.handle.navigate(), background).await;

    assert_eq!(route, Err(QuestError::Cancelled));
    assert_eq!(phase.unwrap(), PhaseKind::Active);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, PhaseKind::Active);
    assert!(snapshot.active_route.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_logout_resets_session_and_profile() {
    let h = harness(500);
    h.handle.join(quest(&[LOUVRE])).await.unwrap();
    h.handle.navigate().await.unwrap();

    h.handle.logout().await.unwrap();
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, PhaseKind::Idle);
    assert_eq!(snapshot.quest_id, None);
    assert_eq!(snapshot.total_xp, 0);
    assert_eq!(snapshot.rank, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_manual_location_is_rejected() {
    let h = harness(0);
    let bad = questwalk_shared::Location {
        latitude: 91.0,
        longitude: 0.0,
    };
    let err = h.handle.update_location(bad).await.unwrap_err();
    assert!(matches!(err, QuestError::InvalidLocation(_)));
}

#[tokio::test(start_paused = true)]
async fn test_handle_reports_closed_controller() {
    let h = harness(0);
    h.handle.shutdown().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
        h.handle.join(quest(&[LOUVRE])).await.unwrap_err(),
        QuestError::ControllerClosed
    );
}
