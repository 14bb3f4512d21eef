use std::sync::Arc;

use chrono::{Duration, Utc};

use super::common::*;
use crate::workflows::interview::domain::{
    ActionScope, BanKind, BanOrigin, DelayedAction, OutcomeKind,
};

fn due_ban(scope: ActionScope) -> DelayedAction {
    DelayedAction::new(
        OutcomeKind::Ban,
        CANDIDATE,
        ts("2025-03-04T00:00:00Z"),
        scope,
    )
}

#[tokio::test]
async fn two_actions_for_one_subject_run_independently() {
    let harness = Harness::new();
    let actions = &harness.pipeline.stores.actions;
    actions
        .enqueue(due_ban(ActionScope::SingleCommunity(SECONDARY)))
        .await
        .expect("queued");
    actions
        .enqueue(due_ban(ActionScope::SingleCommunity(OTHER_SECONDARY)))
        .await
        .expect("queued");

    let report = harness
        .pipeline
        .scheduler
        .run_once(ts("2025-03-04T00:00:00Z"))
        .await;
    assert_eq!(report.executed, 2);
    assert_eq!(
        harness.gateway.kicks(),
        vec![(SECONDARY, CANDIDATE), (OTHER_SECONDARY, CANDIDATE)]
    );
    assert!(actions.list().is_empty());
}

#[tokio::test]
async fn unrecorded_action_logs_its_outcome_when_it_runs() {
    let harness = Harness::new();
    let mut action = due_ban(ActionScope::SingleCommunity(SECONDARY));
    action.interviewer_id = Some(INTERVIEWER);
    action.outcome_recorded = false;
    harness
        .pipeline
        .stores
        .actions
        .enqueue(action)
        .await
        .expect("queued");

    harness
        .pipeline
        .scheduler
        .run_once(ts("2025-03-04T00:30:00Z"))
        .await;
    assert_eq!(harness.results(), vec!["BAN".to_string()]);
}

#[tokio::test]
async fn partly_failed_action_is_reported_and_not_retried() {
    let harness = Harness::new();
    harness
        .gateway
        .kick_failures
        .lock()
        .unwrap()
        .insert(SECONDARY);
    harness
        .pipeline
        .stores
        .actions
        .enqueue(due_ban(ActionScope::AllCommunities))
        .await
        .expect("queued");

    let scheduler = &harness.pipeline.scheduler;
    let report = scheduler.run_once(ts("2025-03-04T00:00:00Z")).await;
    assert_eq!((report.executed, report.failed), (0, 1));
    assert_eq!(
        harness.gateway.kicks(),
        vec![(PRIMARY, CANDIDATE), (OTHER_SECONDARY, CANDIDATE)]
    );

    let again = scheduler.run_once(ts("2025-03-04T00:01:00Z")).await;
    assert_eq!((again.executed, again.failed), (0, 0));
}

#[tokio::test]
async fn lapsed_intervals_are_swept_each_tick() {
    let harness = Harness::new();
    let bans = &harness.pipeline.stores.bans;
    let recorded = ts("2025-01-01T00:00:00Z");
    bans.add(CANDIDATE, BanOrigin::Secondary, BanKind::TimeLimited, recorded)
        .await
        .expect("saved");
    bans.add(INTERVIEWER, BanOrigin::Primary, BanKind::Permanent, recorded)
        .await
        .expect("saved");

    let scheduler = &harness.pipeline.scheduler;
    let early = scheduler.run_once(recorded + Duration::days(89)).await;
    assert_eq!(early.expired_bans, 0);

    let lapsed = scheduler.run_once(recorded + Duration::days(90)).await;
    assert_eq!(lapsed.expired_bans, 1);
    let remaining = bans.list(recorded + Duration::days(90)).await.expect("listed");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].0, INTERVIEWER);
}

#[tokio::test]
async fn tick_includes_the_lifecycle_sweep() {
    let harness = Harness::new();
    let t0 = joined_at();
    harness.join(PRIMARY, CANDIDATE, t0).await;

    let report = harness
        .pipeline
        .scheduler
        .run_once(t0 + Duration::hours(6))
        .await;
    assert_eq!(report.sweep.reminders, 1);
}

#[tokio::test(start_paused = true)]
async fn spawned_loop_catches_up_overdue_work_immediately() {
    let harness = Harness::new();
    let overdue = DelayedAction::new(
        OutcomeKind::Fail,
        CANDIDATE,
        Utc::now() - Duration::minutes(5),
        ActionScope::SingleCommunity(SECONDARY),
    );
    harness
        .pipeline
        .stores
        .actions
        .enqueue(overdue)
        .await
        .expect("queued");

    let handle = Arc::clone(&harness.pipeline.scheduler).spawn();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    handle.abort();

    assert_eq!(harness.gateway.kicks(), vec![(SECONDARY, CANDIDATE)]);
    assert!(harness.pipeline.stores.actions.list().is_empty());
}
