use chrono::Duration;

use super::common::*;
use crate::workflows::interview::admin::AdjustMode;
use crate::workflows::interview::domain::{
    ActionScope, BanKind, BanOrigin, CandidateStatus, ChannelRef, DelayedAction, InterviewRecord,
    OutcomeKind, Period, SubjectId,
};
use crate::workflows::interview::settings::ProjectionChannels;

const STATS_CHANNEL: ChannelRef = ChannelRef(911);
const SUMMARY_CHANNEL: ChannelRef = ChannelRef(912);

fn march() -> Period {
    Period {
        year: 2025,
        month: 3,
    }
}

fn projecting_harness() -> Harness {
    let mut settings = settings();
    settings.channels = ProjectionChannels {
        dashboard: Some(ChannelRef(910)),
        interviewer_stats: Some(STATS_CHANNEL),
        monthly_summary: Some(SUMMARY_CHANNEL),
    };
    Harness::with_settings(settings)
}

#[tokio::test]
async fn manual_adjustments_add_remove_and_set() {
    let harness = Harness::new();
    let admin = &harness.pipeline.admin;

    let added = admin
        .adjust_interview_count(INTERVIEWER, AdjustMode::Add, 3, march())
        .await
        .expect("added");
    assert_eq!((added.added, added.manual_total), (3, 3));

    let removed = admin
        .adjust_interview_count(INTERVIEWER, AdjustMode::Sub, 5, march())
        .await
        .expect("removed");
    assert_eq!((removed.removed, removed.manual_total), (3, 0));

    let set = admin
        .adjust_interview_count(INTERVIEWER, AdjustMode::Set, 2, march())
        .await
        .expect("set");
    assert_eq!((set.removed, set.added, set.manual_total), (0, 2, 2));

    let report = admin.monthly_report(march()).await.expect("report");
    let entry = report
        .interviewers
        .iter()
        .find(|entry| entry.interviewer_id == INTERVIEWER)
        .expect("interviewer listed");
    assert_eq!(entry.count, 2);
    assert!(!entry.goal_met);
    assert_eq!(report.outcomes.passes + report.outcomes.rejections, 0);
}

#[tokio::test]
async fn adjustments_leave_real_outcomes_alone() {
    let harness = Harness::new();
    let at = joined_at();
    harness.pipeline.stores.state.update(|state| {
        state.record_outcome(InterviewRecord::new(at, INTERVIEWER, CANDIDATE, "PASS"));
    });

    harness
        .pipeline
        .admin
        .adjust_interview_count(INTERVIEWER, AdjustMode::Set, 0, march())
        .await
        .expect("set");
    assert_eq!(harness.results(), vec!["PASS".to_string()]);
}

#[tokio::test]
async fn forced_refresh_posts_once_then_edits() {
    let harness = projecting_harness();
    let now = joined_at();
    harness.pipeline.stores.state.update(|state| {
        state.record_outcome(InterviewRecord::new(
            now - Duration::days(40),
            INTERVIEWER,
            CANDIDATE,
            "FAIL",
        ));
    });
    let admin = &harness.pipeline.admin;

    let months = admin.refresh_stats_now(now).await.expect("refreshed");
    assert_eq!(months, 2, "January and March");
    assert_eq!(harness.gateway.sent_to(STATS_CHANNEL).len(), 2);
    assert_eq!(harness.gateway.sent_to(SUMMARY_CHANNEL).len(), 1);

    admin.refresh_stats_now(now).await.expect("refreshed again");
    assert_eq!(harness.gateway.sent_to(STATS_CHANNEL).len(), 2);
    let edits = harness.gateway.log(|log| log.edited.len());
    assert_eq!(edits, 3);
    assert_eq!(
        harness
            .pipeline
            .stores
            .state
            .read(|state| state.interviewer_stats_messages.len()),
        2
    );
}

#[tokio::test]
async fn candidates_are_grouped_by_interviewer() {
    let harness = Harness::new();
    let t0 = joined_at();
    harness.seed(PRIMARY, CANDIDATE, CandidateStatus::AwaitingOnboarding, t0);
    harness.pipeline.stores.state.update(|state| {
        state.record_outcome(InterviewRecord::new(t0, SubjectId(201), SubjectId(101), "PASS"));
    });
    *harness.gateway.passed.lock().unwrap() = vec![CANDIDATE, SubjectId(101), SubjectId(102)];
    harness
        .gateway
        .names
        .lock()
        .unwrap()
        .extend([(INTERVIEWER, "Rin".to_string()), (CANDIDATE, "Mika".to_string())]);

    let grouped = harness
        .pipeline
        .admin
        .list_candidates_by_interviewer()
        .await
        .expect("listed");
    let flattened: Vec<(String, Vec<String>)> = grouped
        .into_iter()
        .map(|group| (group.interviewer_label, group.candidates))
        .collect();
    assert_eq!(
        flattened,
        vec![
            ("ID:201".to_string(), vec!["ID:101".to_string()]),
            ("Rin".to_string(), vec!["Mika".to_string()]),
            ("unknown".to_string(), vec!["ID:102".to_string()]),
        ]
    );
}

#[tokio::test]
async fn queued_actions_can_be_listed_and_cancelled() {
    let harness = Harness::new();
    let action = DelayedAction::new(
        OutcomeKind::Interval,
        CANDIDATE,
        ts("2025-03-04T00:00:00Z"),
        ActionScope::SingleCommunity(SECONDARY),
    );
    let id = action.id;
    harness
        .pipeline
        .stores
        .actions
        .enqueue(action)
        .await
        .expect("queued");
    let admin = &harness.pipeline.admin;

    assert_eq!(admin.list_actions().len(), 1);
    assert!(admin.cancel_action(id).await.expect("cancelled"));
    assert!(!admin.cancel_action(id).await.expect("already gone"));
    assert!(admin.list_actions().is_empty());

    let report = harness
        .pipeline
        .scheduler
        .run_once(ts("2025-03-05T00:00:00Z"))
        .await;
    assert_eq!(report.executed, 0);
    assert!(harness.gateway.kicks().is_empty());
}

#[tokio::test]
async fn ban_listing_reports_expiry_and_clears() {
    let harness = Harness::new();
    let t0 = joined_at();
    let bans = &harness.pipeline.stores.bans;
    bans.add(CANDIDATE, BanOrigin::Secondary, BanKind::TimeLimited, t0)
        .await
        .expect("saved");
    bans.add(SubjectId(101), BanOrigin::Primary, BanKind::Permanent, t0)
        .await
        .expect("saved");
    let admin = &harness.pipeline.admin;

    let listed = admin.list_bans(t0).await.expect("listed");
    assert_eq!(listed.len(), 2);
    let interval = listed
        .iter()
        .find(|listing| listing.subject_id == CANDIDATE)
        .expect("interval listed");
    assert_eq!(interval.expires_at, Some(t0 + Duration::days(90)));

    assert!(admin.clear_ban(CANDIDATE).await.expect("cleared"));
    assert!(!admin.clear_ban(CANDIDATE).await.expect("nothing left"));
    assert!(bans.check(CANDIDATE, t0).await.is_none());
}
