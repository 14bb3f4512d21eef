use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::CandidateLifecycle;
use crate::workflows::interview::domain::{CandidateProgress, CandidateStatus, ProgressKey};

const REMINDER_AFTER_HOURS: i64 = 6;
const WARNING_AFTER_HOURS: i64 = 24;
const REMOVAL_AFTER_HOURS: i64 = 36;
const CANDIDATE_NOTICE_MINUTES: i64 = 60;
const INTERVIEWER_NOTICE_MINUTES: i64 = 10;
const NOTICE_RESET_MINUTES: i64 = 1;

const PROFILE_REMINDER: &str =
    "Reminder: please post your profile in this channel so we can arrange your interview.";
const PROFILE_WARNING: &str =
    "Your profile is still missing. Without it you will be removed 36 hours after joining.";
const REMOVAL_REASON: &str = "no profile submitted within 36 hours";

/// Counts of what one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub reminders: usize,
    pub warnings: usize,
    pub removals: usize,
    pub candidate_notices: usize,
    pub interviewer_notices: usize,
}

#[derive(Clone, Copy)]
enum ProfileNudge {
    Reminder,
    Warning,
}

impl CandidateLifecycle {
    /// Time-driven checks over every open record: profile reminders, removal of silent
    /// joiners, and pre-interview notices.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let keys: Vec<ProgressKey> = self
            .stores
            .state
            .read(|state| state.candidates.keys().cloned().collect());

        let mut report = SweepReport::default();
        for key in keys {
            let _guard = self.locks.acquire(&key).await;
            let Some(record) = self.candidate(&key) else {
                continue;
            };
            match record.status {
                CandidateStatus::NoProfile if !record.profile_evaluated => {
                    self.profile_deadlines(&key, &record, now, &mut report).await
                }
                CandidateStatus::Scheduled | CandidateStatus::Interviewed => {
                    self.interview_notices(&key, &record, now, &mut report).await
                }
                _ => {}
            }
        }

        if report != SweepReport::default() {
            debug!(?report, "sweep finished");
        }
        report
    }

    async fn profile_deadlines(
        &self,
        key: &ProgressKey,
        record: &CandidateProgress,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let elapsed = now - record.joined_at;

        if elapsed >= Duration::hours(REMOVAL_AFTER_HOURS) {
            match self
                .gateway
                .kick_member(record.community_id, record.subject_id, REMOVAL_REASON)
                .await
            {
                Ok(()) => {
                    self.audit(&format!(
                        "Removed <@{}> from community {}: {REMOVAL_REASON}",
                        record.subject_id, record.community_id
                    ))
                    .await;
                }
                Err(err) if err.is_not_found() => {
                    debug!(%key, "silent joiner already gone")
                }
                Err(err) => {
                    warn!(%key, error = %err, "removing silent joiner failed; retrying next sweep");
                    return;
                }
            }
            if let Some(removed) = self
                .stores
                .state
                .update(|state| state.remove_candidate(key))
            {
                info!(%key, "record closed after 36 hours without a profile");
                self.release_channels(&removed.owned_channels()).await;
                self.persist(key).await;
                report.removals += 1;
            }
            return;
        }

        let nudge = if elapsed >= Duration::hours(WARNING_AFTER_HOURS) && !record.warned_at_24h {
            ProfileNudge::Warning
        } else if elapsed >= Duration::hours(REMINDER_AFTER_HOURS)
            && !record.reminded_at_6h
            && !record.warned_at_24h
        {
            ProfileNudge::Reminder
        } else {
            return;
        };
        let Some(channel) = record.channel else {
            return;
        };

        let text = match nudge {
            ProfileNudge::Reminder => PROFILE_REMINDER,
            ProfileNudge::Warning => PROFILE_WARNING,
        };
        match self.gateway.send_message(channel, text).await {
            Ok(_) => {
                self.with_candidate(key, |progress| {
                    progress.reminded_at_6h = true;
                    if matches!(nudge, ProfileNudge::Warning) {
                        progress.warned_at_24h = true;
                    }
                });
                match nudge {
                    ProfileNudge::Reminder => report.reminders += 1,
                    ProfileNudge::Warning => report.warnings += 1,
                }
                self.persist(key).await;
            }
            Err(err) if err.is_not_found() => {
                self.stores.state.update(|state| state.remove_candidate(key));
                info!(%key, "interview channel vanished; record dropped");
                self.persist(key).await;
            }
            Err(err) => warn!(%key, error = %err, "profile nudge failed; retrying next sweep"),
        }
    }

    async fn interview_notices(
        &self,
        key: &ProgressKey,
        record: &CandidateProgress,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let Some(starts) = record.scheduled_interview_at else {
            return;
        };

        if now >= starts + Duration::minutes(NOTICE_RESET_MINUTES) {
            if record.notified_candidate_1h || record.notified_interviewer_10m {
                self.with_candidate(key, |progress| {
                    progress.notified_candidate_1h = false;
                    progress.notified_interviewer_10m = false;
                });
                self.persist(key).await;
            }
            return;
        }
        if now >= starts {
            return;
        }

        let remaining = starts - now;
        let lead = starts - record.schedule_registered_at.unwrap_or(starts);
        let mut changed = false;

        if remaining <= Duration::minutes(CANDIDATE_NOTICE_MINUTES)
            && !record.notified_candidate_1h
            && lead >= Duration::minutes(CANDIDATE_NOTICE_MINUTES)
        {
            if let Some(channel) = record.channel {
                let text = format!(
                    "<@{}> your interview starts within the hour. Please be ready in the voice channel.",
                    record.subject_id
                );
                if self.say(channel, &text).await.is_ok() {
                    self.with_candidate(key, |progress| progress.notified_candidate_1h = true);
                    report.candidate_notices += 1;
                    changed = true;
                }
            }
        }

        if remaining <= Duration::minutes(INTERVIEWER_NOTICE_MINUTES)
            && !record.notified_interviewer_10m
        {
            if let Some(interviewer) = record.interviewer_id {
                let text = format!(
                    "Your interview with <@{}> starts in about 10 minutes.",
                    record.subject_id
                );
                match self.gateway.direct_message(interviewer, &text).await {
                    Ok(()) => {
                        self.with_candidate(key, |progress| {
                            progress.notified_interviewer_10m = true
                        });
                        report.interviewer_notices += 1;
                        changed = true;
                    }
                    Err(err) => warn!(%key, error = %err, "interviewer notice failed"),
                }
            }
        }

        if changed {
            self.persist(key).await;
        }
    }
}
