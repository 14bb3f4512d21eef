use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::{Acknowledgement, CandidateLifecycle, Decision, LifecycleError, ReviewAction};
use crate::workflows::interview::domain::{
    next_morning, ActionScope, BanOrigin, CandidateProgress, CandidateStatus, ChannelRef,
    DelayedAction, InterviewRecord, MemoReference, MessageRef, OutcomeKind, PolicyViolation,
    ProgressKey, SubjectId, MEMO_UNRATED, RESULT_PASS,
};

const PASS_NOTICE: &str =
    "Congratulations, you passed the interview! Please follow the onboarding guide in the community.";

/// What happened when a due delayed action ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DelayedOutcome {
    pub removed_from: usize,
    pub not_present: usize,
    pub failures: usize,
    pub recorded: bool,
}

fn refused(violation: PolicyViolation) -> Acknowledgement {
    Acknowledgement::failed(violation.to_string())
}

impl CandidateLifecycle {
    /// Apply a reviewer action. Every action gets exactly one acknowledgement.
    pub async fn perform(&self, action: ReviewAction, at: DateTime<Utc>) -> Acknowledgement {
        match action {
            ReviewAction::Claim {
                key,
                interviewer_id,
            } => self.claim(&key, interviewer_id, at).await,
            ReviewAction::Schedule {
                key,
                interviewer_id,
                starts_at,
            } => self.schedule(&key, interviewer_id, starts_at, at).await,
            ReviewAction::SubmitMemo {
                key,
                interviewer_id,
                channel,
                message,
            } => self.submit_memo(&key, interviewer_id, channel, message, at).await,
            ReviewAction::ReleaseVoiceRoom { key } => self.release_voice_room(&key).await,
            ReviewAction::RecordOutcome {
                key,
                interviewer_id,
                outcome,
                delayed,
            } => {
                self.record_decision(&key, interviewer_id, Decision::from_choice(outcome, delayed), at)
                    .await
            }
        }
    }

    async fn claim(&self, key: &ProgressKey, interviewer: SubjectId, at: DateTime<Utc>) -> Acknowledgement {
        let _guard = self.locks.acquire(key).await;
        let Some(record) = self.candidate(key) else {
            return refused(PolicyViolation::MissingRecord);
        };
        if !record.status.can_advance_to(CandidateStatus::AwaitingInterviewer) {
            return refused(PolicyViolation::InvalidTransition {
                from: record.status,
                to: CandidateStatus::AwaitingInterviewer,
            });
        }

        let interviewer = record.interviewer_id.unwrap_or(interviewer);
        let (voice, created) = match record.voice_channel {
            Some(voice) => (voice, false),
            None => match self
                .gateway
                .create_voice_channel(record.community_id, record.subject_id, interviewer)
                .await
            {
                Ok(voice) => (voice, true),
                Err(err) => {
                    warn!(%key, error = %err, "voice channel creation failed");
                    return Acknowledgement::failed(format!(
                        "could not create the voice channel: {err}"
                    ));
                }
            },
        };

        let applied = self.stores.state.update(|state| {
            let record = state
                .candidates
                .get_mut(key)
                .ok_or(PolicyViolation::MissingRecord)?;
            record.transition(CandidateStatus::AwaitingInterviewer, at)?;
            record.interviewer_id.get_or_insert(interviewer);
            record.voice_channel = Some(voice);
            state.channel_index.insert(voice, key.clone());
            Ok::<_, PolicyViolation>(())
        });
        if let Err(violation) = applied {
            if created {
                self.release_channels(&[voice]).await;
            }
            return refused(violation);
        }

        info!(%key, interviewer = %interviewer, "candidate claimed");
        self.persist(key).await;
        Acknowledgement::succeeded(format!("voice channel <#{voice}> is ready"))
    }

    async fn schedule(
        &self,
        key: &ProgressKey,
        interviewer: SubjectId,
        starts_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Acknowledgement {
        if starts_at <= at {
            return refused(PolicyViolation::ScheduleInPast);
        }

        let _guard = self.locks.acquire(key).await;
        let applied = self.with_candidate(key, |record| {
            record.transition(CandidateStatus::Scheduled, at)?;
            record.interviewer_id = Some(interviewer);
            record.scheduled_interview_at = Some(starts_at);
            record.schedule_registered_at = Some(at);
            record.notified_candidate_1h = false;
            record.notified_interviewer_10m = false;
            Ok::<_, PolicyViolation>(record.channel)
        });
        let channel = match applied {
            Some(Ok(channel)) => channel,
            Some(Err(violation)) => return refused(violation),
            None => return refused(PolicyViolation::MissingRecord),
        };

        info!(%key, interviewer = %interviewer, %starts_at, "interview scheduled");
        self.persist(key).await;

        let local = starts_at
            .with_timezone(&self.settings.utc_offset)
            .format("%Y-%m-%d %H:%M")
            .to_string();
        if let Some(channel) = channel {
            let _ = self
                .say(
                    channel,
                    &format!("Your interview with <@{interviewer}> is scheduled for {local}."),
                )
                .await;
        }
        Acknowledgement::succeeded(format!("interview scheduled for {local}"))
    }

    async fn submit_memo(
        &self,
        key: &ProgressKey,
        interviewer: SubjectId,
        channel: ChannelRef,
        message: MessageRef,
        at: DateTime<Utc>,
    ) -> Acknowledgement {
        let _guard = self.locks.acquire(key).await;
        let applied = self.stores.state.update(|state| {
            let record = state
                .candidates
                .get_mut(key)
                .ok_or(PolicyViolation::MissingRecord)?;
            record.transition(CandidateStatus::Interviewed, at)?;
            record.interviewer_id.get_or_insert(interviewer);
            let memo = MemoReference {
                community_id: record.community_id,
                channel,
                message,
                recorded_at: at,
                interviewer_id: interviewer,
                result: MEMO_UNRATED.to_string(),
            };
            state
                .memo_history
                .entry(record.subject_id)
                .or_default()
                .push(memo);
            Ok::<_, PolicyViolation>(())
        });
        if let Err(violation) = applied {
            return refused(violation);
        }

        info!(%key, interviewer = %interviewer, "interview memo recorded");
        self.persist(key).await;
        Acknowledgement::succeeded("memo recorded")
    }

    async fn release_voice_room(&self, key: &ProgressKey) -> Acknowledgement {
        let _guard = self.locks.acquire(key).await;
        let Some(record) = self.candidate(key) else {
            return refused(PolicyViolation::MissingRecord);
        };
        let Some(voice) = record.voice_channel else {
            return Acknowledgement::succeeded("no voice channel to release");
        };

        match self.gateway.delete_channel(voice).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!(%key, error = %err, "voice channel deletion failed");
                return Acknowledgement::failed(format!("could not delete the voice channel: {err}"));
            }
        }

        self.stores.state.update(|state| {
            state.channel_index.remove(&voice);
            if let Some(record) = state.candidates.get_mut(key) {
                record.voice_channel = None;
            }
        });
        self.persist(key).await;
        Acknowledgement::succeeded("voice channel released")
    }

    async fn record_decision(
        &self,
        key: &ProgressKey,
        actor: SubjectId,
        decision: Decision,
        at: DateTime<Utc>,
    ) -> Acknowledgement {
        let _guard = self.locks.acquire(key).await;
        let Some(record) = self.candidate(key) else {
            return refused(PolicyViolation::MissingRecord);
        };
        let interviewer = record.interviewer_id.unwrap_or(actor);

        match decision {
            Decision::Pass => self.pass(key, record, interviewer, at).await,
            Decision::Immediate(kind) => self.reject_now(key, record, interviewer, kind, at).await,
            Decision::Delayed(kind) => self.reject_later(key, record, interviewer, kind, at).await,
        }
    }

    async fn pass(
        &self,
        key: &ProgressKey,
        record: CandidateProgress,
        interviewer: SubjectId,
        at: DateTime<Utc>,
    ) -> Acknowledgement {
        if !record.status.can_advance_to(CandidateStatus::AwaitingOnboarding) {
            return refused(PolicyViolation::InvalidTransition {
                from: record.status,
                to: CandidateStatus::AwaitingOnboarding,
            });
        }
        if let Err(err) = self
            .gateway
            .grant_pass_role(record.community_id, record.subject_id)
            .await
        {
            warn!(%key, error = %err, "granting the pass role failed");
            return Acknowledgement::failed(format!("could not grant the pass role: {err}"));
        }

        let channels = record.owned_channels();
        let applied = self.stores.state.update(|state| {
            let progress = state
                .candidates
                .get_mut(key)
                .ok_or(PolicyViolation::MissingRecord)?;
            progress.transition(CandidateStatus::AwaitingOnboarding, at)?;
            progress.channel = None;
            progress.voice_channel = None;
            state.channel_index.retain(|_, indexed| indexed != key);
            state.record_outcome(InterviewRecord::new(
                at,
                interviewer,
                record.subject_id,
                RESULT_PASS,
            ));
            Ok::<_, PolicyViolation>(())
        });
        if let Err(violation) = applied {
            return refused(violation);
        }

        info!(%key, interviewer = %interviewer, "candidate passed");
        self.persist_outcome(key, at).await;
        self.release_channels(&channels).await;
        self.direct(record.subject_id, PASS_NOTICE).await;
        Acknowledgement::succeeded(format!("<@{}> passed", record.subject_id))
    }

    fn origin_of(&self, record: &CandidateProgress) -> BanOrigin {
        if record.community_id == self.settings.primary_community {
            BanOrigin::Primary
        } else {
            BanOrigin::Secondary
        }
    }

    async fn register_ban(&self, record: &CandidateProgress, kind: OutcomeKind, at: DateTime<Utc>) {
        let Some(ban_kind) = kind.ban_kind() else {
            return;
        };
        if let Err(err) = self
            .stores
            .bans
            .add(record.subject_id, self.origin_of(record), ban_kind, at)
            .await
        {
            warn!(subject = %record.subject_id, error = %err, "exclusion kept in memory only");
        }
    }

    /// Append the outcome and drop the record. Returns the channels it owned.
    fn close_record(&self, key: &ProgressKey, outcome: InterviewRecord) -> Vec<ChannelRef> {
        self.stores.state.update(|state| {
            state.record_outcome(outcome);
            state
                .remove_candidate(key)
                .map(|removed| removed.owned_channels())
                .unwrap_or_default()
        })
    }

    async fn reject_now(
        &self,
        key: &ProgressKey,
        record: CandidateProgress,
        interviewer: SubjectId,
        kind: OutcomeKind,
        at: DateTime<Utc>,
    ) -> Acknowledgement {
        if !record.status.accepts_rejection() {
            return refused(PolicyViolation::OutcomeNotAllowed(record.status));
        }

        self.register_ban(&record, kind, at).await;
        let channels = self.close_record(
            key,
            InterviewRecord::new(at, interviewer, record.subject_id, kind.result_tag()),
        );
        info!(%key, interviewer = %interviewer, outcome = kind.result_tag(), "outcome recorded");
        self.persist_outcome(key, at).await;
        self.release_channels(&channels).await;

        let subject = record.subject_id;
        match self
            .gateway
            .kick_member(record.community_id, subject, kind.kick_reason())
            .await
        {
            Ok(()) => {
                self.audit(&format!(
                    "Removed <@{subject}> from community {}: {}",
                    record.community_id,
                    kind.kick_reason()
                ))
                .await;
                Acknowledgement::succeeded(format!(
                    "{} recorded and <@{subject}> removed",
                    kind.result_tag()
                ))
            }
            Err(err) if err.is_not_found() => Acknowledgement::succeeded(format!(
                "{} recorded; <@{subject}> had already left",
                kind.result_tag()
            )),
            Err(err) => {
                warn!(%key, error = %err, "removal after outcome failed");
                Acknowledgement::partial(format!(
                    "{} recorded, but removing <@{subject}> failed: {err}",
                    kind.result_tag()
                ))
            }
        }
    }

    async fn reject_later(
        &self,
        key: &ProgressKey,
        record: CandidateProgress,
        interviewer: SubjectId,
        kind: OutcomeKind,
        at: DateTime<Utc>,
    ) -> Acknowledgement {
        if !record.status.accepts_rejection() {
            return refused(PolicyViolation::OutcomeNotAllowed(record.status));
        }

        self.register_ban(&record, kind, at).await;

        let scope = if record.community_id == self.settings.primary_community {
            ActionScope::AllCommunities
        } else {
            ActionScope::SingleCommunity(record.community_id)
        };
        let due = next_morning(at, self.settings.utc_offset);
        let mut action = DelayedAction::new(kind, record.subject_id, due, scope);
        action.interviewer_id = Some(interviewer);
        action.outcome_recorded = true;

        let mut acknowledgement = Acknowledgement::succeeded(format!(
            "{} scheduled for {}",
            kind.result_tag(),
            due.with_timezone(&self.settings.utc_offset)
                .format("%Y-%m-%d %H:%M")
        ));
        if let Err(err) = self.stores.actions.enqueue(action).await {
            warn!(%key, error = %err, "delayed action kept in memory only");
            acknowledgement = Acknowledgement::partial(format!(
                "{}; it could not be saved to disk and will be lost on restart",
                acknowledgement.message
            ));
        }

        let channels = self.close_record(
            key,
            InterviewRecord::new(at, interviewer, record.subject_id, kind.delayed_tag()),
        );
        info!(%key, interviewer = %interviewer, outcome = kind.result_tag(), %due, "delayed outcome registered");
        self.persist_outcome(key, at).await;
        self.release_channels(&channels).await;
        acknowledgement
    }

    /// Carry out a due delayed action. Each community is attempted independently.
    pub async fn execute_delayed(
        &self,
        action: &DelayedAction,
        now: DateTime<Utc>,
    ) -> Result<DelayedOutcome, LifecycleError> {
        let communities = match action.scope {
            ActionScope::AllCommunities => self.gateway.communities().await?,
            ActionScope::SingleCommunity(community) => vec![community],
        };

        let subject = action.subject_id;
        let reason = action.kind.kick_reason();
        let mut outcome = DelayedOutcome::default();
        for community in communities {
            match self.gateway.kick_member(community, subject, reason).await {
                Ok(()) => {
                    outcome.removed_from += 1;
                    self.audit(&format!(
                        "Removed <@{subject}> from community {community}: {reason}"
                    ))
                    .await;
                }
                Err(err) if err.is_not_found() => outcome.not_present += 1,
                Err(err) => {
                    outcome.failures += 1;
                    warn!(action = %action.id, community = %community, error = %err, "delayed removal failed");
                }
            }
        }

        if !action.outcome_recorded {
            if let Some(interviewer) = action.interviewer_id {
                self.stores.state.update(|state| {
                    state.record_outcome(InterviewRecord::new(
                        now,
                        interviewer,
                        subject,
                        action.kind.result_tag(),
                    ))
                });
                self.stores.state.save().await?;
                self.request_stats(now).await;
                outcome.recorded = true;
            }
        }

        info!(
            action = %action.id,
            subject = %subject,
            removed_from = outcome.removed_from,
            failures = outcome.failures,
            "delayed action executed"
        );
        Ok(outcome)
    }
}
