//! Candidate lifecycle: the per-record state machine driven by community events,
//! reviewer actions, and the periodic sweep.

mod intake;
pub mod profile;
mod reminders;
mod review;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::bans::BanRegistry;
use super::delayed::DelayedActionQueue;
use super::domain::{
    CandidateProgress, ChannelRef, CommunityId, MessageRef, OutcomeKind, Period, PipelineState,
    ProgressKey, SubjectId,
};
use super::gateway::{CommunityGateway, ContentClassifier, GatewayError};
use super::projector::{DebouncedProjector, ProjectionTarget};
use super::settings::PipelineSettings;
use super::store::{JsonDocumentStore, StoreError};

pub use reminders::SweepReport;
pub use review::DelayedOutcome;

/// The three durable documents behind the pipeline.
#[derive(Clone)]
pub struct PipelineStores {
    pub state: Arc<JsonDocumentStore<PipelineState>>,
    pub bans: Arc<BanRegistry>,
    pub actions: Arc<DelayedActionQueue>,
}

/// Something that happened in a community, reported by the messaging adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    MemberJoined {
        community_id: CommunityId,
        subject_id: SubjectId,
        at: DateTime<Utc>,
    },
    MemberLeft {
        community_id: CommunityId,
        subject_id: SubjectId,
        at: DateTime<Utc>,
    },
    MessagePosted {
        channel: ChannelRef,
        author_id: SubjectId,
        message: MessageRef,
        content: String,
        #[serde(default)]
        is_reply: bool,
        #[serde(default)]
        has_mentions: bool,
        at: DateTime<Utc>,
    },
    MessageEdited {
        channel: ChannelRef,
        author_id: SubjectId,
        message: MessageRef,
        content: String,
        at: DateTime<Utc>,
    },
    ChannelDeleted {
        channel: ChannelRef,
        at: DateTime<Utc>,
    },
    /// A member gained or lost roles the pipeline tracks.
    RoleChanged {
        community_id: CommunityId,
        subject_id: SubjectId,
        #[serde(default)]
        pass_role_granted: bool,
        #[serde(default)]
        pass_role_revoked: bool,
        #[serde(default)]
        interviewer_role_changed: bool,
        at: DateTime<Utc>,
    },
}

/// Result button pressed by an interviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeChoice {
    Pass,
    Fail,
    Ban,
    Interval,
}

/// Decision taken by an interviewer on a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Pass,
    Immediate(OutcomeKind),
    Delayed(OutcomeKind),
}

impl Decision {
    /// Passing is always immediate; `delayed` only applies to rejections.
    pub fn from_choice(choice: OutcomeChoice, delayed: bool) -> Self {
        let kind = match choice {
            OutcomeChoice::Pass => return Self::Pass,
            OutcomeChoice::Fail => OutcomeKind::Fail,
            OutcomeChoice::Ban => OutcomeKind::Ban,
            OutcomeChoice::Interval => OutcomeKind::Interval,
        };
        if delayed {
            Self::Delayed(kind)
        } else {
            Self::Immediate(kind)
        }
    }
}

/// An interviewer's button or form submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReviewAction {
    Claim {
        key: ProgressKey,
        interviewer_id: SubjectId,
    },
    Schedule {
        key: ProgressKey,
        interviewer_id: SubjectId,
        starts_at: DateTime<Utc>,
    },
    SubmitMemo {
        key: ProgressKey,
        interviewer_id: SubjectId,
        channel: ChannelRef,
        message: MessageRef,
    },
    ReleaseVoiceRoom {
        key: ProgressKey,
    },
    RecordOutcome {
        key: ProgressKey,
        interviewer_id: SubjectId,
        outcome: OutcomeChoice,
        #[serde(default)]
        delayed: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Succeeded,
    PartiallySucceeded,
    Failed,
}

/// The one reply a reviewer gets for each action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub status: AckStatus,
    pub message: String,
}

impl Acknowledgement {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Succeeded,
            message: message.into(),
        }
    }

    pub fn partial(message: impl Into<String>) -> Self {
        Self {
            status: AckStatus::PartiallySucceeded,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Failed,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-record async locks. Entries nobody holds are pruned on the next acquire.
#[derive(Default)]
struct KeyedLocks {
    inner: SyncMutex<HashMap<ProgressKey, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &ProgressKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

pub struct CandidateLifecycle {
    stores: PipelineStores,
    gateway: Arc<dyn CommunityGateway>,
    classifier: Arc<dyn ContentClassifier>,
    projector: Arc<DebouncedProjector>,
    settings: PipelineSettings,
    locks: KeyedLocks,
}

impl CandidateLifecycle {
    pub fn new(
        stores: PipelineStores,
        gateway: Arc<dyn CommunityGateway>,
        classifier: Arc<dyn ContentClassifier>,
        projector: Arc<DebouncedProjector>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            stores,
            gateway,
            classifier,
            projector,
            settings,
            locks: KeyedLocks::default(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Apply a community event. Failures are logged; nothing is returned to the adapter.
    pub async fn handle(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::MemberJoined {
                community_id,
                subject_id,
                at,
            } => self.member_joined(community_id, subject_id, at).await,
            PipelineEvent::MemberLeft {
                community_id,
                subject_id,
                ..
            } => self.member_left(community_id, subject_id).await,
            PipelineEvent::MessagePosted {
                channel,
                author_id,
                message,
                content,
                is_reply,
                has_mentions,
                at,
            } => {
                let addressed = is_reply || has_mentions;
                self.message_posted(channel, author_id, message, &content, addressed, at)
                    .await
            }
            PipelineEvent::MessageEdited {
                channel,
                author_id,
                message,
                content,
                at,
            } => {
                self.message_edited(channel, author_id, message, &content, at)
                    .await
            }
            PipelineEvent::ChannelDeleted { channel, .. } => self.channel_deleted(channel).await,
            PipelineEvent::RoleChanged {
                community_id,
                subject_id,
                pass_role_granted,
                pass_role_revoked,
                interviewer_role_changed,
                at,
            } => {
                if pass_role_revoked {
                    self.pass_role_revoked(community_id, subject_id).await;
                }
                if pass_role_granted {
                    self.pass_role_granted(community_id, subject_id).await;
                }
                if interviewer_role_changed {
                    self.request_stats(at).await;
                }
            }
        }
    }

    fn candidate(&self, key: &ProgressKey) -> Option<CandidateProgress> {
        self.stores
            .state
            .read(|state| state.candidates.get(key).cloned())
    }

    /// Mutate the record under `key` if it still exists.
    fn with_candidate<R>(
        &self,
        key: &ProgressKey,
        f: impl FnOnce(&mut CandidateProgress) -> R,
    ) -> Option<R> {
        self.stores
            .state
            .update(|state| state.candidates.get_mut(key).map(f))
    }

    /// Save the state and schedule a dashboard refresh. A failed save keeps the change in
    /// memory and is retried by the next save.
    async fn persist(&self, key: &ProgressKey) {
        if let Err(err) = self.stores.state.save().await {
            warn!(%key, error = %err, "change kept in memory until the next successful save");
        }
        self.projector
            .request(ProjectionTarget::Dashboard, self.settings.debounce)
            .await;
    }

    /// Like `persist`, and also refresh the statistics for the month of `at`.
    async fn persist_outcome(&self, key: &ProgressKey, at: DateTime<Utc>) {
        self.persist(key).await;
        self.request_stats(at).await;
    }

    async fn request_stats(&self, at: DateTime<Utc>) {
        let period = Period::containing(at, self.settings.utc_offset);
        self.projector
            .request(ProjectionTarget::InterviewerStats(period), self.settings.debounce)
            .await;
        self.projector
            .request(ProjectionTarget::MonthlySummary(period), self.settings.debounce)
            .await;
    }

    /// Delete channels; already-missing ones count as released.
    async fn release_channels(&self, channels: &[ChannelRef]) {
        for channel in channels {
            match self.gateway.delete_channel(*channel).await {
                Ok(()) => debug!(channel = %channel, "channel deleted"),
                Err(err) if err.is_not_found() => {
                    debug!(channel = %channel, "channel already gone")
                }
                Err(err) => warn!(channel = %channel, error = %err, "failed to delete channel"),
            }
        }
    }

    async fn say(&self, channel: ChannelRef, content: &str) -> Result<MessageRef, GatewayError> {
        self.gateway
            .send_message(channel, content)
            .await
            .map_err(|err| {
                warn!(channel = %channel, error = %err, "failed to post message");
                err
            })
    }

    async fn direct(&self, subject: SubjectId, content: &str) {
        if let Err(err) = self.gateway.direct_message(subject, content).await {
            warn!(subject = %subject, error = %err, "failed to send direct message");
        }
    }

    async fn audit(&self, content: &str) {
        if let Some(channel) = self.settings.audit_channel {
            let _ = self.say(channel, content).await;
        }
    }
}
