use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::CandidateLifecycle;
use crate::workflows::interview::domain::{
    CandidateProgress, CandidateStatus, ChannelRef, CommunityId, ProgressKey, SubjectId,
};

const BANNED_ON_JOIN: &str = "excluded by a ban or interval";
const PRIMARY_MEMBER_ON_JOIN: &str = "members of the primary community cannot join secondary communities";
const OTHER_SECONDARY_ON_JOIN: &str = "already a member of another secondary community";

fn welcome_text(subject: SubjectId) -> String {
    format!(
        "Welcome <@{subject}>! Please post your profile in this channel using the template. \
         An interviewer will pick it up once it is complete."
    )
}

impl CandidateLifecycle {
    pub(super) async fn member_joined(
        &self,
        community: CommunityId,
        subject: SubjectId,
        at: DateTime<Utc>,
    ) {
        if community != self.settings.primary_community {
            if let Some(reason) = self.join_refusal(community, subject, at).await {
                match self.gateway.kick_member(community, subject, reason).await {
                    Ok(()) => {
                        info!(subject = %subject, community = %community, reason, "removed on join");
                        self.audit(&format!(
                            "Removed <@{subject}> from community {community} on join: {reason}"
                        ))
                        .await;
                    }
                    Err(err) => {
                        warn!(subject = %subject, community = %community, error = %err, "join removal failed")
                    }
                }
                return;
            }
        }

        let key = ProgressKey::new(community, subject);
        let _guard = self.locks.acquire(&key).await;
        if self
            .stores
            .state
            .read(|state| state.candidates.contains_key(&key))
        {
            debug!(%key, "candidate already tracked");
            return;
        }

        let channel = match self.gateway.create_interview_channel(community, subject).await {
            Ok(channel) => channel,
            Err(err) => {
                warn!(%key, error = %err, "failed to create interview channel");
                return;
            }
        };

        self.stores.state.update(|state| {
            state.insert_candidate(CandidateProgress::joined(community, subject, channel, at))
        });
        info!(%key, channel = %channel, "candidate joined");
        self.persist(&key).await;
        let _ = self.say(channel, &welcome_text(subject)).await;
    }

    /// Reason to turn the subject away from a secondary community, if any.
    async fn join_refusal(
        &self,
        community: CommunityId,
        subject: SubjectId,
        at: DateTime<Utc>,
    ) -> Option<&'static str> {
        if self.stores.bans.check(subject, at).await.is_some() {
            return Some(BANNED_ON_JOIN);
        }

        let primary = self.settings.primary_community;
        match self.gateway.is_member(primary, subject).await {
            Ok(true) => {
                return match self.gateway.has_exempt_role(primary, subject).await {
                    Ok(true) => None,
                    Ok(false) => Some(PRIMARY_MEMBER_ON_JOIN),
                    Err(err) => {
                        warn!(subject = %subject, error = %err, "exempt role lookup failed; admitting");
                        None
                    }
                };
            }
            Ok(false) => {}
            Err(err) => warn!(subject = %subject, error = %err, "primary membership lookup failed"),
        }

        let communities = match self.gateway.communities().await {
            Ok(communities) => communities,
            Err(err) => {
                warn!(error = %err, "community listing failed; admitting");
                return None;
            }
        };
        for other in communities
            .into_iter()
            .filter(|other| *other != primary && *other != community)
        {
            if let Ok(true) = self.gateway.is_member(other, subject).await {
                return Some(OTHER_SECONDARY_ON_JOIN);
            }
        }
        None
    }

    pub(super) async fn member_left(&self, community: CommunityId, subject: SubjectId) {
        let key = ProgressKey::new(community, subject);
        let _guard = self.locks.acquire(&key).await;
        let Some(removed) = self
            .stores
            .state
            .update(|state| state.remove_candidate(&key))
        else {
            return;
        };

        info!(%key, "candidate left; record removed");
        self.release_channels(&removed.owned_channels()).await;
        self.persist(&key).await;
    }

    /// Losing the pass role before onboarding ends the record.
    pub(super) async fn pass_role_revoked(&self, community: CommunityId, subject: SubjectId) {
        let key = ProgressKey::new(community, subject);
        let _guard = self.locks.acquire(&key).await;
        let removed = self.stores.state.update(|state| {
            let onboarding = state
                .candidates
                .get(&key)
                .is_some_and(|record| record.status == CandidateStatus::AwaitingOnboarding);
            if onboarding {
                state.remove_candidate(&key)
            } else {
                None
            }
        });
        let Some(removed) = removed else {
            return;
        };

        info!(%key, "pass role revoked; onboarding record removed");
        self.release_channels(&removed.owned_channels()).await;
        self.persist(&key).await;
    }

    /// A pass role granted by hand settles the candidate whatever their status.
    pub(super) async fn pass_role_granted(&self, community: CommunityId, subject: SubjectId) {
        let key = ProgressKey::new(community, subject);
        let _guard = self.locks.acquire(&key).await;
        let Some(removed) = self
            .stores
            .state
            .update(|state| state.remove_candidate(&key))
        else {
            return;
        };

        info!(%key, status = ?removed.status, "pass role granted; record closed");
        self.release_channels(&removed.owned_channels()).await;
        self.persist(&key).await;
    }

    /// Drop the reference to a channel that was deleted outside the pipeline. Losing the
    /// text channel ends the record; losing the voice channel only clears it.
    pub(super) async fn channel_deleted(&self, channel: ChannelRef) {
        let Some(key) = self
            .stores
            .state
            .read(|state| state.key_for_channel(channel))
        else {
            return;
        };

        let _guard = self.locks.acquire(&key).await;
        let outcome = self.stores.state.update(|state| {
            state.channel_index.remove(&channel);
            let record = state.candidates.get_mut(&key)?;
            if record.channel == Some(channel) {
                state.remove_candidate(&key).map(|removed| removed.owned_channels())
            } else {
                if record.voice_channel == Some(channel) {
                    record.voice_channel = None;
                }
                Some(Vec::new())
            }
        });

        match outcome {
            Some(remaining) if !remaining.is_empty() => {
                info!(%key, channel = %channel, "interview channel deleted; record removed");
                let leftovers: Vec<ChannelRef> =
                    remaining.into_iter().filter(|other| *other != channel).collect();
                self.release_channels(&leftovers).await;
            }
            Some(_) => debug!(%key, channel = %channel, "voice channel reference cleared"),
            None => return,
        }
        self.persist(&key).await;
    }
}
