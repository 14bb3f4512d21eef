use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::domain::{ChannelRef, CommunityId, ConfirmationWaivers, MessageRef, SubjectId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The referenced channel, member, or message no longer exists.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("gateway unavailable: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Messaging platform seam. Every call may fail and none is assumed idempotent.
#[async_trait]
pub trait CommunityGateway: Send + Sync {
    async fn send_message(
        &self,
        channel: ChannelRef,
        content: &str,
    ) -> Result<MessageRef, GatewayError>;

    async fn edit_message(
        &self,
        channel: ChannelRef,
        message: MessageRef,
        content: &str,
    ) -> Result<(), GatewayError>;

    async fn fetch_message(
        &self,
        channel: ChannelRef,
        message: MessageRef,
    ) -> Result<String, GatewayError>;

    async fn direct_message(&self, subject: SubjectId, content: &str) -> Result<(), GatewayError>;

    async fn create_interview_channel(
        &self,
        community: CommunityId,
        subject: SubjectId,
    ) -> Result<ChannelRef, GatewayError>;

    async fn create_voice_channel(
        &self,
        community: CommunityId,
        subject: SubjectId,
        interviewer: SubjectId,
    ) -> Result<ChannelRef, GatewayError>;

    async fn delete_channel(&self, channel: ChannelRef) -> Result<(), GatewayError>;

    async fn kick_member(
        &self,
        community: CommunityId,
        subject: SubjectId,
        reason: &str,
    ) -> Result<(), GatewayError>;

    async fn grant_pass_role(
        &self,
        community: CommunityId,
        subject: SubjectId,
    ) -> Result<(), GatewayError>;

    /// Every community the deployment manages, primary included.
    async fn communities(&self) -> Result<Vec<CommunityId>, GatewayError>;

    async fn is_member(
        &self,
        community: CommunityId,
        subject: SubjectId,
    ) -> Result<bool, GatewayError>;

    /// Whether the subject carries a role that lets them join secondary communities.
    async fn has_exempt_role(
        &self,
        community: CommunityId,
        subject: SubjectId,
    ) -> Result<bool, GatewayError>;

    async fn display_name(&self, subject: SubjectId) -> Option<String>;

    /// Members of the primary community holding the interviewer role.
    async fn interviewer_roster(&self) -> Result<Vec<SubjectId>, GatewayError>;

    /// Members of `community` holding the passed-candidate role.
    async fn candidate_members(
        &self,
        community: CommunityId,
    ) -> Result<Vec<SubjectId>, GatewayError>;
}

/// Follow-up the classifier wants answered before accepting a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileConcern {
    InRate,
    Relocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEvaluation {
    pub complete: bool,
    pub feedback: String,
    #[serde(default)]
    pub concern: Option<ProfileConcern>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyClass {
    Yes,
    No,
    Unsure,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("classifier returned an unusable answer: {0}")]
    Malformed(String),
}

/// Content-evaluation seam used to judge profiles and confirmation replies.
#[async_trait]
pub trait ContentClassifier: Send + Sync {
    async fn evaluate(
        &self,
        profile: &str,
        waivers: ConfirmationWaivers,
    ) -> Result<ProfileEvaluation, ClassifierError>;

    async fn classify_reply(&self, reply: &str) -> Result<ReplyClass, ClassifierError>;
}
