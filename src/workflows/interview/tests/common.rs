use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;

use crate::workflows::interview::bans::{BanBook, BanRegistry};
use crate::workflows::interview::delayed::{ActionQueue, DelayedActionQueue};
use crate::workflows::interview::domain::{
    CandidateProgress, CandidateStatus, ChannelRef, CommunityId, ConfirmationWaivers, MessageRef,
    PipelineState, ProgressKey, SubjectId,
};
use crate::workflows::interview::gateway::{
    ClassifierError, CommunityGateway, ContentClassifier, GatewayError, ProfileConcern,
    ProfileEvaluation, ReplyClass,
};
use crate::workflows::interview::lifecycle::{PipelineEvent, PipelineStores};
use crate::workflows::interview::settings::{PipelineSettings, ProjectionChannels};
use crate::workflows::interview::store::JsonDocumentStore;
use crate::workflows::interview::Pipeline;

pub(super) const PRIMARY: CommunityId = CommunityId(1);
pub(super) const SECONDARY: CommunityId = CommunityId(2);
pub(super) const OTHER_SECONDARY: CommunityId = CommunityId(3);
pub(super) const CANDIDATE: SubjectId = SubjectId(100);
pub(super) const INTERVIEWER: SubjectId = SubjectId(200);
pub(super) const AUDIT: ChannelRef = ChannelRef(900);
pub(super) const NOTICES: ChannelRef = ChannelRef(901);

pub(super) const PROFILE: &str = "Preferred name: Mika\nGender: -\nAge: 24\nHeight: 160\n\
    Location: Osaka\nActivity rate: 5 days a week\nAvailable hours: evenings\n";

pub(super) fn ts(raw: &str) -> DateTime<Utc> {
    raw.parse().expect("valid timestamp")
}

/// Monday 10:00 at +09:00, inside the interviewer notice window.
pub(super) fn joined_at() -> DateTime<Utc> {
    ts("2025-03-03T01:00:00Z")
}

pub(super) fn settings() -> PipelineSettings {
    PipelineSettings {
        primary_community: PRIMARY,
        utc_offset: FixedOffset::east_opt(9 * 3600).expect("valid offset"),
        poll_interval: Duration::from_secs(30),
        debounce: Duration::from_millis(5),
        monthly_goal: 3,
        channels: ProjectionChannels::default(),
        notice_channel: Some(NOTICES),
        audit_channel: Some(AUDIT),
        notice_window: Default::default(),
    }
}

pub(super) fn memory_stores() -> PipelineStores {
    PipelineStores {
        state: Arc::new(JsonDocumentStore::in_memory(PipelineState::default())),
        bans: Arc::new(BanRegistry::new(JsonDocumentStore::in_memory(
            BanBook::default(),
        ))),
        actions: Arc::new(DelayedActionQueue::new(JsonDocumentStore::in_memory(
            ActionQueue::default(),
        ))),
    }
}

pub(super) struct Harness {
    pub(super) pipeline: Pipeline,
    pub(super) gateway: Arc<MemoryGateway>,
    pub(super) classifier: Arc<ScriptedClassifier>,
}

impl Harness {
    pub(super) fn new() -> Self {
        Self::with_settings(settings())
    }

    pub(super) fn with_settings(settings: PipelineSettings) -> Self {
        let gateway = Arc::new(MemoryGateway::new(vec![
            PRIMARY,
            SECONDARY,
            OTHER_SECONDARY,
        ]));
        let classifier = Arc::new(ScriptedClassifier::default());
        let pipeline = Pipeline::assemble(
            memory_stores(),
            gateway.clone(),
            classifier.clone(),
            settings,
        );
        Self {
            pipeline,
            gateway,
            classifier,
        }
    }

    pub(super) fn record(&self, key: &ProgressKey) -> Option<CandidateProgress> {
        self.pipeline
            .stores
            .state
            .read(|state| state.candidates.get(key).cloned())
    }

    pub(super) fn results(&self) -> Vec<String> {
        self.pipeline.stores.state.read(|state| {
            state
                .interview_records
                .iter()
                .map(|record| record.result.clone())
                .collect()
        })
    }

    /// Run a join and return the new record's key and interview channel.
    pub(super) async fn join(
        &self,
        community: CommunityId,
        subject: SubjectId,
        at: DateTime<Utc>,
    ) -> (ProgressKey, ChannelRef) {
        self.pipeline
            .lifecycle
            .handle(PipelineEvent::MemberJoined {
                community_id: community,
                subject_id: subject,
                at,
            })
            .await;
        let key = ProgressKey::new(community, subject);
        let channel = self
            .record(&key)
            .and_then(|record| record.channel)
            .expect("join created an interview channel");
        (key, channel)
    }

    /// Post `content` as the candidate in their channel and make it fetchable later.
    pub(super) async fn post(
        &self,
        channel: ChannelRef,
        author: SubjectId,
        content: &str,
        at: DateTime<Utc>,
    ) -> MessageRef {
        self.post_addressed(channel, author, content, false, false, at)
            .await
    }

    /// Post a message that replies to or mentions someone.
    pub(super) async fn post_addressed(
        &self,
        channel: ChannelRef,
        author: SubjectId,
        content: &str,
        is_reply: bool,
        has_mentions: bool,
        at: DateTime<Utc>,
    ) -> MessageRef {
        let message = self.gateway.remember(channel, content);
        self.pipeline
            .lifecycle
            .handle(PipelineEvent::MessagePosted {
                channel,
                author_id: author,
                message,
                content: content.to_string(),
                is_reply,
                has_mentions,
                at,
            })
            .await;
        message
    }

    /// Insert a record directly in `status`, bypassing the earlier steps.
    pub(super) fn seed(
        &self,
        community: CommunityId,
        subject: SubjectId,
        status: CandidateStatus,
        at: DateTime<Utc>,
    ) -> (ProgressKey, ChannelRef) {
        let channel = ChannelRef(5_000 + subject.0);
        let mut record = CandidateProgress::joined(community, subject, channel, at);
        record.status = status;
        record.profile_evaluated = true;
        if status >= CandidateStatus::AwaitingInterviewer {
            record.interviewer_id = Some(INTERVIEWER);
        }
        let key = record.key();
        self.pipeline
            .stores
            .state
            .update(|state| state.insert_candidate(record));
        (key, channel)
    }
}

#[derive(Default)]
pub(super) struct GatewayLog {
    pub(super) sent: Vec<(ChannelRef, String)>,
    pub(super) edited: Vec<(ChannelRef, MessageRef)>,
    pub(super) direct: Vec<(SubjectId, String)>,
    pub(super) kicks: Vec<(CommunityId, SubjectId)>,
    pub(super) deleted: Vec<ChannelRef>,
    pub(super) voice_created: Vec<ChannelRef>,
    pub(super) granted: Vec<(CommunityId, SubjectId)>,
}

/// In-memory gateway that records every call and can be told to fail.
pub(super) struct MemoryGateway {
    communities: Vec<CommunityId>,
    next_id: AtomicU64,
    messages: Mutex<HashMap<(ChannelRef, MessageRef), String>>,
    log: Mutex<GatewayLog>,
    pub(super) members: Mutex<HashSet<(CommunityId, SubjectId)>>,
    pub(super) exempt: Mutex<HashSet<SubjectId>>,
    pub(super) absent: Mutex<HashSet<(CommunityId, SubjectId)>>,
    pub(super) kick_failures: Mutex<HashSet<CommunityId>>,
    pub(super) fail_grant: Mutex<bool>,
    pub(super) roster: Mutex<Vec<SubjectId>>,
    pub(super) passed: Mutex<Vec<SubjectId>>,
    pub(super) names: Mutex<HashMap<SubjectId, String>>,
}

impl MemoryGateway {
    pub(super) fn new(communities: Vec<CommunityId>) -> Self {
        Self {
            communities,
            next_id: AtomicU64::new(10_000),
            messages: Mutex::new(HashMap::new()),
            log: Mutex::new(GatewayLog::default()),
            members: Mutex::new(HashSet::new()),
            exempt: Mutex::new(HashSet::new()),
            absent: Mutex::new(HashSet::new()),
            kick_failures: Mutex::new(HashSet::new()),
            fail_grant: Mutex::new(false),
            roster: Mutex::new(Vec::new()),
            passed: Mutex::new(Vec::new()),
            names: Mutex::new(HashMap::new()),
        }
    }

    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(super) fn remember(&self, channel: ChannelRef, content: &str) -> MessageRef {
        let message = MessageRef(self.allocate());
        self.messages
            .lock()
            .expect("message mutex poisoned")
            .insert((channel, message), content.to_string());
        message
    }

    pub(super) fn forget(&self, channel: ChannelRef, message: MessageRef) {
        self.messages
            .lock()
            .expect("message mutex poisoned")
            .remove(&(channel, message));
    }

    pub(super) fn log<R>(&self, f: impl FnOnce(&GatewayLog) -> R) -> R {
        f(&self.log.lock().expect("log mutex poisoned"))
    }

    pub(super) fn sent_to(&self, channel: ChannelRef) -> Vec<String> {
        self.log(|log| {
            log.sent
                .iter()
                .filter(|(target, _)| *target == channel)
                .map(|(_, content)| content.clone())
                .collect()
        })
    }

    pub(super) fn direct_to(&self, subject: SubjectId) -> Vec<String> {
        self.log(|log| {
            log.direct
                .iter()
                .filter(|(target, _)| *target == subject)
                .map(|(_, content)| content.clone())
                .collect()
        })
    }

    pub(super) fn kicks(&self) -> Vec<(CommunityId, SubjectId)> {
        self.log(|log| log.kicks.clone())
    }
}

#[async_trait]
impl CommunityGateway for MemoryGateway {
    async fn send_message(
        &self,
        channel: ChannelRef,
        content: &str,
    ) -> Result<MessageRef, GatewayError> {
        let message = self.remember(channel, content);
        self.log
            .lock()
            .expect("log mutex poisoned")
            .sent
            .push((channel, content.to_string()));
        Ok(message)
    }

    async fn edit_message(
        &self,
        channel: ChannelRef,
        message: MessageRef,
        content: &str,
    ) -> Result<(), GatewayError> {
        let mut messages = self.messages.lock().expect("message mutex poisoned");
        let Some(existing) = messages.get_mut(&(channel, message)) else {
            return Err(GatewayError::NotFound(format!("message {message}")));
        };
        *existing = content.to_string();
        self.log
            .lock()
            .expect("log mutex poisoned")
            .edited
            .push((channel, message));
        Ok(())
    }

    async fn fetch_message(
        &self,
        channel: ChannelRef,
        message: MessageRef,
    ) -> Result<String, GatewayError> {
        self.messages
            .lock()
            .expect("message mutex poisoned")
            .get(&(channel, message))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("message {message}")))
    }

    async fn direct_message(&self, subject: SubjectId, content: &str) -> Result<(), GatewayError> {
        self.log
            .lock()
            .expect("log mutex poisoned")
            .direct
            .push((subject, content.to_string()));
        Ok(())
    }

    async fn create_interview_channel(
        &self,
        _community: CommunityId,
        _subject: SubjectId,
    ) -> Result<ChannelRef, GatewayError> {
        Ok(ChannelRef(self.allocate()))
    }

    async fn create_voice_channel(
        &self,
        _community: CommunityId,
        _subject: SubjectId,
        _interviewer: SubjectId,
    ) -> Result<ChannelRef, GatewayError> {
        let channel = ChannelRef(self.allocate());
        self.log
            .lock()
            .expect("log mutex poisoned")
            .voice_created
            .push(channel);
        Ok(channel)
    }

    async fn delete_channel(&self, channel: ChannelRef) -> Result<(), GatewayError> {
        self.log
            .lock()
            .expect("log mutex poisoned")
            .deleted
            .push(channel);
        Ok(())
    }

    async fn kick_member(
        &self,
        community: CommunityId,
        subject: SubjectId,
        _reason: &str,
    ) -> Result<(), GatewayError> {
        if self
            .kick_failures
            .lock()
            .expect("failure mutex poisoned")
            .contains(&community)
        {
            return Err(GatewayError::Transport("kick timed out".to_string()));
        }
        if self
            .absent
            .lock()
            .expect("absent mutex poisoned")
            .contains(&(community, subject))
        {
            return Err(GatewayError::NotFound(format!("member {subject}")));
        }
        self.log
            .lock()
            .expect("log mutex poisoned")
            .kicks
            .push((community, subject));
        Ok(())
    }

    async fn grant_pass_role(
        &self,
        community: CommunityId,
        subject: SubjectId,
    ) -> Result<(), GatewayError> {
        if *self.fail_grant.lock().expect("grant mutex poisoned") {
            return Err(GatewayError::Forbidden("missing permission".to_string()));
        }
        self.log
            .lock()
            .expect("log mutex poisoned")
            .granted
            .push((community, subject));
        Ok(())
    }

    async fn communities(&self) -> Result<Vec<CommunityId>, GatewayError> {
        Ok(self.communities.clone())
    }

    async fn is_member(
        &self,
        community: CommunityId,
        subject: SubjectId,
    ) -> Result<bool, GatewayError> {
        Ok(self
            .members
            .lock()
            .expect("member mutex poisoned")
            .contains(&(community, subject)))
    }

    async fn has_exempt_role(
        &self,
        _community: CommunityId,
        subject: SubjectId,
    ) -> Result<bool, GatewayError> {
        Ok(self
            .exempt
            .lock()
            .expect("exempt mutex poisoned")
            .contains(&subject))
    }

    async fn display_name(&self, subject: SubjectId) -> Option<String> {
        self.names
            .lock()
            .expect("name mutex poisoned")
            .get(&subject)
            .cloned()
    }

    async fn interviewer_roster(&self) -> Result<Vec<SubjectId>, GatewayError> {
        Ok(self.roster.lock().expect("roster mutex poisoned").clone())
    }

    async fn candidate_members(
        &self,
        _community: CommunityId,
    ) -> Result<Vec<SubjectId>, GatewayError> {
        Ok(self.passed.lock().expect("passed mutex poisoned").clone())
    }
}

/// What the scripted classifier answers for profiles.
#[derive(Debug, Clone, Default)]
pub(super) enum EvaluationScript {
    #[default]
    Complete,
    Incomplete(String),
    /// Raise `concern` until the matching waiver is present.
    ConcernUntilWaived(ProfileConcern),
    Unavailable,
}

#[derive(Default)]
pub(super) struct ScriptedClassifier {
    pub(super) evaluation: Mutex<EvaluationScript>,
    pub(super) reply: Mutex<Option<ReplyClass>>,
    pub(super) seen_waivers: Mutex<Vec<ConfirmationWaivers>>,
}

impl ScriptedClassifier {
    pub(super) fn script(&self, script: EvaluationScript) {
        *self.evaluation.lock().expect("script mutex poisoned") = script;
    }

    pub(super) fn answer(&self, reply: ReplyClass) {
        *self.reply.lock().expect("reply mutex poisoned") = Some(reply);
    }
}

#[async_trait]
impl ContentClassifier for ScriptedClassifier {
    async fn evaluate(
        &self,
        _profile: &str,
        waivers: ConfirmationWaivers,
    ) -> Result<ProfileEvaluation, ClassifierError> {
        self.seen_waivers
            .lock()
            .expect("waiver mutex poisoned")
            .push(waivers);
        let script = self.evaluation.lock().expect("script mutex poisoned").clone();
        let complete = || ProfileEvaluation {
            complete: true,
            feedback: "looks good".to_string(),
            concern: None,
        };
        match script {
            EvaluationScript::Complete => Ok(complete()),
            EvaluationScript::Incomplete(feedback) => Ok(ProfileEvaluation {
                complete: false,
                feedback,
                concern: None,
            }),
            EvaluationScript::ConcernUntilWaived(concern) => {
                let waived = match concern {
                    ProfileConcern::InRate => waivers.in_rate,
                    ProfileConcern::Relocation => waivers.relocation,
                };
                if waived {
                    Ok(complete())
                } else {
                    Ok(ProfileEvaluation {
                        complete: false,
                        feedback: "please confirm".to_string(),
                        concern: Some(concern),
                    })
                }
            }
            EvaluationScript::Unavailable => {
                Err(ClassifierError::Unavailable("model offline".to_string()))
            }
        }
    }

    async fn classify_reply(&self, _reply: &str) -> Result<ReplyClass, ClassifierError> {
        self.reply
            .lock()
            .expect("reply mutex poisoned")
            .ok_or_else(|| ClassifierError::Malformed("no scripted reply".to_string()))
    }
}

pub(super) async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("json body")
}

pub(super) fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}
