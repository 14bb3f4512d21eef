use async_trait::async_trait;
use interview_pipeline::workflows::interview::domain::ConfirmationWaivers;
use interview_pipeline::workflows::interview::lifecycle::profile::PROFILE_HEADERS;
use interview_pipeline::workflows::interview::{
    ChannelRef, ClassifierError, CommunityGateway, CommunityId, ContentClassifier, GatewayError,
    MessageRef, ProfileConcern, ProfileEvaluation, ReplyClass, SubjectId,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Gateway used when no platform adapter is attached: every call is logged and succeeds.
///
/// Messages it sent can be fetched back; anything else reads as gone.
pub(crate) struct LoggingGateway {
    primary: CommunityId,
    next_id: AtomicU64,
    sent: Mutex<HashMap<(ChannelRef, MessageRef), String>>,
}

impl LoggingGateway {
    pub(crate) fn new(primary: CommunityId) -> Self {
        Self {
            primary,
            next_id: AtomicU64::new(1),
            sent: Mutex::new(HashMap::new()),
        }
    }

    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl CommunityGateway for LoggingGateway {
    async fn send_message(
        &self,
        channel: ChannelRef,
        content: &str,
    ) -> Result<MessageRef, GatewayError> {
        let message = MessageRef(self.allocate());
        info!(%channel, %message, content, "send message");
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((channel, message), content.to_string());
        Ok(message)
    }

    async fn edit_message(
        &self,
        channel: ChannelRef,
        message: MessageRef,
        content: &str,
    ) -> Result<(), GatewayError> {
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        match sent.get_mut(&(channel, message)) {
            Some(existing) => {
                info!(%channel, %message, "edit message");
                *existing = content.to_string();
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!("message {message} in {channel}"))),
        }
    }

    async fn fetch_message(
        &self,
        channel: ChannelRef,
        message: MessageRef,
    ) -> Result<String, GatewayError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(channel, message))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("message {message} in {channel}")))
    }

    async fn direct_message(&self, subject: SubjectId, content: &str) -> Result<(), GatewayError> {
        info!(%subject, content, "direct message");
        Ok(())
    }

    async fn create_interview_channel(
        &self,
        community: CommunityId,
        subject: SubjectId,
    ) -> Result<ChannelRef, GatewayError> {
        let channel = ChannelRef(self.allocate());
        info!(%community, %subject, %channel, "create interview channel");
        Ok(channel)
    }

    async fn create_voice_channel(
        &self,
        community: CommunityId,
        subject: SubjectId,
        interviewer: SubjectId,
    ) -> Result<ChannelRef, GatewayError> {
        let channel = ChannelRef(self.allocate());
        info!(%community, %subject, %interviewer, %channel, "create voice channel");
        Ok(channel)
    }

    async fn delete_channel(&self, channel: ChannelRef) -> Result<(), GatewayError> {
        info!(%channel, "delete channel");
        Ok(())
    }

    async fn kick_member(
        &self,
        community: CommunityId,
        subject: SubjectId,
        reason: &str,
    ) -> Result<(), GatewayError> {
        info!(%community, %subject, reason, "kick member");
        Ok(())
    }

    async fn grant_pass_role(
        &self,
        community: CommunityId,
        subject: SubjectId,
    ) -> Result<(), GatewayError> {
        info!(%community, %subject, "grant pass role");
        Ok(())
    }

    async fn communities(&self) -> Result<Vec<CommunityId>, GatewayError> {
        Ok(vec![self.primary])
    }

    async fn is_member(
        &self,
        _community: CommunityId,
        _subject: SubjectId,
    ) -> Result<bool, GatewayError> {
        Ok(false)
    }

    async fn has_exempt_role(
        &self,
        _community: CommunityId,
        _subject: SubjectId,
    ) -> Result<bool, GatewayError> {
        Ok(false)
    }

    async fn display_name(&self, _subject: SubjectId) -> Option<String> {
        None
    }

    async fn interviewer_roster(&self) -> Result<Vec<SubjectId>, GatewayError> {
        Ok(Vec::new())
    }

    async fn candidate_members(
        &self,
        _community: CommunityId,
    ) -> Result<Vec<SubjectId>, GatewayError> {
        Ok(Vec::new())
    }
}

const REQUIRED_HEADERS: [&str; 5] = [
    "preferred name",
    "age",
    "location",
    "activity rate",
    "available hours",
];
const MIN_ACTIVE_DAYS: u32 = 3;
const AFFIRMATIVE: [&str; 7] = ["yes", "y", "yeah", "yep", "sure", "ok", "okay"];
const NEGATIVE: [&str; 5] = ["no", "n", "nope", "cannot", "can't"];

/// Header-based profile checks for deployments without a hosted model.
#[derive(Debug, Default)]
pub(crate) struct KeywordClassifier;

fn header_value<'a>(profile: &'a str, header: &str) -> Option<&'a str> {
    profile.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case(header)
            .then(|| value.trim())
    })
}

fn first_word(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c == ',' || c == '.' || c == '!')
        .find(|word| !word.is_empty())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[async_trait]
impl ContentClassifier for KeywordClassifier {
    async fn evaluate(
        &self,
        profile: &str,
        waivers: ConfirmationWaivers,
    ) -> Result<ProfileEvaluation, ClassifierError> {
        let lowered = profile.to_lowercase();
        let missing: Vec<&str> = REQUIRED_HEADERS
            .iter()
            .copied()
            .filter(|header| !lowered.contains(header))
            .collect();
        if !missing.is_empty() {
            let recognised = PROFILE_HEADERS
                .iter()
                .filter(|header| lowered.contains(*header))
                .count();
            return Ok(ProfileEvaluation {
                complete: false,
                feedback: format!(
                    "Your profile is missing: {}. ({recognised} of {} sections recognised)",
                    missing.join(", "),
                    PROFILE_HEADERS.len()
                ),
                concern: None,
            });
        }

        let active_days = header_value(profile, "activity rate").and_then(|value| {
            value
                .split(|c: char| !c.is_ascii_digit())
                .find(|digits| !digits.is_empty())
                .and_then(|digits| digits.parse::<u32>().ok())
        });
        if !waivers.in_rate && active_days.is_some_and(|days| days < MIN_ACTIVE_DAYS) {
            return Ok(ProfileEvaluation {
                complete: false,
                feedback: "Your stated activity rate is below what we expect.".to_string(),
                concern: Some(ProfileConcern::InRate),
            });
        }

        let available_now = header_value(profile, "available now").map(first_word);
        if !waivers.relocation && available_now.as_deref().is_some_and(|word| NEGATIVE.contains(&word)) {
            return Ok(ProfileEvaluation {
                complete: false,
                feedback: "You said you cannot move over right away.".to_string(),
                concern: Some(ProfileConcern::Relocation),
            });
        }

        Ok(ProfileEvaluation {
            complete: true,
            feedback: "Thank you, your profile is complete.".to_string(),
            concern: None,
        })
    }

    async fn classify_reply(&self, reply: &str) -> Result<ReplyClass, ClassifierError> {
        let word = first_word(reply);
        Ok(if AFFIRMATIVE.contains(&word.as_str()) {
            ReplyClass::Yes
        } else if NEGATIVE.contains(&word.as_str()) {
            ReplyClass::No
        } else {
            ReplyClass::Unsure
        })
    }
}
