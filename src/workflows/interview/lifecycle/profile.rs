use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::CandidateLifecycle;
use crate::workflows::interview::domain::{
    CandidateStatus, ChannelRef, MessageRef, PendingConfirmation, PolicyViolation, ProgressKey,
    SubjectId,
};
use crate::workflows::interview::gateway::{ProfileConcern, ReplyClass};

/// Section headings of the profile template.
pub const PROFILE_HEADERS: [&str; 15] = [
    "preferred name",
    "gender",
    "age",
    "height",
    "location",
    "community experience",
    "current communities",
    "activity rate",
    "strengths",
    "weaknesses",
    "appeal",
    "available now",
    "interview deadline",
    "available hours",
    "other",
];

const MIN_HEADER_HITS: usize = 5;
const MIN_LINE_BREAKS: usize = 8;

const EVALUATION_APOLOGY: &str =
    "Sorry, we could not check your profile right now. Please edit or repost it in a little while.";
const PROFILE_ACCEPTED: &str =
    "Thank you! Your profile is complete. An interviewer will contact you shortly.";
const PROFILE_MISSING: &str =
    "We could not find your earlier profile message. Please post your profile again.";
const DECLINED_NOTICE: &str =
    "Thank you for your interest. Since the requirements could not be met, we are unable to proceed with your application.";

/// Cheap check for whether a message is meant as a profile submission.
pub fn looks_like_profile(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let hits = PROFILE_HEADERS
        .iter()
        .filter(|header| lowered.contains(*header))
        .count();
    hits >= MIN_HEADER_HITS || text.matches('\n').count() >= MIN_LINE_BREAKS
}

fn confirmation_prompt(pending: PendingConfirmation) -> &'static str {
    match pending {
        PendingConfirmation::InRateConfirmation => {
            "Can you keep up the expected activity rate? Please answer yes or no."
        }
        PendingConfirmation::RelocationConfirmation => {
            "Are you able to move to the primary community after passing? Please answer yes or no."
        }
        PendingConfirmation::None => "",
    }
}

enum ProfileVerdict {
    Unavailable,
    Accepted { fresh: bool },
    NeedsConfirmation(String, PendingConfirmation),
    Rejected(String),
}

impl CandidateLifecycle {
    pub(super) async fn message_posted(
        &self,
        channel: ChannelRef,
        author: SubjectId,
        message: MessageRef,
        content: &str,
        addressed: bool,
        at: DateTime<Utc>,
    ) {
        let Some(key) = self
            .stores
            .state
            .read(|state| state.key_for_channel(channel))
        else {
            return;
        };
        let _guard = self.locks.acquire(&key).await;
        let Some(record) = self.candidate(&key) else {
            return;
        };
        if record.subject_id != author || record.channel != Some(channel) {
            return;
        }

        if record.pending_confirmation != PendingConfirmation::None {
            self.resolve_confirmation(&key, channel, content, at).await;
        } else if record.status.awaits_profile() && looks_like_profile(content) {
            self.process_profile(&key, channel, message, content, at).await;
        } else if !record.status.awaits_profile() && !addressed {
            if let Some(interviewer) = record.interviewer_id {
                self.direct(
                    interviewer,
                    &format!("<@{author}> wrote in their interview channel:\n{content}"),
                )
                .await;
            }
        }
    }

    pub(super) async fn message_edited(
        &self,
        channel: ChannelRef,
        author: SubjectId,
        message: MessageRef,
        content: &str,
        at: DateTime<Utc>,
    ) {
        let Some(key) = self
            .stores
            .state
            .read(|state| state.key_for_channel(channel))
        else {
            return;
        };
        let _guard = self.locks.acquire(&key).await;
        let Some(record) = self.candidate(&key) else {
            return;
        };
        if record.subject_id != author || record.pending_confirmation != PendingConfirmation::None
        {
            return;
        }
        let stored_profile = record.profile_message == Some(message)
            && (record.status.awaits_profile()
                || record.status == CandidateStatus::ProfileSubmitted);
        if stored_profile || (record.status.awaits_profile() && looks_like_profile(content)) {
            debug!(%key, "re-evaluating edited profile");
            self.process_profile(&key, channel, message, content, at).await;
        }
    }

    /// Evaluate a submitted profile and move the record accordingly. Caller holds the key lock.
    async fn process_profile(
        &self,
        key: &ProgressKey,
        channel: ChannelRef,
        message: MessageRef,
        content: &str,
        at: DateTime<Utc>,
    ) {
        let Some(waivers) = self.candidate(key).map(|record| record.waivers) else {
            return;
        };
        let evaluation = self.classifier.evaluate(content, waivers).await;

        let verdict = self.with_candidate(key, |record| -> Result<ProfileVerdict, PolicyViolation> {
            let evaluation = match &evaluation {
                Ok(evaluation) => evaluation,
                Err(err) => {
                    warn!(%key, error = %err, "profile evaluation failed");
                    if record.status.awaits_profile() {
                        record.transition(CandidateStatus::NeedsRevision, at)?;
                        record.profile_message = Some(message);
                    }
                    return Ok(ProfileVerdict::Unavailable);
                }
            };
            record.profile_evaluated = true;
            record.profile_message = Some(message);
            if evaluation.complete {
                let fresh = record.status != CandidateStatus::ProfileSubmitted;
                record.transition(CandidateStatus::ProfileSubmitted, at)?;
                record.pending_confirmation = PendingConfirmation::None;
                if fresh {
                    record.profile_submitted_at = Some(at);
                }
                return Ok(ProfileVerdict::Accepted { fresh });
            }
            match evaluation.concern {
                Some(concern) => {
                    record.transition(CandidateStatus::NoProfile, at)?;
                    let pending = match concern {
                        ProfileConcern::InRate => PendingConfirmation::InRateConfirmation,
                        ProfileConcern::Relocation => PendingConfirmation::RelocationConfirmation,
                    };
                    record.pending_confirmation = pending;
                    Ok(ProfileVerdict::NeedsConfirmation(
                        evaluation.feedback.clone(),
                        pending,
                    ))
                }
                None => {
                    record.transition(CandidateStatus::NeedsRevision, at)?;
                    Ok(ProfileVerdict::Rejected(evaluation.feedback.clone()))
                }
            }
        });

        let verdict = match verdict {
            Some(Ok(verdict)) => verdict,
            Some(Err(violation)) => {
                debug!(%key, %violation, "profile ignored");
                return;
            }
            None => return,
        };
        self.persist(key).await;

        match verdict {
            ProfileVerdict::Unavailable => {
                let _ = self.say(channel, EVALUATION_APOLOGY).await;
            }
            ProfileVerdict::Accepted { fresh } => {
                info!(%key, fresh, "profile accepted");
                let _ = self.say(channel, PROFILE_ACCEPTED).await;
                if fresh {
                    self.notify_interviewers(key, at).await;
                }
            }
            ProfileVerdict::NeedsConfirmation(feedback, pending) => {
                info!(%key, "profile needs confirmation");
                let question = format!("{feedback}\n{}", confirmation_prompt(pending));
                let _ = self.say(channel, &question).await;
            }
            ProfileVerdict::Rejected(feedback) => {
                info!(%key, "profile needs revision");
                let _ = self.say(channel, &feedback).await;
            }
        }
    }

    async fn notify_interviewers(&self, key: &ProgressKey, at: DateTime<Utc>) {
        let Some(channel) = self.settings.notice_channel else {
            return;
        };
        if !self.settings.notice_window.contains(at, self.settings.utc_offset) {
            debug!(%key, "outside notice hours; interviewers not pinged");
            return;
        }
        let _ = self
            .say(channel, &format!("A new profile is ready for review: {key}"))
            .await;
    }

    /// Interpret a reply to a pending confirmation question. Caller holds the key lock.
    async fn resolve_confirmation(
        &self,
        key: &ProgressKey,
        channel: ChannelRef,
        reply: &str,
        at: DateTime<Utc>,
    ) {
        let Some(pending) = self.candidate(key).map(|record| record.pending_confirmation) else {
            return;
        };
        if pending == PendingConfirmation::None {
            debug!(%key, violation = %PolicyViolation::NoPendingConfirmation, "reply ignored");
            return;
        }

        let class = match self.classifier.classify_reply(reply).await {
            Ok(class) => class,
            Err(err) => {
                warn!(%key, error = %err, "reply classification failed; asking again");
                ReplyClass::Unsure
            }
        };

        match class {
            ReplyClass::Unsure => {
                let _ = self.say(channel, confirmation_prompt(pending)).await;
            }
            ReplyClass::No => {
                let Some(removed) = self
                    .stores
                    .state
                    .update(|state| state.remove_candidate(key))
                else {
                    return;
                };
                info!(%key, "confirmation declined; record closed");
                self.direct(removed.subject_id, DECLINED_NOTICE).await;
                self.release_channels(&removed.owned_channels()).await;
                self.persist(key).await;
            }
            ReplyClass::Yes => {
                let profile_message = self.with_candidate(key, |record| {
                    record.pending_confirmation = PendingConfirmation::None;
                    match pending {
                        PendingConfirmation::InRateConfirmation => record.waivers.in_rate = true,
                        PendingConfirmation::RelocationConfirmation => {
                            record.waivers.relocation = true
                        }
                        PendingConfirmation::None => {}
                    }
                    record.profile_message
                });
                let Some(profile_message) = profile_message else {
                    return;
                };
                self.persist(key).await;

                let content = match profile_message {
                    Some(message) => match self.gateway.fetch_message(channel, message).await {
                        Ok(content) => Some((message, content)),
                        Err(err) if err.is_not_found() => None,
                        Err(err) => {
                            warn!(%key, error = %err, "failed to fetch stored profile");
                            let _ = self.say(channel, EVALUATION_APOLOGY).await;
                            return;
                        }
                    },
                    None => None,
                };

                match content {
                    Some((message, content)) => {
                        self.process_profile(key, channel, message, &content, at).await
                    }
                    None => {
                        let reset = self.with_candidate(key, |record| {
                            record.profile_message = None;
                            record.transition(CandidateStatus::NoProfile, at)
                        });
                        if matches!(reset, Some(Ok(()))) {
                            self.persist(key).await;
                        }
                        let _ = self.say(channel, PROFILE_MISSING).await;
                    }
                }
            }
        }
    }
}
