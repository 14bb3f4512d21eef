use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Person tracked through the pipeline, or an interviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub u64);

/// Externally hosted community (server) a subject can join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommunityId(pub u64);

/// Handle to a chat channel owned by the messaging gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelRef(pub u64);

/// Handle to a message posted through the messaging gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageRef(pub u64);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CommunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite `community:subject` key identifying one progress record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressKey(pub String);

impl ProgressKey {
    pub fn new(community: CommunityId, subject: SubjectId) -> Self {
        Self(format!("{}:{}", community.0, subject.0))
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message that lives in a specific channel, kept so projections can edit it in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedMessage {
    pub channel: ChannelRef,
    pub message: MessageRef,
}

/// Stage of a candidate's progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    NoProfile,
    NeedsRevision,
    ProfileSubmitted,
    AwaitingInterviewer,
    Scheduled,
    Interviewed,
    AwaitingOnboarding,
}

impl CandidateStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::NoProfile => "no_profile",
            Self::NeedsRevision => "needs_revision",
            Self::ProfileSubmitted => "profile_submitted",
            Self::AwaitingInterviewer => "awaiting_interviewer",
            Self::Scheduled => "scheduled",
            Self::Interviewed => "interviewed",
            Self::AwaitingOnboarding => "awaiting_onboarding",
        }
    }

    pub fn ordered() -> [Self; 7] {
        [
            Self::NoProfile,
            Self::NeedsRevision,
            Self::ProfileSubmitted,
            Self::AwaitingInterviewer,
            Self::Scheduled,
            Self::Interviewed,
            Self::AwaitingOnboarding,
        ]
    }

    /// Statuses in which a profile submission is still expected.
    pub const fn awaits_profile(self) -> bool {
        matches!(self, Self::NoProfile | Self::NeedsRevision)
    }

    /// Statuses from which a Fail/Ban/Interval outcome may be recorded.
    pub const fn accepts_rejection(self) -> bool {
        matches!(
            self,
            Self::AwaitingInterviewer | Self::Scheduled | Self::Interviewed
        )
    }

    /// Whether moving from `self` to `next` is a single legal step.
    pub const fn can_advance_to(self, next: Self) -> bool {
        use CandidateStatus::*;
        matches!(
            (self, next),
            (NoProfile, NoProfile)
                | (NoProfile, NeedsRevision)
                | (NoProfile, ProfileSubmitted)
                | (NeedsRevision, NoProfile)
                | (NeedsRevision, NeedsRevision)
                | (NeedsRevision, ProfileSubmitted)
                | (ProfileSubmitted, NoProfile)
                | (ProfileSubmitted, NeedsRevision)
                | (ProfileSubmitted, ProfileSubmitted)
                | (ProfileSubmitted, AwaitingInterviewer)
                | (AwaitingInterviewer, Scheduled)
                | (Scheduled, Scheduled)
                | (Scheduled, Interviewed)
                | (Interviewed, Interviewed)
                | (Interviewed, AwaitingOnboarding)
        )
    }
}

/// Follow-up question the candidate still owes an answer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingConfirmation {
    #[default]
    None,
    InRateConfirmation,
    RelocationConfirmation,
}

/// Checks the candidate already cleared by answering a confirmation affirmatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfirmationWaivers {
    pub in_rate: bool,
    pub relocation: bool,
}

/// Progress record for one subject in one originating community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProgress {
    pub subject_id: SubjectId,
    pub community_id: CommunityId,
    pub status: CandidateStatus,
    #[serde(default)]
    pub interviewer_id: Option<SubjectId>,
    #[serde(default)]
    pub channel: Option<ChannelRef>,
    #[serde(default)]
    pub voice_channel: Option<ChannelRef>,
    pub joined_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_interview_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub schedule_registered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub profile_submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub profile_message: Option<MessageRef>,
    #[serde(default)]
    pub reminded_at_6h: bool,
    #[serde(default)]
    pub warned_at_24h: bool,
    #[serde(default)]
    pub notified_candidate_1h: bool,
    #[serde(default)]
    pub notified_interviewer_10m: bool,
    #[serde(default)]
    pub profile_evaluated: bool,
    #[serde(default)]
    pub pending_confirmation: PendingConfirmation,
    #[serde(default)]
    pub waivers: ConfirmationWaivers,
}

impl CandidateProgress {
    pub fn joined(
        community_id: CommunityId,
        subject_id: SubjectId,
        channel: ChannelRef,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject_id,
            community_id,
            status: CandidateStatus::NoProfile,
            interviewer_id: None,
            channel: Some(channel),
            voice_channel: None,
            joined_at: at,
            status_changed_at: at,
            scheduled_interview_at: None,
            schedule_registered_at: None,
            profile_submitted_at: None,
            profile_message: None,
            reminded_at_6h: false,
            warned_at_24h: false,
            notified_candidate_1h: false,
            notified_interviewer_10m: false,
            profile_evaluated: false,
            pending_confirmation: PendingConfirmation::None,
            waivers: ConfirmationWaivers::default(),
        }
    }

    pub fn key(&self) -> ProgressKey {
        ProgressKey::new(self.community_id, self.subject_id)
    }

    /// Apply a single status step, rejecting anything that would skip a stage.
    pub fn transition(
        &mut self,
        next: CandidateStatus,
        at: DateTime<Utc>,
    ) -> Result<(), PolicyViolation> {
        if !self.status.can_advance_to(next) {
            return Err(PolicyViolation::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.status_changed_at = at;
        Ok(())
    }

    /// Channels owned by the record, text channel first.
    pub fn owned_channels(&self) -> Vec<ChannelRef> {
        self.channel.iter().chain(self.voice_channel.iter()).copied().collect()
    }
}

/// Transition requested against a record that cannot take it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("cannot move candidate from {} to {}", .from.label(), .to.label())]
    InvalidTransition {
        from: CandidateStatus,
        to: CandidateStatus,
    },
    #[error("an outcome cannot be recorded while the candidate is {}", .0.label())]
    OutcomeNotAllowed(CandidateStatus),
    #[error("no confirmation is pending for this candidate")]
    NoPendingConfirmation,
    #[error("interview start must be in the future")]
    ScheduleInPast,
    #[error("candidate record no longer exists")]
    MissingRecord,
}

/// Which community the exclusion was issued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanOrigin {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanKind {
    Permanent,
    TimeLimited,
}

impl BanKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Permanent => "BAN",
            Self::TimeLimited => "INTERVAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub origin: BanOrigin,
    pub kind: BanKind,
    pub recorded_at: DateTime<Utc>,
}

/// Moderation outcome that ends a candidate's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Fail,
    Ban,
    Interval,
}

impl OutcomeKind {
    pub const fn result_tag(self) -> &'static str {
        match self {
            Self::Fail => "FAIL",
            Self::Ban => "BAN",
            Self::Interval => "INTERVAL",
        }
    }

    pub fn delayed_tag(self) -> String {
        format!("{} (delayed)", self.result_tag())
    }

    pub const fn ban_kind(self) -> Option<BanKind> {
        match self {
            Self::Fail => None,
            Self::Ban => Some(BanKind::Permanent),
            Self::Interval => Some(BanKind::TimeLimited),
        }
    }

    pub const fn kick_reason(self) -> &'static str {
        match self {
            Self::Fail => "interview not passed",
            Self::Ban => "banned after interview",
            Self::Interval => "interval after interview",
        }
    }
}

/// Where a delayed action removes the subject from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "community_id", rename_all = "snake_case")]
pub enum ActionScope {
    AllCommunities,
    SingleCommunity(CommunityId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActionId {
    type Err = uuid::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(raw.trim()).map(Self)
    }
}

/// Outcome waiting for its due time in the delayed-action queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedAction {
    pub id: ActionId,
    pub kind: OutcomeKind,
    pub subject_id: SubjectId,
    pub scheduled_at: DateTime<Utc>,
    pub scope: ActionScope,
    #[serde(default)]
    pub interviewer_id: Option<SubjectId>,
    /// The interview record was appended when the action was registered.
    #[serde(default = "default_outcome_recorded")]
    pub outcome_recorded: bool,
}

fn default_outcome_recorded() -> bool {
    true
}

impl DelayedAction {
    pub fn new(
        kind: OutcomeKind,
        subject_id: SubjectId,
        scheduled_at: DateTime<Utc>,
        scope: ActionScope,
    ) -> Self {
        Self {
            id: ActionId::generate(),
            kind,
            subject_id,
            scheduled_at,
            scope,
            interviewer_id: None,
            outcome_recorded: true,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }
}

pub const RESULT_PASS: &str = "PASS";
pub const RESULT_MANUAL: &str = "manual_set";

/// Append-only log entry for a finished interview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewRecord {
    #[serde(alias = "date")]
    pub timestamp: DateTime<Utc>,
    pub interviewer_id: SubjectId,
    /// Absent for administrative `manual_set` adjustments.
    #[serde(default, alias = "interviewee_id")]
    pub subject_id: Option<SubjectId>,
    pub result: String,
}

impl InterviewRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        interviewer_id: SubjectId,
        subject_id: SubjectId,
        result: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            interviewer_id,
            subject_id: Some(subject_id),
            result: result.into(),
        }
    }

    pub fn manual(timestamp: DateTime<Utc>, interviewer_id: SubjectId) -> Self {
        Self {
            timestamp,
            interviewer_id,
            subject_id: None,
            result: RESULT_MANUAL.to_string(),
        }
    }

    pub fn is_manual(&self) -> bool {
        self.result == RESULT_MANUAL
    }
}

/// Pointer to an interview memo posted by an interviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoReference {
    pub community_id: CommunityId,
    pub channel: ChannelRef,
    pub message: MessageRef,
    pub recorded_at: DateTime<Utc>,
    pub interviewer_id: SubjectId,
    pub result: String,
}

pub const MEMO_UNRATED: &str = "unrated";

/// Calendar month in the pipeline's local offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn containing(timestamp: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local = timestamp.with_timezone(&offset);
        Self {
            year: local.year(),
            month: local.month(),
        }
    }

    /// First instant of the month, used as the timestamp of manual adjustments.
    pub fn starts_at(self, offset: FixedOffset) -> Option<DateTime<Utc>> {
        let date = NaiveDate::from_ymd_opt(self.year, self.month, 1)?;
        let naive = date.and_hms_opt(0, 0, 0)?;
        offset
            .from_local_datetime(&naive)
            .single()
            .map(|local| local.with_timezone(&Utc))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("failed to parse '{raw}' as YYYY-MM");
        let (year, month) = raw.trim().split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self { year, month })
    }
}

impl TryFrom<String> for Period {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.to_string()
    }
}

/// Next 09:00 local time strictly on the following calendar day.
pub fn next_morning(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_date = now.with_timezone(&offset).date_naive();
    local_date
        .succ_opt()
        .and_then(|date| date.and_hms_opt(9, 0, 0))
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| now + Duration::days(1))
}

/// The main persisted document: records, progress, channel index, and projection handles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    #[serde(default)]
    pub interview_records: Vec<InterviewRecord>,
    #[serde(default)]
    pub interviewer_stats_messages: BTreeMap<Period, PostedMessage>,
    #[serde(default)]
    pub monthly_summary_messages: BTreeMap<Period, PostedMessage>,
    #[serde(default)]
    pub candidates: BTreeMap<ProgressKey, CandidateProgress>,
    #[serde(default)]
    pub channel_index: BTreeMap<ChannelRef, ProgressKey>,
    #[serde(default)]
    pub dashboard_message: Option<PostedMessage>,
    #[serde(default)]
    pub memo_history: BTreeMap<SubjectId, Vec<MemoReference>>,
}

impl PipelineState {
    /// Insert a record and index every channel it owns.
    pub fn insert_candidate(&mut self, progress: CandidateProgress) {
        let key = progress.key();
        for channel in progress.owned_channels() {
            self.channel_index.insert(channel, key.clone());
        }
        self.candidates.insert(key, progress);
    }

    /// Remove a record together with every index entry pointing at it.
    pub fn remove_candidate(&mut self, key: &ProgressKey) -> Option<CandidateProgress> {
        self.channel_index.retain(|_, indexed| indexed != key);
        self.candidates.remove(key)
    }

    pub fn key_for_channel(&self, channel: ChannelRef) -> Option<ProgressKey> {
        self.channel_index.get(&channel).cloned()
    }

    pub fn record_outcome(&mut self, record: InterviewRecord) {
        if let Some(subject) = record.subject_id {
            if let Some(latest) = self
                .memo_history
                .get_mut(&subject)
                .and_then(|memos| memos.last_mut())
            {
                latest.result = record.result.clone();
            }
        }
        self.interview_records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokyo() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).expect("valid offset")
    }

    fn at(raw: &str) -> DateTime<Utc> {
        raw.parse().expect("valid timestamp")
    }

    #[test]
    fn status_steps_never_skip_a_stage() {
        use CandidateStatus::*;
        assert!(NoProfile.can_advance_to(ProfileSubmitted));
        assert!(ProfileSubmitted.can_advance_to(AwaitingInterviewer));
        assert!(!NoProfile.can_advance_to(AwaitingInterviewer));
        assert!(!ProfileSubmitted.can_advance_to(Scheduled));
        assert!(!AwaitingInterviewer.can_advance_to(Interviewed));
        assert!(!Scheduled.can_advance_to(AwaitingOnboarding));
        for status in CandidateStatus::ordered() {
            assert!(!AwaitingOnboarding.can_advance_to(status));
        }
    }

    #[test]
    fn transition_rejects_skips_and_keeps_status() {
        let joined = at("2025-03-01T00:00:00Z");
        let mut record =
            CandidateProgress::joined(CommunityId(1), SubjectId(7), ChannelRef(70), joined);
        let err = record
            .transition(CandidateStatus::Scheduled, joined)
            .expect_err("skipping stages is refused");
        assert_eq!(
            err,
            PolicyViolation::InvalidTransition {
                from: CandidateStatus::NoProfile,
                to: CandidateStatus::Scheduled,
            }
        );
        assert_eq!(record.status, CandidateStatus::NoProfile);

        let later = at("2025-03-01T02:00:00Z");
        record
            .transition(CandidateStatus::ProfileSubmitted, later)
            .expect("legal step");
        assert_eq!(record.status_changed_at, later);
    }

    #[test]
    fn next_morning_lands_on_the_following_local_day() {
        // 23:30 local on March 1st.
        let due = next_morning(at("2025-03-01T14:30:00Z"), tokyo());
        assert_eq!(due, at("2025-03-02T00:00:00Z"));

        // 08:00 local is still "tomorrow morning", never the same day.
        let due = next_morning(at("2025-03-01T23:00:00Z"), tokyo());
        assert_eq!(due, at("2025-03-03T00:00:00Z"));
    }

    #[test]
    fn period_follows_local_calendar() {
        let period = Period::containing(at("2025-03-31T16:00:00Z"), tokyo());
        assert_eq!(period, Period { year: 2025, month: 4 });
        assert_eq!(period.to_string(), "2025-04");
        assert_eq!(
            period.starts_at(tokyo()),
            Some(at("2025-03-31T15:00:00Z"))
        );
        assert!("2025-13".parse::<Period>().is_err());
        assert_eq!("2024-07".parse::<Period>(), Ok(Period { year: 2024, month: 7 }));
    }

    #[test]
    fn removing_a_candidate_drops_its_index_entries() {
        let joined = at("2025-03-01T00:00:00Z");
        let mut state = PipelineState::default();
        let mut record =
            CandidateProgress::joined(CommunityId(1), SubjectId(7), ChannelRef(70), joined);
        record.voice_channel = Some(ChannelRef(71));
        let key = record.key();
        state.insert_candidate(record);
        assert_eq!(state.key_for_channel(ChannelRef(71)), Some(key.clone()));

        let removed = state.remove_candidate(&key).expect("record exists");
        assert_eq!(removed.owned_channels(), vec![ChannelRef(70), ChannelRef(71)]);
        assert!(state.channel_index.is_empty());
    }

    #[test]
    fn outcome_updates_latest_memo() {
        let now = at("2025-03-05T10:00:00Z");
        let mut state = PipelineState::default();
        state.memo_history.insert(
            SubjectId(7),
            vec![MemoReference {
                community_id: CommunityId(1),
                channel: ChannelRef(5),
                message: MessageRef(50),
                recorded_at: now,
                interviewer_id: SubjectId(2),
                result: MEMO_UNRATED.to_string(),
            }],
        );
        state.record_outcome(InterviewRecord::new(now, SubjectId(2), SubjectId(7), "BAN"));
        assert_eq!(state.memo_history[&SubjectId(7)][0].result, "BAN");
        assert_eq!(state.interview_records.len(), 1);
    }
}
