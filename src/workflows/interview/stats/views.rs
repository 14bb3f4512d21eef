use super::super::domain::{CandidateStatus, Period, ProgressKey, SubjectId};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterviewerTallyEntry {
    pub interviewer_id: SubjectId,
    pub display_name: String,
    pub count: usize,
    pub goal: u32,
    pub goal_met: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeSummaryView {
    pub passes: usize,
    pub rejections: usize,
    /// Passes over decided outcomes, 0.0 when nothing was decided.
    pub pass_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyReportView {
    pub period: Period,
    pub interviewers: Vec<InterviewerTallyEntry>,
    pub outcomes: OutcomeSummaryView,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusCountEntry {
    pub status: CandidateStatus,
    pub status_label: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateLine {
    pub key: ProgressKey,
    pub subject_id: SubjectId,
    pub status: CandidateStatus,
    pub status_label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interviewer_id: Option<SubjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_interview_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub total: usize,
    pub status_counts: Vec<StatusCountEntry>,
    pub candidates: Vec<CandidateLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterviewerCandidates {
    pub interviewer_label: String,
    pub candidates: Vec<String>,
}
