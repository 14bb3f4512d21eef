//! Aggregations over the interview log and the live progress records.

pub mod views;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::FixedOffset;

use super::domain::{
    CandidateStatus, InterviewRecord, Period, PipelineState, SubjectId, RESULT_PASS,
};
use views::{
    CandidateLine, InterviewerTallyEntry, MonthlyReportView, OutcomeSummaryView,
    PipelineSnapshot, StatusCountEntry,
};

const REJECTION_PREFIXES: [&str; 3] = ["FAIL", "BAN", "INTERVAL"];

/// How a result tag counts toward the pass rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCategory {
    Pass,
    Rejection,
    Uncounted,
}

impl ResultCategory {
    pub fn of(result: &str) -> Self {
        let result = result.to_ascii_uppercase();
        if result == RESULT_PASS {
            Self::Pass
        } else if REJECTION_PREFIXES
            .iter()
            .any(|prefix| result.starts_with(prefix))
        {
            Self::Rejection
        } else {
            Self::Uncounted
        }
    }
}

pub fn fallback_name(subject: SubjectId) -> String {
    format!("ID:{subject}")
}

/// Pure monthly aggregation in the pipeline's local offset.
#[derive(Debug, Clone, Copy)]
pub struct StatsAggregator {
    offset: FixedOffset,
    goal: u32,
}

impl StatsAggregator {
    pub fn new(offset: FixedOffset, goal: u32) -> Self {
        Self { offset, goal }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn period_of(&self, record: &InterviewRecord) -> Period {
        Period::containing(record.timestamp, self.offset)
    }

    /// Every month that has at least one record.
    pub fn periods(&self, records: &[InterviewRecord]) -> BTreeSet<Period> {
        records.iter().map(|record| self.period_of(record)).collect()
    }

    /// Interviews conducted per interviewer in `period`. Roster members with no
    /// interviews appear with zero. Sorted by count descending, then name.
    pub fn interviewer_counts(
        &self,
        records: &[InterviewRecord],
        period: Period,
        roster: &[SubjectId],
        names: &HashMap<SubjectId, String>,
    ) -> Vec<InterviewerTallyEntry> {
        let mut counts: BTreeMap<SubjectId, usize> = BTreeMap::new();
        for record in records.iter().filter(|record| self.period_of(record) == period) {
            *counts.entry(record.interviewer_id).or_default() += 1;
        }
        for member in roster {
            counts.entry(*member).or_default();
        }

        let mut entries: Vec<InterviewerTallyEntry> = counts
            .into_iter()
            .map(|(interviewer_id, count)| InterviewerTallyEntry {
                interviewer_id,
                display_name: names
                    .get(&interviewer_id)
                    .cloned()
                    .unwrap_or_else(|| fallback_name(interviewer_id)),
                count,
                goal: self.goal,
                goal_met: count >= self.goal as usize,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        entries
    }

    pub fn outcome_summary(&self, records: &[InterviewRecord], period: Period) -> OutcomeSummaryView {
        let (mut passes, mut rejections) = (0, 0);
        for record in records.iter().filter(|record| self.period_of(record) == period) {
            match ResultCategory::of(&record.result) {
                ResultCategory::Pass => passes += 1,
                ResultCategory::Rejection => rejections += 1,
                ResultCategory::Uncounted => {}
            }
        }
        let decided = passes + rejections;
        let pass_rate = if decided == 0 {
            0.0
        } else {
            passes as f64 / decided as f64
        };
        OutcomeSummaryView {
            passes,
            rejections,
            pass_rate,
        }
    }

    pub fn monthly_report(
        &self,
        records: &[InterviewRecord],
        period: Period,
        roster: &[SubjectId],
        names: &HashMap<SubjectId, String>,
    ) -> MonthlyReportView {
        MonthlyReportView {
            period,
            interviewers: self.interviewer_counts(records, period, roster, names),
            outcomes: self.outcome_summary(records, period),
        }
    }
}

/// Per-status counts plus one line per open record, for the dashboard.
pub fn pipeline_snapshot(state: &PipelineState) -> PipelineSnapshot {
    let mut counts: HashMap<CandidateStatus, usize> = HashMap::new();
    let mut candidates: Vec<CandidateLine> = state
        .candidates
        .iter()
        .map(|(key, progress)| {
            *counts.entry(progress.status).or_default() += 1;
            CandidateLine {
                key: key.clone(),
                subject_id: progress.subject_id,
                status: progress.status,
                status_label: progress.status.label(),
                interviewer_id: progress.interviewer_id,
                scheduled_interview_at: progress.scheduled_interview_at,
            }
        })
        .collect();
    candidates.sort_by(|a, b| a.status.cmp(&b.status).then_with(|| a.key.cmp(&b.key)));

    let status_counts = CandidateStatus::ordered()
        .into_iter()
        .map(|status| StatusCountEntry {
            status,
            status_label: status.label(),
            count: counts.get(&status).copied().unwrap_or(0),
        })
        .collect();

    PipelineSnapshot {
        total: state.candidates.len(),
        status_counts,
        candidates,
    }
}
