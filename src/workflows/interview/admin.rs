use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::domain::{
    ActionId, BanRecord, DelayedAction, InterviewRecord, Period, ProgressKey, SubjectId,
};
use super::gateway::{CommunityGateway, GatewayError};
use super::lifecycle::PipelineStores;
use super::projection::{resolve_names, GatewayProjection};
use super::projector::{DebouncedProjector, ProjectionError, ProjectionTarget};
use super::settings::PipelineSettings;
use super::stats::views::{InterviewerCandidates, MonthlyReportView};
use super::stats::{fallback_name, StatsAggregator};
use super::store::StoreError;

const UNKNOWN_INTERVIEWER: &str = "unknown";

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error("no month start exists for {0}")]
    InvalidPeriod(Period),
}

/// How a manual adjustment changes the `manual_set` entries of one interviewer and month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustMode {
    Add,
    Sub,
    Set,
}

impl FromStr for AdjustMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(Self::Add),
            "sub" => Ok(Self::Sub),
            "set" => Ok(Self::Set),
            other => Err(format!("unknown adjust mode '{other}', expected add, sub, or set")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdjustmentReport {
    pub period: Period,
    pub interviewer_id: SubjectId,
    pub mode: AdjustMode,
    pub added: usize,
    pub removed: usize,
    pub manual_total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BanListing {
    pub subject_id: SubjectId,
    #[serde(flatten)]
    pub record: BanRecord,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Operator-facing maintenance operations.
pub struct AdminConsole {
    stores: PipelineStores,
    gateway: Arc<dyn CommunityGateway>,
    projection: Arc<GatewayProjection>,
    projector: Arc<DebouncedProjector>,
    settings: PipelineSettings,
    stats: StatsAggregator,
}

impl AdminConsole {
    pub fn new(
        stores: PipelineStores,
        gateway: Arc<dyn CommunityGateway>,
        projection: Arc<GatewayProjection>,
        projector: Arc<DebouncedProjector>,
        settings: PipelineSettings,
    ) -> Self {
        let stats = StatsAggregator::new(settings.utc_offset, settings.monthly_goal);
        Self {
            stores,
            gateway,
            projection,
            projector,
            settings,
            stats,
        }
    }

    pub fn current_period(&self, now: DateTime<Utc>) -> Period {
        Period::containing(now, self.settings.utc_offset)
    }

    /// Re-render the interviewer statistics for every month with records, plus the
    /// current month's summary, bypassing the debounce.
    pub async fn refresh_stats_now(&self, now: DateTime<Utc>) -> Result<usize, AdminError> {
        let mut periods = self
            .stores
            .state
            .read(|state| self.stats.periods(&state.interview_records));
        let current = self.current_period(now);
        periods.insert(current);

        for period in &periods {
            self.projector
                .refresh_now(ProjectionTarget::InterviewerStats(*period))
                .await?;
        }
        self.projector
            .refresh_now(ProjectionTarget::MonthlySummary(current))
            .await?;
        info!(months = periods.len(), "statistics refreshed on request");
        Ok(periods.len())
    }

    pub async fn monthly_report(&self, period: Period) -> Result<MonthlyReportView, AdminError> {
        Ok(self.projection.monthly_report(period).await?)
    }

    pub async fn list_bans(&self, now: DateTime<Utc>) -> Result<Vec<BanListing>, AdminError> {
        let bans = self.stores.bans.list(now).await?;
        Ok(bans
            .into_iter()
            .map(|(subject_id, record)| BanListing {
                subject_id,
                record,
                expires_at: record.expires_at(),
            })
            .collect())
    }

    pub async fn clear_ban(&self, subject: SubjectId) -> Result<bool, AdminError> {
        Ok(self.stores.bans.remove(subject).await?)
    }

    pub fn list_actions(&self) -> Vec<DelayedAction> {
        self.stores.actions.list()
    }

    pub async fn cancel_action(&self, id: ActionId) -> Result<bool, AdminError> {
        let removed = self.stores.actions.remove(id).await?;
        if removed {
            info!(action = %id, "delayed action cancelled");
        }
        Ok(removed)
    }

    /// Change the manual interview count of `interviewer` in `period`.
    pub async fn adjust_interview_count(
        &self,
        interviewer: SubjectId,
        mode: AdjustMode,
        count: usize,
        period: Period,
    ) -> Result<AdjustmentReport, AdminError> {
        let month_start = period
            .starts_at(self.settings.utc_offset)
            .ok_or(AdminError::InvalidPeriod(period))?;
        let stats = self.stats;
        let is_target = move |record: &InterviewRecord| {
            record.is_manual()
                && record.interviewer_id == interviewer
                && stats.period_of(record) == period
        };

        let committed = self
            .stores
            .state
            .transact(|state| {
                let records = &mut state.interview_records;
                let existing = records.iter().filter(|record| is_target(record)).count();
                let (remove, add) = match mode {
                    AdjustMode::Add => (0, count),
                    AdjustMode::Sub => (count.min(existing), 0),
                    AdjustMode::Set => (existing, count),
                };

                let mut removed = 0;
                records.retain(|record| {
                    if removed < remove && is_target(record) {
                        removed += 1;
                        false
                    } else {
                        true
                    }
                });
                records.extend((0..add).map(|_| InterviewRecord::manual(month_start, interviewer)));

                AdjustmentReport {
                    period,
                    interviewer_id: interviewer,
                    mode,
                    added: add,
                    removed,
                    manual_total: existing - removed + add,
                }
            })
            .await;
        committed.persisted?;
        let report = committed.value;
        info!(
            interviewer = %interviewer,
            %period,
            ?mode,
            added = report.added,
            removed = report.removed,
            "manual interview count adjusted"
        );

        self.projector
            .refresh_now(ProjectionTarget::InterviewerStats(period))
            .await?;
        self.projector
            .refresh_now(ProjectionTarget::MonthlySummary(period))
            .await?;
        Ok(report)
    }

    /// Passed candidates in the primary community grouped by who interviewed them.
    pub async fn list_candidates_by_interviewer(
        &self,
    ) -> Result<Vec<InterviewerCandidates>, AdminError> {
        let primary = self.settings.primary_community;
        let members = self.gateway.candidate_members(primary).await?;

        let assignments: Vec<(SubjectId, Option<SubjectId>)> = self.stores.state.read(|state| {
            members
                .iter()
                .map(|member| {
                    let from_progress = state
                        .candidates
                        .get(&ProgressKey::new(primary, *member))
                        .and_then(|progress| progress.interviewer_id);
                    let from_records = || {
                        state
                            .interview_records
                            .iter()
                            .filter(|record| record.subject_id == Some(*member))
                            .max_by_key(|record| record.timestamp)
                            .map(|record| record.interviewer_id)
                    };
                    (*member, from_progress.or_else(from_records))
                })
                .collect()
        });

        let subjects: Vec<SubjectId> = assignments
            .iter()
            .flat_map(|(member, interviewer)| std::iter::once(*member).chain(*interviewer))
            .collect();
        let names = resolve_names(self.gateway.as_ref(), subjects).await;
        let label = |subject: SubjectId| {
            names
                .get(&subject)
                .cloned()
                .unwrap_or_else(|| fallback_name(subject))
        };

        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (member, interviewer) in assignments {
            let interviewer_label = interviewer
                .map(label)
                .unwrap_or_else(|| UNKNOWN_INTERVIEWER.to_string());
            grouped.entry(interviewer_label).or_default().push(label(member));
        }

        Ok(grouped
            .into_iter()
            .map(|(interviewer_label, mut candidates)| {
                candidates.sort();
                InterviewerCandidates {
                    interviewer_label,
                    candidates,
                }
            })
            .collect())
    }
}
