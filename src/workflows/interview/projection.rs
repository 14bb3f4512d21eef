use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::domain::{ChannelRef, Period, PipelineState, PostedMessage, SubjectId};
use super::gateway::{CommunityGateway, GatewayError};
use super::projector::{ProjectionError, ProjectionRefresher, ProjectionTarget};
use super::settings::ProjectionChannels;
use super::stats::views::{MonthlyReportView, PipelineSnapshot};
use super::stats::{pipeline_snapshot, StatsAggregator};
use super::store::JsonDocumentStore;

/// Renders projections as plain-text messages and keeps one message per target.
pub struct GatewayProjection {
    state: Arc<JsonDocumentStore<PipelineState>>,
    gateway: Arc<dyn CommunityGateway>,
    channels: ProjectionChannels,
    stats: StatsAggregator,
}

impl GatewayProjection {
    pub fn new(
        state: Arc<JsonDocumentStore<PipelineState>>,
        gateway: Arc<dyn CommunityGateway>,
        channels: ProjectionChannels,
        stats: StatsAggregator,
    ) -> Self {
        Self {
            state,
            gateway,
            channels,
            stats,
        }
    }

    /// Build the monthly report with display names resolved through the gateway.
    pub async fn monthly_report(&self, period: Period) -> Result<MonthlyReportView, GatewayError> {
        let roster = self.gateway.interviewer_roster().await?;
        let records = self.state.read(|state| state.interview_records.clone());

        let subjects: Vec<SubjectId> = records
            .iter()
            .map(|record| record.interviewer_id)
            .chain(roster.iter().copied())
            .collect();
        let names = resolve_names(self.gateway.as_ref(), subjects).await;

        Ok(self.stats.monthly_report(&records, period, &roster, &names))
    }

    async fn publish(
        &self,
        channel: ChannelRef,
        existing: Option<PostedMessage>,
        content: &str,
    ) -> Result<PostedMessage, GatewayError> {
        if let Some(posted) = existing.filter(|posted| posted.channel == channel) {
            match self
                .gateway
                .edit_message(posted.channel, posted.message, content)
                .await
            {
                Ok(()) => return Ok(posted),
                Err(err) if err.is_not_found() => {
                    debug!(channel = %channel, "projection message vanished; posting a new one");
                }
                Err(err) => return Err(err),
            }
        }
        let message = self.gateway.send_message(channel, content).await?;
        Ok(PostedMessage { channel, message })
    }

    async fn refresh_dashboard(&self, channel: ChannelRef) -> Result<(), ProjectionError> {
        let (snapshot, existing) = self
            .state
            .read(|state| (pipeline_snapshot(state), state.dashboard_message));
        let posted = self
            .publish(channel, existing, &render_dashboard(&snapshot))
            .await?;
        if existing != Some(posted) {
            self.state
                .transact(|state| state.dashboard_message = Some(posted))
                .await
                .persisted?;
        }
        Ok(())
    }

    async fn refresh_interviewer_stats(
        &self,
        channel: ChannelRef,
        period: Period,
    ) -> Result<(), ProjectionError> {
        let report = self.monthly_report(period).await?;
        let existing = self
            .state
            .read(|state| state.interviewer_stats_messages.get(&period).copied());
        let posted = self
            .publish(channel, existing, &render_interviewer_stats(&report))
            .await?;
        if existing != Some(posted) {
            self.state
                .transact(|state| state.interviewer_stats_messages.insert(period, posted))
                .await
                .persisted?;
        }
        Ok(())
    }

    async fn refresh_monthly_summary(
        &self,
        channel: ChannelRef,
        period: Period,
    ) -> Result<(), ProjectionError> {
        let records = self.state.read(|state| state.interview_records.clone());
        let summary = self.stats.outcome_summary(&records, period);
        let existing = self
            .state
            .read(|state| state.monthly_summary_messages.get(&period).copied());
        let content = format!(
            "Monthly summary {period}\npassed: {}\nnot passed: {}\npass rate: {:.1}%",
            summary.passes,
            summary.rejections,
            summary.pass_rate * 100.0
        );
        let posted = self.publish(channel, existing, &content).await?;
        if existing != Some(posted) {
            self.state
                .transact(|state| state.monthly_summary_messages.insert(period, posted))
                .await
                .persisted?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectionRefresher for GatewayProjection {
    async fn refresh(&self, target: ProjectionTarget) -> Result<(), ProjectionError> {
        let channel = match target {
            ProjectionTarget::Dashboard => self.channels.dashboard,
            ProjectionTarget::InterviewerStats(_) => self.channels.interviewer_stats,
            ProjectionTarget::MonthlySummary(_) => self.channels.monthly_summary,
        };
        let Some(channel) = channel else {
            debug!(%target, "no channel configured; skipping projection");
            return Ok(());
        };

        match target {
            ProjectionTarget::Dashboard => self.refresh_dashboard(channel).await,
            ProjectionTarget::InterviewerStats(period) => {
                self.refresh_interviewer_stats(channel, period).await
            }
            ProjectionTarget::MonthlySummary(period) => {
                self.refresh_monthly_summary(channel, period).await
            }
        }
    }
}

fn render_dashboard(snapshot: &PipelineSnapshot) -> String {
    let mut lines = vec![format!("Candidates in progress: {}", snapshot.total)];
    for entry in snapshot.status_counts.iter().filter(|entry| entry.count > 0) {
        lines.push(format!("{}: {}", entry.status_label, entry.count));
    }
    for candidate in &snapshot.candidates {
        let mut line = format!("- <@{}> [{}]", candidate.subject_id, candidate.status_label);
        if let Some(interviewer) = candidate.interviewer_id {
            line.push_str(&format!(" interviewer <@{interviewer}>"));
        }
        if let Some(starts) = candidate.scheduled_interview_at {
            line.push_str(&format!(" at {}", starts.format("%Y-%m-%d %H:%M UTC")));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn render_interviewer_stats(report: &MonthlyReportView) -> String {
    let mut lines = vec![format!("Interviews conducted {}", report.period)];
    for entry in &report.interviewers {
        let marker = if entry.goal_met { " ✓" } else { "" };
        lines.push(format!(
            "{}: {}/{}{marker}",
            entry.display_name, entry.count, entry.goal
        ));
    }
    lines.join("\n")
}

/// Display names for `subjects`; unresolvable ones are left out.
pub async fn resolve_names(
    gateway: &dyn CommunityGateway,
    subjects: Vec<SubjectId>,
) -> HashMap<SubjectId, String> {
    let mut names = HashMap::new();
    for subject in subjects {
        if names.contains_key(&subject) {
            continue;
        }
        if let Some(name) = gateway.display_name(subject).await {
            names.insert(subject, name);
        }
    }
    names
}
