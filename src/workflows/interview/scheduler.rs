use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::lifecycle::{CandidateLifecycle, PipelineStores, SweepReport};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub executed: usize,
    pub failed: usize,
    pub expired_bans: usize,
    pub sweep: SweepReport,
}

/// Periodic driver for delayed actions, ban expiry, and the lifecycle sweep.
pub struct PipelineScheduler {
    lifecycle: Arc<CandidateLifecycle>,
    stores: PipelineStores,
    poll_interval: Duration,
}

impl PipelineScheduler {
    pub fn new(
        lifecycle: Arc<CandidateLifecycle>,
        stores: PipelineStores,
        poll_interval: Duration,
    ) -> Self {
        Self {
            lifecycle,
            stores,
            poll_interval,
        }
    }

    /// One pass: run every due action, drop expired exclusions, then sweep the open records.
    pub async fn run_once(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let due = match self.stores.actions.pop_due(now).await {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "due actions left queued; removal could not be saved");
                Vec::new()
            }
        };
        for action in due {
            match self.lifecycle.execute_delayed(&action, now).await {
                Ok(outcome) if outcome.failures == 0 => report.executed += 1,
                Ok(outcome) => {
                    report.failed += 1;
                    warn!(action = %action.id, failures = outcome.failures, "delayed action partly failed");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(action = %action.id, error = %err, "delayed action failed");
                }
            }
        }

        match self.stores.bans.sweep_expired(now).await {
            Ok(removed) => report.expired_bans = removed,
            Err(err) => error!(error = %err, "expired exclusions could not be saved"),
        }

        report.sweep = self.lifecycle.sweep(now).await;
        debug!(
            executed = report.executed,
            failed = report.failed,
            expired_bans = report.expired_bans,
            "scheduler tick"
        );
        report
    }

    /// Start the loop. The first tick runs immediately so overdue work is caught up at startup.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.poll_interval, "scheduler started");
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.run_once(Utc::now()).await;
            }
        })
    }
}
