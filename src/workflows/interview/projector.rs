use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::domain::Period;
use super::gateway::GatewayError;
use super::store::StoreError;

/// A derived view rendered from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectionTarget {
    Dashboard,
    InterviewerStats(Period),
    MonthlySummary(Period),
}

impl fmt::Display for ProjectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dashboard => f.write_str("dashboard"),
            Self::InterviewerStats(period) => write!(f, "interviewer-stats/{period}"),
            Self::MonthlySummary(period) => write!(f, "monthly-summary/{period}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Renders one projection target from current state.
#[async_trait]
pub trait ProjectionRefresher: Send + Sync {
    async fn refresh(&self, target: ProjectionTarget) -> Result<(), ProjectionError>;
}

struct PendingRefresh {
    generation: u64,
    handle: JoinHandle<()>,
}

type RefreshGates = Arc<SyncMutex<HashMap<ProjectionTarget, Arc<Mutex<()>>>>>;

/// Coalesces refresh requests so a burst of mutations yields one refresh per target.
///
/// A new request cancels the pending one for the same target and restarts its delay.
/// Refreshes of the same target never overlap.
pub struct DebouncedProjector {
    refresher: Arc<dyn ProjectionRefresher>,
    pending: Arc<Mutex<HashMap<ProjectionTarget, PendingRefresh>>>,
    gates: RefreshGates,
    next_generation: SyncMutex<u64>,
}

impl DebouncedProjector {
    pub fn new(refresher: Arc<dyn ProjectionRefresher>) -> Self {
        Self {
            refresher,
            pending: Arc::new(Mutex::new(HashMap::new())),
            gates: Arc::new(SyncMutex::new(HashMap::new())),
            next_generation: SyncMutex::new(0),
        }
    }

    /// Schedule a refresh of `target` after `delay`, replacing any pending one.
    pub async fn request(&self, target: ProjectionTarget, delay: Duration) {
        let generation = {
            let mut next = self
                .next_generation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };

        let mut pending = self.pending.lock().await;
        if let Some(previous) = pending.remove(&target) {
            previous.handle.abort();
        }

        let slots = Arc::clone(&self.pending);
        let gates = Arc::clone(&self.gates);
        let refresher = Arc::clone(&self.refresher);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slots = slots.lock().await;
                match slots.get(&target) {
                    Some(slot) if slot.generation == generation => {
                        slots.remove(&target);
                    }
                    _ => return,
                }
            }
            run_refresh(&gates, refresher.as_ref(), target).await;
        });

        pending.insert(target, PendingRefresh { generation, handle });
        debug!(%target, ?delay, "projection refresh scheduled");
    }

    /// Refresh `target` now, cancelling any pending request for it.
    pub async fn refresh_now(&self, target: ProjectionTarget) -> Result<(), ProjectionError> {
        if let Some(previous) = self.pending.lock().await.remove(&target) {
            previous.handle.abort();
        }
        let gate = gate_for(&self.gates, target);
        let _serial = gate.lock().await;
        self.refresher.refresh(target).await
    }

    pub async fn pending_targets(&self) -> usize {
        self.pending.lock().await.len()
    }
}

fn gate_for(gates: &RefreshGates, target: ProjectionTarget) -> Arc<Mutex<()>> {
    let mut gates = gates.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(gates.entry(target).or_default())
}

async fn run_refresh(gates: &RefreshGates, refresher: &dyn ProjectionRefresher, target: ProjectionTarget) {
    let gate = gate_for(gates, target);
    let _serial = gate.lock().await;
    match refresher.refresh(target).await {
        Ok(()) => debug!(%target, "projection refreshed"),
        Err(err) => warn!(%target, error = %err, "projection refresh failed"),
    }
}
