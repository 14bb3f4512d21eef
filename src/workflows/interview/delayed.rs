use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::domain::{ActionId, DelayedAction};
use super::store::{Document, JsonDocumentStore, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionQueue(pub Vec<DelayedAction>);

impl Document for ActionQueue {}

/// Durable queue of outcomes waiting for their due time.
#[derive(Debug)]
pub struct DelayedActionQueue {
    store: JsonDocumentStore<ActionQueue>,
}

impl DelayedActionQueue {
    pub fn new(store: JsonDocumentStore<ActionQueue>) -> Self {
        Self { store }
    }

    pub async fn enqueue(&self, action: DelayedAction) -> Result<(), StoreError> {
        info!(
            action = %action.id,
            subject = %action.subject_id,
            kind = action.kind.result_tag(),
            due = %action.scheduled_at,
            "delayed action queued"
        );
        self.store
            .transact(|queue| queue.0.push(action))
            .await
            .persisted
    }

    /// Remove and return every action due at `now`; the rest stay queued.
    ///
    /// Nothing is handed out until the shortened queue is on disk. When that save fails the
    /// due actions go back into the queue and the next poll tries again.
    pub async fn pop_due(&self, now: DateTime<Utc>) -> Result<Vec<DelayedAction>, StoreError> {
        let any_due = self.store.read(|queue| queue.0.iter().any(|action| action.is_due(now)));
        if !any_due {
            return Ok(Vec::new());
        }

        let committed = self
            .store
            .transact(|queue| {
                let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut queue.0)
                    .into_iter()
                    .partition(|action| action.is_due(now));
                queue.0 = waiting;
                due
            })
            .await;
        if let Err(err) = committed.persisted {
            let count = committed.value.len();
            self.store.update(|queue| queue.0.extend(committed.value));
            warn!(due = count, "due actions kept queued until removal is saved");
            return Err(err);
        }
        Ok(committed.value)
    }

    pub async fn remove(&self, id: ActionId) -> Result<bool, StoreError> {
        let committed = self
            .store
            .transact(|queue| {
                let before = queue.0.len();
                queue.0.retain(|action| action.id != id);
                before != queue.0.len()
            })
            .await;
        committed.persisted.map(|_| committed.value)
    }

    pub fn list(&self) -> Vec<DelayedAction> {
        self.store.read(|queue| queue.0.clone())
    }
}
