use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::domain::{BanKind, BanOrigin, BanRecord, SubjectId};
use super::store::{Document, JsonDocumentStore, StoreError};

/// How long a time-limited exclusion lasts.
pub const INTERVAL_RETENTION_DAYS: i64 = 90;

impl BanRecord {
    /// Time-limited records lapse once the retention window has fully elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.kind {
            BanKind::Permanent => false,
            BanKind::TimeLimited => {
                now - self.recorded_at >= Duration::days(INTERVAL_RETENTION_DAYS)
            }
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self.kind {
            BanKind::Permanent => None,
            BanKind::TimeLimited => {
                Some(self.recorded_at + Duration::days(INTERVAL_RETENTION_DAYS))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BanBook(pub BTreeMap<SubjectId, BanRecord>);

impl Document for BanBook {}

/// Durable registry of excluded subjects.
#[derive(Debug)]
pub struct BanRegistry {
    store: JsonDocumentStore<BanBook>,
}

impl BanRegistry {
    pub fn new(store: JsonDocumentStore<BanBook>) -> Self {
        Self { store }
    }

    /// Record an exclusion, replacing any earlier record for the subject.
    pub async fn add(
        &self,
        subject: SubjectId,
        origin: BanOrigin,
        kind: BanKind,
        now: DateTime<Utc>,
    ) -> Result<BanRecord, StoreError> {
        let record = BanRecord {
            origin,
            kind,
            recorded_at: now,
        };
        let committed = self
            .store
            .transact(|book| book.0.insert(subject, record))
            .await;
        info!(subject = %subject, kind = kind.label(), "exclusion recorded");
        committed.persisted.map(|_| record)
    }

    /// Active record for `subject`. An expired record is dropped on sight.
    pub async fn check(&self, subject: SubjectId, now: DateTime<Utc>) -> Option<BanRecord> {
        let record = self.store.read(|book| book.0.get(&subject).copied())?;
        if !record.is_expired(now) {
            return Some(record);
        }

        debug!(subject = %subject, "interval elapsed; dropping exclusion");
        let committed = self
            .store
            .transact(|book| book.0.remove(&subject))
            .await;
        // The save failure is already logged by the store; the record stays gone in memory.
        let _ = committed.persisted;
        None
    }

    pub async fn remove(&self, subject: SubjectId) -> Result<bool, StoreError> {
        let committed = self.store.transact(|book| book.0.remove(&subject)).await;
        let removed = committed.value.is_some();
        if removed {
            info!(subject = %subject, "exclusion cleared");
        }
        committed.persisted.map(|_| removed)
    }

    /// Drop every lapsed record. Returns how many were removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let expired = self.store.read(|book| {
            book.0
                .values()
                .filter(|record| record.is_expired(now))
                .count()
        });
        if expired == 0 {
            return Ok(0);
        }

        let committed = self
            .store
            .transact(|book| {
                let before = book.0.len();
                book.0.retain(|_, record| !record.is_expired(now));
                before - book.0.len()
            })
            .await;
        committed.persisted.map(|_| committed.value)
    }

    /// Active records after sweeping.
    pub async fn list(&self, now: DateTime<Utc>) -> Result<Vec<(SubjectId, BanRecord)>, StoreError> {
        self.sweep_expired(now).await?;
        Ok(self
            .store
            .read(|book| book.0.iter().map(|(subject, record)| (*subject, *record)).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn registry() -> BanRegistry {
        BanRegistry::new(JsonDocumentStore::in_memory(BanBook::default()))
    }

    fn recorded() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn interval_is_active_until_the_ninetieth_day() {
        let registry = registry();
        let subject = SubjectId(7);
        registry
            .add(subject, BanOrigin::Primary, BanKind::TimeLimited, recorded())
            .await
            .expect("ban saved");

        let just_before = recorded() + Duration::days(INTERVAL_RETENTION_DAYS) - Duration::seconds(1);
        assert!(registry.check(subject, just_before).await.is_some());

        let boundary = recorded() + Duration::days(INTERVAL_RETENTION_DAYS);
        assert!(registry.check(subject, boundary).await.is_none());
        // Lazily removed, so going back in time does not resurrect it.
        assert!(registry.check(subject, just_before).await.is_none());
    }

    #[tokio::test]
    async fn permanent_ban_never_expires() {
        let registry = registry();
        let subject = SubjectId(8);
        registry
            .add(subject, BanOrigin::Secondary, BanKind::Permanent, recorded())
            .await
            .expect("ban saved");

        let much_later = recorded() + Duration::days(10 * 365);
        let record = registry.check(subject, much_later).await.expect("still banned");
        assert_eq!(record.origin, BanOrigin::Secondary);
    }

    #[tokio::test]
    async fn sweep_keeps_only_active_records() {
        let registry = registry();
        registry
            .add(SubjectId(1), BanOrigin::Primary, BanKind::TimeLimited, recorded())
            .await
            .expect("ban saved");
        registry
            .add(SubjectId(2), BanOrigin::Primary, BanKind::Permanent, recorded())
            .await
            .expect("ban saved");

        let later = recorded() + Duration::days(120);
        let removed = registry.sweep_expired(later).await.expect("sweep saved");
        assert_eq!(removed, 1);

        let active = registry.list(later).await.expect("list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].0, SubjectId(2));
    }

    #[tokio::test]
    async fn remove_reports_whether_a_record_existed() {
        let registry = registry();
        registry
            .add(SubjectId(3), BanOrigin::Primary, BanKind::Permanent, recorded())
            .await
            .expect("ban saved");

        assert!(registry.remove(SubjectId(3)).await.expect("removed"));
        assert!(!registry.remove(SubjectId(3)).await.expect("second remove"));
    }
}
