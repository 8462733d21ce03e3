//! In-process remote source

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{RemoteSource, SyncParams};
use crate::error::{Error, Result};
use crate::models::{Cursor, RemoteId, RemoteRecord};

/// Remote collection held in memory.
///
/// Serves the change feed with the same cursor semantics an HTTP backend is
/// expected to implement: records strictly after `(since, after_id)`, or at or
/// after `since` when no id is given, sorted by cursor. A `limit` parameter caps
/// the batch size.
#[derive(Debug, Default)]
pub struct MemoryRemoteSource {
    records: Mutex<BTreeMap<RemoteId, RemoteRecord>>,
    failing_fetches: AtomicUsize,
    fetch_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
}

impl MemoryRemoteSource {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collection holding the given records
    pub fn with_records(records: impl IntoIterator<Item = RemoteRecord>) -> Self {
        let source = Self::new();
        for record in records {
            source.upsert(record);
        }
        source
    }

    /// Insert or replace a record
    pub fn upsert(&self, record: RemoteRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record);
    }

    /// Drop a record entirely, as if it never existed remotely
    pub fn remove(&self, id: &RemoteId) -> Option<RemoteRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Make the next `count` change-feed requests fail with a fetch error
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Number of change-feed requests served or failed so far
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of single-record lookups so far
    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl RemoteSource for MemoryRemoteSource {
    async fn fetch_changed(
        &self,
        since: DateTime<Utc>,
        after_id: Option<&RemoteId>,
        params: &SyncParams,
    ) -> Result<Vec<RemoteRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(Error::Fetch("remote source unavailable".into()));
        }

        let limit = match params.get("limit") {
            Some(raw) => Some(
                raw.parse::<usize>()
                    .map_err(|_| Error::Fetch(format!("invalid limit '{raw}'")))?,
            ),
            None => None,
        };

        let mut changed = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|record| match after_id {
                Some(id) => record.cursor() > Cursor::new(since, id.clone()),
                None => record.effective_timestamp() >= since,
            })
            .cloned()
            .collect::<Vec<_>>();

        changed.sort_by_key(RemoteRecord::cursor);
        if let Some(limit) = limit {
            changed.truncate(limit);
        }
        Ok(changed)
    }

    async fn fetch_one(&self, id: &RemoteId) -> Result<Option<RemoteRecord>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .filter(|record| !record.is_tombstoned(now))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn source() -> MemoryRemoteSource {
        MemoryRemoteSource::with_records([
            RemoteRecord::new(RemoteId::from(2), at(2)),
            RemoteRecord::new(RemoteId::from(1), at(1)),
            RemoteRecord::new(RemoteId::from(3), at(2)),
        ])
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_changed_returns_cursor_order() {
        let source = source();
        let changed = source
            .fetch_changed(DateTime::<Utc>::UNIX_EPOCH, None, &SyncParams::new())
            .await
            .unwrap();

        let ids = changed
            .iter()
            .map(|record| record.id.to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_changed_resumes_after_cursor() {
        let source = source();
        let changed = source
            .fetch_changed(at(2), Some(&RemoteId::from(2)), &SyncParams::new())
            .await
            .unwrap();

        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, RemoteId::from(3));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_changed_honors_limit_param() {
        let source = source();
        let params = SyncParams::from([("limit".to_string(), "2".to_string())]);
        let changed = source
            .fetch_changed(DateTime::<Utc>::UNIX_EPOCH, None, &params)
            .await
            .unwrap();
        assert_eq!(changed.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn injected_failures_are_consumed() {
        let source = source();
        source.fail_next_fetches(1);

        let params = SyncParams::new();
        assert!(source
            .fetch_changed(DateTime::<Utc>::UNIX_EPOCH, None, &params)
            .await
            .is_err());
        assert!(source
            .fetch_changed(DateTime::<Utc>::UNIX_EPOCH, None, &params)
            .await
            .is_ok());
        assert_eq!(source.fetch_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_one_hides_tombstoned_records() {
        let past = Utc::now() - Duration::hours(1);
        let source = MemoryRemoteSource::with_records([
            RemoteRecord::new(RemoteId::from(1), past),
            RemoteRecord::new(RemoteId::from(2), past).with_deleted_at(past),
        ]);

        assert!(source.fetch_one(&RemoteId::from(1)).await.unwrap().is_some());
        assert!(source.fetch_one(&RemoteId::from(2)).await.unwrap().is_none());
        assert!(source.fetch_one(&RemoteId::from(9)).await.unwrap().is_none());
        assert_eq!(source.lookup_calls(), 3);
    }
}
