//! Lazy lookup of the remote resource behind a single shadow record.
//!
//! Each [`ShadowRecord`] owns a [`RemoteCell`]. The first read fetches the
//! resource through the model's [`RemoteSource`] and memoizes the outcome,
//! including an absent one. Lookup failures of any kind collapse into an
//! absent resource: a missing remote is an expected steady state, so field
//! getters built on top of this stay total.

use crate::models::{RemoteId, RemoteRecord, ShadowRecord};
use crate::remote::RemoteSource;

/// Memoized result of a single-record remote lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteCell {
    state: Option<Option<RemoteRecord>>,
}

impl RemoteCell {
    /// Whether a lookup has happened since creation or the last clear
    pub const fn is_loaded(&self) -> bool {
        self.state.is_some()
    }

    /// The memoized resource, without fetching
    pub fn peek(&self) -> Option<&RemoteRecord> {
        self.state.as_ref().and_then(Option::as_ref)
    }

    /// Forget the memoized result
    pub fn clear(&mut self) {
        self.state = None;
    }

    /// Return the memoized resource, fetching it first when `force` is set or
    /// nothing was fetched yet. Without a remote id nothing is fetched.
    pub async fn get(
        &mut self,
        source: &dyn RemoteSource,
        remote_id: Option<&RemoteId>,
        force: bool,
    ) -> Option<&RemoteRecord> {
        if force || self.state.is_none() {
            let fetched = match remote_id {
                Some(id) => match source.fetch_one(id).await {
                    Ok(found) => found,
                    Err(error) => {
                        tracing::debug!("Remote lookup for {id} failed: {error}");
                        None
                    }
                },
                None => None,
            };
            self.state = Some(fetched);
        }
        self.peek()
    }
}

impl ShadowRecord {
    /// The remote resource for this record, memoized per instance.
    ///
    /// `force_reload` bypasses the memo. Absent when the record has no remote id
    /// or the lookup fails.
    pub async fn remote(
        &mut self,
        source: &dyn RemoteSource,
        force_reload: bool,
    ) -> Option<&RemoteRecord> {
        let remote_id = self.remote_id().cloned();
        self.remote
            .get(source, remote_id.as_ref(), force_reload)
            .await
    }

    /// Whether the remote resource exists right now. Always performs a fresh lookup.
    pub async fn has_remote(&mut self, source: &dyn RemoteSource) -> bool {
        self.remote(source, true).await.is_some()
    }

    /// The memoized remote resource, if a lookup already happened
    pub fn loaded_remote(&self) -> Option<&RemoteRecord> {
        self.remote.peek()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteSource;
    use chrono::Utc;
    use serde_json::json;

    fn source_with_user() -> MemoryRemoteSource {
        MemoryRemoteSource::with_records([
            RemoteRecord::new(RemoteId::from(1), Utc::now()).with_field("name", "John")
        ])
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_is_memoized_until_forced() {
        let source = source_with_user();
        let mut record = ShadowRecord::new("User", Some(RemoteId::from(1)));

        let name = record
            .remote(&source, false)
            .await
            .and_then(|remote| remote.field("name").cloned());
        assert_eq!(name, Some(json!("John")));

        record.remote(&source, false).await;
        assert_eq!(source.lookup_calls(), 1);

        record.remote(&source, true).await;
        assert_eq!(source.lookup_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn has_remote_always_looks_up() {
        let source = source_with_user();
        let mut record = ShadowRecord::new("User", Some(RemoteId::from(1)));

        assert!(record.remote(&source, false).await.is_some());
        assert!(record.has_remote(&source).await);
        assert_eq!(source.lookup_calls(), 2);

        source.remove(&RemoteId::from(1));
        assert!(!record.has_remote(&source).await);
        assert!(record.loaded_remote().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_remote_id_skips_lookup() {
        let source = source_with_user();
        let mut record = ShadowRecord::new("User", None);

        assert!(record.remote(&source, false).await.is_none());
        assert!(!record.has_remote(&source).await);
        assert_eq!(source.lookup_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn not_found_is_memoized_as_absent() {
        let source = MemoryRemoteSource::new();
        let mut record = ShadowRecord::new("User", Some(RemoteId::from(7)));

        assert!(record.remote(&source, false).await.is_none());
        assert!(record.remote(&source, false).await.is_none());
        assert_eq!(source.lookup_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn changing_remote_id_clears_memo() {
        let source = source_with_user();
        let mut record = ShadowRecord::new("User", Some(RemoteId::from(1)));
        record.remote(&source, false).await;

        record.set_remote_id(Some(RemoteId::from(2)));
        assert!(record.loaded_remote().is_none());
        assert!(record.remote(&source, false).await.is_none());
        assert_eq!(source.lookup_calls(), 2);
    }
}
