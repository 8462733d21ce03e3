//! Remote change sources.
//!
//! A [`RemoteSource`] is the only way the core talks to the service that owns
//! the data. It answers two questions: which resources changed since a feed
//! position, and what a single resource currently looks like.

mod http;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{RemoteId, RemoteRecord};

pub use http::{parse_change_feed, HttpRemoteSource};
pub use memory::MemoryRemoteSource;

/// Extra request parameters forwarded to [`RemoteSource::fetch_changed`]
pub type SyncParams = BTreeMap<String, String>;

/// Query capability over one remote collection
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Records changed since `since` (tie-broken by `after_id`), in ascending change order.
    ///
    /// An empty result means there is nothing to do. Errors abort the pass.
    async fn fetch_changed(
        &self,
        since: DateTime<Utc>,
        after_id: Option<&RemoteId>,
        params: &SyncParams,
    ) -> Result<Vec<RemoteRecord>>;

    /// Current state of a single resource; `Ok(None)` when the remote does not have it
    async fn fetch_one(&self, id: &RemoteId) -> Result<Option<RemoteRecord>>;
}
