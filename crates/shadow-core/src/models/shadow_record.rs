//! Shadow record model

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::RemoteId;
use crate::proxy::RemoteCell;

/// A unique identifier for a shadow record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShadowId(Uuid);

impl ShadowId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ShadowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ShadowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ShadowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Local entity mirroring the cached fields of one remote resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowRecord {
    /// Unique identifier
    pub id: ShadowId,
    /// Registered model this record belongs to
    pub model_name: String,
    remote_id: Option<RemoteId>,
    /// Cached field values keyed by local alias
    pub fields: BTreeMap<String, Value>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Suppresses the refresh-from-remote hook on the next save. Never persisted.
    #[serde(skip)]
    pub skip_cache_update: bool,
    #[serde(skip)]
    pub(crate) remote: RemoteCell,
}

impl ShadowRecord {
    /// Create a new, not yet persisted record
    #[must_use]
    pub fn new(model_name: impl Into<String>, remote_id: Option<RemoteId>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: ShadowId::new(),
            model_name: model_name.into(),
            remote_id,
            fields: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            skip_cache_update: false,
            remote: RemoteCell::default(),
        }
    }

    /// Rebuild a record from persisted columns
    pub(crate) fn from_parts(
        id: ShadowId,
        model_name: String,
        remote_id: Option<RemoteId>,
        fields: BTreeMap<String, Value>,
        created_at: i64,
        updated_at: i64,
    ) -> Self {
        Self {
            id,
            model_name,
            remote_id,
            fields,
            created_at,
            updated_at,
            skip_cache_update: false,
            remote: RemoteCell::default(),
        }
    }

    /// Foreign key into the remote collection
    pub const fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    /// Point the record at another remote resource. Clears the memoized remote.
    pub fn set_remote_id(&mut self, remote_id: Option<RemoteId>) {
        if self.remote_id != remote_id {
            self.remote.clear();
        }
        self.remote_id = remote_id;
    }

    /// Read a locally stored field
    pub fn field(&self, alias: &str) -> Option<&Value> {
        self.fields.get(alias)
    }

    /// Write a field value in memory; persisted by the next save
    pub fn write_field(&mut self, alias: impl Into<String>, value: Value) {
        self.fields.insert(alias.into(), value);
    }
}
