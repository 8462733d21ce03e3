//! Remote change record model

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::Cursor;

/// Identifier of a resource in the remote collection.
///
/// Never blank. Ids made only of ASCII digits order numerically, so `"9" < "10"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a remote id, rejecting blank values
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("remote id must not be blank".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Read a remote id from a JSON string or integer
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Self::new(text.as_str()).ok(),
            Value::Number(number) if number.is_i64() || number.is_u64() => {
                Self::new(number.to_string()).ok()
            }
            _ => None,
        }
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric_digits(&self) -> Option<&str> {
        if self.0.bytes().all(|byte| byte.is_ascii_digit()) {
            let stripped = self.0.trim_start_matches('0');
            Some(if stripped.is_empty() { "0" } else { stripped })
        } else {
            None
        }
    }
}

impl Ord for RemoteId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric_digits(), other.numeric_digits()) {
            (Some(left), Some(right)) => left
                .len()
                .cmp(&right.len())
                .then_with(|| left.cmp(right))
                .then_with(|| self.0.cmp(&other.0)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for RemoteId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RemoteId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for RemoteId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RemoteId> for String {
    fn from(value: RemoteId) -> Self {
        value.0
    }
}

impl From<u64> for RemoteId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// Current state of one remote resource as reported by a remote source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Remote primary key
    pub id: RemoteId,
    /// Last change time on the remote
    pub updated_at: DateTime<Utc>,
    /// Tombstone marker; the resource counts as deleted once this time has passed
    pub deleted_at: Option<DateTime<Utc>>,
    /// All remote attribute values, keyed by remote attribute name
    pub fields: Map<String, Value>,
}

impl RemoteRecord {
    /// Create a live record without attributes
    pub fn new(id: RemoteId, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            updated_at,
            deleted_at: None,
            fields: Map::new(),
        }
    }

    /// Add an attribute value
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Mark the record as deleted at the given time
    #[must_use]
    pub const fn with_deleted_at(mut self, deleted_at: DateTime<Utc>) -> Self {
        self.deleted_at = Some(deleted_at);
        self
    }

    /// Get a remote attribute value
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Whether the tombstone time lies at or before `now`
    pub fn is_tombstoned(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_some_and(|deleted_at| deleted_at <= now)
    }

    /// Tombstone time if present, else the update time
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.deleted_at.unwrap_or(self.updated_at)
    }

    /// Position of this change in the remote change feed
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.effective_timestamp(), self.id.clone())
    }

    /// Parse a record from a remote JSON object.
    ///
    /// `primary_key` names the attribute holding the remote id. `updated_at` is
    /// required, `deleted_at` is optional and may be `null`.
    pub fn from_json(value: Value, primary_key: &str) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(Error::Fetch("remote record is not a JSON object".into()));
        };

        let id = fields
            .get(primary_key)
            .and_then(RemoteId::from_json)
            .ok_or_else(|| {
                Error::Fetch(format!(
                    "remote record has no usable primary key '{primary_key}'"
                ))
            })?;

        let updated_at = match fields.get("updated_at") {
            Some(Value::String(raw)) => parse_timestamp(raw)?,
            _ => {
                return Err(Error::Fetch(format!(
                    "remote record {id} has no updated_at timestamp"
                )))
            }
        };

        let deleted_at = match fields.get("deleted_at") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) if raw.trim().is_empty() => None,
            Some(Value::String(raw)) => Some(parse_timestamp(raw)?),
            Some(other) => {
                return Err(Error::Fetch(format!(
                    "remote record {id} has an invalid deleted_at: {other}"
                )))
            }
        };

        Ok(Self {
            id,
            updated_at,
            deleted_at,
            fields,
        })
    }
}

/// Parse RFC 3339 or `YYYY-MM-DD HH:MM:SS[.f] [UTC|+zzzz]` timestamps
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f %z") {
        return Ok(parsed.with_timezone(&Utc));
    }

    let naive = raw.strip_suffix(" UTC").unwrap_or(raw);
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S%.f")
        .map(|parsed| parsed.and_utc())
        .map_err(|_| Error::Fetch(format!("invalid timestamp '{raw}'")))
}
