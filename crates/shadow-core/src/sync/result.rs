//! Outcome of one reconciliation pass

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Error;
use crate::models::SyncCheckpoint;

/// Which stage of a pass failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The remote source was unreachable or returned malformed data
    Fetch,
    /// A change could not be classified or written, or the batch did not commit
    Apply,
    /// The checkpoint was rejected
    Validation,
    /// Local storage failed outside the batch
    Storage,
    /// Another pass for the same model is still running
    InFlight,
    /// The model is not registered
    UnknownModel,
}

impl FailureKind {
    /// Classify an error raised outside the batch
    pub const fn of(error: &Error) -> Self {
        match error {
            Error::Fetch(_) => Self::Fetch,
            Error::Validation(_) => Self::Validation,
            Error::Apply(_) => Self::Apply,
            _ => Self::Storage,
        }
    }

    /// Short machine-readable name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Apply => "apply",
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::InFlight => "in_flight",
            Self::UnknownModel => "unknown_model",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure of a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SyncFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.message)
    }
}

/// Final state of a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// At least one change was applied and committed
    Synchronized,
    /// The remote reported nothing new
    NoChanges,
    /// The checkpoint is unchanged
    Failed(SyncFailure),
}

/// Summary of one reconciliation pass for one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub model_name: String,
    pub status: SyncStatus,
    /// Changes returned by the remote
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub destroyed: usize,
    /// Tombstones without a local match
    pub skipped: usize,
    /// Current checkpoint after the pass
    pub checkpoint: Option<SyncCheckpoint>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncResult {
    pub(crate) fn started(model_name: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            model_name: model_name.to_string(),
            status: SyncStatus::NoChanges,
            fetched: 0,
            created: 0,
            updated: 0,
            destroyed: 0,
            skipped: 0,
            checkpoint: None,
            started_at,
            finished_at: started_at,
        }
    }

    /// Local records created, updated or destroyed
    pub const fn processed(&self) -> usize {
        self.created + self.updated + self.destroyed
    }

    /// Whether the pass completed, with or without changes
    pub const fn is_success(&self) -> bool {
        !matches!(self.status, SyncStatus::Failed(_))
    }

    /// The failure, if the pass failed
    pub const fn failure(&self) -> Option<&SyncFailure> {
        match &self.status {
            SyncStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}
