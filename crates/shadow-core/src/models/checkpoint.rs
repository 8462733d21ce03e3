//! Sync checkpoint model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::RemoteId;

/// Position in a remote change feed: change time, tie-broken by remote id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor {
    /// Effective timestamp of the change
    pub timestamp: DateTime<Utc>,
    /// Remote id of the changed resource
    pub id: RemoteId,
}

impl Cursor {
    /// Create a new cursor
    pub const fn new(timestamp: DateTime<Utc>, id: RemoteId) -> Self {
        Self { timestamp, id }
    }
}

/// Durable record of how far synchronization of one model has gotten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    /// Row identifier
    pub id: i64,
    /// Model the checkpoint belongs to
    pub model_name: String,
    /// Effective timestamp of the last processed change
    pub cursor_timestamp: DateTime<Utc>,
    /// Remote id of the last processed change
    pub cursor_id: RemoteId,
    /// When the checkpoint was written
    pub recorded_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    /// The feed position this checkpoint resumes from
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.cursor_timestamp, self.cursor_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cursor_orders_by_timestamp_then_id() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        let early = Cursor::new(t1, RemoteId::from(50));
        let same_time_higher_id = Cursor::new(t1, RemoteId::from(51));
        let later = Cursor::new(t2, RemoteId::from(1));

        assert!(early < same_time_higher_id);
        assert!(same_time_higher_id < later);
    }
}
