//! Sync checkpoint repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{Cursor, RemoteId, SyncCheckpoint};
use crate::util::datetime_from_millis;

const CHECKPOINT_COLUMNS: &str =
    "id, model_name, last_record_updated_at, last_record_id, created_at";

/// Trait for checkpoint storage operations (async)
///
/// Checkpoints are append-only: there is no update or delete.
#[allow(async_fn_in_trait)]
pub trait ProgressStore {
    /// The most recently recorded checkpoint for a model
    async fn latest(&self, model_name: &str) -> Result<Option<SyncCheckpoint>>;

    /// Append a checkpoint at `cursor`
    async fn record(&self, model_name: &str, cursor: &Cursor) -> Result<SyncCheckpoint>;

    /// Checkpoints for a model, newest first
    async fn history(&self, model_name: &str, limit: usize) -> Result<Vec<SyncCheckpoint>>;
}

/// libSQL implementation of `ProgressStore`
#[derive(Clone)]
pub struct LibSqlProgressStore {
    conn: Connection,
}

impl LibSqlProgressStore {
    /// Create a new store on the given connection
    pub fn new(conn: &Connection) -> Self {
        Self { conn: conn.clone() }
    }

    fn parse_checkpoint(row: &libsql::Row) -> Result<SyncCheckpoint> {
        let cursor_timestamp: String = row.get(2)?;
        let cursor_id: String = row.get(3)?;

        Ok(SyncCheckpoint {
            id: row.get(0)?,
            model_name: row.get(1)?,
            cursor_timestamp: DateTime::parse_from_rfc3339(&cursor_timestamp)
                .map_err(|e| Error::Database(format!("Invalid checkpoint timestamp: {e}")))?
                .with_timezone(&Utc),
            cursor_id: RemoteId::new(cursor_id)?,
            recorded_at: datetime_from_millis(row.get(4)?),
        })
    }
}

impl ProgressStore for LibSqlProgressStore {
    async fn latest(&self, model_name: &str) -> Result<Option<SyncCheckpoint>> {
        Ok(self.history(model_name, 1).await?.into_iter().next())
    }

    async fn record(&self, model_name: &str, cursor: &Cursor) -> Result<SyncCheckpoint> {
        let model_name = model_name.trim();
        if model_name.is_empty() {
            return Err(Error::Validation(
                "checkpoint requires a model name".to_string(),
            ));
        }
        if cursor.id.as_str().trim().is_empty() {
            return Err(Error::Validation(
                "checkpoint requires a cursor id".to_string(),
            ));
        }

        let recorded_at = Utc::now().timestamp_millis();
        let mut rows = self
            .conn
            .query(
                "INSERT INTO sync_checkpoints
                     (model_name, last_record_updated_at, last_record_id, created_at)
                 VALUES (?, ?, ?, ?)
                 RETURNING id",
                params![
                    model_name,
                    cursor.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                    cursor.id.as_str(),
                    recorded_at
                ],
            )
            .await?;

        let id: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => {
                return Err(Error::Database(
                    "checkpoint insert returned no row".to_string(),
                ))
            }
        };

        Ok(SyncCheckpoint {
            id,
            model_name: model_name.to_string(),
            cursor_timestamp: cursor.timestamp,
            cursor_id: cursor.id.clone(),
            recorded_at: datetime_from_millis(recorded_at),
        })
    }

    async fn history(&self, model_name: &str, limit: usize) -> Result<Vec<SyncCheckpoint>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {CHECKPOINT_COLUMNS} FROM sync_checkpoints
                     WHERE model_name = ?
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?"
                ),
                params![model_name.trim(), limit as i64],
            )
            .await?;

        let mut checkpoints = Vec::new();
        while let Some(row) = rows.next().await? {
            checkpoints.push(Self::parse_checkpoint(&row)?);
        }
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_latest_is_none_without_checkpoints() {
        let db = setup().await;
        let store = LibSqlProgressStore::new(db.connection());

        assert!(store.latest("User").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_and_latest() {
        let db = setup().await;
        let store = LibSqlProgressStore::new(db.connection());
        let t1 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap();

        store
            .record("User", &Cursor::new(t1, RemoteId::from(1)))
            .await
            .unwrap();
        let written = store
            .record("User", &Cursor::new(t2, RemoteId::from(3)))
            .await
            .unwrap();
        store
            .record("Book", &Cursor::new(t1, RemoteId::from(9)))
            .await
            .unwrap();

        let latest = store.latest("User").await.unwrap().unwrap();
        assert_eq!(latest, written);
        assert_eq!(latest.cursor(), Cursor::new(t2, RemoteId::from(3)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cursor_timestamp_keeps_sub_millisecond_precision() {
        let db = setup().await;
        let store = LibSqlProgressStore::new(db.connection());
        let timestamp = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .unwrap()
            .checked_add_signed(chrono::Duration::nanoseconds(123_456_789))
            .unwrap();

        store
            .record("User", &Cursor::new(timestamp, RemoteId::from(1)))
            .await
            .unwrap();

        let latest = store.latest("User").await.unwrap().unwrap();
        assert_eq!(latest.cursor_timestamp, timestamp);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_rejects_blank_model_name() {
        let db = setup().await;
        let store = LibSqlProgressStore::new(db.connection());
        let cursor = Cursor::new(Utc::now(), RemoteId::from(1));

        assert!(matches!(
            store.record("  ", &cursor).await,
            Err(Error::Validation(_))
        ));
        assert!(store.latest("  ").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_history_is_newest_first() {
        let db = setup().await;
        let store = LibSqlProgressStore::new(db.connection());
        let now = Utc::now();

        for id in 1..=4 {
            store
                .record("User", &Cursor::new(now, RemoteId::from(id)))
                .await
                .unwrap();
        }

        let ids = store
            .history("User", 3)
            .await
            .unwrap()
            .into_iter()
            .map(|checkpoint| checkpoint.cursor_id.to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["4", "3", "2"]);
    }
}
