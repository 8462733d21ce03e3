//! Shadow record repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use std::collections::BTreeMap;

use libsql::{params, Connection, Transaction, TransactionBehavior, Value};

use crate::error::{Error, Result};
use crate::models::{RemoteId, ShadowId, ShadowRecord};

const RECORD_COLUMNS: &str = "id, model_name, remote_id, fields, created_at, updated_at";

/// Trait for shadow record storage operations (async)
///
/// `begin` opens one unit of work on the store and every other operation
/// issued before it is committed or rolled back is part of it. Dropping the
/// returned unit of work without committing rolls it back.
#[allow(async_fn_in_trait)]
pub trait ShadowRecordStore {
    /// Open unit of work; rolls back when dropped unfinished
    type UnitOfWork;

    /// All records of `model_name` pointing at `remote_id`
    async fn find_by_foreign_key(
        &self,
        model_name: &str,
        remote_id: &RemoteId,
    ) -> Result<Vec<ShadowRecord>>;

    /// Insert a new record with no cached fields
    async fn create(&self, model_name: &str, remote_id: Option<RemoteId>) -> Result<ShadowRecord>;

    /// Get a record by local ID
    async fn get(&self, id: &ShadowId) -> Result<Option<ShadowRecord>>;

    /// List records of a model, oldest first
    async fn list(&self, model_name: &str, limit: usize, offset: usize)
        -> Result<Vec<ShadowRecord>>;

    /// Persist the record's remote id and fields, inserting it if needed
    async fn save(&self, record: &mut ShadowRecord) -> Result<()>;

    /// Delete the record
    async fn destroy(&self, record: &ShadowRecord) -> Result<()>;

    /// Start a unit of work
    async fn begin(&self) -> Result<Self::UnitOfWork>;

    /// Make the unit of work durable
    async fn commit(&self, work: Self::UnitOfWork) -> Result<()>;

    /// Discard the unit of work
    async fn rollback(&self, work: Self::UnitOfWork) -> Result<()>;
}

/// libSQL implementation of `ShadowRecordStore`
#[derive(Clone)]
pub struct LibSqlShadowStore {
    conn: Connection,
}

impl LibSqlShadowStore {
    /// Create a new store on the given connection
    pub fn new(conn: &Connection) -> Self {
        Self { conn: conn.clone() }
    }

    /// Parse a record from a database row
    fn parse_record(row: &libsql::Row) -> Result<ShadowRecord> {
        let id: String = row.get(0)?;
        let remote_id: Option<String> = row.get(2)?;
        let fields: String = row.get(3)?;

        Ok(ShadowRecord::from_parts(
            id.parse()
                .map_err(|_| Error::Database(format!("Invalid shadow record ID: {id}")))?,
            row.get(1)?,
            remote_id.map(RemoteId::new).transpose()?,
            serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&fields)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    async fn collect(mut rows: libsql::Rows) -> Result<Vec<ShadowRecord>> {
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }
}

fn remote_id_value(remote_id: Option<&RemoteId>) -> Value {
    remote_id.map_or(Value::Null, |id| Value::Text(id.to_string()))
}

impl ShadowRecordStore for LibSqlShadowStore {
    type UnitOfWork = Transaction;

    async fn find_by_foreign_key(
        &self,
        model_name: &str,
        remote_id: &RemoteId,
    ) -> Result<Vec<ShadowRecord>> {
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM shadow_records
                     WHERE model_name = ? AND remote_id = ?
                     ORDER BY created_at ASC, id ASC"
                ),
                params![model_name, remote_id.as_str()],
            )
            .await?;

        Self::collect(rows).await
    }

    async fn create(&self, model_name: &str, remote_id: Option<RemoteId>) -> Result<ShadowRecord> {
        let mut record = ShadowRecord::new(model_name, remote_id);
        self.save(&mut record).await?;
        Ok(record)
    }

    async fn get(&self, id: &ShadowId) -> Result<Option<ShadowRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM shadow_records WHERE id = ?"),
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        model_name: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ShadowRecord>> {
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM shadow_records
                     WHERE model_name = ?
                     ORDER BY created_at ASC, id ASC
                     LIMIT ? OFFSET ?"
                ),
                params![model_name, limit as i64, offset as i64],
            )
            .await?;

        Self::collect(rows).await
    }

    async fn save(&self, record: &mut ShadowRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let fields = serde_json::to_string(&record.fields)?;

        self.conn
            .execute(
                "INSERT INTO shadow_records (id, model_name, remote_id, fields, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     remote_id = excluded.remote_id,
                     fields = excluded.fields,
                     updated_at = excluded.updated_at",
                params![
                    record.id.as_str(),
                    record.model_name.as_str(),
                    remote_id_value(record.remote_id()),
                    fields,
                    record.created_at,
                    now
                ],
            )
            .await?;

        record.updated_at = now;
        Ok(())
    }

    async fn destroy(&self, record: &ShadowRecord) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM shadow_records WHERE id = ?",
                [record.id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(record.id.to_string()));
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction> {
        if !self.conn.is_autocommit() {
            tracing::warn!("Rolling back a transaction left open on the connection");
            self.conn.execute("ROLLBACK", ()).await?;
        }
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await?)
    }

    async fn commit(&self, work: Transaction) -> Result<()> {
        work.commit().await?;
        Ok(())
    }

    async fn rollback(&self, work: Transaction) -> Result<()> {
        // A failed statement may already have ended the transaction
        if self.conn.is_autocommit() {
            drop(work);
            return Ok(());
        }
        work.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_and_get() {
        let db = setup().await;
        let store = LibSqlShadowStore::new(db.connection());

        let record = store
            .create("User", Some(RemoteId::from(1)))
            .await
            .unwrap();
        let fetched = store.get(&record.id).await.unwrap().unwrap();

        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.model_name, "User");
        assert_eq!(fetched.remote_id(), Some(&RemoteId::from(1)));
        assert!(fetched.fields.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_persists_fields() {
        let db = setup().await;
        let store = LibSqlShadowStore::new(db.connection());

        let mut record = store.create("User", None).await.unwrap();
        record.write_field("email", json!("a@x.com"));
        record.write_field("age", json!(41));
        store.save(&mut record).await.unwrap();

        let fetched = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(fetched.field("email"), Some(&json!("a@x.com")));
        assert_eq!(fetched.field("age"), Some(&json!(41)));
        assert_eq!(fetched.remote_id(), None);
        assert!(fetched.updated_at >= fetched.created_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_find_by_foreign_key_returns_all_matches() {
        let db = setup().await;
        let store = LibSqlShadowStore::new(db.connection());

        store.create("User", Some(RemoteId::from(1))).await.unwrap();
        store.create("User", Some(RemoteId::from(1))).await.unwrap();
        store.create("User", Some(RemoteId::from(2))).await.unwrap();
        store.create("Book", Some(RemoteId::from(1))).await.unwrap();

        let matches = store
            .find_by_foreign_key("User", &RemoteId::from(1))
            .await
            .unwrap();
        assert_eq!(matches.len(), 2);

        let none = store
            .find_by_foreign_key("User", &RemoteId::from(3))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_destroy() {
        let db = setup().await;
        let store = LibSqlShadowStore::new(db.connection());

        let record = store.create("User", Some(RemoteId::from(1))).await.unwrap();
        store.destroy(&record).await.unwrap();

        assert!(store.get(&record.id).await.unwrap().is_none());
        assert!(matches!(
            store.destroy(&record).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_is_scoped_by_model() {
        let db = setup().await;
        let store = LibSqlShadowStore::new(db.connection());

        for id in 1..=3 {
            store.create("User", Some(RemoteId::from(id))).await.unwrap();
        }
        store.create("Book", Some(RemoteId::from(1))).await.unwrap();

        assert_eq!(store.list("User", 10, 0).await.unwrap().len(), 3);
        assert_eq!(store.list("User", 2, 2).await.unwrap().len(), 1);
        assert_eq!(store.list("Book", 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rollback_discards_writes() {
        let db = setup().await;
        let store = LibSqlShadowStore::new(db.connection());
        let kept = store.create("User", Some(RemoteId::from(1))).await.unwrap();

        let work = store.begin().await.unwrap();
        let discarded = store.create("User", Some(RemoteId::from(2))).await.unwrap();
        store.destroy(&kept).await.unwrap();
        store.rollback(work).await.unwrap();

        assert!(store.get(&kept.id).await.unwrap().is_some());
        assert!(store.get(&discarded.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_commit_keeps_writes() {
        let db = setup().await;
        let store = LibSqlShadowStore::new(db.connection());

        let work = store.begin().await.unwrap();
        let record = store.create("User", Some(RemoteId::from(1))).await.unwrap();
        store.commit(work).await.unwrap();

        assert!(db.connection().is_autocommit());
        assert!(store.get(&record.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dropped_unit_of_work_rolls_back() {
        let db = setup().await;
        let store = LibSqlShadowStore::new(db.connection());

        let work = store.begin().await.unwrap();
        let abandoned = store.create("User", Some(RemoteId::from(1))).await.unwrap();
        drop(work);

        assert!(db.connection().is_autocommit());
        assert!(store.get(&abandoned.id).await.unwrap().is_none());

        // Later writes are autocommitted, not swallowed by a stale transaction
        let kept = store.create("User", Some(RemoteId::from(2))).await.unwrap();
        let work = store.begin().await.unwrap();
        store.commit(work).await.unwrap();
        assert!(store.get(&kept.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_begin_recovers_transaction_left_open() {
        let db = setup().await;
        let store = LibSqlShadowStore::new(db.connection());

        db.connection().execute("BEGIN", ()).await.unwrap();
        let abandoned = store.create("User", Some(RemoteId::from(1))).await.unwrap();

        let work = store.begin().await.unwrap();
        store.commit(work).await.unwrap();

        assert!(store.get(&abandoned.id).await.unwrap().is_none());
    }
}
