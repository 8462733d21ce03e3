//! Field access and persistence for the records of one model.
//!
//! A [`ModelHandle`] pairs a [`ModelDefinition`] with a [`ShadowRecordStore`].
//! It is the generic accessor that replaces per-field getters: cached aliases
//! read the local copy, delegated aliases go through the record's lazy remote.

use serde_json::Value;

use crate::db::ShadowRecordStore;
use crate::error::{Error, Result};
use crate::models::{RemoteId, RemoteRecord, ShadowRecord};
use crate::registry::ModelDefinition;

/// Records of one model, bound to a store
pub struct ModelHandle<'a, S> {
    definition: &'a ModelDefinition,
    store: &'a S,
}

impl<'a, S: ShadowRecordStore> ModelHandle<'a, S> {
    /// Bind a model definition to a store
    pub const fn new(definition: &'a ModelDefinition, store: &'a S) -> Self {
        Self { definition, store }
    }

    /// The bound model
    pub const fn definition(&self) -> &'a ModelDefinition {
        self.definition
    }

    /// Local records pointing at `remote_id`
    pub async fn find_by_remote_id(&self, remote_id: &RemoteId) -> Result<Vec<ShadowRecord>> {
        self.store
            .find_by_foreign_key(self.definition.name(), remote_id)
            .await
    }

    /// Local records of this model, oldest first
    pub async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ShadowRecord>> {
        self.store
            .list(self.definition.name(), limit, offset)
            .await
    }

    /// Create and save a record for `remote_id`, filling cached fields from the remote
    pub async fn create(&self, remote_id: Option<RemoteId>) -> Result<ShadowRecord> {
        let mut record = ShadowRecord::new(self.definition.name(), remote_id);
        self.save(&mut record).await?;
        Ok(record)
    }

    /// Save a record.
    ///
    /// Unless `skip_cache_update` is set, cached fields are refreshed from the
    /// remote first. Keys that are not cached aliases are never persisted. The
    /// skip flag only applies to one save and is cleared afterwards.
    pub async fn save(&self, record: &mut ShadowRecord) -> Result<()> {
        self.check_model(record)?;

        if !record.skip_cache_update {
            self.refresh_cached(record).await;
        }
        record
            .fields
            .retain(|alias, _| self.definition.is_cached_alias(alias));

        self.store.save(record).await?;
        record.skip_cache_update = false;
        Ok(())
    }

    /// Delete a record
    pub async fn destroy(&self, record: &ShadowRecord) -> Result<()> {
        self.check_model(record)?;
        self.store.destroy(record).await
    }

    /// Read a declared attribute by local alias.
    ///
    /// Cached attributes come from the local copy. Delegated attributes are
    /// read from the memoized remote and are `None` when the remote is absent.
    pub async fn read_field(&self, record: &mut ShadowRecord, alias: &str) -> Result<Option<Value>> {
        let attribute = self.definition.attribute(alias).ok_or_else(|| {
            Error::InvalidInput(format!(
                "{} has no attribute named {alias}",
                self.definition.name()
            ))
        })?;

        if attribute.cached {
            return Ok(record.field(alias).cloned());
        }

        let remote_name = attribute.remote_name.clone();
        Ok(record
            .remote(self.definition.source(), false)
            .await
            .and_then(|remote| remote.field(&remote_name).cloned()))
    }

    /// Write a cached attribute in memory. Delegated attributes are read-only.
    pub fn write_field(&self, record: &mut ShadowRecord, alias: &str, value: Value) -> Result<()> {
        if !self.definition.is_cached_alias(alias) {
            return Err(Error::InvalidInput(format!(
                "{alias} is not a cached attribute of {}",
                self.definition.name()
            )));
        }
        record.write_field(alias, value);
        Ok(())
    }

    /// Copy every cached attribute of `remote` into `record`, in declaration order.
    ///
    /// A cached attribute missing from the remote payload is an error; an
    /// explicit `null` is copied as is.
    pub fn apply_remote(&self, record: &mut ShadowRecord, remote: &RemoteRecord) -> Result<()> {
        for attribute in self.definition.cached_attributes() {
            let value = remote.field(&attribute.remote_name).ok_or_else(|| {
                Error::Apply(format!(
                    "{} change {} is missing cached attribute {}",
                    self.definition.name(),
                    remote.id,
                    attribute.remote_name
                ))
            })?;
            record.write_field(attribute.local_alias.clone(), value.clone());
        }
        Ok(())
    }

    /// Refresh every cached attribute of one record from its remote and save it.
    ///
    /// Attributes become `null` when the remote is absent.
    pub async fn update_cached_attributes(&self, record: &mut ShadowRecord) -> Result<()> {
        self.check_model(record)?;
        self.refresh_cached(record).await;
        record.skip_cache_update = true;
        self.save(record).await
    }

    async fn refresh_cached(&self, record: &mut ShadowRecord) {
        let remote = record
            .remote(self.definition.source(), true)
            .await
            .cloned();

        for attribute in self.definition.cached_attributes() {
            let value = remote
                .as_ref()
                .and_then(|remote| remote.field(&attribute.remote_name).cloned())
                .unwrap_or(Value::Null);
            record.write_field(attribute.local_alias.clone(), value);
        }
    }

    fn check_model(&self, record: &ShadowRecord) -> Result<()> {
        if record.model_name == self.definition.name() {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "record {} belongs to {}, not {}",
                record.id,
                record.model_name,
                self.definition.name()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, LibSqlShadowStore};
    use crate::remote::MemoryRemoteSource;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn user_model(source: Arc<MemoryRemoteSource>) -> ModelDefinition {
        ModelDefinition::builder("User", source)
            .cached("email")
            .cached_as("phone", "telephone")
            .attribute("name")
            .build()
            .unwrap()
    }

    fn john() -> RemoteRecord {
        RemoteRecord::new(RemoteId::from(1), Utc::now())
            .with_field("email", "john@x.com")
            .with_field("phone", "555-0100")
            .with_field("name", "John")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_fills_cached_fields_from_remote() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlShadowStore::new(db.connection());
        let source = Arc::new(MemoryRemoteSource::with_records([john()]));
        let model = user_model(source.clone());
        let handle = ModelHandle::new(&model, &store);

        let record = handle.create(Some(RemoteId::from(1))).await.unwrap();
        let stored = store.get(&record.id).await.unwrap().unwrap();

        assert_eq!(stored.field("email"), Some(&json!("john@x.com")));
        assert_eq!(stored.field("telephone"), Some(&json!("555-0100")));
        assert_eq!(stored.field("name"), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_field_delegates_uncached_attributes() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlShadowStore::new(db.connection());
        let source = Arc::new(MemoryRemoteSource::with_records([john()]));
        let model = user_model(source.clone());
        let handle = ModelHandle::new(&model, &store);
        let mut record = handle.create(Some(RemoteId::from(1))).await.unwrap();
        let lookups = source.lookup_calls();

        assert_eq!(
            handle.read_field(&mut record, "telephone").await.unwrap(),
            Some(json!("555-0100"))
        );
        assert_eq!(source.lookup_calls(), lookups);

        assert_eq!(
            handle.read_field(&mut record, "name").await.unwrap(),
            Some(json!("John"))
        );
        assert!(handle.read_field(&mut record, "missing").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_field_is_none_without_remote() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlShadowStore::new(db.connection());
        let model = user_model(Arc::new(MemoryRemoteSource::new()));
        let handle = ModelHandle::new(&model, &store);
        let mut record = ShadowRecord::new("User", Some(RemoteId::from(9)));

        assert_eq!(handle.read_field(&mut record, "name").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn write_field_rejects_delegated_attributes() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlShadowStore::new(db.connection());
        let model = user_model(Arc::new(MemoryRemoteSource::new()));
        let handle = ModelHandle::new(&model, &store);
        let mut record = ShadowRecord::new("User", None);

        handle
            .write_field(&mut record, "email", json!("a@x.com"))
            .unwrap();
        assert!(handle
            .write_field(&mut record, "name", json!("Jane"))
            .is_err());
        assert_eq!(record.field("email"), Some(&json!("a@x.com")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_with_skip_flag_keeps_local_values_once() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlShadowStore::new(db.connection());
        let source = Arc::new(MemoryRemoteSource::with_records([john()]));
        let model = user_model(source.clone());
        let handle = ModelHandle::new(&model, &store);
        let mut record = handle.create(Some(RemoteId::from(1))).await.unwrap();

        record.write_field("email", json!("local@x.com"));
        record.write_field("stray", json!(true));
        record.skip_cache_update = true;
        handle.save(&mut record).await.unwrap();

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.field("email"), Some(&json!("local@x.com")));
        assert_eq!(stored.field("stray"), None);
        assert!(!record.skip_cache_update);

        handle.save(&mut record).await.unwrap();
        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.field("email"), Some(&json!("john@x.com")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_cached_attributes_nulls_fields_when_remote_is_gone() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlShadowStore::new(db.connection());
        let source = Arc::new(MemoryRemoteSource::with_records([john()]));
        let model = user_model(source.clone());
        let handle = ModelHandle::new(&model, &store);
        let mut record = handle.create(Some(RemoteId::from(1))).await.unwrap();

        source.remove(&RemoteId::from(1));
        handle.update_cached_attributes(&mut record).await.unwrap();

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.field("email"), Some(&Value::Null));
        assert_eq!(stored.field("telephone"), Some(&Value::Null));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_remote_requires_every_cached_attribute() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlShadowStore::new(db.connection());
        let model = user_model(Arc::new(MemoryRemoteSource::new()));
        let handle = ModelHandle::new(&model, &store);
        let mut record = ShadowRecord::new("User", Some(RemoteId::from(1)));

        let explicit_null = RemoteRecord::new(RemoteId::from(1), Utc::now())
            .with_field("email", "john@x.com")
            .with_field("phone", Value::Null);
        handle.apply_remote(&mut record, &explicit_null).unwrap();
        assert_eq!(record.field("email"), Some(&json!("john@x.com")));
        assert_eq!(record.field("telephone"), Some(&Value::Null));

        let missing = RemoteRecord::new(RemoteId::from(1), Utc::now()).with_field("email", "x");
        assert!(matches!(
            handle.apply_remote(&mut record, &missing),
            Err(Error::Apply(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handle_rejects_records_of_other_models() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlShadowStore::new(db.connection());
        let model = user_model(Arc::new(MemoryRemoteSource::new()));
        let handle = ModelHandle::new(&model, &store);
        let mut record = ShadowRecord::new("Book", None);

        assert!(matches!(
            handle.save(&mut record).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(store.get(&record.id).await.unwrap().is_none());
    }
}
