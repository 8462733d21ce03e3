//! Shared service wrapper used by clients that drive synchronization.

use std::path::{Path, PathBuf};

use crate::db::{
    Database, LibSqlProgressStore, LibSqlShadowStore, ProgressStore, ShadowRecordStore,
};
use crate::models::{RemoteId, ShadowRecord, SyncCheckpoint};
use crate::registry::ModelRegistry;
use crate::remote::SyncParams;
use crate::sync::{SyncResult, Synchronizer};
use crate::Result;

/// Database plus a synchronizer over it
pub struct ShadowService {
    _db: Database,
    db_path: Option<PathBuf>,
    synchronizer: Synchronizer<LibSqlShadowStore, LibSqlProgressStore>,
}

impl ShadowService {
    /// Open a service backed by the database at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh one is created.
    pub async fn open_path(db_path: impl Into<PathBuf>, registry: ModelRegistry) -> Result<Self> {
        let db_path = db_path.into();
        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Detected invalid local DB file at {}: {}. Moving it aside and retrying once.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self::from_database(db, Some(db_path), registry))
    }

    /// Open an in-memory service (primarily for tests).
    pub async fn open_in_memory(registry: ModelRegistry) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::from_database(db, None, registry))
    }

    fn from_database(db: Database, db_path: Option<PathBuf>, registry: ModelRegistry) -> Self {
        let synchronizer = Synchronizer::new(
            registry,
            LibSqlShadowStore::new(db.connection()),
            LibSqlProgressStore::new(db.connection()),
        );
        Self {
            _db: db,
            db_path,
            synchronizer,
        }
    }

    /// Location of the database file, if file-backed.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// The synchronizer driving this service.
    pub const fn synchronizer(&self) -> &Synchronizer<LibSqlShadowStore, LibSqlProgressStore> {
        &self.synchronizer
    }

    /// Registered models.
    pub const fn registry(&self) -> &ModelRegistry {
        self.synchronizer.registry()
    }

    /// Synchronize the given models, or all of them.
    pub async fn synchronize(
        &self,
        model_names: Option<&[String]>,
        params: &SyncParams,
    ) -> Result<Vec<SyncResult>> {
        self.synchronizer
            .synchronize_models(model_names, params)
            .await
    }

    /// Checkpoints for a model, newest first.
    pub async fn checkpoints(&self, model_name: &str, limit: usize) -> Result<Vec<SyncCheckpoint>> {
        self.synchronizer
            .progress()
            .history(model_name, limit)
            .await
    }

    /// Local records of a model pointing at a remote id.
    pub async fn records_for(
        &self,
        model_name: &str,
        remote_id: &RemoteId,
    ) -> Result<Vec<ShadowRecord>> {
        let handle = self.synchronizer.handle(model_name)?;
        handle.find_by_remote_id(remote_id).await
    }

    /// Local record count for a model, up to `limit`.
    pub async fn record_count(&self, model_name: &str, limit: usize) -> Result<usize> {
        Ok(self
            .synchronizer
            .store()
            .list(model_name, limit, 0)
            .await?
            .len())
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        error
            .to_string()
            .to_ascii_lowercase()
            .contains("file is not a database")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("shadow.db");
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale DB sidecar file {}", path.display());
            }
        }

        Ok(())
    }
}
