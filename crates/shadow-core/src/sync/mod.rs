//! Reconciliation of shadow records against their remote change feeds.
//!
//! One pass for one model reads the model's checkpoint, fetches everything
//! the remote reports as changed after it, and applies the whole batch in a
//! single unit of work on the store. The checkpoint advances to the last
//! change of the batch only after the unit of work committed. Any failure
//! rolls the batch back and leaves the checkpoint where it was, so the next
//! pass fetches the same batch again.

mod result;

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::db::{ProgressStore, ShadowRecordStore};
use crate::error::{Error, Result};
use crate::handle::ModelHandle;
use crate::models::{RemoteRecord, ShadowRecord, SyncCheckpoint};
use crate::registry::{ModelDefinition, ModelRegistry};
use crate::remote::SyncParams;

pub use result::{FailureKind, SyncFailure, SyncResult, SyncStatus};

/// Drives reconciliation passes for the models of a registry
pub struct Synchronizer<S, P> {
    registry: ModelRegistry,
    store: S,
    progress: P,
    /// One store connection carries one transaction at a time
    unit_of_work: tokio::sync::Mutex<()>,
    in_flight: Mutex<HashSet<String>>,
}

#[derive(Debug, Default)]
struct Tally {
    created: usize,
    updated: usize,
    destroyed: usize,
    skipped: usize,
}

impl<S: ShadowRecordStore, P: ProgressStore> Synchronizer<S, P> {
    /// Create a synchronizer over the given registry and stores
    pub fn new(registry: ModelRegistry, store: S, progress: P) -> Self {
        Self {
            registry,
            store,
            progress,
            unit_of_work: tokio::sync::Mutex::new(()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub const fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn progress(&self) -> &P {
        &self.progress
    }

    /// Field access and persistence for one registered model
    pub fn handle(&self, model_name: &str) -> Result<ModelHandle<'_, S>> {
        self.registry
            .get(model_name)
            .map(|definition| ModelHandle::new(definition, &self.store))
            .ok_or_else(|| Error::NotFound(format!("model {model_name}")))
    }

    /// Run one reconciliation pass for `model_name`.
    ///
    /// Never returns an error: failures are reported in the result and leave
    /// the checkpoint unchanged.
    pub async fn synchronize(&self, model_name: &str, params: &SyncParams) -> SyncResult {
        let mut result = SyncResult::started(model_name, Utc::now());

        let Some(definition) = self.registry.get(model_name) else {
            let failure = SyncFailure::new(
                FailureKind::UnknownModel,
                format!("model {model_name} is not registered"),
            );
            return Self::finish_failed(result, failure);
        };

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, model_name) else {
            let failure = SyncFailure::new(
                FailureKind::InFlight,
                format!("a pass for {model_name} is already running"),
            );
            return Self::finish_failed(result, failure);
        };

        info!(
            "Synchronizing {model_name} (started {})",
            result.started_at.to_rfc3339()
        );

        match self.run_pass(definition, params, &mut result).await {
            Ok(()) => {
                result.finished_at = Utc::now();
                info!(
                    "Synchronized {model_name}: {} fetched, {} created, {} updated, {} destroyed, {} skipped (finished {})",
                    result.fetched,
                    result.created,
                    result.updated,
                    result.destroyed,
                    result.skipped,
                    result.finished_at.to_rfc3339()
                );
                result
            }
            Err(failure) => Self::finish_failed(result, failure),
        }
    }

    /// Run one pass per model, in registration order.
    ///
    /// `None` selects every registered model. Unknown names are rejected
    /// before any pass starts; a failed pass never stops the others.
    pub async fn synchronize_models(
        &self,
        model_names: Option<&[String]>,
        params: &SyncParams,
    ) -> Result<Vec<SyncResult>> {
        let names = match model_names {
            Some(names) => {
                let selected = self.registry.select(names)?;
                self.registry
                    .models()
                    .iter()
                    .filter(|model| selected.iter().any(|chosen| chosen.name() == model.name()))
                    .map(|model| model.name().to_string())
                    .collect()
            }
            None => self.registry.names(),
        };

        let mut results = Vec::with_capacity(names.len());
        for name in names {
            results.push(self.synchronize(&name, params).await);
        }
        Ok(results)
    }

    async fn run_pass(
        &self,
        definition: &ModelDefinition,
        params: &SyncParams,
        result: &mut SyncResult,
    ) -> std::result::Result<(), SyncFailure> {
        let model_name = definition.name();
        let previous = self
            .progress
            .latest(model_name)
            .await
            .map_err(|e| SyncFailure::new(FailureKind::of(&e), e.to_string()))?;
        result.checkpoint.clone_from(&previous);

        let since = previous.as_ref().map_or_else(
            || definition.initial_since(result.started_at),
            |checkpoint| checkpoint.cursor_timestamp,
        );
        let after_id = previous.as_ref().map(|checkpoint| &checkpoint.cursor_id);

        let changes = definition
            .source()
            .fetch_changed(since, after_id, params)
            .await
            .map_err(|e| SyncFailure::new(FailureKind::Fetch, e.to_string()))?;
        result.fetched = changes.len();

        let Some(last) = changes.last() else {
            info!("No changes for {model_name} since {}", since.to_rfc3339());
            result.status = SyncStatus::NoChanges;
            return Ok(());
        };

        let _unit_of_work = self.unit_of_work.lock().await;

        // Rolls back if dropped uncommitted, e.g. when the pass is cancelled
        let work = self
            .store
            .begin()
            .await
            .map_err(|e| SyncFailure::new(FailureKind::Storage, e.to_string()))?;

        let tally = match self.apply_batch(definition, &changes).await {
            Ok(tally) => tally,
            Err(error) => {
                if let Err(rollback_error) = self.store.rollback(work).await {
                    warn!("Rollback for {model_name} failed: {rollback_error}");
                }
                return Err(SyncFailure::new(FailureKind::Apply, error.to_string()));
            }
        };
        self.store
            .commit(work)
            .await
            .map_err(|e| SyncFailure::new(FailureKind::Apply, e.to_string()))?;

        result.created = tally.created;
        result.updated = tally.updated;
        result.destroyed = tally.destroyed;
        result.skipped = tally.skipped;
        result.status = SyncStatus::Synchronized;

        result.checkpoint = self
            .advance_checkpoint(model_name, previous, last)
            .await
            .map_err(|e| SyncFailure::new(FailureKind::of(&e), e.to_string()))?;
        Ok(())
    }

    async fn apply_batch(
        &self,
        definition: &ModelDefinition,
        changes: &[RemoteRecord],
    ) -> Result<Tally> {
        let handle = ModelHandle::new(definition, &self.store);
        let model_name = definition.name();
        let mut tally = Tally::default();

        for change in changes {
            let tombstoned = change.is_tombstoned(Utc::now());
            let mut matches = handle.find_by_remote_id(&change.id).await?;

            match (matches.is_empty(), tombstoned) {
                (true, true) => {
                    debug!("Skipping tombstone for unknown {model_name} {}", change.id);
                    tally.skipped += 1;
                }
                (true, false) => {
                    let mut record = ShadowRecord::new(model_name, Some(change.id.clone()));
                    Self::write_change(&handle, &mut record, change).await?;
                    debug!("Created {model_name} {} for remote {}", record.id, change.id);
                    tally.created += 1;
                }
                (false, true) => {
                    for record in &matches {
                        handle.destroy(record).await?;
                        debug!("Destroyed {model_name} {} for remote {}", record.id, change.id);
                        tally.destroyed += 1;
                    }
                }
                (false, false) => {
                    for record in &mut matches {
                        Self::write_change(&handle, record, change).await?;
                        debug!("Updated {model_name} {} from remote {}", record.id, change.id);
                        tally.updated += 1;
                    }
                }
            }
        }

        Ok(tally)
    }

    async fn write_change(
        handle: &ModelHandle<'_, S>,
        record: &mut ShadowRecord,
        change: &RemoteRecord,
    ) -> Result<()> {
        handle.apply_remote(record, change)?;
        record.skip_cache_update = true;
        handle.save(record).await
    }

    /// Append a checkpoint at the last change, unless that would move it backwards
    async fn advance_checkpoint(
        &self,
        model_name: &str,
        previous: Option<SyncCheckpoint>,
        last: &RemoteRecord,
    ) -> Result<Option<SyncCheckpoint>> {
        let cursor = last.cursor();
        if let Some(previous) = previous.filter(|checkpoint| checkpoint.cursor() > cursor) {
            warn!(
                "Remote feed for {model_name} ended at {} {} before checkpoint {} {}; keeping checkpoint",
                cursor.timestamp.to_rfc3339(),
                cursor.id,
                previous.cursor_timestamp.to_rfc3339(),
                previous.cursor_id
            );
            return Ok(Some(previous));
        }

        self.progress.record(model_name, &cursor).await.map(Some)
    }

    fn finish_failed(mut result: SyncResult, failure: SyncFailure) -> SyncResult {
        warn!("Synchronization of {} failed: {failure}", result.model_name);
        result.status = SyncStatus::Failed(failure);
        result.finished_at = Utc::now();
        result
    }
}

/// Marks a model as having a pass in flight until dropped
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    model_name: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<String>>, model_name: &str) -> Option<Self> {
        let inserted = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model_name.to_string());

        inserted.then(|| Self {
            in_flight,
            model_name: model_name.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.model_name);
    }
}
