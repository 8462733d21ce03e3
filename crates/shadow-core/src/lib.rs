//! shadow-core - Core library for shadow
//!
//! This crate keeps local, queryable copies of the cached fields of remote
//! resources and reconciles them against each collection's change feed.
//! It contains the models, the libSQL storage layer, the remote sources, the
//! synchronization engine and the service layer used by the CLI.

pub mod config;
pub mod db;
pub mod error;
pub mod handle;
pub mod models;
pub mod proxy;
pub mod registry;
pub mod remote;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use handle::ModelHandle;
pub use models::{Cursor, RemoteId, RemoteRecord, ShadowId, ShadowRecord, SyncCheckpoint};
pub use registry::{ModelDefinition, ModelRegistry, RemoteAttribute};
pub use remote::{HttpRemoteSource, MemoryRemoteSource, RemoteSource, SyncParams};
pub use services::ShadowService;
pub use sync::{FailureKind, SyncFailure, SyncResult, SyncStatus, Synchronizer};
