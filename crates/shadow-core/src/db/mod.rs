//! Database layer for shadow records and sync checkpoints

mod connection;
mod migrations;
mod progress_repository;
mod shadow_repository;

pub use connection::Database;
pub use progress_repository::{LibSqlProgressStore, ProgressStore};
pub use shadow_repository::{LibSqlShadowStore, ShadowRecordStore};
