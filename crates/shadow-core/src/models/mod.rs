//! Data models for shadow

mod checkpoint;
mod remote_record;
mod shadow_record;

pub use checkpoint::{Cursor, SyncCheckpoint};
pub use remote_record::{parse_timestamp, RemoteId, RemoteRecord};
pub use shadow_record::{ShadowId, ShadowRecord};
