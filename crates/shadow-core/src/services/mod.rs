//! Service layer shared by clients.

mod database;

pub use database::ShadowService;
