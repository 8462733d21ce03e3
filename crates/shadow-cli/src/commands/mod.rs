pub mod checkpoints;
pub mod common;
pub mod completions;
pub mod models;
pub mod show;
pub mod sync;
