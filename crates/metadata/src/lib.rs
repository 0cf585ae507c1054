//! Session store abstraction and SQLite implementation for Hopper.
//!
//! This crate provides the control-plane data model:
//! - Upload session rows and their lifecycle transitions
//! - Per-chunk receipt records used as the at-most-once counter gate
//! - State-conditional updates that keep terminal states terminal

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use repos::sessions::{ChunkRecord, SessionRepo};
pub use store::{SessionStore, SqliteStore};

use hopper_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a session store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn SessionStore>> {
    let store = SqliteStore::new(&config.path).await?;
    Ok(Arc::new(store) as Arc<dyn SessionStore>)
}
