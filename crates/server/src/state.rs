//! Application state shared across handlers.
//!
//! All components are constructor-injected rather than process-wide
//! singletons, so tests can wire fresh roots in temp directories.

use crate::manager::UploadManager;
use hopper_core::config::AppConfig;
use hopper_metadata::SessionStore;
use hopper_storage::{DedupIndex, MediaStore, StagingArea};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Session store.
    pub sessions: Arc<dyn SessionStore>,
    /// Chunk staging area.
    pub staging: Arc<StagingArea>,
    /// Object store for finalised media.
    pub objects: Arc<MediaStore>,
    /// Deduplication index.
    pub dedup: Arc<dyn DedupIndex>,
    /// The session manager orchestrating the upload protocol.
    pub manager: Arc<UploadManager>,
}

impl AppState {
    /// Create a new application state, wiring the session manager over the
    /// given components.
    pub fn new(
        config: AppConfig,
        sessions: Arc<dyn SessionStore>,
        staging: Arc<StagingArea>,
        objects: Arc<MediaStore>,
        dedup: Arc<dyn DedupIndex>,
    ) -> Self {
        let config = Arc::new(config);
        let manager = Arc::new(UploadManager::new(
            config.clone(),
            sessions.clone(),
            staging.clone(),
            objects.clone(),
            dedup.clone(),
        ));
        Self {
            config,
            sessions,
            staging,
            objects,
            dedup,
            manager,
        }
    }
}
