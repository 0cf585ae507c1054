//! Lifecycle sweeper.
//!
//! Two periodic tasks run out of band: one reclaims staging directories
//! whose last write is older than the chunk timeout, one deletes stored
//! objects past the retention horizon. Neither touches the session store —
//! a session whose staging was swept simply fails `DataLoss` at finalize.

use crate::metrics::{OBJECTS_SWEPT, STAGING_DIRS_SWEPT};
use crate::state::AppState;
use hopper_core::config::SweepConfig;
use hopper_storage::{MediaStore, StagingArea, StorageResult, SweepStats};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Run one staging sweep. Returns the number of directories deleted.
pub async fn sweep_staging(staging: &StagingArea, config: &SweepConfig) -> StorageResult<usize> {
    let deleted = staging
        .purge_expired(OffsetDateTime::now_utc(), config.chunk_timeout())
        .await?;
    if deleted > 0 {
        STAGING_DIRS_SWEPT.inc_by(deleted as u64);
        tracing::info!(deleted, "staging sweep finished");
    } else {
        tracing::debug!("staging sweep finished, nothing to reclaim");
    }
    Ok(deleted)
}

/// Run one object-store sweep. Returns the sweep accounting.
pub async fn sweep_objects(objects: &MediaStore, config: &SweepConfig) -> StorageResult<SweepStats> {
    let stats = objects
        .purge_expired(OffsetDateTime::now_utc(), config.retention())
        .await?;
    OBJECTS_SWEPT.inc_by(stats.deleted);
    tracing::info!(
        scanned = stats.scanned,
        deleted = stats.deleted,
        errors = stats.errors,
        freed_bytes = stats.freed_bytes,
        "object sweep finished"
    );
    Ok(stats)
}

/// Spawn both sweeper loops. The returned handles live for the process
/// lifetime; dropping them detaches the tasks.
pub fn spawn_sweepers(state: &AppState) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    {
        let staging = state.staging.clone();
        let sweep = state.config.sweep.clone();
        let interval = Duration::from_secs(sweep.staging_sweep_interval_secs.max(1));
        handles.push(tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "staging sweeper started");
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = sweep_staging(&staging, &sweep).await {
                    tracing::error!(error = %e, "staging sweep failed");
                }
            }
        }));
    }

    {
        let objects = state.objects.clone();
        let sweep = state.config.sweep.clone();
        let interval = Duration::from_secs(sweep.object_sweep_interval_secs.max(1));
        handles.push(tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "object sweeper started");
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = sweep_objects(&objects, &sweep).await {
                    tracing::error!(error = %e, "object sweep failed");
                }
            }
        }));
    }

    handles
}
