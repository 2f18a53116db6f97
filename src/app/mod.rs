use crate::clock::SystemClock;
use crate::config::Config;
use crate::engine::CaptureEngine;
use crate::global;
use crate::planning::FilePlanningLoader;
use crate::program::StorageLayout;
use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use which::which;

/// Runs the capture service until Ctrl-C.
pub async fn run_service(config_path: Option<PathBuf>) -> Result<()> {
    info!("Starting onair service");

    let config = match config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    let storage_root = config.storage.root.clone();
    tokio::fs::create_dir_all(&storage_root)
        .await
        .with_context(|| format!("Failed to create storage root {}", storage_root.display()))?;
    let _lock = acquire_storage_lock(&storage_root).await?;

    check_encoder(&config.capture.ffmpeg_path);

    let engine = CaptureEngine::new(
        config.capture.clone(),
        StorageLayout::new(&storage_root),
        Arc::new(SystemClock),
    );

    let loader = FilePlanningLoader::new(&config.planning.file);
    let report = engine.load_planning(&loader).await?;
    info!(
        "onair is ready: {} programs scheduled, recordings under {}",
        report.scheduled,
        storage_root.display()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested, stopping captures");

    for (identity, state) in engine.shutdown().await {
        info!("Capture {} closed as {}", identity, state.as_str());
    }

    Ok(())
}

/// Exclusive lock on the storage root, held for the life of the service.
pub struct StorageLock {
    file: File,
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            debug!("Failed to release storage lock: {err:?}");
        }
    }
}

pub async fn acquire_storage_lock(storage_root: &Path) -> Result<StorageLock> {
    let path = global::storage_lock_file(storage_root);
    tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow!(
                "Another onair service already owns {}",
                path.parent().unwrap_or(&path).display()
            )
        })?;
        Ok(StorageLock { file })
    })
    .await?
}

fn check_encoder(program: &str) {
    match which(program) {
        Ok(path) => info!("Using encoder at {}", path.display()),
        Err(_) => warn!(
            "Encoder '{}' not found in PATH, captures will fail until it is installed",
            program
        ),
    }
}
