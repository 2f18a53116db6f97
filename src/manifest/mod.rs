//! Durable per-recording status manifest.
//!
//! The manifest is the externally visible truth about a recording. Writes are
//! full overwrites and never fatal: a failed write is logged and reported as
//! `false`, since the in-memory tables stay authoritative for the running
//! process. Reads never fail; a missing manifest reads as PENDING.

pub mod status;

pub use status::{RecordingState, RecordingStatus};

use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

pub const MANIFEST_FILENAME: &str = "recording-manifest.json";

/// File extensions counted as recorded chunks.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "aac", "m4a", "ogg", "opus", "wav", "flac"];

/// Lenient on-disk shape so a manifest with an unexpected status still reads.
#[derive(Debug, Deserialize)]
struct StoredManifest {
    status: Option<String>,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default, rename = "chunkList")]
    chunk_list: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestStore;

impl ManifestStore {
    pub fn new() -> Self {
        Self
    }

    pub fn manifest_path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILENAME)
    }

    pub fn exists(&self, dir: &Path) -> bool {
        Self::manifest_path(dir).is_file()
    }

    /// Overwrites the manifest in `dir`. Returns false when it could not be written.
    pub fn create_or_update(
        &self,
        dir: &Path,
        status: RecordingState,
        errors: &[String],
        chunks: &[PathBuf],
    ) -> bool {
        let record = RecordingStatus {
            status,
            errors: errors.to_vec(),
            chunk_list: chunks.to_vec(),
        };

        match write_manifest(dir, &record) {
            Ok(()) => {
                debug!("Manifest in {:?} set to {}", dir, status.as_str());
                true
            }
            Err(e) => {
                error!("Failed to create or update manifest in {:?}: {}", dir, e);
                false
            }
        }
    }

    /// Reads the manifest in `dir`, treating a missing or unreadable file as PENDING.
    pub fn read(&self, dir: &Path) -> RecordingStatus {
        let path = Self::manifest_path(dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No manifest in {:?} yet", dir);
                return RecordingStatus::pending();
            }
            Err(e) => {
                error!("Failed to read manifest {:?}: {}", path, e);
                return RecordingStatus::pending();
            }
        };

        let stored: StoredManifest = match serde_json::from_str(&content) {
            Ok(stored) => stored,
            Err(e) => {
                error!("Malformed manifest {:?}: {}", path, e);
                return RecordingStatus::pending();
            }
        };

        let status = match stored.status.as_deref().map(str::parse::<RecordingState>) {
            Some(Ok(status)) => status,
            Some(Err(e)) => {
                warn!("{} in {:?}, reading it as pending", e, path);
                RecordingState::Pending
            }
            None => RecordingState::Pending,
        };

        RecordingStatus {
            status,
            errors: stored.errors,
            chunk_list: stored.chunk_list,
        }
    }

    /// Adds an error to the manifest and marks the recording as a partial failure.
    pub fn append_error(&self, dir: &Path, message: impl Into<String>) -> bool {
        let mut current = self.read(dir);
        current.errors.push(message.into());
        self.create_or_update(
            dir,
            RecordingState::PartialFailure,
            &current.errors,
            &current.chunk_list,
        )
    }

    /// Writes a terminal state with a fresh chunk inventory, appending `errors`
    /// to those already recorded. An already terminal manifest is left alone and
    /// the call returns false.
    pub fn finalize(&self, dir: &Path, status: RecordingState, errors: Vec<String>) -> bool {
        let current = self.read(dir);
        if current.status.is_terminal() {
            debug!(
                "Manifest in {:?} already {}, not rewriting",
                dir,
                current.status.as_str()
            );
            return false;
        }

        let chunks = gather_chunks(dir).unwrap_or_else(|e| {
            warn!("Failed to list chunks in {:?}: {}", dir, e);
            current.chunk_list.clone()
        });

        let mut all_errors = current.errors;
        all_errors.extend(errors);
        self.create_or_update(dir, status, &all_errors, &chunks)
    }
}

/// Regular audio files in `dir`, ordered by file name (which embeds the segment time).
pub fn gather_chunks(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut chunks = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let is_audio = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_audio {
            chunks.push(path);
        }
    }
    chunks.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(chunks)
}

fn write_manifest(dir: &Path, record: &RecordingStatus) -> io::Result<()> {
    let json = serde_json::to_string_pretty(record)?;
    let path = ManifestStore::manifest_path(dir);
    let tmp_path = dir.join(format!(".{}.tmp", MANIFEST_FILENAME));
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, &path)
}
