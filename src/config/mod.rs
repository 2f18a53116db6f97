use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub planning: PlanningConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root under which `{programId}-{title}/{YYYYMMDD}` recording directories live
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// JSON file listing the programs to capture
    pub file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub ffmpeg_path: String,
    pub audio_codec: String,
    pub bitrate: String,
    pub sample_rate: u32,
    pub segment_seconds: u32,
    /// Container and file extension of each chunk
    pub container: String,
    /// How long after spawn an exit still counts as a failed start
    pub start_grace_millis: u64,
    /// How long STOP waits for a graceful exit before killing the encoder
    pub stop_timeout_seconds: u64,
    /// How long the exit path waits for the output drain to finish
    pub drain_grace_millis: u64,
    /// Encoder output lines kept for diagnostics
    pub output_buffer_lines: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: global::recordings_dir()
                .unwrap_or_else(|_| PathBuf::from("/var/lib/onair/recordings")),
        }
    }
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            file: global::planning_file()
                .unwrap_or_else(|_| PathBuf::from("/etc/onair/planning.json")),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            audio_codec: "libmp3lame".to_string(),
            bitrate: "160k".to_string(),
            sample_rate: 32000,
            segment_seconds: 10,
            container: "mp3".to_string(),
            start_grace_millis: 1500,
            stop_timeout_seconds: 5,
            drain_grace_millis: 500,
            output_buffer_lines: 200,
        }
    }
}

impl CaptureConfig {
    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_millis)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_millis)
    }
}

impl Config {
    /// Loads the config from its default location, creating it when missing.
    pub fn load() -> Result<Self> {
        Self::load_from(&global::config_file()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }
}
