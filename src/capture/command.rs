//! Encoder command line for one capture.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::CaptureConfig;
use crate::program::ProgramDescriptor;

/// Argument vector of the encoder process; kept as plain data so it can be
/// logged and tested before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    program: String,
    args: Vec<String>,
}

impl CaptureCommand {
    /// Reads `program.stream_url` for `duration` and writes fixed-length
    /// segments named after `output_pattern`. Recorder parameters become extra
    /// input options (`{"user_agent": "x"}` gives `-user_agent x`).
    pub fn build(
        config: &CaptureConfig,
        program: &ProgramDescriptor,
        output_pattern: &Path,
        duration: Duration,
    ) -> Self {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-nostats".into(),
        ];

        for (key, value) in &program.recorder_parameters {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            args.push(format!("-{}", key.trim_start_matches('-')));
            if !value.is_empty() {
                args.push(value.clone());
            }
        }

        args.extend([
            "-t".to_string(),
            duration.as_secs().max(1).to_string(),
            "-i".to_string(),
            program.stream_url.clone(),
            "-vn".to_string(),
            "-c:a".to_string(),
            config.audio_codec.clone(),
            "-b:a".to_string(),
            config.bitrate.clone(),
            "-ar".to_string(),
            config.sample_rate.to_string(),
            "-f".to_string(),
            "segment".to_string(),
            "-segment_time".to_string(),
            config.segment_seconds.to_string(),
            "-segment_format".to_string(),
            config.container.clone(),
            "-strftime".to_string(),
            "1".to_string(),
            output_pattern.to_string_lossy().into_owned(),
        ]);

        Self {
            program: config.ffmpeg_path.clone(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Child process with piped output, killed if its handle is dropped.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl fmt::Display for CaptureCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
