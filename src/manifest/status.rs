//! Recording status types persisted in the manifest.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Lifecycle state of one recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Pending,
    Ongoing,
    Completed,
    PartialFailure,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::PartialFailure => "partial_failure",
        }
    }

    /// Completed and partial failure are final; nothing is written after them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::PartialFailure)
    }
}

impl FromStr for RecordingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "ongoing" => Ok(Self::Ongoing),
            "completed" => Ok(Self::Completed),
            "partial_failure" => Ok(Self::PartialFailure),
            other => Err(format!("unknown recording status [{other}]")),
        }
    }
}

/// Status record of one recording: state, ordered errors and produced chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub status: RecordingState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, rename = "chunkList")]
    pub chunk_list: Vec<PathBuf>,
}

impl RecordingStatus {
    pub fn new(status: RecordingState) -> Self {
        Self {
            status,
            errors: Vec::new(),
            chunk_list: Vec::new(),
        }
    }

    pub fn pending() -> Self {
        Self::new(RecordingState::Pending)
    }
}

impl Default for RecordingStatus {
    fn default() -> Self {
        Self::pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_as_str_matches_serde() {
        for state in [
            RecordingState::Pending,
            RecordingState::Ongoing,
            RecordingState::Completed,
            RecordingState::PartialFailure,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
            assert_eq!(state.as_str().parse::<RecordingState>().unwrap(), state);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RecordingState::Pending.is_terminal());
        assert!(!RecordingState::Ongoing.is_terminal());
        assert!(RecordingState::Completed.is_terminal());
        assert!(RecordingState::PartialFailure.is_terminal());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            "PARTIAL_FAILURE".parse::<RecordingState>().unwrap(),
            RecordingState::PartialFailure
        );
        assert!("finished".parse::<RecordingState>().is_err());
    }

    #[test]
    fn test_errors_omitted_when_empty() {
        let status = RecordingStatus {
            status: RecordingState::Completed,
            errors: Vec::new(),
            chunk_list: vec![PathBuf::from("/tmp/a.mp3")],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("errors").is_none());
        assert_eq!(json["status"], "completed");
        assert_eq!(json["chunkList"][0], "/tmp/a.mp3");
    }
}
