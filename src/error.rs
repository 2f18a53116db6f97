//! Error types surfaced by the orchestration engine.

use std::path::PathBuf;
use thiserror::Error;

use crate::clock::LocalDay;
use crate::program::{ProgramId, RecordingIdentity};

#[derive(Debug, Error)]
pub enum EngineError {
    /// The planning source could not be read. Fatal at startup.
    #[error("failed to read capture planning from {path}: {reason}")]
    Configuration { path: PathBuf, reason: String },

    /// One program could not be placed on the schedule.
    #[error("cannot schedule program [{program_id}]: {reason}")]
    Scheduling { program_id: String, reason: String },

    #[error("failed to start capture {identity}: {reason}")]
    CaptureStart {
        identity: RecordingIdentity,
        reason: String,
    },

    #[error("capture {identity} did not terminate within {timeout_secs}s and was killed")]
    CaptureStopTimeout {
        identity: RecordingIdentity,
        timeout_secs: u64,
    },

    #[error("no recording known for program [{program_id}] on {day}")]
    UnknownIdentity { program_id: ProgramId, day: LocalDay },

    #[error("no recording known for program [{program_id}]")]
    UnknownProgram { program_id: ProgramId },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn unknown(identity: &RecordingIdentity) -> Self {
        Self::UnknownIdentity {
            program_id: identity.program_id.clone(),
            day: identity.day,
        }
    }

    /// True for the NotFound class of errors returned by status and chunk queries.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnknownIdentity { .. } | Self::UnknownProgram { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
