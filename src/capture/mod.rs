//! Supervision of the external encoder processes that record the streams.
//!
//! Each running capture gets one child process, one task draining its output
//! and one watcher task. The watcher owns the child and is the only writer of
//! the recording's terminal state, whether the process ends on its own or is
//! asked to stop.

pub mod command;
pub mod output;
pub mod registry;
pub mod supervisor;

pub use command::CaptureCommand;
pub use registry::RecordingRegistry;
pub use supervisor::CaptureSupervisor;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::EngineResult;
use crate::manifest::RecordingState;
use crate::program::{ProgramDescriptor, RecordingIdentity};

/// What the scheduler needs from a capture backend.
#[async_trait]
pub trait CaptureControl: Send + Sync {
    /// Creates the recording directory and a PENDING manifest if none exists yet.
    async fn prepare(
        &self,
        program: &ProgramDescriptor,
        identity: &RecordingIdentity,
    ) -> EngineResult<PathBuf>;

    /// Launches the capture. Failures end up in the manifest, never in the caller.
    async fn start(
        &self,
        program: &ProgramDescriptor,
        identity: &RecordingIdentity,
        duration: Duration,
    ) -> RecordingState;

    /// Ends the capture and returns the terminal state it was closed with.
    async fn stop(&self, identity: &RecordingIdentity) -> EngineResult<RecordingState>;
}
