use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::command::CaptureCommand;
use super::output::{spawn_drain, OutputBuffer};
use super::registry::{RecordingRegistry, StopRequest};
use super::CaptureControl;
use crate::clock::LocalDay;
use crate::config::CaptureConfig;
use crate::error::{EngineError, EngineResult};
use crate::manifest::{gather_chunks, ManifestStore, RecordingState, RecordingStatus};
use crate::program::{ProgramDescriptor, ProgramId, RecordingIdentity, StorageLayout};

/// Extra time a STOP caller waits for the watcher beyond the stop timeout.
const STOP_REPLY_MARGIN: Duration = Duration::from_secs(5);

/// Owns every encoder process of the engine and the manifests they feed.
pub struct CaptureSupervisor {
    config: CaptureConfig,
    layout: StorageLayout,
    manifests: ManifestStore,
    registry: Arc<RecordingRegistry>,
}

impl CaptureSupervisor {
    pub fn new(config: CaptureConfig, layout: StorageLayout) -> Self {
        Self {
            config,
            layout,
            manifests: ManifestStore::new(),
            registry: Arc::new(RecordingRegistry::new()),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn registry(&self) -> &RecordingRegistry {
        &self.registry
    }

    /// Latest identity prepared for a program by this process.
    pub async fn current_identity(&self, program_id: &ProgramId) -> Option<RecordingIdentity> {
        self.registry.current_identity(program_id).await
    }

    pub async fn status_of(&self, identity: &RecordingIdentity) -> EngineResult<RecordingStatus> {
        let dir = self
            .resolve_dir(identity)
            .await
            .ok_or_else(|| EngineError::unknown(identity))?;
        Ok(self.manifests.read(&dir))
    }

    /// Manifest of every identity this process has prepared.
    pub async fn all_statuses(&self) -> BTreeMap<RecordingIdentity, RecordingStatus> {
        self.registry
            .known()
            .await
            .into_iter()
            .map(|(identity, dir)| {
                let status = self.manifests.read(&dir);
                (identity, status)
            })
            .collect()
    }

    /// Audio chunks recorded for a program day, in recording order.
    pub async fn chunks_of(&self, program_id: &ProgramId, day: LocalDay) -> EngineResult<Vec<PathBuf>> {
        let identity = RecordingIdentity::new(program_id.clone(), day);
        let dir = self
            .resolve_dir(&identity)
            .await
            .filter(|dir| dir.is_dir())
            .ok_or_else(|| EngineError::unknown(&identity))?;
        Ok(gather_chunks(&dir)?)
    }

    /// Stops every running capture, all at once, and waits for their final states.
    pub async fn stop_all(&self) -> Vec<(RecordingIdentity, RecordingState)> {
        let mut pending = Vec::new();
        for identity in self.registry.active_identities().await {
            if let Some(handle) = self.registry.take_stop_handle(&identity).await {
                let (reply_tx, reply_rx) = oneshot::channel();
                if handle.send(reply_tx).is_ok() {
                    info!("Stopping capture {}", identity);
                    pending.push((identity, reply_rx));
                }
            }
        }

        let mut stopped = Vec::with_capacity(pending.len());
        for (identity, reply_rx) in pending {
            let state = self.await_stop_reply(&identity, reply_rx).await;
            stopped.push((identity, state));
        }
        stopped
    }

    /// Live table first, then the on-disk layout for recordings made by an
    /// earlier process. A directory found on disk is registered again.
    async fn resolve_dir(&self, identity: &RecordingIdentity) -> Option<PathBuf> {
        if let Some(dir) = self.registry.path_of(identity).await {
            return Some(dir);
        }

        let dir = self
            .layout
            .find_recording_dir(&identity.program_id, identity.day)?;
        debug!("Recovered {} from storage at {:?}", identity, dir);
        self.registry
            .register_path(identity.clone(), dir.clone())
            .await;
        Some(dir)
    }

    async fn await_stop_reply(
        &self,
        identity: &RecordingIdentity,
        reply_rx: oneshot::Receiver<RecordingState>,
    ) -> RecordingState {
        let wait = self.config.stop_timeout() + self.config.drain_grace() + STOP_REPLY_MARGIN;
        match tokio::time::timeout(wait, reply_rx).await {
            Ok(Ok(state)) => state,
            _ => {
                warn!("Capture {} did not report its final state", identity);
                match self.registry.path_of(identity).await {
                    Some(dir) => self.manifests.read(&dir).status,
                    None => RecordingState::PartialFailure,
                }
            }
        }
    }

    /// Closes a recording that has no tracked process, from what is on disk.
    fn reconcile(&self, identity: &RecordingIdentity, dir: &Path) -> RecordingState {
        let current = self.manifests.read(dir);
        if current.status.is_terminal() {
            debug!(
                "Recording {} already {}",
                identity,
                current.status.as_str()
            );
            return current.status;
        }

        let chunks = gather_chunks(dir).unwrap_or_default();
        let state = if chunks.is_empty() {
            self.manifests.finalize(
                dir,
                RecordingState::PartialFailure,
                vec!["no audio chunk was recorded".to_string()],
            );
            RecordingState::PartialFailure
        } else {
            self.manifests
                .finalize(dir, RecordingState::Completed, Vec::new());
            RecordingState::Completed
        };

        info!(
            "Reconciled {} from storage as {} ({} chunks)",
            identity,
            state.as_str(),
            chunks.len()
        );
        state
    }

    fn finisher(
        &self,
        dir: PathBuf,
        identity: RecordingIdentity,
        output: OutputBuffer,
        drain: JoinHandle<()>,
    ) -> Finisher {
        Finisher {
            identity,
            dir,
            manifests: self.manifests,
            output,
            drain,
            drain_grace: self.config.drain_grace(),
        }
    }

    /// Spawns the encoder of a reserved identity and hands it to a watcher once
    /// it survived the start grace.
    async fn launch(
        &self,
        program: &ProgramDescriptor,
        identity: &RecordingIdentity,
        duration: Duration,
        mut stop_rx: oneshot::Receiver<StopRequest>,
    ) -> Launch {
        let dir = match self.prepare(program, identity).await {
            Ok(dir) => dir,
            Err(e) => {
                error!("Cannot prepare storage for {}: {}", identity, e);
                return Launch::Ended(RecordingState::PartialFailure, stop_rx);
            }
        };

        let current = self.manifests.read(&dir);
        if current.status.is_terminal() {
            warn!(
                "Recording {} is already {}, not starting it again",
                identity,
                current.status.as_str()
            );
            return Launch::Ended(current.status, stop_rx);
        }

        let pattern = self
            .layout
            .chunk_pattern(program, &dir, &self.config.container);
        let command = CaptureCommand::build(&self.config, program, &pattern, duration);
        info!(
            "Starting capture {} of [{}] for {}s",
            identity,
            program.title,
            duration.as_secs()
        );
        debug!("Capture command: {}", command);

        let mut child = match command.to_command().spawn() {
            Ok(child) => child,
            Err(e) => {
                let failure = EngineError::CaptureStart {
                    identity: identity.clone(),
                    reason: e.to_string(),
                };
                error!("{}", failure);
                self.manifests.finalize(
                    &dir,
                    RecordingState::PartialFailure,
                    vec![failure.to_string()],
                );
                return Launch::Ended(RecordingState::PartialFailure, stop_rx);
            }
        };

        let pid = child.id();
        self.registry.set_pid(identity, pid).await;
        let output = OutputBuffer::new(self.config.output_buffer_lines);
        let drain = spawn_drain(
            identity.clone(),
            child.stdout.take(),
            child.stderr.take(),
            output.clone(),
        );
        let finisher = self.finisher(dir.clone(), identity.clone(), output, drain);

        let early = tokio::select! {
            exit = child.wait() => Some(WatchEvent::Exited(exit)),
            request = &mut stop_rx => Some(WatchEvent::StopRequested(request.ok())),
            _ = tokio::time::sleep(self.config.start_grace()) => None,
        };

        match early {
            Some(WatchEvent::Exited(exit)) => {
                let state = finisher.exited(exit, true).await;
                warn!(
                    "Capture {} ended within its start grace as {}",
                    identity,
                    state.as_str()
                );
                return Launch::Ended(state, stop_rx);
            }
            Some(WatchEvent::StopRequested(reply)) => {
                info!("Capture {} stopped during its start grace", identity);
                let state = finisher
                    .terminated(&mut child, self.config.stop_timeout())
                    .await;
                if let Some(reply) = reply {
                    let _ = reply.send(state);
                }
                return Launch::Ended(state, stop_rx);
            }
            None => {}
        }

        let chunks = gather_chunks(&dir).unwrap_or_default();
        self.manifests
            .create_or_update(&dir, RecordingState::Ongoing, &current.errors, &chunks);

        let watcher = Watcher {
            finisher,
            child,
            stop_rx,
            registry: Arc::clone(&self.registry),
            stop_timeout: self.config.stop_timeout(),
        };
        tokio::spawn(watcher.run());

        info!("Capture {} running (pid {:?})", identity, pid);
        Launch::Running
    }
}

/// How `launch` left a reserved identity.
enum Launch {
    /// A watcher owns the process and the stop channel.
    Running,
    /// Nothing runs; the reservation is still held and must be released.
    Ended(RecordingState, oneshot::Receiver<StopRequest>),
}

#[async_trait]
impl CaptureControl for CaptureSupervisor {
    async fn prepare(
        &self,
        program: &ProgramDescriptor,
        identity: &RecordingIdentity,
    ) -> EngineResult<PathBuf> {
        let dir = self.layout.recording_dir(program, identity.day);
        tokio::fs::create_dir_all(&dir).await?;
        self.registry
            .register_path(identity.clone(), dir.clone())
            .await;

        if self.manifests.exists(&dir) {
            debug!("Recording {} already has a manifest", identity);
        } else {
            self.manifests
                .create_or_update(&dir, RecordingState::Pending, &[], &[]);
            info!(
                "Prepared recording {} for program [{}] in {:?}",
                identity, program.title, dir
            );
        }
        Ok(dir)
    }

    async fn start(
        &self,
        program: &ProgramDescriptor,
        identity: &RecordingIdentity,
        duration: Duration,
    ) -> RecordingState {
        let (stop_tx, stop_rx) = oneshot::channel();
        if !self.registry.reserve(identity.clone(), stop_tx).await {
            warn!("Capture {} is already started, ignoring start", identity);
            return RecordingState::Ongoing;
        }

        match self.launch(program, identity, duration, stop_rx).await {
            Launch::Running => RecordingState::Ongoing,
            Launch::Ended(state, mut stop_rx) => {
                self.registry.remove_active(identity).await;
                // A STOP that claimed the reservation meanwhile still gets its answer.
                if let Ok(reply) = stop_rx.try_recv() {
                    let _ = reply.send(state);
                }
                state
            }
        }
    }

    async fn stop(&self, identity: &RecordingIdentity) -> EngineResult<RecordingState> {
        if let Some(handle) = self.registry.take_stop_handle(identity).await {
            let (reply_tx, reply_rx) = oneshot::channel();
            if handle.send(reply_tx).is_ok() {
                info!("Stopping capture {}", identity);
                return Ok(self.await_stop_reply(identity, reply_rx).await);
            }
        }

        let dir = self
            .resolve_dir(identity)
            .await
            .ok_or_else(|| EngineError::unknown(identity))?;

        info!(
            "No running capture for {}, it may have ended on its own",
            identity
        );
        Ok(self.reconcile(identity, &dir))
    }
}

/// Writes the terminal manifest state of one capture once its process is gone.
struct Finisher {
    identity: RecordingIdentity,
    dir: PathBuf,
    manifests: ManifestStore,
    output: OutputBuffer,
    drain: JoinHandle<()>,
    drain_grace: Duration,
}

impl Finisher {
    async fn settle_drain(&mut self) {
        if tokio::time::timeout(self.drain_grace, &mut self.drain)
            .await
            .is_err()
        {
            debug!("Output drain of {} still busy, abandoning it", self.identity);
            self.drain.abort();
        }
    }

    /// The process exited by itself. Zero is a completed recording.
    async fn exited(mut self, exit: io::Result<ExitStatus>, during_start: bool) -> RecordingState {
        self.settle_drain().await;

        let (state, errors) = match exit {
            Ok(status) if status.success() => (RecordingState::Completed, Vec::new()),
            Ok(status) => {
                let reason = describe_exit(status);
                let first = if during_start {
                    EngineError::CaptureStart {
                        identity: self.identity.clone(),
                        reason,
                    }
                    .to_string()
                } else {
                    reason
                };
                let mut errors = vec![first];
                errors.extend(self.output.snapshot());
                (RecordingState::PartialFailure, errors)
            }
            Err(e) => (
                RecordingState::PartialFailure,
                vec![format!("failed to wait for capture process: {}", e)],
            ),
        };

        self.manifests.finalize(&self.dir, state, errors);
        info!("Capture {} finished as {}", self.identity, state.as_str());
        state
    }

    /// Termination was requested. A graceful exit, whatever its code, is a completed recording.
    async fn terminated(mut self, child: &mut Child, stop_timeout: Duration) -> RecordingState {
        if let Err(e) = request_termination(child) {
            warn!("Failed to signal capture {}: {}", self.identity, e);
        }

        let (state, errors) = match tokio::time::timeout(stop_timeout, child.wait()).await {
            Ok(Ok(_)) => (RecordingState::Completed, Vec::new()),
            Ok(Err(e)) => (
                RecordingState::PartialFailure,
                vec![format!("failed to wait for capture process: {}", e)],
            ),
            Err(_) => {
                let failure = EngineError::CaptureStopTimeout {
                    identity: self.identity.clone(),
                    timeout_secs: stop_timeout.as_secs(),
                };
                warn!("{}", failure);
                if let Err(e) = child.kill().await {
                    error!("Failed to kill capture {}: {}", self.identity, e);
                }
                (RecordingState::PartialFailure, vec![failure.to_string()])
            }
        };

        self.settle_drain().await;
        self.manifests.finalize(&self.dir, state, errors);
        info!("Capture {} stopped as {}", self.identity, state.as_str());
        state
    }
}

enum WatchEvent {
    Exited(io::Result<ExitStatus>),
    StopRequested(Option<StopRequest>),
}

/// Sole owner of a running encoder process; the only writer of its terminal state.
struct Watcher {
    finisher: Finisher,
    child: Child,
    stop_rx: oneshot::Receiver<StopRequest>,
    registry: Arc<RecordingRegistry>,
    stop_timeout: Duration,
}

impl Watcher {
    async fn run(self) {
        let Watcher {
            finisher,
            mut child,
            mut stop_rx,
            registry,
            stop_timeout,
        } = self;
        let identity = finisher.identity.clone();

        let event = tokio::select! {
            exit = child.wait() => WatchEvent::Exited(exit),
            request = &mut stop_rx => WatchEvent::StopRequested(request.ok()),
        };

        match event {
            WatchEvent::Exited(exit) => {
                let state = finisher.exited(exit, false).await;
                registry.remove_active(&identity).await;
                // A STOP that raced the exit still gets its answer.
                if let Ok(reply) = stop_rx.try_recv() {
                    let _ = reply.send(state);
                }
            }
            WatchEvent::StopRequested(reply) => {
                let state = finisher.terminated(&mut child, stop_timeout).await;
                registry.remove_active(&identity).await;
                if let Some(reply) = reply {
                    let _ = reply.send(state);
                }
            }
        }
    }
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("capture process exited with code {}", code),
        None => format!("capture process was terminated ({})", status),
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
