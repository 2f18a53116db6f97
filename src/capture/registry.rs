use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{oneshot, RwLock};

use crate::manifest::RecordingState;
use crate::program::{ProgramId, RecordingIdentity};

/// Sent to a capture watcher to ask for termination; the watcher answers with
/// the terminal state it wrote.
pub(crate) type StopRequest = oneshot::Sender<RecordingState>;

/// Live handle of a capture, from its reservation by `start` until its
/// process is gone. The process itself is owned by its watcher task.
#[derive(Debug)]
pub(crate) struct ActiveCapture {
    pub pid: Option<u32>,
    pub stop: Option<oneshot::Sender<StopRequest>>,
}

#[derive(Debug, Default)]
struct Tables {
    paths: HashMap<RecordingIdentity, PathBuf>,
    active: HashMap<RecordingIdentity, ActiveCapture>,
    current: HashMap<ProgramId, RecordingIdentity>,
}

/// In-memory tables of one supervisor: identity to directory, identity to
/// running process, program to its latest identity.
#[derive(Debug, Default)]
pub struct RecordingRegistry {
    tables: RwLock<Tables>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_path(&self, identity: RecordingIdentity, dir: PathBuf) {
        let mut tables = self.tables.write().await;
        tables
            .current
            .insert(identity.program_id.clone(), identity.clone());
        tables.paths.insert(identity, dir);
    }

    pub async fn path_of(&self, identity: &RecordingIdentity) -> Option<PathBuf> {
        self.tables.read().await.paths.get(identity).cloned()
    }

    pub async fn current_identity(&self, program_id: &ProgramId) -> Option<RecordingIdentity> {
        self.tables.read().await.current.get(program_id).cloned()
    }

    pub async fn known(&self) -> Vec<(RecordingIdentity, PathBuf)> {
        let tables = self.tables.read().await;
        let mut known: Vec<_> = tables
            .paths
            .iter()
            .map(|(identity, dir)| (identity.clone(), dir.clone()))
            .collect();
        known.sort_by(|a, b| a.0.cmp(&b.0));
        known
    }

    /// Claims `identity` for one starting capture. Returns false when another
    /// capture already holds it; the caller must not spawn anything then.
    pub(crate) async fn reserve(
        &self,
        identity: RecordingIdentity,
        stop: oneshot::Sender<StopRequest>,
    ) -> bool {
        let mut tables = self.tables.write().await;
        if tables.active.contains_key(&identity) {
            return false;
        }
        tables.active.insert(
            identity,
            ActiveCapture {
                pid: None,
                stop: Some(stop),
            },
        );
        true
    }

    pub(crate) async fn set_pid(&self, identity: &RecordingIdentity, pid: Option<u32>) {
        if let Some(capture) = self.tables.write().await.active.get_mut(identity) {
            capture.pid = pid;
        }
    }

    pub async fn is_active(&self, identity: &RecordingIdentity) -> bool {
        self.tables.read().await.active.contains_key(identity)
    }

    pub async fn pid_of(&self, identity: &RecordingIdentity) -> Option<u32> {
        self.tables
            .read()
            .await
            .active
            .get(identity)
            .and_then(|capture| capture.pid)
    }

    /// Takes the stop channel of a live capture. A second caller gets `None`.
    pub(crate) async fn take_stop_handle(
        &self,
        identity: &RecordingIdentity,
    ) -> Option<oneshot::Sender<StopRequest>> {
        self.tables
            .write()
            .await
            .active
            .get_mut(identity)
            .and_then(|capture| capture.stop.take())
    }

    pub(crate) async fn remove_active(&self, identity: &RecordingIdentity) {
        self.tables.write().await.active.remove(identity);
    }

    pub async fn active_identities(&self) -> Vec<RecordingIdentity> {
        let mut identities: Vec<_> = self.tables.read().await.active.keys().cloned().collect();
        identities.sort();
        identities
    }
}
