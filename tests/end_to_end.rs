//! End-to-end runs of the engine against a stand-in recorder.
//!
//! The real encoder test needs ffmpeg and network access:
//! cargo test --test end_to_end -- --ignored

#![cfg(unix)]

use chrono::Utc;
use onair::capture::CaptureControl;
use onair::clock::SystemClock;
use onair::config::CaptureConfig;
use onair::manifest::{ManifestStore, RecordingState};
use onair::program::{ProgramDescriptor, ProgramId, StorageLayout};
use onair::{CaptureEngine, OneShotRequest};
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Writes one chunk next to the output pattern (last argument), a second one
/// a moment later, then idles until terminated.
const SEGMENTING_RECORDER: &str = r#"for last; do :; done
dir=$(dirname "$last")
touch "$dir/seg_chunk_20230716_140000.mp3"
sleep 1
touch "$dir/seg_chunk_20230716_140010.mp3"
exec sleep 60"#;

fn write_recorder(dir: &Path, body: &str) -> String {
    let path = dir.join("recorder.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn build_engine(root: &Path, recorder: String) -> CaptureEngine {
    let config = CaptureConfig {
        ffmpeg_path: recorder,
        start_grace_millis: 300,
        stop_timeout_seconds: 2,
        drain_grace_millis: 200,
        ..CaptureConfig::default()
    };
    CaptureEngine::new(
        config,
        StorageLayout::new(root.join("recordings")),
        Arc::new(SystemClock),
    )
}

fn program(id: &str, start_in_secs: i64, duration_seconds: u64) -> ProgramDescriptor {
    ProgramDescriptor {
        id: ProgramId::new(id),
        title: "France Inter".to_string(),
        stream_url: "http://direct.franceinter.fr/live/franceinter-midfi.mp3".to_string(),
        start_epoch_sec: Utc::now().timestamp() + start_in_secs,
        duration_seconds,
        time_zone: chrono_tz::Europe::Paris,
        recorder_parameters: BTreeMap::new(),
    }
}

async fn wait_for_state(
    engine: &CaptureEngine,
    program_id: &ProgramId,
    wanted: RecordingState,
    within: Duration,
) -> RecordingState {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let state = engine
            .status_of_program(program_id)
            .await
            .map(|(_, status)| status.status)
            .unwrap_or(RecordingState::Pending);
        if state == wanted || tokio::time::Instant::now() >= deadline {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn test_scheduled_capture_completes_with_chunks() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = build_engine(tmp.path(), write_recorder(tmp.path(), SEGMENTING_RECORDER));
    let program = program("e2e-ok", 1, 3);

    let report = engine.schedule(vec![program.clone()]).await;
    assert_eq!(report.scheduled, 1);

    // Prepared right away since today's midnight already passed
    let (identity, status) = engine.status_of_program(&program.id).await.unwrap();
    assert_eq!(status.status, RecordingState::Pending);

    assert_eq!(
        wait_for_state(&engine, &program.id, RecordingState::Ongoing, Duration::from_secs(5)).await,
        RecordingState::Ongoing
    );
    assert_eq!(
        wait_for_state(&engine, &program.id, RecordingState::Completed, Duration::from_secs(10)).await,
        RecordingState::Completed
    );

    let chunks = engine.chunks_of(&program.id, identity.day).await.unwrap();
    assert_eq!(chunks.len(), 2);
    assert!(chunks[0] < chunks[1]);

    let status = engine.status_of(&identity).await.unwrap();
    assert!(status.errors.is_empty());
    assert_eq!(status.chunk_list, chunks);
    assert!(engine.scheduled_program_ids().is_empty());

    let all = engine.all_statuses().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[&identity].status, RecordingState::Completed);

    // A fresh engine over the same storage finds the recording again
    let restarted = build_engine(tmp.path(), write_recorder(tmp.path(), "exit 0"));
    assert_eq!(
        restarted.chunks_of(&program.id, identity.day).await.unwrap(),
        chunks
    );
    assert_eq!(
        restarted.status_of(&identity).await.unwrap().status,
        RecordingState::Completed
    );
}

#[tokio::test]
async fn test_failing_recorder_is_partial_failure_and_stop_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let recorder = write_recorder(tmp.path(), "echo 'Server returned 404 Not Found' 1>&2\nexit 1");
    let engine = build_engine(tmp.path(), recorder);
    let program = program("e2e-broken", 1, 2);

    engine.schedule(vec![program.clone()]).await;
    assert_eq!(
        wait_for_state(&engine, &program.id, RecordingState::PartialFailure, Duration::from_secs(5)).await,
        RecordingState::PartialFailure
    );
    let (identity, failed) = engine.status_of_program(&program.id).await.unwrap();
    assert!(failed.errors.iter().any(|e| e.contains("404 Not Found")));

    // Let STOP fire, then check nothing was rewritten
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(engine.status_of(&identity).await.unwrap(), failed);

    let dir = tmp
        .path()
        .join("recordings")
        .join("e2e-broken-france_inter")
        .join(identity.day.to_string());
    assert_eq!(ManifestStore::new().read(&dir), failed);
}

#[tokio::test]
async fn test_shutdown_stops_running_capture() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = build_engine(tmp.path(), write_recorder(tmp.path(), SEGMENTING_RECORDER));
    let program = program("e2e-shutdown", 0, 600);

    engine.schedule(vec![program.clone()]).await;
    assert_eq!(
        wait_for_state(&engine, &program.id, RecordingState::Ongoing, Duration::from_secs(5)).await,
        RecordingState::Ongoing
    );

    let stopped = engine.shutdown().await;
    assert_eq!(stopped.len(), 1);
    assert_eq!(stopped[0].1, RecordingState::Completed);
    assert!(engine.scheduled_triggers().is_empty());
}

#[tokio::test]
#[ignore] // Requires ffmpeg and network access
async fn test_real_encoder_one_shot_capture() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = build_engine(tmp.path(), "ffmpeg".to_string());

    let program = engine
        .add_one_shot_capture(OneShotRequest {
            title: "France Inter - Test recording".to_string(),
            stream_url: "http://direct.franceinter.fr/live/franceinter-midfi.mp3".to_string(),
            ..OneShotRequest::default()
        })
        .await
        .unwrap();

    let state = wait_for_state(
        &engine,
        &program.id,
        RecordingState::Completed,
        Duration::from_secs(40),
    )
    .await;
    assert_eq!(state, RecordingState::Completed);

    let (identity, _) = engine.status_of_program(&program.id).await.unwrap();
    let chunks = engine.chunks_of(&program.id, identity.day).await.unwrap();
    assert!(!chunks.is_empty());
}

#[tokio::test]
async fn test_supervisor_usable_through_capture_control() {
    let tmp = tempfile::tempdir().unwrap();
    let supervisor = onair::capture::CaptureSupervisor::new(
        CaptureConfig::default(),
        StorageLayout::new(tmp.path()),
    );
    let control: &dyn CaptureControl = &supervisor;
    let program = program("e2e-trait", 60, 60);
    let identity = onair::program::RecordingIdentity::new(
        program.id.clone(),
        "20230716".parse().unwrap(),
    );

    let dir = control.prepare(&program, &identity).await.unwrap();
    assert!(ManifestStore::manifest_path(&dir).is_file());
    assert_eq!(
        control.stop(&identity).await.unwrap(),
        RecordingState::PartialFailure
    );
}
