//! Single entry point over the scheduler and the capture supervisor.

use chrono::Duration as ChronoDuration;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::capture::{CaptureControl, CaptureSupervisor};
use crate::clock::{Clock, DayResolver, LocalDay};
use crate::config::CaptureConfig;
use crate::error::{EngineError, EngineResult};
use crate::manifest::{RecordingState, RecordingStatus};
use crate::planning::PlanningLoader;
use crate::program::{ProgramDescriptor, ProgramId, RecordingIdentity, StorageLayout};
use crate::scheduler::{RecordingScheduler, ScheduleReport, ScheduledTrigger};

/// Seconds between an ad-hoc capture request and its START.
const ONE_SHOT_DELAY_SECS: i64 = 1;
const ONE_SHOT_DEFAULT_SECS: u64 = 15;

/// Ad-hoc capture, typically used to check a stream end to end.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneShotRequest {
    pub title: String,
    #[serde(rename = "streamURL")]
    pub stream_url: String,
    /// Zero or absent means the default length.
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    /// Defaults to UTC.
    #[serde(default)]
    pub time_zone: Option<Tz>,
    #[serde(default, rename = "recorderSpecificParameters")]
    pub recorder_parameters: BTreeMap<String, String>,
}

pub struct CaptureEngine {
    supervisor: Arc<CaptureSupervisor>,
    scheduler: RecordingScheduler,
    days: DayResolver,
}

impl CaptureEngine {
    pub fn new(config: CaptureConfig, layout: StorageLayout, clock: Arc<dyn Clock>) -> Self {
        let days = DayResolver::new(clock);
        let supervisor = Arc::new(CaptureSupervisor::new(config, layout));
        let capture: Arc<dyn CaptureControl> = supervisor.clone();
        let scheduler = RecordingScheduler::new(capture, days.clone());

        Self {
            supervisor,
            scheduler,
            days,
        }
    }

    /// Loads the planning and makes it the current plan.
    pub async fn load_planning(&self, loader: &dyn PlanningLoader) -> EngineResult<ScheduleReport> {
        let programs = loader.load().await?;
        Ok(self.scheduler.replace_plan(programs).await)
    }

    /// Adds programs next to the current plan.
    pub async fn schedule(&self, programs: Vec<ProgramDescriptor>) -> ScheduleReport {
        self.scheduler.schedule(programs).await
    }

    /// Schedules a capture starting in a second, under a fresh program id.
    pub async fn add_one_shot_capture(
        &self,
        request: OneShotRequest,
    ) -> EngineResult<ProgramDescriptor> {
        let start = self.days.now() + ChronoDuration::seconds(ONE_SHOT_DELAY_SECS);
        let program = ProgramDescriptor {
            id: ProgramId::random(),
            title: request.title,
            stream_url: request.stream_url,
            start_epoch_sec: start.timestamp(),
            duration_seconds: request
                .duration_seconds
                .filter(|secs| *secs > 0)
                .unwrap_or(ONE_SHOT_DEFAULT_SECS),
            time_zone: request.time_zone.unwrap_or(Tz::UTC),
            recorder_parameters: request.recorder_parameters,
        };
        program.validate()?;

        let report = self.scheduler.schedule(vec![program.clone()]).await;
        if report.scheduled != 1 {
            return Err(EngineError::Scheduling {
                program_id: program.id.to_string(),
                reason: "one-shot capture could not be scheduled".to_string(),
            });
        }

        info!(
            "Added one-shot capture [{}] ({}) for {}s",
            program.title, program.id, program.duration_seconds
        );
        Ok(program)
    }

    pub async fn all_statuses(&self) -> BTreeMap<RecordingIdentity, RecordingStatus> {
        self.supervisor.all_statuses().await
    }

    pub async fn status_of(&self, identity: &RecordingIdentity) -> EngineResult<RecordingStatus> {
        self.supervisor.status_of(identity).await
    }

    /// Status of the latest recording session of a program.
    pub async fn status_of_program(
        &self,
        program_id: &ProgramId,
    ) -> EngineResult<(RecordingIdentity, RecordingStatus)> {
        let identity = self
            .supervisor
            .current_identity(program_id)
            .await
            .ok_or_else(|| EngineError::UnknownProgram {
                program_id: program_id.clone(),
            })?;
        let status = self.supervisor.status_of(&identity).await?;
        Ok((identity, status))
    }

    pub async fn chunks_of(&self, program_id: &ProgramId, day: LocalDay) -> EngineResult<Vec<PathBuf>> {
        self.supervisor.chunks_of(program_id, day).await
    }

    pub fn current_plan(&self) -> Vec<ProgramDescriptor> {
        self.scheduler.current_plan()
    }

    pub fn scheduled_triggers(&self) -> Vec<ScheduledTrigger> {
        self.scheduler.scheduled_triggers()
    }

    pub fn scheduled_program_ids(&self) -> BTreeSet<ProgramId> {
        self.scheduler.scheduled_program_ids().into_iter().collect()
    }

    /// Cancels pending triggers and stops every running capture.
    pub async fn shutdown(&self) -> Vec<(RecordingIdentity, RecordingState)> {
        self.scheduler.shutdown();
        let stopped = self.supervisor.stop_all().await;
        info!("Engine stopped ({} captures closed)", stopped.len());
        stopped
    }
}
