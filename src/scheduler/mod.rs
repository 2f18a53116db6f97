//! Turns the capture planning into timed PENDING_INIT, START and STOP actions.
//!
//! Each program gets its own tasks: one for PENDING_INIT (recurring at local
//! midnight when its first occurrence had already passed) and one running
//! START then STOP in sequence. Programs never wait on each other.

pub mod trigger;

pub use trigger::{plan_for, PlanOutcome, ScheduledTrigger, TriggerKind, TriggerPlan};

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::CaptureControl;
use crate::clock::{day_of, next_local_midnight, DayResolver, LocalDay};
use crate::error::EngineError;
use crate::program::{ProgramDescriptor, ProgramId, RecordingIdentity};

/// Longest single sleep before the clock is read again.
const MAX_SLEEP_SLICE: Duration = Duration::from_secs(30);

/// Outcome of placing a batch of programs on the schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub scheduled: usize,
    pub already_aired: usize,
    pub rejected: usize,
}

/// Upcoming triggers, keyed by the task slot that owns them.
#[derive(Debug, Default)]
struct TriggerBoard {
    entries: Mutex<BTreeMap<(u64, TriggerKind), ScheduledTrigger>>,
}

impl TriggerBoard {
    fn set(&self, slot: u64, trigger: ScheduledTrigger) {
        self.lock().insert((slot, trigger.kind), trigger);
    }

    fn remove(&self, slot: u64, kind: TriggerKind) {
        self.lock().remove(&(slot, kind));
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn snapshot(&self) -> Vec<ScheduledTrigger> {
        let mut triggers: Vec<_> = self.lock().values().cloned().collect();
        triggers.sort_by(|a, b| (a.fire_at, a.kind).cmp(&(b.fire_at, b.kind)));
        triggers
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(u64, TriggerKind), ScheduledTrigger>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
struct CurrentPlan {
    token: CancellationToken,
    programs: Vec<ProgramDescriptor>,
}

pub struct RecordingScheduler {
    capture: Arc<dyn CaptureControl>,
    days: DayResolver,
    board: Arc<TriggerBoard>,
    plan: Mutex<CurrentPlan>,
    next_slot: AtomicU64,
}

impl RecordingScheduler {
    pub fn new(capture: Arc<dyn CaptureControl>, days: DayResolver) -> Self {
        Self {
            capture,
            days,
            board: Arc::new(TriggerBoard::default()),
            plan: Mutex::new(CurrentPlan {
                token: CancellationToken::new(),
                programs: Vec::new(),
            }),
            next_slot: AtomicU64::new(0),
        }
    }

    /// Adds programs to the current plan.
    pub async fn schedule(&self, programs: Vec<ProgramDescriptor>) -> ScheduleReport {
        let token = self.lock_plan().token.clone();
        let mut report = ScheduleReport::default();

        for program in programs {
            if self.is_planned(&program.id) {
                let duplicate = EngineError::Scheduling {
                    program_id: program.id.to_string(),
                    reason: "program is already in the current plan".to_string(),
                };
                error!("{}", duplicate);
                report.rejected += 1;
                continue;
            }

            let now = self.days.now();
            let plan = match plan_for(&program, now) {
                Ok(PlanOutcome::Planned(plan)) => plan,
                Ok(PlanOutcome::AlreadyAired { ended_at }) => {
                    info!(
                        "Program [{}] ({}) already aired, ended at {}",
                        program.title, program.id, ended_at
                    );
                    report.already_aired += 1;
                    continue;
                }
                Err(e) => {
                    error!("{}", e);
                    report.rejected += 1;
                    continue;
                }
            };

            if plan.recurring_init {
                let identity = RecordingIdentity::new(
                    program.id.clone(),
                    day_of(now, program.time_zone),
                );
                if let Err(e) = self.capture.prepare(&program, &identity).await {
                    error!("Failed to prepare {}: {}", identity, e);
                }
            }

            self.spawn_program(plan, token.clone());
            self.lock_plan().programs.push(program);
            report.scheduled += 1;
        }

        info!(
            "Scheduled {} programs ({} already aired, {} rejected)",
            report.scheduled, report.already_aired, report.rejected
        );
        report
    }

    /// Cancels every pending trigger of the current plan, then schedules `programs`.
    pub async fn replace_plan(&self, programs: Vec<ProgramDescriptor>) -> ScheduleReport {
        {
            let mut plan = self.lock_plan();
            plan.token.cancel();
            plan.token = CancellationToken::new();
            plan.programs.clear();
        }
        self.board.clear();
        info!("Previous capture plan superseded");
        self.schedule(programs).await
    }

    /// Upcoming triggers ordered by fire instant.
    pub fn scheduled_triggers(&self) -> Vec<ScheduledTrigger> {
        self.board.snapshot()
    }

    /// Programs that still have a START or STOP ahead.
    pub fn scheduled_program_ids(&self) -> Vec<ProgramId> {
        let mut ids: Vec<ProgramId> = self
            .board
            .snapshot()
            .into_iter()
            .filter(|trigger| trigger.kind != TriggerKind::PendingInit)
            .map(|trigger| trigger.program.id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn current_plan(&self) -> Vec<ProgramDescriptor> {
        self.lock_plan().programs.clone()
    }

    /// Cancels all pending triggers. Captures already running are left to the supervisor.
    pub fn shutdown(&self) {
        self.lock_plan().token.cancel();
        self.board.clear();
        debug!("Scheduler shut down");
    }

    fn is_planned(&self, program_id: &ProgramId) -> bool {
        self.lock_plan()
            .programs
            .iter()
            .any(|program| &program.id == program_id)
    }

    fn lock_plan(&self) -> std::sync::MutexGuard<'_, CurrentPlan> {
        self.plan.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_program(&self, plan: TriggerPlan, token: CancellationToken) {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let task = ProgramTask {
            slot,
            plan,
            capture: Arc::clone(&self.capture),
            days: self.days.clone(),
            board: Arc::clone(&self.board),
            token,
        };

        task.post_initial();
        tokio::spawn(task.clone().run_pending_init());
        tokio::spawn(task.run_capture());
    }
}

#[derive(Clone)]
struct ProgramTask {
    slot: u64,
    plan: TriggerPlan,
    capture: Arc<dyn CaptureControl>,
    days: DayResolver,
    board: Arc<TriggerBoard>,
    token: CancellationToken,
}

impl ProgramTask {
    fn post(&self, kind: TriggerKind, fire_at: DateTime<Utc>) {
        self.board.set(
            self.slot,
            ScheduledTrigger {
                kind,
                fire_at,
                program: self.plan.program.clone(),
            },
        );
    }

    /// Makes the whole plan visible before any task had a chance to run.
    fn post_initial(&self) {
        self.post(TriggerKind::PendingInit, self.plan.pending_init);
        self.post(TriggerKind::Start, self.plan.start);
        self.post(TriggerKind::Stop, self.plan.stop);
    }

    /// Sleeps until the clock reaches `fire_at`. False when the plan was
    /// superseded first.
    async fn wait_until(&self, fire_at: DateTime<Utc>) -> bool {
        loop {
            let remaining = (fire_at - self.days.now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                return !self.token.is_cancelled();
            }

            // Wall clock steps and suspends are caught at the next slice.
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return false,
                _ = tokio::time::sleep(remaining.min(MAX_SLEEP_SLICE)) => {}
            }
        }
    }

    /// Broadcast day of a trigger that fired for `fire_at`.
    fn fired_day(&self, fire_at: DateTime<Utc>) -> LocalDay {
        day_of(self.days.now().max(fire_at), self.plan.program.time_zone)
    }

    async fn run_pending_init(self) {
        let program = &self.plan.program;
        let mut fire_at = self.plan.pending_init;

        loop {
            self.post(TriggerKind::PendingInit, fire_at);
            if !self.wait_until(fire_at).await {
                self.board.remove(self.slot, TriggerKind::PendingInit);
                return;
            }

            let identity = RecordingIdentity::new(program.id.clone(), self.fired_day(fire_at));
            debug!("PENDING_INIT fired for {}", identity);
            if let Err(e) = self.capture.prepare(program, &identity).await {
                error!("Failed to prepare {}: {}", identity, e);
            }

            if !self.plan.recurring_init {
                self.board.remove(self.slot, TriggerKind::PendingInit);
                return;
            }
            fire_at = next_local_midnight(self.days.now().max(fire_at), program.time_zone);
        }
    }

    async fn run_capture(self) {
        let program = &self.plan.program;

        if !self.wait_until(self.plan.start).await {
            self.board.remove(self.slot, TriggerKind::Start);
            self.board.remove(self.slot, TriggerKind::Stop);
            return;
        }
        self.board.remove(self.slot, TriggerKind::Start);

        let identity = RecordingIdentity::new(program.id.clone(), self.fired_day(self.plan.start));
        let started_at = self.days.now().max(self.plan.start);
        let remaining_millis = (self.plan.stop - started_at).num_milliseconds().max(0) as u64;
        let duration = Duration::from_secs(remaining_millis.div_ceil(1000));

        if duration.is_zero() {
            warn!("START for {} fired after the program ended", identity);
        } else {
            let state = self.capture.start(program, &identity, duration).await;
            info!(
                "START of [{}] as {}: {}",
                program.title,
                identity,
                state.as_str()
            );
        }

        if !self.wait_until(self.plan.stop).await {
            self.board.remove(self.slot, TriggerKind::Stop);
            return;
        }
        self.board.remove(self.slot, TriggerKind::Stop);

        match self.capture.stop(&identity).await {
            Ok(state) => info!(
                "STOP of [{}] as {}: {}",
                program.title,
                identity,
                state.as_str()
            ),
            Err(e) if e.is_not_found() => info!("STOP for {}: nothing to stop", identity),
            Err(e) => error!("STOP for {} failed: {}", identity, e),
        }
    }
}
