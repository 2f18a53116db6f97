//! Trigger placement for one program, as a pure function of the clock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::clock::{day_of, local_midnight, next_local_midnight};
use crate::error::EngineError;
use crate::program::ProgramDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKind {
    PendingInit,
    Start,
    Stop,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::PendingInit => "PENDING_INIT",
            TriggerKind::Start => "START",
            TriggerKind::Stop => "STOP",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An upcoming trigger of the current plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledTrigger {
    pub kind: TriggerKind,
    pub fire_at: DateTime<Utc>,
    pub program: ProgramDescriptor,
}

/// Where the triggers of one program land.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerPlan {
    pub program: ProgramDescriptor,
    /// First PENDING_INIT.
    pub pending_init: DateTime<Utc>,
    /// Set when the start day's midnight had already passed: the PENDING_INIT
    /// then repeats every local midnight and today is prepared right away.
    pub recurring_init: bool,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    /// Length of the capture when it starts at `start`.
    pub capture_duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    /// The program ended before `now`.
    AlreadyAired { ended_at: DateTime<Utc> },
    Planned(TriggerPlan),
}

/// Places the PENDING_INIT, START and STOP triggers of `program` relative to `now`.
///
/// A program already on air is joined mid-flight: START fires now for the
/// remaining time, STOP still fires at the scheduled end.
pub fn plan_for(program: &ProgramDescriptor, now: DateTime<Utc>) -> Result<PlanOutcome, EngineError> {
    program.validate()?;

    let out_of_range = || EngineError::Scheduling {
        program_id: program.id.to_string(),
        reason: "start time or duration is out of range".to_string(),
    };
    let scheduled_start = program.start().ok_or_else(out_of_range)?;
    let end = program.end().ok_or_else(out_of_range)?;

    if end <= now {
        return Ok(PlanOutcome::AlreadyAired { ended_at: end });
    }

    let start = scheduled_start.max(now);
    let capture_duration = (end - start).to_std().map_err(|_| out_of_range())?;

    let tz = program.time_zone;
    let start_day_midnight = local_midnight(day_of(scheduled_start, tz), tz);
    let (pending_init, recurring_init) = if start_day_midnight > now {
        (start_day_midnight, false)
    } else {
        (next_local_midnight(now, tz), true)
    };

    Ok(PlanOutcome::Planned(TriggerPlan {
        program: program.clone(),
        pending_init,
        recurring_init,
        start,
        stop: end,
        capture_duration,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::sample_program;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn planned(outcome: PlanOutcome) -> TriggerPlan {
        match outcome {
            PlanOutcome::Planned(plan) => plan,
            other => panic!("expected a plan, got {:?}", other),
        }
    }

    #[test]
    fn test_already_aired_is_skipped() {
        let now = at("2023-07-16T12:00:00Z");
        let program = sample_program("p1", at("2023-07-16T10:00:00Z").timestamp(), 3600);

        let outcome = plan_for(&program, now).unwrap();
        assert_eq!(
            outcome,
            PlanOutcome::AlreadyAired {
                ended_at: at("2023-07-16T11:00:00Z")
            }
        );
    }

    #[test]
    fn test_mid_flight_join_keeps_scheduled_end() {
        let now = at("2023-07-16T12:00:00Z");
        let program = sample_program("p1", at("2023-07-16T11:00:00Z").timestamp(), 7200);

        let plan = planned(plan_for(&program, now).unwrap());
        assert_eq!(plan.start, now);
        assert_eq!(plan.stop, at("2023-07-16T13:00:00Z"));
        assert_eq!(plan.capture_duration, Duration::from_secs(3600));
    }

    #[test]
    fn test_future_program_on_a_later_day() {
        let now = at("2023-07-16T12:00:00Z");
        let program = sample_program("p1", at("2023-07-18T06:00:00Z").timestamp(), 1200);

        let plan = planned(plan_for(&program, now).unwrap());
        // Local midnight of 2023-07-18 in Paris (UTC+2)
        assert_eq!(plan.pending_init, at("2023-07-17T22:00:00Z"));
        assert!(!plan.recurring_init);
        assert_eq!(plan.start, at("2023-07-18T06:00:00Z"));
        assert_eq!(plan.stop, at("2023-07-18T06:20:00Z"));
        assert_eq!(plan.capture_duration, Duration::from_secs(1200));
    }

    #[test]
    fn test_elapsed_midnight_rolls_and_recurs() {
        let now = at("2023-07-16T12:00:00Z");
        let program = sample_program("p1", at("2023-07-16T15:00:00Z").timestamp(), 600);

        let plan = planned(plan_for(&program, now).unwrap());
        assert!(plan.recurring_init);
        assert_eq!(plan.pending_init, at("2023-07-16T22:00:00Z"));
        assert_eq!(plan.start, at("2023-07-16T15:00:00Z"));
    }

    #[test]
    fn test_midnight_uses_program_timezone() {
        let now = at("2023-07-16T12:00:00Z");
        let mut program = sample_program("p1", at("2023-07-17T15:00:00Z").timestamp(), 600);
        program.time_zone = chrono_tz::America::New_York;

        let plan = planned(plan_for(&program, now).unwrap());
        assert_eq!(plan.pending_init, at("2023-07-17T04:00:00Z"));
    }

    #[test]
    fn test_malformed_program_is_a_scheduling_error() {
        let now = at("2023-07-16T12:00:00Z");
        let mut program = sample_program("p1", now.timestamp() + 60, 600);
        program.title = String::new();

        assert!(matches!(
            plan_for(&program, now),
            Err(EngineError::Scheduling { .. })
        ));
    }

    #[test]
    fn test_trigger_kind_names() {
        assert_eq!(TriggerKind::PendingInit.to_string(), "PENDING_INIT");
        assert_eq!(
            serde_json::to_string(&TriggerKind::Stop).unwrap(),
            "\"STOP\""
        );
    }
}
