//! Program descriptors and the identities of their recording sessions.

pub mod layout;

pub use layout::StorageLayout;

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::clock::LocalDay;
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramId(String);

impl ProgramId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One program to capture, as supplied by the planning source.
///
/// ```json
/// {
///     "uuid": "7bf97a79-9612-411d-966b-657b6d77443e",
///     "title": "France Inter",
///     "streamURL": "http://direct.franceinter.fr/live/franceinter-midfi.mp3",
///     "startTimeUTCEpochSec": 1761605906,
///     "durationSeconds": 1200,
///     "timeZone": "Europe/Paris",
///     "recorderSpecificParameters": {}
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramDescriptor {
    #[serde(rename = "uuid")]
    pub id: ProgramId,
    pub title: String,
    #[serde(rename = "streamURL")]
    pub stream_url: String,
    #[serde(rename = "startTimeUTCEpochSec")]
    pub start_epoch_sec: i64,
    #[serde(rename = "durationSeconds")]
    pub duration_seconds: u64,
    #[serde(rename = "timeZone")]
    pub time_zone: Tz,
    #[serde(rename = "recorderSpecificParameters")]
    pub recorder_parameters: BTreeMap<String, String>,
}

impl ProgramDescriptor {
    pub fn start(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.start_epoch_sec, 0).single()
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        let duration = Duration::try_seconds(i64::try_from(self.duration_seconds).ok()?)?;
        self.start()?.checked_add_signed(duration)
    }

    /// Checks the fields the scheduler relies on.
    pub fn validate(&self) -> Result<(), EngineError> {
        let reason = if self.id.as_str().trim().is_empty() {
            Some("program id is empty")
        } else if self.title.trim().is_empty() {
            Some("title is empty")
        } else if self.stream_url.trim().is_empty() {
            Some("stream URL is empty")
        } else if self.duration_seconds == 0 {
            Some("duration must be positive")
        } else if self.end().is_none() {
            Some("start time or duration is out of range")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(EngineError::Scheduling {
                program_id: self.id.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// One broadcast-day capture session of a program.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordingIdentity {
    pub program_id: ProgramId,
    pub day: LocalDay,
}

impl RecordingIdentity {
    pub fn new(program_id: ProgramId, day: LocalDay) -> Self {
        Self { program_id, day }
    }
}

impl fmt::Display for RecordingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec-{}-{}", self.program_id, self.day)
    }
}

#[cfg(test)]
pub(crate) fn sample_program(id: &str, start_epoch_sec: i64, duration_seconds: u64) -> ProgramDescriptor {
    ProgramDescriptor {
        id: ProgramId::new(id),
        title: "France Inter".to_string(),
        stream_url: "http://direct.franceinter.fr/live/franceinter-midfi.mp3".to_string(),
        start_epoch_sec,
        duration_seconds,
        time_zone: chrono_tz::Europe::Paris,
        recorder_parameters: BTreeMap::new(),
    }
}
