//! Time sources and broadcast-day resolution.
//!
//! Every "now" in the engine goes through a [`Clock`] so tests can freeze or
//! move time. [`DayResolver`] turns that clock into the calendar day of a
//! program's own timezone, which keys one recording session.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const DAY_KEY_FORMAT: &str = "%Y%m%d";

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the computer clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Calendar day in a program's timezone, ordered and displayed as `YYYYMMDD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocalDay(NaiveDate);

impl LocalDay {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0.succ_opt().unwrap_or(self.0))
    }
}

impl fmt::Display for LocalDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DAY_KEY_FORMAT))
    }
}

impl FromStr for LocalDay {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, DAY_KEY_FORMAT).map(Self)
    }
}

impl TryFrom<String> for LocalDay {
    type Error = chrono::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LocalDay> for String {
    fn from(day: LocalDay) -> Self {
        day.to_string()
    }
}

/// Computes broadcast days from the injected clock.
#[derive(Clone)]
pub struct DayResolver {
    clock: Arc<dyn Clock>,
}

impl DayResolver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The calendar day it currently is in `tz`.
    pub fn today(&self, tz: Tz) -> LocalDay {
        day_of(self.clock.now(), tz)
    }
}

impl fmt::Debug for DayResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DayResolver")
            .field("now", &self.clock.now())
            .finish()
    }
}

/// Calendar day of `instant` as seen in `tz`.
pub fn day_of(instant: DateTime<Utc>, tz: Tz) -> LocalDay {
    LocalDay(instant.with_timezone(&tz).date_naive())
}

/// First instant of `day` in `tz`.
///
/// Where a DST change skips local midnight, the first valid local time of the
/// day is used. An ambiguous midnight resolves to its earliest occurrence.
pub fn local_midnight(day: LocalDay, tz: Tz) -> DateTime<Utc> {
    let start = day.0.and_time(chrono::NaiveTime::MIN);
    (0..24 * 4)
        .map(|quarter| start + Duration::minutes(15 * quarter))
        .find_map(|local| tz.from_local_datetime(&local).earliest())
        .map(|instant| instant.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&start))
}

/// The first local midnight in `tz` strictly after `after`.
pub fn next_local_midnight(after: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let mut day = day_of(after, tz).next();
    loop {
        let midnight = local_midnight(day, tz);
        if midnight > after {
            return midnight;
        }
        day = day.next();
    }
}
