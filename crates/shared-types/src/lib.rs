//! Domain types shared by the slot watcher crates.
//!
//! Everything in here is plain data: identifiers, watch rules, observed slots
//! and the durable state records keyed by [`SlotKey`]. No I/O happens here.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

mod time_of_day;

pub use time_of_day::{TimeOfDay, TimeWindow};

/// Errors produced while parsing or constructing domain values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid time of day '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("invalid weekday '{0}', use one of: {1}")]
    InvalidWeekday(String, &'static str),

    #[error("invalid slot key '{0}', expected target|YYYY-MM-DD|HH:MM")]
    InvalidSlotKey(String),

    #[error("time_from {from} must be before time_to {to}")]
    InvalidWindow { from: TimeOfDay, to: TimeOfDay },

    #[error("horizon must cover at least one week, got {0}")]
    InvalidHorizon(u32),

    #[error("a watch rule needs at least one target")]
    EmptyTargets,
}

/// Opaque identifier of a watched facility
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        TargetId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        TargetId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

const WEEKDAY_NAMES: &str = "monday, tuesday, wednesday, thursday, friday, saturday, sunday";

impl Weekday {
    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        }
    }

    /// Capitalized name for user-facing messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
            Weekday::Sunday => "Sunday",
        }
    }
}

impl FromStr for Weekday {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monday" => Ok(Weekday::Monday),
            "tuesday" => Ok(Weekday::Tuesday),
            "wednesday" => Ok(Weekday::Wednesday),
            "thursday" => Ok(Weekday::Thursday),
            "friday" => Ok(Weekday::Friday),
            "saturday" => Ok(Weekday::Saturday),
            "sunday" => Ok(Weekday::Sunday),
            _ => Err(ParseError::InvalidWeekday(s.to_string(), WEEKDAY_NAMES)),
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Weekday {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Weekday {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<Weekday> for chrono::Weekday {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Monday => chrono::Weekday::Mon,
            Weekday::Tuesday => chrono::Weekday::Tue,
            Weekday::Wednesday => chrono::Weekday::Wed,
            Weekday::Thursday => chrono::Weekday::Thu,
            Weekday::Friday => chrono::Weekday::Fri,
            Weekday::Saturday => chrono::Weekday::Sat,
            Weekday::Sunday => chrono::Weekday::Sun,
        }
    }
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

/// A user-defined filter describing which openings are worth a notification.
///
/// Construct through [`WatchRule::new`] so the window and horizon invariants
/// always hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchRule {
    targets: Vec<TargetId>,
    weekday: Weekday,
    window: TimeWindow,
    horizon_count: u32,
}

impl WatchRule {
    pub fn new(
        targets: Vec<TargetId>,
        weekday: Weekday,
        time_from: TimeOfDay,
        time_to: TimeOfDay,
        horizon_count: u32,
    ) -> Result<Self, ParseError> {
        if horizon_count < 1 {
            return Err(ParseError::InvalidHorizon(horizon_count));
        }
        let window = TimeWindow::new(time_from, time_to)?;

        // Keep declared order but drop repeated targets
        let mut unique: Vec<TargetId> = Vec::with_capacity(targets.len());
        for target in targets {
            if !unique.contains(&target) {
                unique.push(target);
            }
        }
        if unique.is_empty() {
            return Err(ParseError::EmptyTargets);
        }

        Ok(Self {
            targets: unique,
            weekday,
            window,
            horizon_count,
        })
    }

    pub fn targets(&self) -> &[TargetId] {
        &self.targets
    }

    pub fn weekday(&self) -> Weekday {
        self.weekday
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn horizon_count(&self) -> u32 {
        self.horizon_count
    }
}

/// One concrete unit of scraping work
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueryPoint {
    pub target: TargetId,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Booked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Booked => "booked",
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SlotStatus::Available)
    }
}

/// A classified time slot as reported by a slot source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub time: TimeOfDay,
    pub status: SlotStatus,
}

impl Slot {
    pub fn available(time: TimeOfDay) -> Self {
        Self {
            time,
            status: SlotStatus::Available,
        }
    }

    pub fn booked(time: TimeOfDay) -> Self {
        Self {
            time,
            status: SlotStatus::Booked,
        }
    }
}

/// Durable identity of one bookable unit: `(target, date, time)`.
///
/// Serialized as `target|YYYY-MM-DD|HH:MM` so it can be used as a JSON
/// object key in the persisted state document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub target: TargetId,
    pub date: NaiveDate,
    pub time: TimeOfDay,
}

impl SlotKey {
    pub fn new(target: TargetId, date: NaiveDate, time: TimeOfDay) -> Self {
        Self { target, date, time }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.target,
            self.date.format("%Y-%m-%d"),
            self.time
        )
    }
}

impl FromStr for SlotKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidSlotKey(s.to_string());

        // Split from the right so the target part is never cut short
        let mut parts = s.rsplitn(3, '|');
        let time = parts.next().ok_or_else(invalid)?;
        let date = parts.next().ok_or_else(invalid)?;
        let target = parts.next().filter(|t| !t.is_empty()).ok_or_else(invalid)?;

        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;
        let time = time.parse::<TimeOfDay>().map_err(|_| invalid())?;

        Ok(SlotKey::new(TargetId::new(target), date, time))
    }
}

impl Serialize for SlotKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Last known status of a slot key, plus when it was last notified about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub key: SlotKey,
    pub last_status: SlotStatus,
    pub last_notified_at: Option<DateTime<Utc>>,
}

/// Complete durable state, one record per slot key ever observed
pub type StateMap = BTreeMap<SlotKey, StateRecord>;

/// Extra context carried by a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetail {
    /// Watch window the slot fell into
    pub window: TimeWindow,
    /// Status recorded before this opening, `None` for a never-seen slot
    pub previous_status: Option<SlotStatus>,
}

/// A newly observed opening, consumed once by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub target: TargetId,
    pub date: NaiveDate,
    pub time: TimeOfDay,
    pub detail: EventDetail,
}

impl NotificationEvent {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.target.clone(), self.date, self.time)
    }
}
