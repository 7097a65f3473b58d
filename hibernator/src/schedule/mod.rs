//! Off-hour schedule evaluation
//!
//! Turns human-written off-hour windows into a precise notion of "what state should
//! this plan be in right now" and "when is the next transition".
//!
//! # Windows
//!
//! ```toml
//! [schedule]
//! timezone = "Europe/Berlin"
//!
//! [[schedule.off_hours]]
//! start = "20:00"
//! end = "06:00"          # earlier than start: the window spans midnight
//! days_of_week = ["Mon", "Tue", "Wed", "Thu", "Fri"]
//! ```
//!
//! Times are local wall-clock times in the schedule's timezone, so the absolute instant
//! of a window moves when daylight saving time starts or ends.
//!
//! # Exceptions
//!
//! The evaluator itself is pure and always reports the schedule-implied state. Time-bound
//! overrides are layered on top by [`exceptions::resolve`].

pub mod evaluator;
pub mod exceptions;

pub use evaluator::{evaluate, CompiledSchedule};
pub use exceptions::{ExceptionResolution, ExceptionType, ScheduleException};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recurring local-time interval during which targets should be hibernated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OffHourWindow {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub days_of_week: Vec<String>,
}

impl OffHourWindow {
    pub fn new(start: &str, end: &str, days: &[&str]) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
            days_of_week: days.iter().map(|d| d.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub timezone: String,
    #[serde(default)]
    pub off_hours: Vec<OffHourWindow>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScheduleState {
    Active,
    Hibernating,
}

/// Result of one evaluation. Never mutated after it is produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub current_state: ScheduleState,
    /// `None` only when no window ever fires
    pub next_hibernate_time: Option<DateTime<Utc>>,
    pub next_wake_up_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Hibernate,
    WakeUp,
}

/// One entry of a schedule preview
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEvent {
    pub kind: TriggerKind,
    pub at: DateTime<Utc>,
}
