use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;

use super::{EvaluationResult, OffHourWindow, Schedule, ScheduleEvent, ScheduleState, TriggerKind};
use crate::constants::schedule::LOOKAHEAD_DAYS;
use crate::errors::ConfigurationError;

#[derive(Debug, Clone)]
struct CompiledWindow {
    start: NaiveTime,
    end: NaiveTime,
    days: Vec<Weekday>,
}

/// A recurring trigger: fires at `at` local time on every `weekday`
#[derive(Debug, Clone, PartialEq)]
struct TriggerRule {
    weekday: Weekday,
    at: NaiveTime,
}

/// A validated schedule with its hibernate and wake-up rules merged across windows
#[derive(Debug, Clone)]
pub struct CompiledSchedule {
    timezone: Tz,
    windows: Vec<CompiledWindow>,
    hibernate_rules: Vec<TriggerRule>,
    wake_rules: Vec<TriggerRule>,
}

/// Evaluate a schedule at `now`.
///
/// Fails when the timezone, a weekday, or a time of day cannot be parsed.
pub fn evaluate(
    schedule: &Schedule,
    now: DateTime<Utc>,
) -> Result<EvaluationResult, ConfigurationError> {
    Ok(CompiledSchedule::compile(schedule)?.evaluate(now))
}

impl CompiledSchedule {
    pub fn compile(schedule: &Schedule) -> Result<Self, ConfigurationError> {
        Self::compile_windows(&schedule.timezone, &schedule.off_hours)
    }

    pub fn compile_windows(
        timezone: &str,
        windows: &[OffHourWindow],
    ) -> Result<Self, ConfigurationError> {
        let timezone = parse_timezone(timezone)?;

        let mut compiled = Vec::with_capacity(windows.len());
        let mut hibernate_rules = Vec::new();
        let mut wake_rules = Vec::new();

        for window in windows {
            let start = parse_time_of_day(&window.start)?;
            let end = parse_time_of_day(&window.end)?;
            let days = window
                .days_of_week
                .iter()
                .map(|d| parse_weekday(d))
                .collect::<Result<Vec<_>, _>>()?;

            for day in &days {
                push_unique(&mut hibernate_rules, TriggerRule { weekday: *day, at: start });

                // A window ending before it starts wakes up on the following day
                let wake_day = if end < start { day.succ() } else { *day };
                push_unique(&mut wake_rules, TriggerRule { weekday: wake_day, at: end });
            }

            compiled.push(CompiledWindow { start, end, days });
        }

        Ok(Self {
            timezone,
            windows: compiled,
            hibernate_rules,
            wake_rules,
        })
    }

    pub fn evaluate(&self, now: DateTime<Utc>) -> EvaluationResult {
        let current_state = if self.is_hibernating(now) {
            ScheduleState::Hibernating
        } else {
            ScheduleState::Active
        };

        EvaluationResult {
            current_state,
            next_hibernate_time: self.next_trigger(TriggerKind::Hibernate, now),
            next_wake_up_time: self.next_trigger(TriggerKind::WakeUp, now),
        }
    }

    /// True when `now` falls inside the union of all `[start, end)` intervals
    pub fn is_hibernating(&self, now: DateTime<Utc>) -> bool {
        let today = now.with_timezone(&self.timezone).date_naive();

        self.windows.iter().any(|window| {
            if window.start == window.end {
                return false;
            }

            // An interval that began yesterday can still be open today
            (-1..=0).any(|offset| {
                let date = today + Duration::days(offset);
                if !window.days.contains(&date.weekday()) {
                    return false;
                }

                let end_date = if window.end < window.start {
                    date + Duration::days(1)
                } else {
                    date
                };

                match (
                    resolve_local(&self.timezone, date, window.start),
                    resolve_local(&self.timezone, end_date, window.end),
                ) {
                    (Some(start), Some(end)) => start <= now && now < end,
                    _ => false,
                }
            })
        })
    }

    /// Soonest occurrence of `kind` strictly after `after`
    pub fn next_trigger(&self, kind: TriggerKind, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let rules = match kind {
            TriggerKind::Hibernate => &self.hibernate_rules,
            TriggerKind::WakeUp => &self.wake_rules,
        };
        if rules.is_empty() {
            return None;
        }

        let today = after.with_timezone(&self.timezone).date_naive();
        let mut best: Option<DateTime<Utc>> = None;

        for offset in -1..=LOOKAHEAD_DAYS {
            let date = today + Duration::days(offset);
            for rule in rules.iter().filter(|r| r.weekday == date.weekday()) {
                if let Some(at) = resolve_local(&self.timezone, date, rule.at) {
                    if at > after && best.map_or(true, |b| at < b) {
                        best = Some(at);
                    }
                }
            }
        }

        best
    }

    /// Next `count` transitions after `after`, hibernate and wake-up interleaved in
    /// chronological order.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<ScheduleEvent> {
        let mut events = Vec::with_capacity(count);
        let mut next_hibernate = self.next_trigger(TriggerKind::Hibernate, after);
        let mut next_wake = self.next_trigger(TriggerKind::WakeUp, after);

        while events.len() < count {
            match (next_hibernate, next_wake) {
                (Some(h), w) if w.map_or(true, |w| h <= w) => {
                    events.push(ScheduleEvent { kind: TriggerKind::Hibernate, at: h });
                    next_hibernate = self.next_trigger(TriggerKind::Hibernate, h);
                }
                (_, Some(w)) => {
                    events.push(ScheduleEvent { kind: TriggerKind::WakeUp, at: w });
                    next_wake = self.next_trigger(TriggerKind::WakeUp, w);
                }
                _ => break,
            }
        }

        events
    }
}

fn push_unique(rules: &mut Vec<TriggerRule>, rule: TriggerRule) {
    if !rules.contains(&rule) {
        rules.push(rule);
    }
}

/// Map a local wall-clock time to an instant. Times inside a DST gap move forward one
/// hour; ambiguous times take the earlier instant.
fn resolve_local(tz: &Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = date.and_time(time);
    let local = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => tz.from_local_datetime(&(naive + Duration::hours(1))).earliest(),
    };
    local.map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn parse_timezone(name: &str) -> Result<Tz, ConfigurationError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ConfigurationError::InvalidTimezone {
            timezone: name.to_string(),
        })
}

fn parse_weekday(day: &str) -> Result<Weekday, ConfigurationError> {
    day.trim()
        .parse::<Weekday>()
        .map_err(|_| ConfigurationError::InvalidDayOfWeek { day: day.to_string() })
}

fn parse_time_of_day(value: &str) -> Result<NaiveTime, ConfigurationError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| ConfigurationError::InvalidTimeOfDay {
            value: value.to_string(),
        })
}
