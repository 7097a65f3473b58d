//! Time-bound schedule overrides
//!
//! Exceptions never change what the evaluator reports for a schedule. They change which
//! windows are evaluated (`Extend`, `Replace`) or veto hibernation outright (`Suspend`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::evaluator::CompiledSchedule;
use super::{EvaluationResult, OffHourWindow, Schedule, ScheduleState};
use crate::errors::ConfigurationError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionType {
    /// Add windows on top of the base schedule
    Extend,
    /// Keep targets running while inside the exception windows
    Suspend,
    /// Use the exception windows instead of the base schedule
    Replace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleException {
    pub name: String,
    #[serde(rename = "type")]
    pub exception_type: ExceptionType,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// For `Suspend`, an empty list suspends for the whole validity period
    #[serde(default)]
    pub windows: Vec<OffHourWindow>,
}

impl ScheduleException {
    #[inline]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now < self.valid_until
    }
}

/// What plan status records about an exception in force
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExceptionReference {
    pub name: String,
    #[serde(rename = "type")]
    pub exception_type: ExceptionType,
    pub valid_until: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionResolution {
    /// State the plan should be in once exceptions are applied
    pub desired_state: ScheduleState,
    /// Evaluator output for the effective windows
    pub evaluation: EvaluationResult,
    pub active: Vec<ExceptionReference>,
    /// Name of the suspend exception currently vetoing hibernation
    pub suspended_by: Option<String>,
}

/// Check every exception for consistency, active or not
pub fn validate(
    schedule: &Schedule,
    exceptions: &[ScheduleException],
) -> Result<(), ConfigurationError> {
    for exception in exceptions {
        if exception.valid_until <= exception.valid_from {
            return Err(ConfigurationError::InvalidValue {
                field: format!("exceptions.{}.valid_until", exception.name),
                reason: "must be after valid_from".to_string(),
            });
        }
        CompiledSchedule::compile_windows(&schedule.timezone, &exception.windows)?;
    }
    Ok(())
}

pub fn resolve(
    schedule: &Schedule,
    exceptions: &[ScheduleException],
    now: DateTime<Utc>,
) -> Result<ExceptionResolution, ConfigurationError> {
    validate(schedule, exceptions)?;

    let active: Vec<&ScheduleException> = exceptions.iter().filter(|e| e.is_active(now)).collect();

    let replacement = active
        .iter()
        .filter(|e| e.exception_type == ExceptionType::Replace)
        .max_by_key(|e| e.valid_from);

    let mut windows = match replacement {
        Some(replace) => replace.windows.clone(),
        None => schedule.off_hours.clone(),
    };
    windows.extend(
        active
            .iter()
            .filter(|e| e.exception_type == ExceptionType::Extend)
            .flat_map(|e| e.windows.iter().cloned()),
    );

    let effective = CompiledSchedule::compile_windows(&schedule.timezone, &windows)?;
    let evaluation = effective.evaluate(now);

    let mut suspended_by = None;
    for exception in active.iter().filter(|e| e.exception_type == ExceptionType::Suspend) {
        let inside = if exception.windows.is_empty() {
            true
        } else {
            CompiledSchedule::compile_windows(&schedule.timezone, &exception.windows)?
                .is_hibernating(now)
        };
        if inside {
            suspended_by = Some(exception.name.clone());
            break;
        }
    }

    let desired_state = if suspended_by.is_some() {
        ScheduleState::Active
    } else {
        evaluation.current_state
    };

    Ok(ExceptionResolution {
        desired_state,
        evaluation,
        active: active
            .iter()
            .map(|e| ExceptionReference {
                name: e.name.clone(),
                exception_type: e.exception_type,
                valid_until: e.valid_until,
            })
            .collect(),
        suspended_by,
    })
}
