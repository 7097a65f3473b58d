//! Plan aggregate: what to hibernate, when, and how far along the current cycle is
//!
//! A plan is stored as one document holding its spec, status and annotations. The spec
//! is written by configuration seeding, the status only by the controller, and the
//! annotations by operators (suspend, retry).

pub mod repository;

pub use repository::PlanRepository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::constants::plan::{DEFAULT_RETRIES, MAX_RETRIES};
use crate::errors::ConfigurationError;
use crate::schedule::exceptions::ExceptionReference;
use crate::schedule::{Schedule, ScheduleException};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Operation {
    Shutdown,
    WakeUp,
}

impl Operation {
    /// Phase while a cycle of this operation runs
    pub fn in_progress_phase(self) -> PlanPhase {
        match self {
            Operation::Shutdown => PlanPhase::Hibernating,
            Operation::WakeUp => PlanPhase::WakingUp,
        }
    }

    /// Phase after a cycle of this operation finishes
    pub fn completed_phase(self) -> PlanPhase {
        match self {
            Operation::Shutdown => PlanPhase::Hibernated,
            Operation::WakeUp => PlanPhase::Active,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Shutdown => write!(f, "shutdown"),
            Operation::WakeUp => write!(f, "wakeup"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlanPhase {
    #[default]
    Active,
    Hibernating,
    Hibernated,
    WakingUp,
    Error,
    Suspended,
}

impl PlanPhase {
    #[inline]
    pub fn is_in_progress(self) -> bool {
        matches!(self, PlanPhase::Hibernating | PlanPhase::WakingUp)
    }

    /// Operation a cycle in this phase is running
    pub fn running_operation(self) -> Option<Operation> {
        match self {
            PlanPhase::Hibernating => Some(Operation::Shutdown),
            PlanPhase::WakingUp => Some(Operation::WakeUp),
            _ => None,
        }
    }
}

impl fmt::Display for PlanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyType {
    Sequential,
    #[default]
    Parallel,
    Dependency,
}

/// `from` must be awake before `to` wakes up, and `to` must be down before `from`
/// shuts down
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dependency {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExecutionStrategy {
    #[serde(rename = "type", default)]
    pub strategy_type: StrategyType,
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BehaviorMode {
    /// A failed target blocks its dependents and fails the cycle
    #[default]
    Strict,
    /// Failures are reported but do not block dependents or the phase change
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Behavior {
    #[serde(default)]
    pub mode: BehaviorMode,
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Manual retries restart `attempts` at zero instead of accumulating
    #[serde(default)]
    pub reset_attempts_on_retry: bool,
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            mode: BehaviorMode::Strict,
            retries: DEFAULT_RETRIES,
            reset_attempts_on_retry: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub name: String,
    #[serde(rename = "type")]
    pub target_type: String,
    pub connector_ref: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanSpec {
    pub schedule: Schedule,
    #[serde(default)]
    pub exceptions: Vec<ScheduleException>,
    #[serde(default)]
    pub behavior: Behavior,
    #[serde(default)]
    pub execution: ExecutionStrategy,
    pub targets: Vec<Target>,
    #[serde(default)]
    pub suspend: bool,
}

impl PlanSpec {
    /// Structural checks that do not need the schedule or the dependency graph
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut seen = HashSet::with_capacity(self.targets.len());
        for target in &self.targets {
            if !is_valid_name(&target.name) {
                return Err(ConfigurationError::InvalidValue {
                    field: "targets.name".to_string(),
                    reason: format!(
                        "'{}' must be lowercase alphanumerics and '-', at most 63 characters",
                        target.name
                    ),
                });
            }
            if !seen.insert(target.name.as_str()) {
                return Err(ConfigurationError::InvalidValue {
                    field: "targets.name".to_string(),
                    reason: format!("duplicate target '{}'", target.name),
                });
            }
        }

        if self.behavior.retries > MAX_RETRIES {
            return Err(ConfigurationError::InvalidValue {
                field: "behavior.retries".to_string(),
                reason: format!("{} exceeds the limit of {}", self.behavior.retries, MAX_RETRIES),
            });
        }

        if self.execution.max_concurrency == Some(0) {
            return Err(ConfigurationError::InvalidValue {
                field: "execution.max_concurrency".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Names become store keys: lowercase alphanumerics and '-', no leading or trailing '-'
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetExecution {
    pub target: String,
    pub state: ExecutionState,
    pub attempts: u32,
    pub message: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TargetExecution {
    pub fn pending(target: &str) -> Self {
        Self {
            target: target.to_string(),
            state: ExecutionState::Pending,
            attempts: 0,
            message: String::new(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleSummary {
    pub cycle_id: String,
    pub operation: Operation,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
    pub completed_targets: usize,
    pub failed_targets: usize,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanStatus {
    pub phase: PlanPhase,
    /// Phase to return to after a suspension or a configuration error clears
    pub resume_phase: Option<PlanPhase>,
    #[serde(default)]
    pub config_invalid: bool,
    pub current_cycle_id: Option<String>,
    pub current_operation: Option<Operation>,
    pub cycle_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    pub error_message: Option<String>,
    #[serde(default)]
    pub executions: Vec<TargetExecution>,
    #[serde(default)]
    pub execution_history: Vec<CycleSummary>,
    #[serde(default)]
    pub active_exceptions: Vec<ExceptionReference>,
    pub next_hibernate_time: Option<DateTime<Utc>>,
    pub next_wake_up_time: Option<DateTime<Utc>>,
    pub last_reconciled_at: Option<DateTime<Utc>>,
}

impl PlanStatus {
    pub fn execution(&self, target: &str) -> Option<&TargetExecution> {
        self.executions.iter().find(|e| e.target == target)
    }

    pub fn all_completed(&self) -> bool {
        self.executions
            .iter()
            .all(|e| e.state == ExecutionState::Completed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanMetadata {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub resource_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub metadata: PlanMetadata,
    pub spec: PlanSpec,
    pub status: PlanStatus,
}

impl Plan {
    pub fn key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    pub fn target_names(&self) -> Vec<String> {
        self.spec.targets.iter().map(|t| t.name.clone()).collect()
    }
}
