//! Error types for the hibernation controller
//!
//! Every failure the core can produce falls into one of five classes, and each class has
//! its own recovery policy:
//!
//! - `Configuration`: fatal for the plan until the configuration changes, never retried
//! - `Executor`: retried per target up to `behavior.retries`
//! - `Store`: retried on the next reconciliation tick, not counted against retries
//! - `SizeExceeded`: fatal for that save, reported like an executor failure
//! - `Conflict`: retried internally by re-reading and redoing the operation

use std::fmt;

/// Main error type for the controller
#[derive(Debug)]
pub enum HibernatorError {
    /// Invalid schedule, dependency graph or plan definition
    Configuration(ConfigurationError),

    /// A target-level failure reported by an executor
    Executor(ExecutorError),

    /// Persistence transport or serialization failure
    Store(StoreError),

    /// Serialized payload is larger than the backing document can hold
    SizeExceeded { key: String, size: usize, limit: usize },

    /// Optimistic concurrency collision (or a busy plan)
    Conflict { key: String, reason: String },

    /// Other errors with context
    Other(String),
}

/// Configuration error variants
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// Timezone name could not be resolved
    InvalidTimezone { timezone: String },

    /// Day-of-week entry is not a weekday name
    InvalidDayOfWeek { day: String },

    /// Time of day is not HH:MM
    InvalidTimeOfDay { value: String },

    /// Dependency graph contains a cycle
    DependencyCycle { targets: Vec<String> },

    /// Dependency edge names a target that is not declared
    UnknownTarget { target: String },

    /// Any other invalid plan value
    InvalidValue { field: String, reason: String },
}

/// Executor error variants
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorError {
    /// No executor registered for the target type
    NotRegistered { executor: String },

    /// The executor call failed
    OperationFailed {
        target: String,
        operation: String,
        reason: String,
    },

    /// Captured state could not be persisted (too large)
    CaptureRejected { target: String, reason: String },
}

/// Store error variants
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Backend could not be reached or the query failed
    Transport { reason: String },

    /// Stored data could not be (de)serialized
    Serialization { key: String, reason: String },

    /// Update of a document that does not exist
    NotFound { key: String },
}

impl HibernatorError {
    pub fn conflict(key: impl Into<String>, reason: impl Into<String>) -> Self {
        HibernatorError::Conflict {
            key: key.into(),
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(self, HibernatorError::Conflict { .. })
    }

    #[inline]
    pub fn is_store(&self) -> bool {
        matches!(self, HibernatorError::Store(_))
    }
}

impl fmt::Display for HibernatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HibernatorError::Configuration(e) => write!(f, "Configuration error: {}", e),
            HibernatorError::Executor(e) => write!(f, "Executor error: {}", e),
            HibernatorError::Store(e) => write!(f, "Store error: {}", e),
            HibernatorError::SizeExceeded { key, size, limit } => write!(
                f,
                "Payload for '{}' is {} bytes, exceeding the {} byte limit",
                key, size, limit
            ),
            HibernatorError::Conflict { key, reason } => {
                write!(f, "Conflict on '{}': {}", key, reason)
            }
            HibernatorError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::InvalidTimezone { timezone } => {
                write!(f, "Unknown timezone '{}'", timezone)
            }
            ConfigurationError::InvalidDayOfWeek { day } => {
                write!(f, "Invalid day of week '{}'", day)
            }
            ConfigurationError::InvalidTimeOfDay { value } => {
                write!(f, "Invalid time of day '{}', expected HH:MM", value)
            }
            ConfigurationError::DependencyCycle { targets } => {
                write!(f, "Dependency cycle between targets: {}", targets.join(", "))
            }
            ConfigurationError::UnknownTarget { target } => {
                write!(f, "Dependency references undeclared target '{}'", target)
            }
            ConfigurationError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorError::NotRegistered { executor } => {
                write!(f, "No executor registered for type '{}'", executor)
            }
            ExecutorError::OperationFailed {
                target,
                operation,
                reason,
            } => write!(f, "{} failed on '{}': {}", operation, target, reason),
            ExecutorError::CaptureRejected { target, reason } => {
                write!(f, "Captured state for '{}' rejected: {}", target, reason)
            }
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Transport { reason } => write!(f, "Store unavailable: {}", reason),
            StoreError::Serialization { key, reason } => {
                write!(f, "Could not (de)serialize '{}': {}", key, reason)
            }
            StoreError::NotFound { key } => write!(f, "Document '{}' not found", key),
        }
    }
}

impl std::error::Error for HibernatorError {}
impl std::error::Error for ConfigurationError {}
impl std::error::Error for ExecutorError {}
impl std::error::Error for StoreError {}

// Executors and config loading speak anyhow
impl From<anyhow::Error> for HibernatorError {
    fn from(err: anyhow::Error) -> Self {
        HibernatorError::Other(err.to_string())
    }
}

impl From<ConfigurationError> for HibernatorError {
    fn from(err: ConfigurationError) -> Self {
        HibernatorError::Configuration(err)
    }
}

impl From<ExecutorError> for HibernatorError {
    fn from(err: ExecutorError) -> Self {
        HibernatorError::Executor(err)
    }
}

impl From<StoreError> for HibernatorError {
    fn from(err: StoreError) -> Self {
        HibernatorError::Store(err)
    }
}

impl From<sqlx::Error> for HibernatorError {
    fn from(err: sqlx::Error) -> Self {
        HibernatorError::Store(StoreError::Transport {
            reason: err.to_string(),
        })
    }
}

pub type Result<T> = std::result::Result<T, HibernatorError>;
