use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::Executor;
use crate::errors::ExecutorError;

/// Executors by type name. Built once at startup and passed to the orchestrator.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for `executor_type`, replacing any previous one
    pub fn register(&mut self, executor_type: &str, executor: Arc<dyn Executor>) -> &mut Self {
        if self
            .executors
            .insert(executor_type.to_string(), executor)
            .is_some()
        {
            debug!("Replaced executor for type {}", executor_type);
        }
        self
    }

    pub fn get(&self, executor_type: &str) -> Result<Arc<dyn Executor>, ExecutorError> {
        self.executors
            .get(executor_type)
            .cloned()
            .ok_or_else(|| ExecutorError::NotRegistered {
                executor: executor_type.to_string(),
            })
    }

    pub fn contains(&self, executor_type: &str) -> bool {
        self.executors.contains_key(executor_type)
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }
}
