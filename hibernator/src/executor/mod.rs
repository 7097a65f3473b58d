//! Pluggable executors that act on real resources
//!
//! Every target names an executor type. The orchestrator resolves it through the
//! [`ExecutorRegistry`] and drives the four calls below; executors are expected to be
//! idempotent because a cycle resumed after a restart may repeat a call.

pub mod http;
pub mod registry;

pub use http::HttpExecutor;
pub use registry::ExecutorRegistry;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::plan::{Operation, Target};

/// Identifies the cycle an executor call belongs to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContext {
    pub namespace: String,
    pub plan: String,
    pub cycle_id: String,
    pub operation: Operation,
}

/// Result of a state capture
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CapturedState {
    /// Whether the values were read from running resources
    pub is_live: bool,
    #[serde(default)]
    pub resources: BTreeMap<String, Value>,
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn shutdown(&self, ctx: &ExecutionContext, target: &Target) -> Result<()>;

    async fn wake_up(&self, ctx: &ExecutionContext, target: &Target) -> Result<()>;

    /// Read what is needed to bring the target back; called after a successful shutdown
    async fn capture_state(&self, ctx: &ExecutionContext, target: &Target) -> Result<CapturedState>;

    /// Hand previously captured state back before waking up
    async fn apply_state(
        &self,
        ctx: &ExecutionContext,
        target: &Target,
        state: &BTreeMap<String, Value>,
    ) -> Result<()>;
}
