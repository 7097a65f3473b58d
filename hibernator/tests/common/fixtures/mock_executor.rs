//! Scriptable in-process executor
//!
//! Records every call, counts how many calls overlap, and fails on demand.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use hibernator::executor::{CapturedState, ExecutionContext, Executor};
use hibernator::plan::Target;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub target: String,
    pub action: String,
    pub cycle_id: String,
}

#[derive(Default)]
struct Script {
    /// (target, action) -> remaining failures; u32::MAX fails forever
    failures: HashMap<(String, String), u32>,
    captures: HashMap<String, CapturedState>,
}

#[derive(Clone)]
pub struct MockExecutor {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    applied: Arc<Mutex<Vec<(String, BTreeMap<String, Value>)>>>,
    script: Arc<Mutex<Script>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    delay: Duration,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(0))
    }

    /// Each call sleeps for `delay`, so overlapping calls can be observed
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            applied: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(Script::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            delay,
        }
    }

    /// Fail the next `times` calls of `action` on `target`
    pub fn fail(&self, target: &str, action: &str, times: u32) {
        self.script
            .lock()
            .unwrap()
            .failures
            .insert((target.to_string(), action.to_string()), times);
    }

    pub fn fail_always(&self, target: &str, action: &str) {
        self.fail(target, action, u32::MAX);
    }

    pub fn heal(&self, target: &str, action: &str) {
        self.script
            .lock()
            .unwrap()
            .failures
            .remove(&(target.to_string(), action.to_string()));
    }

    /// What `capture_state` returns for `target`
    pub fn set_capture(&self, target: &str, is_live: bool, resources: Value) {
        let resources: BTreeMap<String, Value> = serde_json::from_value(resources).unwrap();
        self.script
            .lock()
            .unwrap()
            .captures
            .insert(target.to_string(), CapturedState { is_live, resources });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Targets in the order `action` was called on them
    pub fn order_of(&self, action: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.action == action)
            .map(|c| c.target)
            .collect()
    }

    pub fn count(&self, target: &str, action: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.target == target && c.action == action)
            .count()
    }

    pub fn applied_state(&self, target: &str) -> Option<BTreeMap<String, Value>> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(t, _)| t == target)
            .map(|(_, state)| state.clone())
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn call(&self, ctx: &ExecutionContext, target: &Target, action: &str) -> Result<()> {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        self.calls.lock().unwrap().push(RecordedCall {
            target: target.name.clone(),
            action: action.to_string(),
            cycle_id: ctx.cycle_id.clone(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let should_fail = {
            let mut script = self.script.lock().unwrap();
            match script
                .failures
                .get_mut(&(target.name.clone(), action.to_string()))
            {
                Some(remaining) if *remaining > 0 => {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    true
                }
                _ => false,
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if should_fail {
            Err(anyhow!("injected {} failure on {}", action, target.name))
        } else {
            Ok(())
        }
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn shutdown(&self, ctx: &ExecutionContext, target: &Target) -> Result<()> {
        self.call(ctx, target, "shutdown").await
    }

    async fn wake_up(&self, ctx: &ExecutionContext, target: &Target) -> Result<()> {
        self.call(ctx, target, "wake_up").await
    }

    async fn capture_state(
        &self,
        ctx: &ExecutionContext,
        target: &Target,
    ) -> Result<CapturedState> {
        self.call(ctx, target, "capture_state").await?;
        let script = self.script.lock().unwrap();
        Ok(script
            .captures
            .get(&target.name)
            .cloned()
            .unwrap_or_else(|| CapturedState {
                is_live: true,
                resources: BTreeMap::from([(
                    format!("{}/replicas", target.name),
                    json!(3),
                )]),
            }))
    }

    async fn apply_state(
        &self,
        ctx: &ExecutionContext,
        target: &Target,
        state: &BTreeMap<String, Value>,
    ) -> Result<()> {
        self.call(ctx, target, "apply_state").await?;
        self.applied
            .lock()
            .unwrap()
            .push((target.name.clone(), state.clone()));
        Ok(())
    }
}
