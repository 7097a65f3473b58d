use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, instrument, warn};

use super::graph::DependencyGraph;
use crate::errors::{ExecutorError, HibernatorError, Result};
use crate::executor::{ExecutionContext, Executor, ExecutorRegistry};
use crate::plan::{
    BehaviorMode, ExecutionState, ExecutionStrategy, Operation, Plan, PlanRepository, StrategyType,
    Target, TargetExecution,
};
use crate::restore::{RestoreData, RestoreManager};

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Every target completed
    Completed,
    /// Best-effort cycle finished with some targets failed
    CompletedWithFailures { message: String },
    /// Strict cycle stopped on a failed target
    Failed { message: String },
}

impl CycleOutcome {
    pub fn phase_advances(&self) -> bool {
        !matches!(self, CycleOutcome::Failed { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            CycleOutcome::Completed => None,
            CycleOutcome::CompletedWithFailures { message } | CycleOutcome::Failed { message } => {
                Some(message)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub executions: Vec<TargetExecution>,
}

impl CycleReport {
    pub fn count(&self, state: ExecutionState) -> usize {
        self.executions.iter().filter(|e| e.state == state).count()
    }
}

/// Per-target records of a running cycle, written through to plan status on every
/// transition
struct Ledger<'a> {
    executions: Mutex<Vec<TargetExecution>>,
    plans: &'a PlanRepository,
    namespace: &'a str,
    plan: &'a str,
}

impl Ledger<'_> {
    async fn state(&self, index: usize) -> ExecutionState {
        self.executions.lock().await[index].state
    }

    async fn record<F>(&self, index: usize, change: F) -> Result<()>
    where
        F: FnOnce(&mut TargetExecution),
    {
        // Held across the write so status snapshots land in transition order
        let mut executions = self.executions.lock().await;
        change(&mut executions[index]);
        let snapshot = executions.clone();
        self.plans
            .update_status(self.namespace, self.plan, |status| {
                status.executions = snapshot.clone();
            })
            .await?;
        Ok(())
    }
}

/// Runs one shutdown or wake-up cycle over a plan's targets
pub struct CycleRunner {
    registry: Arc<ExecutorRegistry>,
    restore: Arc<RestoreManager>,
    plans: Arc<PlanRepository>,
}

impl CycleRunner {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        restore: Arc<RestoreManager>,
        plans: Arc<PlanRepository>,
    ) -> Self {
        Self {
            registry,
            restore,
            plans,
        }
    }

    /// Drive `executions` (aligned with `plan.spec.targets`) layer by layer.
    ///
    /// Completed targets are skipped, so the same call resumes an interrupted cycle.
    /// Returns `Err` only for store failures; the cycle is then left in progress for
    /// the next tick.
    #[instrument(
        skip_all,
        fields(plan = %plan.metadata.name, operation = %operation, cycle = %cycle_id)
    )]
    pub async fn run(
        &self,
        plan: &Plan,
        graph: &DependencyGraph,
        operation: Operation,
        cycle_id: &str,
        executions: Vec<TargetExecution>,
    ) -> Result<CycleReport> {
        let ctx = ExecutionContext {
            namespace: plan.metadata.namespace.clone(),
            plan: plan.metadata.name.clone(),
            cycle_id: cycle_id.to_string(),
            operation,
        };
        let ledger = Ledger {
            executions: Mutex::new(executions),
            plans: self.plans.as_ref(),
            namespace: &plan.metadata.namespace,
            plan: &plan.metadata.name,
        };
        let best_effort = plan.spec.behavior.mode == BehaviorMode::BestEffort;
        let limit = concurrency_limit(&plan.spec.execution);

        info!("Starting {} cycle over {} targets", operation, graph.len());

        for layer in graph.layers(operation) {
            let mut runnable = Vec::with_capacity(layer.len());
            for index in layer {
                if ledger.state(index).await == ExecutionState::Completed {
                    continue;
                }

                let mut blocker = None;
                for pred in graph.predecessors(index, operation) {
                    let state = ledger.state(pred).await;
                    let satisfied = state == ExecutionState::Completed
                        || (best_effort && state == ExecutionState::Failed);
                    if !satisfied {
                        blocker = Some(pred);
                        break;
                    }
                }

                match blocker {
                    Some(pred) => {
                        let waiting_on = graph.name(pred).to_string();
                        warn!("{} blocked by {}", graph.name(index), waiting_on);
                        ledger
                            .record(index, |e| {
                                e.state = ExecutionState::Pending;
                                e.message = format!("blocked by {}", waiting_on);
                            })
                            .await?;
                    }
                    None => runnable.push(index),
                }
            }

            if runnable.is_empty() {
                continue;
            }

            let semaphore = Arc::new(Semaphore::new(limit.unwrap_or(runnable.len())));
            let tasks = runnable.into_iter().map(|index| {
                let semaphore = semaphore.clone();
                let target = &plan.spec.targets[index];
                let ledger = &ledger;
                let ctx = &ctx;
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|e| HibernatorError::Other(format!("Semaphore closed: {}", e)))?;
                    self.run_target(ctx, target, index, ledger, plan.spec.behavior.retries)
                        .await
                }
            });

            let results = join_all(tasks).await;
            if let Some(err) = results.into_iter().find_map(|r| r.err()) {
                error!("Cycle interrupted by store failure: {}", err);
                return Err(err);
            }
        }

        let executions = ledger.executions.into_inner();
        let outcome = summarize(&executions, best_effort);
        match &outcome {
            CycleOutcome::Completed => info!("{} cycle completed", operation),
            CycleOutcome::CompletedWithFailures { message } => {
                warn!("{} cycle completed with failures: {}", operation, message)
            }
            CycleOutcome::Failed { message } => error!("{} cycle failed: {}", operation, message),
        }

        Ok(CycleReport { outcome, executions })
    }

    async fn run_target(
        &self,
        ctx: &ExecutionContext,
        target: &Target,
        index: usize,
        ledger: &Ledger<'_>,
        retries: u32,
    ) -> Result<()> {
        let executor = match self.registry.get(&target.target_type) {
            Ok(executor) => executor,
            Err(e) => {
                error!("{}: {}", target.name, e);
                return ledger
                    .record(index, |x| {
                        x.state = ExecutionState::Failed;
                        x.message = e.to_string();
                        x.finished_at = Some(Utc::now());
                    })
                    .await;
            }
        };

        let max_attempts = retries.saturating_add(1);
        // Set once the executor confirmed the stop, so a failed capture does not stop twice
        let mut stopped = false;
        for attempt in 1..=max_attempts {
            ledger
                .record(index, |x| {
                    x.state = ExecutionState::Running;
                    x.attempts += 1;
                    x.started_at.get_or_insert_with(Utc::now);
                    x.finished_at = None;
                    x.message = format!("attempt {}/{}", attempt, max_attempts);
                })
                .await?;

            let result = match ctx.operation {
                Operation::Shutdown => {
                    self.shutdown_target(ctx, executor.as_ref(), target, &mut stopped)
                        .await
                }
                Operation::WakeUp => self.wake_target(ctx, executor.as_ref(), target).await,
            };

            match result {
                Ok(()) => {
                    info!("{} {} completed", target.name, ctx.operation);
                    return ledger
                        .record(index, |x| {
                            x.state = ExecutionState::Completed;
                            x.message = "completed".to_string();
                            x.finished_at = Some(Utc::now());
                        })
                        .await;
                }
                Err(e) if e.is_store() || e.is_conflict() => {
                    // Not the target's fault: hand the attempt back and stop the cycle
                    if let Err(record_err) = ledger
                        .record(index, |x| {
                            x.state = ExecutionState::Pending;
                            x.attempts = x.attempts.saturating_sub(1);
                            x.message = format!("interrupted: {}", e);
                        })
                        .await
                    {
                        warn!("Could not record interruption of {}: {}", target.name, record_err);
                    }
                    return Err(e);
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        "{} {} attempt {}/{} failed: {}",
                        target.name, ctx.operation, attempt, max_attempts, e
                    );
                    ledger
                        .record(index, |x| {
                            x.message =
                                format!("attempt {}/{} failed: {}", attempt, max_attempts, e);
                        })
                        .await?;
                }
                Err(e) => {
                    error!(
                        "{} {} failed after {} attempts: {}",
                        target.name, ctx.operation, max_attempts, e
                    );
                    return ledger
                        .record(index, |x| {
                            x.state = ExecutionState::Failed;
                            x.message = e.to_string();
                            x.finished_at = Some(Utc::now());
                        })
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn shutdown_target(
        &self,
        ctx: &ExecutionContext,
        executor: &dyn Executor,
        target: &Target,
        stopped: &mut bool,
    ) -> Result<()> {
        if !*stopped {
            executor
                .shutdown(ctx, target)
                .await
                .map_err(|e| operation_failed(target, "shutdown", e))?;
            *stopped = true;
        }

        let captured = executor
            .capture_state(ctx, target)
            .await
            .map_err(|e| operation_failed(target, "capture_state", e))?;

        let data = RestoreData::new(
            &target.name,
            &target.target_type,
            captured.is_live,
            captured.resources,
        );
        match self.restore.save_or_preserve(&ctx.namespace, &ctx.plan, data).await {
            Ok(_) => Ok(()),
            Err(e @ HibernatorError::SizeExceeded { .. }) => Err(ExecutorError::CaptureRejected {
                target: target.name.clone(),
                reason: e.to_string(),
            }
            .into()),
            Err(e) => Err(e),
        }
    }

    async fn wake_target(
        &self,
        ctx: &ExecutionContext,
        executor: &dyn Executor,
        target: &Target,
    ) -> Result<()> {
        match self.restore.load(&ctx.namespace, &ctx.plan, &target.name).await? {
            Some(data) if !data.state.is_empty() => {
                executor
                    .apply_state(ctx, target, &data.state)
                    .await
                    .map_err(|e| operation_failed(target, "apply_state", e))?;
            }
            _ => warn!("No restore data for {}, waking without it", target.name),
        }

        executor
            .wake_up(ctx, target)
            .await
            .map_err(|e| operation_failed(target, "wake_up", e))?;

        self.restore
            .mark_target_restored(&ctx.namespace, &ctx.plan, &target.name)
            .await
    }
}

fn operation_failed(target: &Target, operation: &str, err: anyhow::Error) -> HibernatorError {
    HibernatorError::Executor(ExecutorError::OperationFailed {
        target: target.name.clone(),
        operation: operation.to_string(),
        reason: err.to_string(),
    })
}

/// `None` means every runnable target of a layer may run at once
fn concurrency_limit(strategy: &ExecutionStrategy) -> Option<usize> {
    match strategy.strategy_type {
        StrategyType::Sequential => Some(1),
        StrategyType::Parallel | StrategyType::Dependency => {
            strategy.max_concurrency.filter(|n| *n > 0)
        }
    }
}

fn summarize(executions: &[TargetExecution], best_effort: bool) -> CycleOutcome {
    let failed: Vec<&TargetExecution> = executions
        .iter()
        .filter(|e| e.state == ExecutionState::Failed)
        .collect();
    let blocked = executions
        .iter()
        .filter(|e| e.state != ExecutionState::Completed && e.state != ExecutionState::Failed)
        .count();

    if failed.is_empty() && blocked == 0 {
        return CycleOutcome::Completed;
    }

    let mut message = match failed.first() {
        Some(first) => format!("{} failed: {}", first.target, first.message),
        None => String::from("targets did not complete"),
    };
    if failed.len() > 1 {
        message.push_str(&format!(" (and {} more failed)", failed.len() - 1));
    }
    if blocked > 0 {
        message.push_str(&format!(", {} blocked", blocked));
    }

    if best_effort && blocked == 0 {
        CycleOutcome::CompletedWithFailures { message }
    } else {
        CycleOutcome::Failed { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(target: &str, state: ExecutionState, message: &str) -> TargetExecution {
        TargetExecution {
            state,
            message: message.to_string(),
            ..TargetExecution::pending(target)
        }
    }

    #[test]
    fn test_summary_of_strict_failure_names_first_failed_target() {
        let executions = vec![
            execution("db", ExecutionState::Failed, "timeout"),
            execution("api", ExecutionState::Pending, "blocked by db"),
            execution("cache", ExecutionState::Completed, "completed"),
        ];

        assert_eq!(
            summarize(&executions, false),
            CycleOutcome::Failed {
                message: "db failed: timeout, 1 blocked".to_string()
            }
        );
    }

    #[test]
    fn test_summary_of_best_effort_failure_advances() {
        let executions = vec![
            execution("db", ExecutionState::Failed, "timeout"),
            execution("api", ExecutionState::Completed, "completed"),
        ];

        let outcome = summarize(&executions, true);
        assert!(outcome.phase_advances());
        assert_eq!(outcome.message(), Some("db failed: timeout"));
    }

    #[test]
    fn test_sequential_ignores_max_concurrency() {
        let strategy = ExecutionStrategy {
            strategy_type: StrategyType::Sequential,
            max_concurrency: Some(4),
            dependencies: Vec::new(),
        };
        assert_eq!(concurrency_limit(&strategy), Some(1));

        let unbounded = ExecutionStrategy::default();
        assert_eq!(concurrency_limit(&unbounded), None);
    }
}
