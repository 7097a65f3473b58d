use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::cycle::{CycleOutcome, CycleReport, CycleRunner};
use super::graph::DependencyGraph;
use crate::constants::annotations::{RETRY_FORCE, RETRY_NOW, SUSPEND_REASON, SUSPEND_UNTIL};
use crate::constants::plan::{
    AUTO_RETRY_BASE_BACKOFF_SECONDS, AUTO_RETRY_MAX_BACKOFF_SECONDS, EXECUTION_HISTORY_LIMIT,
};
use crate::errors::{ConfigurationError, Result};
use crate::executor::ExecutorRegistry;
use crate::operation_tracker::ReconcileTracker;
use crate::plan::{
    CycleSummary, ExecutionState, Operation, Plan, PlanPhase, PlanRepository, PlanStatus,
    TargetExecution,
};
use crate::restore::RestoreManager;
use crate::schedule::exceptions::{self, ExceptionResolution};
use crate::schedule::ScheduleState;

/// What a single reconcile did
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    NotFound,
    /// Configuration is invalid; the plan sits in `Error` until it is fixed
    ConfigurationInvalid { message: String },
    Suspended { reason: String },
    /// Phase already matches the schedule
    Idle { phase: PlanPhase },
    CycleFinished {
        operation: Operation,
        cycle_id: String,
        outcome: CycleOutcome,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Action {
    Idle,
    /// Fresh cycle with a new id
    Start(Operation),
    /// Continue the recorded cycle where it stopped
    Resume(Operation),
    /// Re-enter a failed cycle on operator request
    Retry(Operation),
    /// Re-enter a failed cycle once its backoff has passed
    AutoRetry(Operation),
}

/// Reconciles plans: compares schedule and phase, and drives cycles to move between
/// `Active` and `Hibernated`
pub struct PlanController {
    plans: Arc<PlanRepository>,
    restore: Arc<RestoreManager>,
    runner: CycleRunner,
    tracker: ReconcileTracker,
}

impl PlanController {
    pub fn new(
        plans: Arc<PlanRepository>,
        restore: Arc<RestoreManager>,
        registry: Arc<ExecutorRegistry>,
        tracker: ReconcileTracker,
    ) -> Self {
        let runner = CycleRunner::new(registry, restore.clone(), plans.clone());
        Self {
            plans,
            restore,
            runner,
            tracker,
        }
    }

    pub fn tracker(&self) -> &ReconcileTracker {
        &self.tracker
    }

    /// Reconcile one plan at `now`. A concurrent reconcile of the same plan is rejected
    /// with a conflict.
    #[instrument(skip(self, now), fields(plan = %format!("{}/{}", namespace, name)))]
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let key = format!("{}/{}", namespace, name);
        self.tracker.try_start(&key, "reconcile").await?;
        let result = self.reconcile_plan(namespace, name, now).await;
        self.tracker.finish(&key).await;
        result
    }

    async fn reconcile_plan(
        &self,
        namespace: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let plan = match self.plans.get(namespace, name).await? {
            Some(plan) => plan,
            None => return Ok(ReconcileOutcome::NotFound),
        };
        let mut status = plan.status.clone();
        status.last_reconciled_at = Some(now);

        let (graph, resolution) = match validate(&plan, now) {
            Ok(validated) => validated,
            Err(e) => {
                let message = e.to_string();
                if !status.config_invalid {
                    error!("Plan {} has invalid configuration: {}", plan.key(), message);
                    status.resume_phase.get_or_insert(status.phase);
                }
                status.config_invalid = true;
                status.phase = PlanPhase::Error;
                status.error_message = Some(message.clone());
                self.write_status(&plan, &status).await?;
                return Ok(ReconcileOutcome::ConfigurationInvalid { message });
            }
        };

        if status.config_invalid {
            status.config_invalid = false;
            status.phase = status.resume_phase.take().unwrap_or_default();
            status.error_message = None;
            info!("Configuration of {} is valid again, resuming as {}", plan.key(), status.phase);
        }

        status.next_hibernate_time = resolution.evaluation.next_hibernate_time;
        status.next_wake_up_time = resolution.evaluation.next_wake_up_time;
        status.active_exceptions = resolution.active.clone();

        if let Some(reason) = self.suspension(&plan, now).await? {
            if status.phase != PlanPhase::Suspended {
                info!("Suspending {}: {}", plan.key(), reason);
                status.resume_phase.get_or_insert(status.phase);
                status.phase = PlanPhase::Suspended;
            }
            self.write_status(&plan, &status).await?;
            return Ok(ReconcileOutcome::Suspended { reason });
        }

        if status.phase == PlanPhase::Suspended {
            status.phase = status.resume_phase.take().unwrap_or_default();
            info!("Resuming {} as {}", plan.key(), status.phase);
        }

        let retry = self.take_retry_request(&plan).await?;
        let auto_retry = auto_retry_due(&status, plan.spec.behavior.retries, now);
        let action = decide(&status, &resolution, retry, auto_retry);
        debug!("Plan {} in {} decided {:?}", plan.key(), status.phase, action);

        let operation = match action {
            Action::Idle => {
                self.write_status(&plan, &status).await?;
                return Ok(ReconcileOutcome::Idle { phase: status.phase });
            }
            Action::Start(operation) => {
                let cycle_id = Uuid::new_v4().to_string();
                info!("Starting {} cycle {} for {}", operation, cycle_id, plan.key());
                status.current_cycle_id = Some(cycle_id);
                status.cycle_started_at = Some(now);
                status.executions = plan
                    .spec
                    .targets
                    .iter()
                    .map(|t| TargetExecution::pending(&t.name))
                    .collect();
                operation
            }
            Action::Resume(operation) => {
                info!("Resuming {} cycle for {}", operation, plan.key());
                status.executions = align_executions(&plan, &status.executions);
                operation
            }
            Action::Retry(operation) | Action::AutoRetry(operation) => {
                let reason = match action {
                    Action::AutoRetry(_) => "automatic retry",
                    _ => "manual retry",
                };
                info!(
                    "Retrying {} cycle for {} ({}, retry count {})",
                    operation,
                    plan.key(),
                    reason,
                    status.retry_count
                );
                let reset = plan.spec.behavior.reset_attempts_on_retry;
                status.executions = align_executions(&plan, &status.executions)
                    .into_iter()
                    .map(|mut execution| {
                        if execution.state != ExecutionState::Completed {
                            execution.state = ExecutionState::Pending;
                            execution.message = reason.to_string();
                            execution.finished_at = None;
                            if reset {
                                execution.attempts = 0;
                            }
                        }
                        execution
                    })
                    .collect();
                operation
            }
        };

        let cycle_id = match &status.current_cycle_id {
            Some(id) => id.clone(),
            None => {
                let id = Uuid::new_v4().to_string();
                status.current_cycle_id = Some(id.clone());
                id
            }
        };
        status.current_operation = Some(operation);
        status.phase = operation.in_progress_phase();
        status.error_message = None;
        self.write_status(&plan, &status).await?;

        let clock = Instant::now();
        let report = self
            .runner
            .run(&plan, &graph, operation, &cycle_id, status.executions.clone())
            .await?;

        // Logical time plus what the cycle actually took
        let elapsed = Duration::from_std(clock.elapsed()).unwrap_or_else(|_| Duration::zero());
        self.finish_cycle(&plan, operation, &cycle_id, &report, now + elapsed).await?;

        Ok(ReconcileOutcome::CycleFinished {
            operation,
            cycle_id,
            outcome: report.outcome,
        })
    }

    async fn finish_cycle(
        &self,
        plan: &Plan,
        operation: Operation,
        cycle_id: &str,
        report: &CycleReport,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        let succeeded = report.outcome.phase_advances();
        let message = report.outcome.message().map(str::to_string);

        self.plans
            .update_status(&plan.metadata.namespace, &plan.metadata.name, |status| {
                status.executions = report.executions.clone();
                if succeeded {
                    status.phase = operation.completed_phase();
                    status.retry_count = 0;
                    status.error_message = message.clone();
                } else {
                    status.phase = PlanPhase::Error;
                    status.retry_count += 1;
                    status.error_message = message.clone();
                }

                status.execution_history.push(CycleSummary {
                    cycle_id: cycle_id.to_string(),
                    operation,
                    started_at: status.cycle_started_at,
                    finished_at,
                    succeeded,
                    completed_targets: report.count(ExecutionState::Completed),
                    failed_targets: report.count(ExecutionState::Failed),
                    message: message.clone(),
                });
                let overflow = status
                    .execution_history
                    .len()
                    .saturating_sub(EXECUTION_HISTORY_LIMIT);
                status.execution_history.drain(..overflow);
            })
            .await?;

        if succeeded {
            info!("Plan {} is now {}", plan.key(), operation.completed_phase());
        } else {
            warn!("Plan {} entered Error after {} cycle {}", plan.key(), operation, cycle_id);
        }

        if operation == Operation::WakeUp && succeeded {
            let targets = plan.target_names();
            let (namespace, name) = (&plan.metadata.namespace, &plan.metadata.name);
            if self.restore.mark_all_targets_restored(namespace, name, &targets).await? {
                self.restore.unlock_restore_data(namespace, name).await?;
            } else {
                debug!("Not every target of {} was restored, keeping markers", plan.key());
            }
        }
        Ok(())
    }

    /// Suspension reason, if any. Expired suspend annotations are removed.
    async fn suspension(&self, plan: &Plan, now: DateTime<Utc>) -> Result<Option<String>> {
        if plan.spec.suspend {
            return Ok(Some("suspended by plan spec".to_string()));
        }

        let until = match plan.annotation(SUSPEND_UNTIL) {
            Some(until) => until,
            None => return Ok(None),
        };

        match DateTime::parse_from_rfc3339(until) {
            Ok(until) if now < until.with_timezone(&Utc) => {
                let reason = plan.annotation(SUSPEND_REASON).unwrap_or("no reason given");
                Ok(Some(format!(
                    "suspended until {} ({})",
                    until.with_timezone(&Utc).to_rfc3339(),
                    reason
                )))
            }
            Ok(_) => {
                info!("Suspension of {} expired, removing annotations", plan.key());
                let patch = BTreeMap::from([
                    (SUSPEND_UNTIL.to_string(), None),
                    (SUSPEND_REASON.to_string(), None),
                ]);
                self.plans
                    .patch_annotations(&plan.metadata.namespace, &plan.metadata.name, patch)
                    .await?;
                Ok(None)
            }
            Err(e) => {
                warn!("Ignoring unparsable {} on {}: {}", SUSPEND_UNTIL, plan.key(), e);
                Ok(None)
            }
        }
    }

    /// Consume retry annotations; returns `Some(force)` when a retry was requested
    async fn take_retry_request(&self, plan: &Plan) -> Result<Option<bool>> {
        let requested = plan.annotation(RETRY_NOW) == Some("true");
        let force = plan.annotation(RETRY_FORCE) == Some("true");
        if !requested && !force {
            return Ok(None);
        }

        let patch = BTreeMap::from([
            (RETRY_NOW.to_string(), None),
            (RETRY_FORCE.to_string(), None),
        ]);
        self.plans
            .patch_annotations(&plan.metadata.namespace, &plan.metadata.name, patch)
            .await?;

        Ok(requested.then_some(force))
    }

    async fn write_status(&self, plan: &Plan, status: &PlanStatus) -> Result<()> {
        self.plans
            .update_status(&plan.metadata.namespace, &plan.metadata.name, |stored| {
                *stored = status.clone();
            })
            .await?;
        Ok(())
    }
}

fn validate(
    plan: &Plan,
    now: DateTime<Utc>,
) -> std::result::Result<(DependencyGraph, ExceptionResolution), ConfigurationError> {
    plan.spec.validate()?;
    let graph = DependencyGraph::build(&plan.spec.targets, &plan.spec.execution.dependencies)?;
    let resolution = exceptions::resolve(&plan.spec.schedule, &plan.spec.exceptions, now)?;
    Ok((graph, resolution))
}

fn decide(
    status: &PlanStatus,
    resolution: &ExceptionResolution,
    retry: Option<bool>,
    auto_retry: bool,
) -> Action {
    if let Some(operation) = status.phase.running_operation() {
        return Action::Resume(operation);
    }

    let failed_operation = match (status.phase, status.current_operation) {
        (PlanPhase::Error, Some(operation)) => Some(operation),
        _ => None,
    };

    if let Some(force) = retry {
        match (failed_operation, status.current_operation) {
            (Some(operation), _) => return Action::Retry(operation),
            (None, Some(operation)) if force && !status.all_completed() => {
                return Action::Retry(operation)
            }
            _ => debug!("Retry requested with nothing to retry"),
        }
    }

    let want_hibernate = resolution.desired_state == ScheduleState::Hibernating;
    match (status.phase, want_hibernate, failed_operation) {
        (PlanPhase::Active, true, _) => Action::Start(Operation::Shutdown),
        (PlanPhase::Hibernated, false, _) => Action::Start(Operation::WakeUp),
        // A failed cycle is abandoned once the schedule points the other way
        (PlanPhase::Error, true, Some(Operation::WakeUp)) => Action::Start(Operation::Shutdown),
        (PlanPhase::Error, false, Some(Operation::Shutdown)) => Action::Start(Operation::WakeUp),
        (PlanPhase::Error, _, Some(operation)) if auto_retry => Action::AutoRetry(operation),
        _ => Action::Idle,
    }
}

/// A failed cycle is re-entered automatically at most `retries` times. Each re-entry
/// waits `base * 2^(retry_count - 1)` after the last cycle finished, capped.
fn auto_retry_due(status: &PlanStatus, retries: u32, now: DateTime<Utc>) -> bool {
    if status.phase != PlanPhase::Error
        || status.config_invalid
        || status.retry_count == 0
        || status.retry_count > retries
    {
        return false;
    }

    match status.execution_history.last() {
        Some(last) => now >= last.finished_at + retry_backoff(status.retry_count),
        None => true,
    }
}

fn retry_backoff(retry_count: u32) -> Duration {
    let doublings = retry_count.saturating_sub(1).min(16);
    let seconds = AUTO_RETRY_BASE_BACKOFF_SECONDS
        .saturating_mul(1_i64 << doublings)
        .min(AUTO_RETRY_MAX_BACKOFF_SECONDS);
    Duration::seconds(seconds)
}

/// Executions for the plan's current targets, reusing recorded ones by name
fn align_executions(plan: &Plan, recorded: &[TargetExecution]) -> Vec<TargetExecution> {
    plan.spec
        .targets
        .iter()
        .map(|target| {
            recorded
                .iter()
                .find(|e| e.target == target.name)
                .cloned()
                .unwrap_or_else(|| TargetExecution::pending(&target.name))
        })
        .collect()
}
