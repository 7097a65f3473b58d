//! Builder for plan specs used across tests

use super::test_data::executors;
use hibernator::plan::{
    Behavior, BehaviorMode, Dependency, ExecutionStrategy, PlanSpec, StrategyType, Target,
};
use hibernator::schedule::{OffHourWindow, Schedule, ScheduleException};
use serde_json::json;

pub struct TestPlanBuilder {
    spec: PlanSpec,
}

impl TestPlanBuilder {
    /// UTC schedule hibernating Mon-Fri 20:00-06:00, strict, no retries
    pub fn new() -> Self {
        Self {
            spec: PlanSpec {
                schedule: Schedule {
                    timezone: "UTC".to_string(),
                    off_hours: vec![OffHourWindow::new(
                        "20:00",
                        "06:00",
                        &["Mon", "Tue", "Wed", "Thu", "Fri"],
                    )],
                },
                exceptions: Vec::new(),
                behavior: Behavior {
                    mode: BehaviorMode::Strict,
                    retries: 0,
                    reset_attempts_on_retry: false,
                },
                execution: ExecutionStrategy::default(),
                targets: Vec::new(),
                suspend: false,
            },
        }
    }

    pub fn target(mut self, name: &str) -> Self {
        self.spec.targets.push(Target {
            name: name.to_string(),
            target_type: executors::MOCK.to_string(),
            connector_ref: "local".to_string(),
            parameters: json!({"size": "small"}),
        });
        self
    }

    pub fn target_of_type(mut self, name: &str, target_type: &str) -> Self {
        self.spec.targets.push(Target {
            name: name.to_string(),
            target_type: target_type.to_string(),
            connector_ref: "local".to_string(),
            parameters: json!({}),
        });
        self
    }

    /// `from` wakes before `to`
    pub fn dependency(mut self, from: &str, to: &str) -> Self {
        self.spec.execution.dependencies.push(Dependency {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn strategy(mut self, strategy_type: StrategyType, max_concurrency: Option<usize>) -> Self {
        self.spec.execution.strategy_type = strategy_type;
        self.spec.execution.max_concurrency = max_concurrency;
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.spec.behavior.mode = BehaviorMode::BestEffort;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.spec.behavior.retries = retries;
        self
    }

    pub fn reset_attempts_on_retry(mut self) -> Self {
        self.spec.behavior.reset_attempts_on_retry = true;
        self
    }

    pub fn timezone(mut self, timezone: &str) -> Self {
        self.spec.schedule.timezone = timezone.to_string();
        self
    }

    pub fn off_hours(mut self, windows: Vec<OffHourWindow>) -> Self {
        self.spec.schedule.off_hours = windows;
        self
    }

    pub fn exception(mut self, exception: ScheduleException) -> Self {
        self.spec.exceptions.push(exception);
        self
    }

    pub fn suspended(mut self) -> Self {
        self.spec.suspend = true;
        self
    }

    pub fn build(self) -> PlanSpec {
        self.spec
    }
}

impl Default for TestPlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}
