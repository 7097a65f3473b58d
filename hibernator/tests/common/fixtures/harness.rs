//! Controller wired to the in-memory store and a mock executor

use super::mock_executor::MockExecutor;
use super::test_data::{executors, namespaces, utc};
use hibernator::errors::Result;
use hibernator::executor::ExecutorRegistry;
use hibernator::operation_tracker::ReconcileTracker;
use hibernator::orchestrator::{PlanController, ReconcileOutcome};
use hibernator::plan::{Plan, PlanRepository, PlanSpec};
use hibernator::restore::RestoreManager;
use hibernator::store::{DocumentStore, InMemoryDocumentStore};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct TestHarness {
    pub store: Arc<InMemoryDocumentStore>,
    pub plans: Arc<PlanRepository>,
    pub restore: Arc<RestoreManager>,
    pub executor: MockExecutor,
    pub controller: PlanController,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_executor(MockExecutor::new())
    }

    pub fn with_executor(executor: MockExecutor) -> Self {
        let store = Arc::new(InMemoryDocumentStore::new());
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let plans = Arc::new(PlanRepository::new(dyn_store.clone()));
        let restore = Arc::new(RestoreManager::new(dyn_store));

        let mut registry = ExecutorRegistry::new();
        registry.register(executors::MOCK, Arc::new(executor.clone()));

        let controller = PlanController::new(
            plans.clone(),
            restore.clone(),
            Arc::new(registry),
            ReconcileTracker::new(),
        );

        Self {
            store,
            plans,
            restore,
            executor,
            controller,
        }
    }

    pub async fn seed(&self, name: &str, spec: PlanSpec) -> Plan {
        self.plans
            .apply_spec(namespaces::DEFAULT, name, spec)
            .await
            .expect("plan seeded")
    }

    pub async fn reconcile_at(&self, name: &str, instant: &str) -> Result<ReconcileOutcome> {
        self.controller
            .reconcile(namespaces::DEFAULT, name, utc(instant))
            .await
    }

    pub async fn plan(&self, name: &str) -> Plan {
        self.plans
            .get(namespaces::DEFAULT, name)
            .await
            .expect("store reachable")
            .expect("plan exists")
    }

    pub async fn annotate(&self, name: &str, key: &str, value: &str) {
        let patch = BTreeMap::from([(key.to_string(), Some(value.to_string()))]);
        self.plans
            .patch_annotations(namespaces::DEFAULT, name, patch)
            .await
            .expect("annotation written");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
