use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use hibernator::config::ConfigManager;
use hibernator::constants::schedule::DEFAULT_PREVIEW_EVENTS;
use hibernator::executor::{ExecutorRegistry, HttpExecutor};
use hibernator::operation_tracker::ReconcileTracker;
use hibernator::orchestrator::{PlanController, ReconcileOutcome};
use hibernator::plan::PlanRepository;
use hibernator::restore::RestoreManager;
use hibernator::schedule::CompiledSchedule;
use hibernator::store::{DocumentStore, SqliteDocumentStore};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("hibernator=info".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    info!("Starting hibernator");

    let config_dir =
        std::env::var("HIBERNATOR_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config_manager = ConfigManager::new(config_dir).await?;
    let config = config_manager.get_current_config();

    let store: Arc<dyn DocumentStore> =
        Arc::new(SqliteDocumentStore::new(&config.database_path).await?);
    info!("Document store initialized at {}", config.database_path);

    let plans = Arc::new(PlanRepository::new(store.clone()));
    let restore = Arc::new(RestoreManager::new(store.clone()));

    for (name, spec) in &config.plans {
        plans.apply_spec(&config.namespace, name, spec.clone()).await?;

        match CompiledSchedule::compile(&spec.schedule) {
            Ok(schedule) => {
                let events = schedule.upcoming(Utc::now(), DEFAULT_PREVIEW_EVENTS);
                for event in events {
                    debug!("Plan {} upcoming {:?} at {}", name, event.kind, event.at);
                }
            }
            Err(e) => warn!("Plan {} has an invalid schedule: {}", name, e),
        }
    }

    let http_executor = Arc::new(HttpExecutor::new(config.connectors.clone())?);
    let mut registry = ExecutorRegistry::new();
    for executor_type in &config.executor_types {
        registry.register(executor_type, http_executor.clone());
    }
    info!("Executors registered for types: {:?}", registry.types());
    for (name, spec) in &config.plans {
        for target in spec.targets.iter().filter(|t| !registry.contains(&t.target_type)) {
            warn!(
                "Plan {} target {} has type {} with no registered executor",
                name, target.name, target.target_type
            );
        }
    }

    let tracker = ReconcileTracker::new();
    let controller = Arc::new(PlanController::new(
        plans.clone(),
        restore,
        Arc::new(registry),
        tracker.clone(),
    ));

    // Release plans whose reconcile never finished
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let cleaned = tracker.cleanup_stale(24).await;
            if cleaned > 0 {
                warn!("Released {} stale plan reconciles", cleaned);
            }
        }
    });

    let mut interval =
        tokio::time::interval(Duration::from_secs(config.reconcile_interval_seconds));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(
        "Reconciling {} plans every {}s",
        config.plans.len(),
        config.reconcile_interval_seconds
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let controller = controller.clone();
                let plans = plans.clone();
                let namespace = config.namespace.clone();
                tokio::spawn(async move {
                    reconcile_all(controller, plans, namespace).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, stopping reconcile loop");
                break;
            }
        }
    }

    Ok(())
}

async fn reconcile_all(
    controller: Arc<PlanController>,
    plans: Arc<PlanRepository>,
    namespace: String,
) {
    let names = match plans.list(&namespace).await {
        Ok(list) => list.into_iter().map(|p| p.metadata.name).collect::<Vec<_>>(),
        Err(e) => {
            error!("Failed to list plans: {}", e);
            return;
        }
    };

    let tasks = names.into_iter().map(|name| {
        let controller = controller.clone();
        let namespace = namespace.clone();
        tokio::spawn(async move {
            let result = controller.reconcile(&namespace, &name, Utc::now()).await;
            (name, result)
        })
    });

    for joined in join_all(tasks).await {
        match joined {
            Ok((name, Ok(ReconcileOutcome::CycleFinished { operation, outcome, .. }))) => {
                info!("Plan {} finished {} cycle: {:?}", name, operation, outcome);
            }
            Ok((name, Ok(outcome))) => debug!("Plan {} reconciled: {:?}", name, outcome),
            Ok((name, Err(e))) if e.is_conflict() => debug!("Plan {} skipped: {}", name, e),
            Ok((name, Err(e))) => error!("Plan {} reconcile failed: {}", name, e),
            Err(e) => error!("Reconcile task panicked: {}", e),
        }
    }
}
