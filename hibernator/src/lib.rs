pub mod config;
pub mod constants;
pub mod errors;
pub mod executor;
pub mod operation_tracker;
pub mod orchestrator;
pub mod plan;
pub mod restore;
pub mod schedule;
pub mod store;

// Re-export commonly used types
pub use config::{Config, ConfigManager, ConnectorConfig};
pub use errors::{HibernatorError, Result};
pub use executor::{CapturedState, ExecutionContext, Executor, ExecutorRegistry, HttpExecutor};
pub use operation_tracker::ReconcileTracker;
pub use orchestrator::{PlanController, ReconcileOutcome};
pub use plan::{Plan, PlanPhase, PlanRepository, PlanSpec};
pub use restore::{RestoreData, RestoreManager};
pub use store::{DocumentStore, InMemoryDocumentStore, SqliteDocumentStore};
