//! Reconcile tracking per plan
//!
//! The reconcile loop fires on a timer while a cycle may still be running from the
//! previous tick. This tracker rejects a second reconcile of the same plan instead of
//! letting two cycles drive the same targets.
//!
//! # Usage
//!
//! ```ignore
//! tracker.try_start("default/nightly", "reconcile").await?;
//!
//! // Reconcile...
//!
//! tracker.finish("default/nightly").await;
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::errors::{HibernatorError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct ActiveReconcile {
    pub plan_key: String,
    pub reason: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatus {
    pub busy_plans: HashMap<String, ActiveReconcile>,
    pub total_active: usize,
}

pub struct ReconcileTracker {
    active: Arc<RwLock<HashMap<String, ActiveReconcile>>>, // plan key -> reconcile
}

impl ReconcileTracker {
    pub fn new() -> Self {
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Claim `plan_key`; fails with a conflict while another reconcile holds it
    #[instrument(skip(self), fields(plan = %plan_key))]
    pub async fn try_start(&self, plan_key: &str, reason: &str) -> Result<()> {
        let mut active = self.active.write().await;

        if let Some(current) = active.get(plan_key) {
            let duration = Utc::now().signed_duration_since(current.started_at);
            return Err(HibernatorError::conflict(
                plan_key,
                format!(
                    "already reconciling ('{}', started {}s ago)",
                    current.reason,
                    duration.num_seconds()
                ),
            ));
        }

        active.insert(
            plan_key.to_string(),
            ActiveReconcile {
                plan_key: plan_key.to_string(),
                reason: reason.to_string(),
                started_at: Utc::now(),
            },
        );
        debug!("Started {} of {}", reason, plan_key);
        Ok(())
    }

    pub async fn finish(&self, plan_key: &str) {
        let mut active = self.active.write().await;
        if let Some(reconcile) = active.remove(plan_key) {
            let duration = Utc::now().signed_duration_since(reconcile.started_at);
            debug!(
                "Finished {} of {} (took {}ms)",
                reconcile.reason,
                plan_key,
                duration.num_milliseconds()
            );
        }
    }

    pub async fn is_busy(&self, plan_key: &str) -> bool {
        self.active.read().await.contains_key(plan_key)
    }

    pub async fn status(&self) -> TrackerStatus {
        let active = self.active.read().await;
        TrackerStatus {
            busy_plans: active.clone(),
            total_active: active.len(),
        }
    }

    /// Drop claims older than `max_hours`, for reconciles lost to a panic
    pub async fn cleanup_stale(&self, max_hours: i64) -> u32 {
        let mut active = self.active.write().await;
        let cutoff = Utc::now() - chrono::Duration::hours(max_hours);
        let initial_count = active.len();

        active.retain(|plan_key, reconcile| {
            let keep = reconcile.started_at > cutoff;
            if !keep {
                warn!(
                    "Cleaned up stuck {} of {} (held for {}h)",
                    reconcile.reason,
                    plan_key,
                    Utc::now()
                        .signed_duration_since(reconcile.started_at)
                        .num_hours()
                );
            }
            keep
        });

        (initial_count - active.len()) as u32
    }
}

impl Default for ReconcileTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ReconcileTracker {
    fn clone(&self) -> Self {
        Self {
            active: self.active.clone(),
        }
    }
}
