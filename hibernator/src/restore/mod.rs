//! Restore point storage
//!
//! Each target of a plan owns one restore record: the state its executor captured at
//! hibernation time, keyed by resource id. Records are merged, never blindly replaced,
//! so that a degraded capture (taken from an already-stopped resource) cannot wipe out a
//! high-fidelity one (taken while the resource was running).
//!
//! # Lifecycle
//!
//! 1. First hibernation creates the record
//! 2. Every later capture is merged in with [`RestoreManager::save_or_preserve`]
//! 3. Wake-up applies the record, then [`RestoreManager::mark_target_restored`] flags the
//!    target and downgrades the record to non-live so the next capture replaces it
//! 4. Once every target is restored, [`RestoreManager::unlock_restore_data`] clears the
//!    flags for the next cycle

pub mod manager;
pub mod merge;

pub use manager::RestoreManager;
pub use merge::merge;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RestoreData {
    pub target: String,
    pub executor: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    /// Captured while the resource was still running
    pub is_live: bool,
    pub captured_at: Option<String>,
    #[serde(default)]
    pub state: BTreeMap<String, Value>,
}

impl RestoreData {
    pub fn new(
        target: &str,
        executor: &str,
        is_live: bool,
        state: BTreeMap<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            target: target.to_string(),
            executor: executor.to_string(),
            version: 0,
            created_at: now,
            is_live,
            captured_at: Some(now.to_rfc3339()),
            state,
        }
    }
}

/// How trustworthy the stored restore data of a plan is
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RestoreQuality {
    /// At least one target holds a live capture
    Live,
    /// Data exists but none of it was captured live
    Stale,
    Empty,
}
