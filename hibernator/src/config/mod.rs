pub mod manager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
pub use manager::ConfigManager;

use crate::constants::defaults;
use crate::plan::PlanSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_seconds: u64,
    /// Target types served by the HTTP executor
    #[serde(default)]
    pub executor_types: Vec<String>,
    #[serde(default)]
    pub connectors: HashMap<String, ConnectorConfig>,
    // Populated from config/plans/*.toml
    #[serde(skip)]
    pub plans: HashMap<String, PlanSpec>,
}

fn default_namespace() -> String {
    defaults::NAMESPACE.to_string()
}

fn default_database_path() -> String {
    defaults::DATABASE_PATH.to_string()
}

fn default_reconcile_interval() -> u64 {
    defaults::RECONCILE_INTERVAL_SECONDS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectorConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    defaults::EXECUTOR_TIMEOUT_SECONDS
}
