use super::Config;
use anyhow::{anyhow, Result};
use glob::glob;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::plan::{is_valid_name, PlanSpec};

pub struct ConfigManager {
    current_config: Arc<Config>,
}

impl ConfigManager {
    pub async fn new(config_dir: String) -> Result<Self> {
        let config = Self::load_configuration(&config_dir).await?;
        Ok(Self {
            current_config: Arc::new(config),
        })
    }

    pub fn get_current_config(&self) -> Arc<Config> {
        self.current_config.clone()
    }

    async fn load_configuration(config_dir: &str) -> Result<Config> {
        let main_config_path = format!("{}/main.toml", config_dir);
        let main_config_content = fs::read_to_string(&main_config_path)
            .await
            .map_err(|e| anyhow!("Failed to read main config {}: {}", main_config_path, e))?;

        let mut config: Config = toml::from_str(&main_config_content)
            .map_err(|e| anyhow!("Failed to parse main config: {}", e))?;

        if config.reconcile_interval_seconds == 0 {
            return Err(anyhow!("reconcile_interval_seconds must be positive"));
        }

        // One plan per file, named after the file
        let pattern = format!("{}/plans/*.toml", config_dir);
        let mut plans = HashMap::new();

        for entry in glob(&pattern).map_err(|e| anyhow!("Glob pattern error: {}", e))? {
            let path = entry.map_err(|e| anyhow!("Glob entry error: {}", e))?;
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow!("Invalid filename"))?;

            let plan_name = filename
                .strip_suffix(".toml")
                .ok_or_else(|| anyhow!("Invalid plan filename: {}", filename))?;

            if !is_valid_name(plan_name) {
                return Err(anyhow!(
                    "Invalid plan name '{}': use lowercase alphanumerics and '-'",
                    plan_name
                ));
            }

            debug!("Loading plan config: {}", path.display());

            let content = fs::read_to_string(&path)
                .await
                .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;

            let spec: PlanSpec = toml::from_str(&content)
                .map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))?;

            for target in &spec.targets {
                if !config.connectors.contains_key(&target.connector_ref) {
                    warn!(
                        "Plan {} target {} references unknown connector {}",
                        plan_name, target.name, target.connector_ref
                    );
                }
            }

            plans.insert(plan_name.to_string(), spec);
        }

        config.plans = plans;

        info!(
            "Loaded {} plans, {} connectors, {} executor types",
            config.plans.len(),
            config.connectors.len(),
            config.executor_types.len()
        );

        Ok(config)
    }
}
