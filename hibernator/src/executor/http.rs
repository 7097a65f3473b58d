use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info};

use super::{CapturedState, ExecutionContext, Executor};
use crate::config::ConnectorConfig;
use crate::constants::defaults::EXECUTOR_CONNECT_TIMEOUT;
use crate::plan::Target;

/// Executor that forwards every call to a remote connector over HTTP.
///
/// Requests go to `POST {endpoint}/v1/{target type}/{action}` with a bearer key and
/// must answer `{"success": true, ...}`. Captures additionally return `is_live` and
/// `state`.
pub struct HttpExecutor {
    client: Client,
    connectors: HashMap<String, ConnectorConfig>,
}

impl HttpExecutor {
    pub fn new(connectors: HashMap<String, ConnectorConfig>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(EXECUTOR_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self { client, connectors })
    }

    async fn execute_action(
        &self,
        ctx: &ExecutionContext,
        target: &Target,
        action: &str,
        extra: Option<(&str, Value)>,
    ) -> Result<Value> {
        let connector = self
            .connectors
            .get(&target.connector_ref)
            .ok_or_else(|| anyhow!("Connector {} not configured", target.connector_ref))?;

        let url = format!(
            "{}/v1/{}/{}",
            connector.endpoint.trim_end_matches('/'),
            target.target_type,
            action
        );

        let mut payload = json!({
            "namespace": ctx.namespace,
            "plan": ctx.plan,
            "cycle_id": ctx.cycle_id,
            "operation": ctx.operation.to_string(),
            "target": target.name,
            "parameters": target.parameters,
        });
        if let (Some((key, value)), Some(fields)) = (extra, payload.as_object_mut()) {
            fields.insert(key.to_string(), value);
        }

        info!("Calling {} for {} via {}", action, target.name, target.connector_ref);

        let mut request = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(connector.timeout_seconds))
            .json(&payload);
        if let Some(api_key) = &connector.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("HTTP request failed on {}: {}", target.connector_ref, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "{} failed on {} with status {}: {}",
                action,
                target.connector_ref,
                status,
                error_text
            ));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse response from {}: {}", target.connector_ref, e))?;

        if !result.get("success").and_then(|v| v.as_bool()).unwrap_or(false) {
            let error_msg = result
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error");
            return Err(anyhow!("{} failed on {}: {}", action, target.connector_ref, error_msg));
        }

        debug!("{} for {} succeeded", action, target.name);
        Ok(result)
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn shutdown(&self, ctx: &ExecutionContext, target: &Target) -> Result<()> {
        self.execute_action(ctx, target, "shutdown", None).await?;
        Ok(())
    }

    async fn wake_up(&self, ctx: &ExecutionContext, target: &Target) -> Result<()> {
        self.execute_action(ctx, target, "wakeup", None).await?;
        Ok(())
    }

    async fn capture_state(
        &self,
        ctx: &ExecutionContext,
        target: &Target,
    ) -> Result<CapturedState> {
        let result = self.execute_action(ctx, target, "capture", None).await?;

        let is_live = result.get("is_live").and_then(|v| v.as_bool()).unwrap_or(false);
        let resources = match result.get("state") {
            Some(Value::Null) | None => BTreeMap::new(),
            Some(state) => serde_json::from_value(state.clone())
                .map_err(|e| anyhow!("Invalid state from {}: {}", target.connector_ref, e))?,
        };

        Ok(CapturedState { is_live, resources })
    }

    async fn apply_state(
        &self,
        ctx: &ExecutionContext,
        target: &Target,
        state: &BTreeMap<String, Value>,
    ) -> Result<()> {
        let state = serde_json::to_value(state)?;
        self.execute_action(ctx, target, "apply", Some(("state", state)))
            .await?;
        Ok(())
    }
}
