//! Mock HTTP connector for the HTTP executor
//!
//! Answers the `/v1/{type}/{action}` endpoints without a real connector running.

use serde_json::{json, Value};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

pub struct MockConnectorServer {
    pub server: MockServer,
    pub base_url: String,
}

impl MockConnectorServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base_url = server.uri();
        Self { server, base_url }
    }

    /// `{"success": true}` for `action` on `target_type`
    pub async fn mock_success(&self, target_type: &str, action: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/v1/{}/{}", target_type, action)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&self.server)
            .await;
    }

    /// Success only when the bearer key matches
    pub async fn mock_authenticated_success(&self, target_type: &str, action: &str, api_key: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/v1/{}/{}", target_type, action)))
            .and(header("Authorization", format!("Bearer {}", api_key).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_capture(&self, target_type: &str, is_live: bool, state: Value) {
        Mock::given(method("POST"))
            .and(path(format!("/v1/{}/capture", target_type)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "is_live": is_live,
                "state": state
            })))
            .mount(&self.server)
            .await;
    }

    /// `{"success": false, "error": ...}` with HTTP 200
    pub async fn mock_rejection(&self, target_type: &str, action: &str, error: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/v1/{}/{}", target_type, action)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error": error
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_server_error(&self, target_type: &str, action: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/v1/{}/{}", target_type, action)))
            .respond_with(ResponseTemplate::new(500).set_body_string("connector exploded"))
            .mount(&self.server)
            .await;
    }

    pub async fn received_bodies(&self) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|r| serde_json::from_slice(&r.body).ok())
            .collect()
    }
}
