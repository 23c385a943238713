use orchestrator_core::{Error, ToolServerClient};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Client for the external tool-server's task/tool HTTP API.
///
/// Tool timeouts are long on purpose — some tools run for minutes — so this
/// client carries no request timeout of its own beyond what `reqwest`
/// defaults to when none is configured.
pub struct HttpToolServerClient {
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateTaskRequest<'a> {
    task_id: &'a str,
}

#[derive(Deserialize)]
struct ToolExecuteResponse {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct ToolExecuteRequest<'a> {
    task_id: &'a str,
    tool_name: &'a str,
    params: &'a Value,
}

impl HttpToolServerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn with_client(base_url: impl Into<String>, http: Client) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Idempotent workspace creation, `POST /api/task/create`.
    pub async fn create_task(&self, task_id: &str) -> Result<(), Error> {
        let response = self
            .http
            .post(format!("{}/api/task/create", self.base_url))
            .json(&CreateTaskRequest { task_id })
            .send()
            .await
            .map_err(|e| Error::network(e.to_string()))?;
        response
            .error_for_status()
            .map_err(|e| Error::network(e.to_string()))?;
        Ok(())
    }

    /// Existence check, `GET /api/task/{task_id}/status`.
    pub async fn task_status(&self, task_id: &str) -> Result<bool, Error> {
        let response = self
            .http
            .get(format!("{}/api/task/{}/status", self.base_url, task_id))
            .send()
            .await
            .map_err(|e| Error::network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

#[async_trait::async_trait]
impl ToolServerClient for HttpToolServerClient {
    async fn execute(
        &self,
        task_id: &str,
        tool_name: &str,
        params: &Value,
    ) -> Result<Value, Error> {
        let response = self
            .http
            .post(format!("{}/api/tool/execute", self.base_url))
            .timeout(Duration::from_secs(600))
            .json(&ToolExecuteRequest {
                task_id,
                tool_name,
                params,
            })
            .send()
            .await
            .map_err(|e| Error::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::tool_server(tool_name, format!("{}: {}", status, body)));
        }

        let decoded: ToolExecuteResponse = response
            .json()
            .await
            .map_err(|e| Error::serialization(e.to_string()))?;

        if decoded.success {
            Ok(decoded.data.unwrap_or(Value::Null))
        } else {
            Err(Error::tool_server(
                tool_name,
                decoded.error.unwrap_or_else(|| "unknown tool error".to_string()),
            ))
        }
    }
}
