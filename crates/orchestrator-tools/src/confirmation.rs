use async_trait::async_trait;
use orchestrator_core::{random8, ConfirmationGate, Error};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Poll interval for an open confirmation (§4.4), matching the teacher's
/// interactive CLI's own HIL/confirmation check interval.
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Client for the tool-server's manual-mode confirmation channel: a
/// whitelisted tool call blocks until a human approves or rejects it
/// through this API.
pub struct ConfirmationClient {
    http: Client,
    base_url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Serialize)]
struct CreateConfirmationRequest<'a> {
    confirm_id: &'a str,
    task_id: &'a str,
    tool_name: &'a str,
    arguments: &'a Value,
}

#[derive(Deserialize)]
struct ConfirmationRecord {
    status: ConfirmationStatus,
}

#[derive(Serialize)]
struct RespondRequest {
    approved: bool,
}

impl ConfirmationClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn create(
        &self,
        confirm_id: &str,
        task_id: &str,
        tool_name: &str,
        arguments: &Value,
    ) -> Result<(), Error> {
        self.http
            .post(format!("{}/api/tool-confirmation/create", self.base_url))
            .json(&CreateConfirmationRequest {
                confirm_id,
                task_id,
                tool_name,
                arguments,
            })
            .send()
            .await
            .map_err(|e| Error::network(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::network(e.to_string()))?;
        Ok(())
    }

    pub async fn get(&self, confirm_id: &str) -> Result<ConfirmationStatus, Error> {
        let response = self
            .http
            .get(format!(
                "{}/api/tool-confirmation/{}",
                self.base_url, confirm_id
            ))
            .send()
            .await
            .map_err(|e| Error::network(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::network(e.to_string()))?;
        let record: ConfirmationRecord = response
            .json()
            .await
            .map_err(|e| Error::serialization(e.to_string()))?;
        Ok(record.status)
    }

    pub async fn respond(&self, confirm_id: &str, approved: bool) -> Result<(), Error> {
        self.http
            .post(format!(
                "{}/api/tool-confirmation/respond/{}",
                self.base_url, confirm_id
            ))
            .json(&RespondRequest { approved })
            .send()
            .await
            .map_err(|e| Error::network(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::network(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ConfirmationGate for ConfirmationClient {
    async fn await_approval(
        &self,
        task_id: &str,
        tool_name: &str,
        arguments: &Value,
    ) -> Result<bool, Error> {
        let confirm_id = format!("confirm-{}", random8());
        self.create(&confirm_id, task_id, tool_name, arguments).await?;

        loop {
            match self.get(&confirm_id).await? {
                ConfirmationStatus::Approved => return Ok(true),
                ConfirmationStatus::Rejected => return Ok(false),
                ConfirmationStatus::Pending => {
                    tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;
                }
            }
        }
    }
}
