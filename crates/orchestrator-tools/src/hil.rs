use orchestrator_core::Error;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client for the tool-server's human-in-loop workspace channel.
pub struct HilClient {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
pub struct HilWorkspace {
    pub hil_id: String,
    pub prompt: String,
    #[serde(default)]
    pub context: Value,
}

#[derive(Serialize)]
struct HilRespondRequest<'a> {
    response: &'a Value,
}

impl HilClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn workspace(&self, task_id: &str) -> Result<HilWorkspace, Error> {
        let response = self
            .http
            .get(format!("{}/api/hil/workspace/{}", self.base_url, task_id))
            .send()
            .await
            .map_err(|e| Error::network(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::network(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| Error::serialization(e.to_string()))
    }

    pub async fn respond(&self, hil_id: &str, response: &Value) -> Result<(), Error> {
        self.http
            .post(format!("{}/api/hil/respond/{}", self.base_url, hil_id))
            .json(&HilRespondRequest { response })
            .send()
            .await
            .map_err(|e| Error::network(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::network(e.to_string()))?;
        Ok(())
    }
}
