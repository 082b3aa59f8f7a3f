//! API client for a running rate plan worker

use anyhow::{Context, Result};
use optimizer_lib::{FinalResult, InstanceStatus};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the worker's HTTP surface
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// GET `path`, mapping 404 to `None`
    pub async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response
            .json()
            .await
            .map(Some)
            .context("Failed to parse response")
    }

    pub async fn instance(&self, instance_id: &str) -> Result<Option<InstanceView>> {
        self.get_optional(&format!("instances/{}", instance_id)).await
    }
}

/// Instance status as served by `/instances/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceView {
    pub instance_id: String,
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub devices: usize,
    pub plans: usize,
    pub sequences: usize,
    pub units: usize,
    #[serde(default)]
    pub unit_statuses: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<FinalResult>,
}
