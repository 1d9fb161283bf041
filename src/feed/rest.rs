//! Level-3 snapshot over HTTP

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{messages::BookSnapshot, SnapshotSource};
use crate::config::{level3_url, ReplicaConfig};
use crate::error::{ReplicaError, Result};

#[derive(Clone)]
pub struct RestSnapshotClient {
    client: Client,
    base_url: String,
}

impl RestSnapshotClient {
    pub fn new(config: &ReplicaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.snapshot_timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| ReplicaError::Connection(format!("build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.rest_url.clone(),
        })
    }
}

#[async_trait]
impl SnapshotSource for RestSnapshotClient {
    async fn fetch(&self, symbol: &str) -> Result<BookSnapshot> {
        let url = level3_url(&self.base_url, symbol);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ReplicaError::transport(format!("GET {}: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ReplicaError::transport(format!(
                "GET {} {}: {}",
                url, status, text
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ReplicaError::transport(format!("read snapshot body: {}", e)))?;

        debug!(symbol, bytes = body.len(), "Fetched level-3 snapshot");

        BookSnapshot::from_json(&body)
    }
}
