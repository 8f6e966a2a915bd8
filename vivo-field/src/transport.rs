//! Server transport
//!
//! [`SyncTransport`] is the seam between the coordinator and the network.
//! [`HttpTransport`] talks to vivo-server over HTTP; tests plug in
//! in-process implementations.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use vivo_common::wire::{MutationEnvelope, MutationOutcome, PushRequest, PushResponse, Snapshot};

use crate::error::{Result, SyncError};

#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Send mutations in order; one outcome per mutation
    async fn push(&self, mutations: &[MutationEnvelope]) -> Result<Vec<MutationOutcome>>;

    /// Fetch the current snapshot of one experiment
    async fn pull(&self, experiment_id: i64) -> Result<Snapshot>;

    /// Succeeds when the server is reachable
    async fn health(&self) -> Result<()>;
}

/// reqwest-based transport for vivo-server
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("vivo-field/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(SyncError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push(&self, mutations: &[MutationEnvelope]) -> Result<Vec<MutationOutcome>> {
        let url = self.url("/api/sync/push");
        debug!(url = %url, mutations = mutations.len(), "Pushing mutations");

        let request = PushRequest {
            mutations: mutations.to_vec(),
        };
        let response = self.http_client.post(&url).json(&request).send().await?;
        let response = Self::check_status(response).await?;

        let body: PushResponse = response.json().await.map_err(|e| SyncError::Decode(e.to_string()))?;
        if body.results.len() != mutations.len() {
            return Err(SyncError::Decode(format!(
                "expected {} results, got {}",
                mutations.len(),
                body.results.len()
            )));
        }
        Ok(body.results)
    }

    async fn pull(&self, experiment_id: i64) -> Result<Snapshot> {
        let url = self.url(&format!("/api/sync/pull/{}", experiment_id));
        debug!(url = %url, "Pulling snapshot");

        let response = self.http_client.get(&url).send().await?;
        let response = Self::check_status(response).await?;
        response.json().await.map_err(|e| SyncError::Decode(e.to_string()))
    }

    async fn health(&self) -> Result<()> {
        let response = self.http_client.get(self.url("/health")).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }
}
