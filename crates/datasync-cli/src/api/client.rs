//! HTTP API client for the Datasync server

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::api::{endpoints, types::*};
use crate::error::{CliError, Result};

/// Default timeout for API requests in seconds.
/// Can be overridden via DATASYNC_API_TIMEOUT_SECS.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// A decoded payload together with the body it came from
#[derive(Debug, Clone)]
pub struct Reply<T> {
    pub data: T,
    pub raw: Value,
}

/// API client for the Datasync server
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let timeout_secs = std::env::var("DATASYNC_API_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_API_TIMEOUT_SECS);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Server and database health
    ///
    /// A 503 still carries a health body, so it is not treated as an error.
    pub async fn health(&self) -> Result<Reply<HealthStatus>> {
        let url = endpoints::health_url(&self.base_url);
        let response = self.send(self.client.get(&url), &url).await?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            return Err(Self::error_from(status, response).await);
        }
        let raw: Value = response.json().await?;
        let data = serde_json::from_value(raw.clone())?;
        Ok(Reply { data, raw })
    }

    /// Start a workflow; `input` is passed to the server unchanged
    pub async fn start_workflow(&self, input: &Value) -> Result<Reply<StartedWorkflow>> {
        let url = endpoints::workflows_url(&self.base_url);
        self.call(self.client.post(&url).json(input), &url).await
    }

    pub async fn workflow_status(&self, workflow_id: &str) -> Result<Reply<WorkflowStatus>> {
        let url = endpoints::workflow_url(&self.base_url, workflow_id);
        self.call(self.client.get(&url), &url).await
    }

    pub async fn list_workflows(&self, limit: usize) -> Result<Reply<Vec<WorkflowStatus>>> {
        let url = endpoints::workflow_list_url(&self.base_url, limit);
        self.call(self.client.get(&url), &url).await
    }

    /// Send `pause`, `resume` or `cancel`
    pub async fn signal(&self, workflow_id: &str, signal: &str) -> Result<Reply<SignalAccepted>> {
        let url = endpoints::workflow_signal_url(&self.base_url, workflow_id, signal);
        self.call(self.client.post(&url), &url).await
    }

    pub async fn catalog(&self, connection_id: &str) -> Result<Reply<Catalog>> {
        let url = endpoints::catalog_url(&self.base_url, connection_id);
        self.call(self.client.get(&url), &url).await
    }

    pub async fn quality_report(&self, connection_id: &str) -> Result<Reply<QualityReport>> {
        let url = endpoints::quality_report_url(&self.base_url, connection_id);
        self.call(self.client.get(&url), &url).await
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<reqwest::Response> {
        debug!(url = %url, "sending request");
        request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                CliError::Unreachable {
                    url: self.base_url.clone(),
                    source: e,
                }
            } else {
                CliError::Http(e)
            }
        })
    }

    /// Send, check the status and unwrap the `data` envelope
    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder, url: &str) -> Result<Reply<T>> {
        let response = self.send(request, url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from(status, response).await);
        }

        let raw: Value = response.json().await?;
        let envelope: ApiResponse<T> = serde_json::from_value(raw.clone())?;
        if !envelope.success {
            return Err(CliError::api("UNKNOWN", "server reported failure without an error payload"));
        }
        Ok(Reply {
            data: envelope.data,
            raw,
        })
    }

    async fn error_from(status: StatusCode, response: reqwest::Response) -> CliError {
        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(parsed) => (parsed.error.code, parsed.error.message),
            Err(_) if body.trim().is_empty() => (status.as_str().to_string(), status.to_string()),
            Err(_) => (status.as_str().to_string(), body),
        };
        debug!(status = %status, code = %code, "request rejected");

        if status == StatusCode::NOT_FOUND {
            CliError::NotFound(message)
        } else {
            CliError::api(code, message)
        }
    }
}
