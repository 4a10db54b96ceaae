//! HTTP access to the remote dashboard endpoint.

use std::time::Duration;

use reqwest::Url;
use savings_core::error::{DashboardError, Result};
use serde_json::Value;
use tracing::debug;

/// Thin async JSON client with a bounded request timeout.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl ApiClient {
    /// Build a client whose requests (connection included) give up after
    /// `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("savings-dashboard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DashboardError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET `endpoint` and parse the body as JSON.
    ///
    /// Fails with [`DashboardError::Config`] for a malformed URL,
    /// [`DashboardError::Transport`] when the request fails, times out or the
    /// status is not 2xx, and [`DashboardError::JsonParse`] when a successful
    /// body is not JSON.
    pub async fn fetch_json(&self, endpoint: &str) -> Result<Value> {
        let url = Url::parse(endpoint).map_err(|e| {
            DashboardError::Config(format!("invalid endpoint URL '{endpoint}': {e}"))
        })?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DashboardError::Transport {
                status: Some(status.as_u16()),
                status_text: status
                    .canonical_reason()
                    .map(str::to_string)
                    .unwrap_or_else(|| status.as_str().to_string()),
            });
        }

        let body = response.text().await.map_err(transport_error)?;
        debug!(status = status.as_u16(), bytes = body.len(), "received API response");

        Ok(serde_json::from_str(&body)?)
    }
}

fn transport_error(e: reqwest::Error) -> DashboardError {
    let status_text = if e.is_timeout() {
        "request timed out".to_string()
    } else {
        e.to_string()
    };
    DashboardError::Transport {
        status: e.status().map(|s| s.as_u16()),
        status_text,
    }
}
