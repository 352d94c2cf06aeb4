//! Stream control endpoints
//!
//! ```text
//! GET  {base}/api/stream-pipe/{taskId}/stream   media bytes (ChunkReader)
//! GET  {base}/api/stream-pipe/{taskId}/status   StreamStatus JSON
//! POST {base}/api/stream-pipe/{taskId}/stop     StopResponse JSON
//! GET  {base}/api/download/{taskId}/sse         progress events
//! ```

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::registry::TaskId;

use super::config::ClientConfig;
use super::events::ProgressSubscriber;
use super::reader::ChunkReader;

/// Status of a server-side stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    /// Task id
    pub task_id: String,
    /// Producer status, e.g. `streaming` or `stopped`
    pub status: String,
    /// Seconds since the stream started
    #[serde(default)]
    pub uptime: Option<f64>,
    /// Producer-specific progress object
    #[serde(default)]
    pub progress: Option<serde_json::Value>,
    /// Last producer error
    #[serde(default)]
    pub error: Option<String>,
}

/// Answer to a stop request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    /// Task id
    pub task_id: String,
    /// New status, normally `stopped`
    pub status: String,
    /// Human readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// Error body returned by the server on non-success statuses
#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
    #[serde(default)]
    code: Option<String>,
}

/// HTTP client for the stream endpoints of one server
#[derive(Debug, Clone)]
pub struct StreamControl {
    client: reqwest::Client,
    config: ClientConfig,
}

impl StreamControl {
    /// Build a client from config
    ///
    /// Only the connect timeout applies client-wide; the stream itself is
    /// long-lived, so request timeouts are set per control call.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    /// Use an existing `reqwest` client
    pub fn with_client(client: reqwest::Client, config: ClientConfig) -> Self {
        Self { client, config }
    }

    /// Underlying HTTP client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// URL of the media byte stream
    pub fn stream_url(&self, task_id: &TaskId) -> String {
        format!("{}/api/stream-pipe/{}/stream", self.config.base_url, task_id)
    }

    /// URL of the progress event stream
    pub fn events_url(&self, task_id: &TaskId) -> String {
        format!("{}/api/download/{}/sse", self.config.base_url, task_id)
    }

    fn status_url(&self, task_id: &TaskId) -> String {
        format!("{}/api/stream-pipe/{}/status", self.config.base_url, task_id)
    }

    fn stop_url(&self, task_id: &TaskId) -> String {
        format!("{}/api/stream-pipe/{}/stop", self.config.base_url, task_id)
    }

    /// Fetch the stream status
    pub async fn status(&self, task_id: &TaskId) -> Result<StreamStatus> {
        let response = self
            .client
            .get(self.status_url(task_id))
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Ask the server to stop producing the stream
    pub async fn stop(&self, task_id: &TaskId) -> Result<StopResponse> {
        tracing::info!(task_id = %task_id, "Requesting stream stop");

        let response = self
            .client
            .post(self.stop_url(task_id))
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Open the media byte stream for incremental reading
    pub async fn open_stream(&self, task_id: &TaskId) -> Result<ChunkReader> {
        ChunkReader::open(&self.client, &self.stream_url(task_id)).await
    }

    /// Progress subscriber for a task, using the configured reconnect policy
    pub fn progress(&self, task_id: &TaskId) -> ProgressSubscriber {
        ProgressSubscriber::new(
            self.client.clone(),
            self.events_url(task_id),
            self.config.reconnect.clone(),
        )
    }
}

/// Turn a non-success response into [`Error::Transport`], preferring the
/// server's own error message over the canonical reason
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let canonical = status.canonical_reason().unwrap_or("Unknown").to_string();
    let reason = match response.json::<ApiError>().await {
        Ok(body) => match body.code {
            Some(code) => format!("{} ({})", body.error, code),
            None => body.error,
        },
        Err(_) => canonical,
    };

    tracing::debug!(status = status.as_u16(), reason = %reason, "Control request rejected");
    Err(Error::status(status.as_u16(), reason))
}
