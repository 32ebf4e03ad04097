//! OpenCode HTTP API client

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::types::{Message, ModelChoice, SendMessageRequest, SessionSummary, TextPartInput};
use crate::monitor::error::{MonitorError, Result};
use crate::session::provider::{EventFeed, JobEngine};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:4096";

/// OpenCode API client
pub struct OpenCodeClient {
    client: Client,
    /// No overall timeout: the event feed stays open indefinitely
    stream_client: Client,
    base_url: String,
}

impl OpenCodeClient {
    /// Create a new OpenCode client with default timeouts
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeouts(base_url, Duration::from_secs(30), Duration::from_secs(5))
    }

    pub fn with_timeouts(
        base_url: impl Into<String>,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|_| Client::new()); // Fallback if config fails

        let stream_client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            stream_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, session_id: Option<&str>) -> Result<T> {
        let response = self.client.get(self.url(path)).send().await?;
        let response = check_status(response, session_id).await?;
        Ok(response.json().await?)
    }
}

/// Map non-success responses onto the error taxonomy
async fn check_status(response: Response, session_id: Option<&str>) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::NOT_FOUND {
        if let Some(id) = session_id {
            return Err(MonitorError::session_not_found(id));
        }
    }

    let body = response.text().await.unwrap_or_default();
    Err(MonitorError::Api {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl JobEngine for OpenCodeClient {
    async fn create_session(&self) -> Result<SessionSummary> {
        let response = self
            .client
            .post(self.url("/session"))
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let session: SessionSummary = check_status(response, None).await?.json().await?;
        info!("Created OpenCode session: {}", session.id);
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionSummary> {
        self.get_json(&format!("/session/{}", session_id), Some(session_id))
            .await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.get_json("/session", None).await
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        self.get_json(&format!("/session/{}/message", session_id), Some(session_id))
            .await
    }

    async fn get_message(&self, session_id: &str, message_id: &str) -> Result<Message> {
        let path = format!("/session/{}/message/{}", session_id, message_id);
        let response = self.client.get(self.url(&path)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(MonitorError::NotFound {
                what: "Message",
                id: message_id.to_string(),
            });
        }

        Ok(check_status(response, Some(session_id)).await?.json().await?)
    }

    async fn send_message(
        &self,
        session_id: &str,
        text: &str,
        model: Option<&ModelChoice>,
    ) -> Result<()> {
        let request = SendMessageRequest {
            parts: vec![TextPartInput {
                kind: "text",
                text: text.to_string(),
            }],
            provider_id: model.map(|m| m.provider_id.clone()),
            model_id: model.map(|m| m.model_id.clone()),
        };

        debug!("Sending message to OpenCode session: {}", session_id);

        // The engine answers only once the assistant turn is over
        let response = self
            .stream_client
            .post(self.url(&format!("/session/{}/message", session_id)))
            .json(&request)
            .send()
            .await?;

        check_status(response, Some(session_id)).await?;
        Ok(())
    }

    async fn abort(&self, session_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/session/{}/abort", session_id)))
            .send()
            .await?;

        check_status(response, Some(session_id)).await?;
        info!("Aborted OpenCode session: {}", session_id);
        Ok(())
    }

    async fn subscribe_events(&self) -> Result<EventFeed> {
        let response = self
            .stream_client
            .get(self.url("/event"))
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let response = check_status(response, None).await?;

        let feed = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| MonitorError::Transport(e.to_string())));
        Ok(feed.boxed())
    }

    async fn health_check(&self) -> bool {
        match self.client.get(self.url("/config")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("OpenCode health check failed: {}", e);
                false
            }
        }
    }
}

impl Default for OpenCodeClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}
