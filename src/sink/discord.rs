//! Discord REST sink

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use super::NotificationSink;
use crate::monitor::error::{MonitorError, Result};

pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

/// Posts fragments as bot messages into a channel or thread
pub struct DiscordSink {
    client: Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
}

impl DiscordSink {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_url(token, DEFAULT_API_URL)
    }

    pub fn with_api_url(token: impl Into<String>, api_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for DiscordSink {
    async fn deliver(&self, destination_id: &str, text: &str) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.api_url, destination_id);

        let response = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bot {}", self.token))
            .json(&CreateMessage { content: text })
            .send()
            .await
            .map_err(|e| MonitorError::Sink(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(destination_id, "Posted message");
            return Ok(());
        }

        if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
            return Err(MonitorError::destination_not_found(destination_id));
        }

        let body = response.text().await.unwrap_or_default();
        Err(MonitorError::Sink(format!("{} - {}", status, body)))
    }
}
