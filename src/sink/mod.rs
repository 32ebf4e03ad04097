//! Notification sinks
//! Where relayed session output ends up

pub mod discord;
pub mod dispatcher;

use async_trait::async_trait;
use tracing::info;

use crate::monitor::error::Result;

pub use discord::DiscordSink;
pub use dispatcher::{DeliveryOutcome, DeliveryPolicy, Dispatcher};

/// Trait for delivering text to a named destination
///
/// Callers pre-chunk text to the destination's maximum message size.
/// A vanished destination must be reported as `MonitorError::NotFound`.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, destination_id: &str, text: &str) -> Result<()>;
}

/// Sink that writes fragments to stdout, for running without a chat backend
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, destination_id: &str, text: &str) -> Result<()> {
        info!(destination_id, chars = text.chars().count(), "Relaying fragment");
        println!("[{}] {}", destination_id, text);
        Ok(())
    }
}
