//! Chunked, bounded delivery to a notification sink

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use super::NotificationSink;
use crate::monitor::chunker::{self, MAX_MESSAGE_LENGTH};
use crate::monitor::error::MonitorError;

/// Limits applied to every delivery
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Maximum characters per fragment
    pub max_message_len: usize,
    /// Time allowed for a single sink call
    pub timeout: Duration,
    /// Extra attempts after a failed call
    pub retries: u32,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_message_len: MAX_MESSAGE_LENGTH,
            timeout: Duration::from_secs(10),
            retries: 1,
        }
    }
}

/// Outcome of relaying a block of text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Every fragment was accepted (or there was nothing to send)
    Delivered,
    /// At least one fragment was dropped after the retry budget ran out
    Dropped,
    /// The destination no longer exists
    DestinationGone,
}

/// Splits text into fragments and hands them to the sink one by one
pub struct Dispatcher {
    sink: Arc<dyn NotificationSink>,
    policy: DeliveryPolicy,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, policy: DeliveryPolicy) -> Self {
        Self { sink, policy }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Deliver `text` to `destination_id`, in order.
    ///
    /// A fragment that keeps failing is dropped and the rest still go out;
    /// a vanished destination stops delivery right away.
    pub async fn deliver(&self, destination_id: &str, text: &str) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome::Delivered;

        for fragment in chunker::split(text, self.policy.max_message_len) {
            // Chat destinations reject blank messages
            if fragment.trim().is_empty() {
                continue;
            }
            match self.deliver_fragment(destination_id, &fragment).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    warn!(destination_id, "Destination vanished: {}", e);
                    return DeliveryOutcome::DestinationGone;
                }
                Err(e) => {
                    error!(
                        destination_id,
                        chars = fragment.chars().count(),
                        "Dropping fragment: {}",
                        e
                    );
                    outcome = DeliveryOutcome::Dropped;
                }
            }
        }

        outcome
    }

    async fn deliver_fragment(&self, destination_id: &str, fragment: &str) -> Result<(), MonitorError> {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(
                self.policy.timeout,
                self.sink.deliver(destination_id, fragment),
            )
            .await
            .unwrap_or(Err(MonitorError::Timeout(self.policy.timeout)));

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_not_found() || attempt >= self.policy.retries => return Err(e),
                Err(e) => {
                    attempt += 1;
                    warn!(destination_id, attempt, "Retrying delivery: {}", e);
                }
            }
        }
    }
}
