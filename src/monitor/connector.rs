//! Event feed connection with reconnect and backoff

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::decoder::EventStream;
use super::error::MonitorError;
use super::router::EventRouter;
use super::state::MonitorMode;
use crate::session::provider::{EventFeed, JobEngine};

/// How the connector retries a lost or refused feed
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry; doubles with every further attempt
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up on streaming
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Why the connector returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorExit {
    /// Shutdown was requested
    Stopped,
    /// Retry budget exhausted; the caller should switch to polling
    Fallback,
}

enum StreamEnd {
    Shutdown,
    Closed,
    Failed(MonitorError),
}

/// Owns the event feed connection and drives decode, route, deliver
pub struct StreamConnector {
    engine: Arc<dyn JobEngine>,
    router: Arc<EventRouter>,
    policy: ReconnectPolicy,
    mode: Arc<watch::Sender<MonitorMode>>,
}

impl StreamConnector {
    pub fn new(
        engine: Arc<dyn JobEngine>,
        router: Arc<EventRouter>,
        policy: ReconnectPolicy,
        mode: Arc<watch::Sender<MonitorMode>>,
    ) -> Self {
        Self {
            engine,
            router,
            policy,
            mode,
        }
    }

    /// Run until shutdown or until the retry budget is spent
    pub async fn run(&self, shutdown: &mut watch::Receiver<bool>) -> ConnectorExit {
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return ConnectorExit::Stopped;
            }

            self.set_mode(MonitorMode::Connecting);
            info!("Connecting to event stream...");

            let connected = tokio::select! {
                _ = wait_for_shutdown(shutdown) => return ConnectorExit::Stopped,
                result = self.engine.subscribe_events() => result,
            };

            match connected {
                Ok(feed) => {
                    failures = 0;
                    self.set_mode(MonitorMode::Streaming);
                    info!("Connected to event stream");

                    match self.consume(feed, shutdown).await {
                        StreamEnd::Shutdown => return ConnectorExit::Stopped,
                        StreamEnd::Closed => info!("Event stream ended"),
                        StreamEnd::Failed(e) => warn!("Error reading from event stream: {}", e),
                    }
                }
                Err(e) => {
                    warn!(attempt = failures + 1, "Failed to connect to event stream: {}", e);
                }
            }

            failures += 1;
            if failures >= self.policy.max_attempts {
                warn!(
                    failures,
                    "Giving up on event stream, switching to fallback polling"
                );
                self.set_mode(MonitorMode::Fallback);
                return ConnectorExit::Fallback;
            }

            let delay = self.policy.delay_for(failures);
            self.set_mode(MonitorMode::Reconnecting(failures));
            debug!(attempt = failures, ?delay, "Waiting before reconnect");

            tokio::select! {
                _ = wait_for_shutdown(shutdown) => return ConnectorExit::Stopped,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Read one connection until it ends. Dropping the feed closes it.
    async fn consume(&self, feed: EventFeed, shutdown: &mut watch::Receiver<bool>) -> StreamEnd {
        let mut events = EventStream::new(feed);

        loop {
            let next = tokio::select! {
                _ = wait_for_shutdown(shutdown) => return StreamEnd::Shutdown,
                next = events.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    let kind = event.kind().to_string();
                    let action = self.router.route(event).await;
                    debug!(kind = %kind, ?action, "Routed event");
                }
                Some(Err(e)) => return StreamEnd::Failed(e),
                None => return StreamEnd::Closed,
            }
        }
    }

    fn set_mode(&self, mode: MonitorMode) {
        self.mode.send_replace(mode);
    }
}

/// Resolves once shutdown is requested or the requester is gone
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
