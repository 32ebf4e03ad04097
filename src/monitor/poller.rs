//! Periodic reconciliation used once the event feed is given up on

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::connector::wait_for_shutdown;
use super::error::Result;
use super::registry::SessionRegistry;
use crate::session::opencode::types::Role;
use crate::session::provider::JobEngine;
use crate::sink::{DeliveryOutcome, Dispatcher};

/// Totals for one polling cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub sessions_checked: usize,
    pub messages_delivered: usize,
    pub failures: usize,
}

pub struct FallbackPoller {
    engine: Arc<dyn JobEngine>,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
}

impl FallbackPoller {
    pub fn new(
        engine: Arc<dyn JobEngine>,
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<Dispatcher>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            registry,
            dispatcher,
            interval,
        }
    }

    /// Poll on every interval tick until shutdown. The first cycle runs
    /// immediately.
    pub async fn run(&self, shutdown: &mut watch::Receiver<bool>) {
        info!(interval = ?self.interval, "Fallback polling started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = wait_for_shutdown(shutdown) => break,
                _ = ticker.tick() => {}
            }

            let report = self.poll_once().await;
            debug!(?report, "Polling cycle finished");
        }

        info!("Fallback polling stopped");
    }

    /// Check every monitored session once
    pub async fn poll_once(&self) -> PollReport {
        let mut report = PollReport::default();

        for session in self.registry.snapshot() {
            report.sessions_checked += 1;

            match self
                .reconcile(&session.session_id, &session.destination_id)
                .await
            {
                Ok(delivered) => report.messages_delivered += delivered,
                Err(e) if e.is_not_found() => {
                    warn!(session_id = %session.session_id, "Session vanished, no longer monitoring");
                    self.registry.remove(&session.session_id);
                    report.failures += 1;
                }
                Err(e) => {
                    warn!(session_id = %session.session_id, "Failed to check session: {}", e);
                    report.failures += 1;
                }
            }
        }

        report
    }

    /// Deliver every completed assistant message not delivered yet, oldest first
    async fn reconcile(&self, session_id: &str, destination_id: &str) -> Result<usize> {
        let mut messages = self.engine.list_messages(session_id).await?;
        messages.sort_by(|a, b| {
            (a.info.time.created, &a.info.id).cmp(&(b.info.time.created, &b.info.id))
        });

        let mut delivered = 0;
        for message in messages {
            let info = &message.info;
            if info.role != Role::Assistant || !info.is_completed() {
                continue;
            }
            if self.registry.is_completed(session_id, &info.id)
                || !self.registry.mark_completed(session_id, &info.id)
            {
                continue;
            }

            // Skip whatever the feed already streamed out before the switch
            let text = message.text();
            let remainder = match self.registry.take_partial(session_id, &info.id) {
                Some(partial) => {
                    let unsent = partial.unsent(&text);
                    if unsent.len() + partial.sent().len() != text.len() {
                        warn!(
                            session_id,
                            message_id = %info.id,
                            "Streamed text diverged from the final message, resending from the difference"
                        );
                    }
                    unsent
                }
                None => text.as_str(),
            };

            debug!(session_id, message_id = %info.id, "Delivering completed message");
            match self.dispatcher.deliver(destination_id, remainder).await {
                DeliveryOutcome::DestinationGone => {
                    warn!(session_id, destination_id, "Destination gone, no longer monitoring");
                    self.registry.remove(session_id);
                    return Ok(delivered);
                }
                DeliveryOutcome::Delivered | DeliveryOutcome::Dropped => delivered += 1,
            }
        }

        self.registry.touch(session_id);
        Ok(delivered)
    }
}
