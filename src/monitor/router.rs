//! Routes decoded events to monitored sessions
//!
//! Streaming text is flushed as soon as it contains complete lines; the
//! message's completion event then flushes whatever trailing partial line
//! is left. `SessionRegistry::mark_completed` is the single gate that
//! keeps the two paths (and the fallback poller) from sending twice.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::decoder::EngineEvent;
use super::registry::{PartText, SessionRegistry};
use crate::session::opencode::types::Role;
use crate::sink::{DeliveryOutcome, Dispatcher};

/// What routing an event ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    /// Untracked session, irrelevant kind, or duplicate
    Ignored,
    /// Text was buffered, no complete line yet
    Buffered,
    /// Complete lines were sent
    Flushed,
    /// One or more messages were completed
    Completed,
    /// The session was deregistered
    Removed,
}

pub struct EventRouter {
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl EventRouter {
    pub fn new(registry: Arc<SessionRegistry>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    pub async fn route(&self, event: EngineEvent) -> RouteAction {
        let Some(session_id) = event.session_id().map(str::to_string) else {
            return RouteAction::Ignored;
        };
        let Some(destination_id) = self.registry.destination(&session_id) else {
            return RouteAction::Ignored;
        };

        match event {
            EngineEvent::MessageUpdated {
                message_id, role, ..
            } if role != Role::Assistant => {
                // Only assistant output is relayed; settle the rest so its parts are ignored
                self.registry.settle(&session_id, &message_id);
                RouteAction::Ignored
            }
            EngineEvent::MessageUpdated {
                message_id,
                role: Role::Assistant,
                completed: true,
                ..
            } => {
                self.complete_message(&session_id, &destination_id, &message_id)
                    .await
            }
            EngineEvent::MessagePartUpdated {
                message_id,
                part_id,
                part_kind,
                text,
                delta,
                ..
            } if part_kind == "text" => {
                self.append_text(
                    &session_id,
                    &destination_id,
                    &message_id,
                    part_id.as_deref(),
                    text.as_deref(),
                    delta.as_deref(),
                )
                .await
            }
            EngineEvent::SessionIdle { .. } => {
                let mut action = RouteAction::Ignored;
                for message_id in self.registry.in_flight(&session_id) {
                    match self
                        .complete_message(&session_id, &destination_id, &message_id)
                        .await
                    {
                        RouteAction::Removed => return RouteAction::Removed,
                        RouteAction::Completed => action = RouteAction::Completed,
                        _ => {}
                    }
                }
                action
            }
            EngineEvent::SessionDeleted { .. } => {
                info!(session_id, "Session deleted upstream, no longer monitoring");
                self.registry.remove(&session_id);
                RouteAction::Removed
            }
            _ => RouteAction::Ignored,
        }
    }

    async fn append_text(
        &self,
        session_id: &str,
        destination_id: &str,
        message_id: &str,
        part_id: Option<&str>,
        text: Option<&str>,
        delta: Option<&str>,
    ) -> RouteAction {
        // Parts without an ID are folded into one anonymous part
        let (part_id, update) = match (part_id, delta, text) {
            (part_id, Some(delta), _) => (part_id.unwrap_or_default(), PartText::Append(delta)),
            (Some(part_id), None, Some(text)) => (part_id, PartText::Replace(text)),
            (None, None, Some(text)) => ("", PartText::Append(text)),
            (_, None, None) => return RouteAction::Ignored,
        };

        if self
            .registry
            .append_partial(session_id, message_id, part_id, update)
            .is_none()
        {
            return RouteAction::Ignored;
        }

        match self.registry.drain_complete_lines(session_id, message_id) {
            Some(lines) => {
                debug!(session_id, message_id, bytes = lines.len(), "Flushing complete lines");
                self.send(session_id, destination_id, &lines, RouteAction::Flushed)
                    .await
            }
            None => RouteAction::Buffered,
        }
    }

    async fn complete_message(
        &self,
        session_id: &str,
        destination_id: &str,
        message_id: &str,
    ) -> RouteAction {
        if !self.registry.mark_completed(session_id, message_id) {
            return RouteAction::Ignored;
        }

        let residual = self
            .registry
            .take_partial(session_id, message_id)
            .map(|partial| partial.unsent(&partial.text()).to_string())
            .unwrap_or_default();

        debug!(session_id, message_id, "Message completed");
        self.send(session_id, destination_id, &residual, RouteAction::Completed)
            .await
    }

    async fn send(
        &self,
        session_id: &str,
        destination_id: &str,
        text: &str,
        on_success: RouteAction,
    ) -> RouteAction {
        match self.dispatcher.deliver(destination_id, text).await {
            DeliveryOutcome::DestinationGone => {
                warn!(session_id, destination_id, "Destination gone, no longer monitoring");
                self.registry.remove(session_id);
                RouteAction::Removed
            }
            DeliveryOutcome::Delivered | DeliveryOutcome::Dropped => on_success,
        }
    }
}
