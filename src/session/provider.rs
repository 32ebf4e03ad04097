//! Job engine trait

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use super::opencode::types::{Message, ModelChoice, SessionSummary};
use crate::monitor::error::Result;

/// Raw bytes of the engine's event feed, in arrival order
pub type EventFeed = BoxStream<'static, Result<Bytes>>;

/// Client for the external engine that runs assistant sessions
#[async_trait]
pub trait JobEngine: Send + Sync {
    /// Create a new session
    async fn create_session(&self) -> Result<SessionSummary>;

    /// Fetch a session, `NotFound` if it does not exist
    async fn get_session(&self, session_id: &str) -> Result<SessionSummary>;

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>>;

    /// Fetch every message of a session with its parts
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    async fn get_message(&self, session_id: &str, message_id: &str) -> Result<Message>;

    /// Send user text to a session
    async fn send_message(
        &self,
        session_id: &str,
        text: &str,
        model: Option<&ModelChoice>,
    ) -> Result<()>;

    /// Abort whatever the session is doing
    async fn abort(&self, session_id: &str) -> Result<()>;

    /// Open the long-lived event feed
    async fn subscribe_events(&self) -> Result<EventFeed>;

    /// Check if the engine is reachable
    async fn health_check(&self) -> bool;
}
