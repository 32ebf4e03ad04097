//! Error taxonomy for the relay

/// Errors that can occur while monitoring and relaying sessions
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Connection refused, reset, or dropped mid-read
    #[error("Connection error: {0}")]
    Transport(String),

    /// A frame or payload that could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// The engine answered with a non-success status
    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("Delivery failed: {0}")]
    Sink(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl MonitorError {
    pub fn session_not_found(id: impl Into<String>) -> Self {
        MonitorError::NotFound {
            what: "Session",
            id: id.into(),
        }
    }

    pub fn destination_not_found(id: impl Into<String>) -> Self {
        MonitorError::NotFound {
            what: "Destination",
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MonitorError::NotFound { .. })
    }

    /// Whether retrying the same request later could succeed
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MonitorError::Transport(_) | MonitorError::Timeout(_) | MonitorError::Api { .. }
        )
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MonitorError::Protocol(err.to_string())
        } else {
            MonitorError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Protocol(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
