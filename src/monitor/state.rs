//! Monitor mode and status snapshot definitions

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operating mode of the monitor, process-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "attempt", rename_all = "snake_case")]
pub enum MonitorMode {
    /// Not started yet
    Idle,

    /// Opening the event feed
    Connecting,

    /// Event feed is open and being consumed
    Streaming,

    /// Waiting before reconnect attempt `n`
    Reconnecting(u32),

    /// Event feed given up on; periodic polling drives delivery.
    /// Only an explicit restart leaves this mode.
    Fallback,

    /// Shut down by `stop()`
    Stopped,
}

impl MonitorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorMode::Idle => "idle",
            MonitorMode::Connecting => "connecting",
            MonitorMode::Streaming => "streaming",
            MonitorMode::Reconnecting(_) => "reconnecting",
            MonitorMode::Fallback => "fallback",
            MonitorMode::Stopped => "stopped",
        }
    }
}

impl fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorMode::Reconnecting(attempt) => write!(f, "reconnecting (attempt {})", attempt),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Read-only view of one monitored session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Engine session ID
    pub session_id: String,
    /// Channel or thread that receives the session's output
    pub destination_id: String,
    /// Last successful fallback reconciliation
    pub last_checked: Option<DateTime<Utc>>,
    /// Messages settled so far (delivered, or discarded as user input)
    pub completed_messages: usize,
    /// Completed messages whose text was relayed
    pub relayed_messages: usize,
    /// Messages with undelivered text still buffered
    pub in_flight_messages: usize,
}
