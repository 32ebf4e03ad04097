//! OpenCode engine client

pub mod client;
pub mod types;

pub use client::OpenCodeClient;
pub use types::{Message, MessageInfo, ModelChoice, Part, Role, SessionSummary};
