//! Sessionrelay - Relays streamed output of coding agent sessions to chat destinations

pub mod cli;
pub mod config;
pub mod monitor;
pub mod session;
pub mod sink;
