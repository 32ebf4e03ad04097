//! Relay configuration module
//! Handles loading, saving, and defaulting the config file

pub mod config;

pub use config::{Config, EngineConfig, PollConfig, SinkConfig, SinkKind, StreamConfig};
