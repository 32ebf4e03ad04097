//! Relay configuration management
//! Handles loading and saving the config file

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::monitor::chunker::MAX_MESSAGE_LENGTH;
use crate::monitor::{MonitorSettings, ReconnectPolicy};
use crate::session::opencode::client::DEFAULT_BASE_URL;
use crate::sink::discord::DEFAULT_API_URL;
use crate::sink::DeliveryPolicy;

/// Relay configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Job engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Event feed reconnect settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Fallback polling settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Where output goes
    #[serde(default)]
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Print fragments to stdout
    Log,
    /// Post fragments into Discord channels or threads
    Discord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_kind")]
    pub kind: SinkKind,
    /// Bot token, falls back to `DISCORD_BOT_TOKEN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_token: Option<String>,
    #[serde(default = "default_discord_api_url")]
    pub discord_api_url: String,
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
    #[serde(default = "default_sink_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_sink_kind() -> SinkKind {
    SinkKind::Log
}

fn default_discord_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_max_message_len() -> usize {
    MAX_MESSAGE_LENGTH
}

fn default_sink_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    1
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: default_sink_kind(),
            discord_token: None,
            discord_api_url: default_discord_api_url(),
            max_message_len: default_max_message_len(),
            timeout_secs: default_sink_timeout(),
            retries: default_retries(),
        }
    }
}

impl Config {
    /// Load config from the default location or specified path, then
    /// apply environment overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = Self::config_path(path)?;

        let mut config = if config_path.exists() {
            let raw = fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Config =
                serde_yaml::from_str(&raw).context("Failed to parse config file")?;
            debug!("Loaded config from {:?}", config_path);
            config
        } else {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Config::default();
            config.save(path)?;
            config
        };

        config.apply_env();
        Ok(config)
    }

    /// Save config to the default location or specified path
    pub fn save(&self, path: Option<&str>) -> Result<()> {
        let config_path = Self::config_path(path)?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(&self)?;
        fs::write(&config_path, content).context("Failed to write config file")?;

        info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Get the config file path
    fn config_path(path: Option<&str>) -> Result<PathBuf> {
        if let Some(p) = path {
            return Ok(PathBuf::from(p));
        }

        if let Ok(env_path) = std::env::var("SESSIONRELAY_CONFIG") {
            return Ok(PathBuf::from(env_path));
        }

        let home = dirs::home_dir().context("Cannot find home directory")?;
        Ok(home.join(".sessionrelay").join("config.yml"))
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("OPENCODE_API_URL") {
            if !url.trim().is_empty() {
                self.engine.base_url = url;
            }
        }
        if self.sink.discord_token.is_none() {
            self.sink.discord_token = std::env::var("DISCORD_BOT_TOKEN").ok();
        }
    }

    /// Runtime settings for the session monitor
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(self.stream.base_delay_ms),
                max_delay: Duration::from_millis(self.stream.max_delay_ms),
                max_attempts: self.stream.max_attempts.max(1),
            },
            poll_interval: Duration::from_secs(self.poll.interval_secs.max(1)),
            delivery: DeliveryPolicy {
                max_message_len: self.sink.max_message_len,
                timeout: Duration::from_secs(self.sink.timeout_secs),
                retries: self.sink.retries,
            },
        }
    }
}
