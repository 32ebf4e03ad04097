//! CLI commands

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{Config, SinkKind};
use crate::monitor::{MonitorError, SessionMonitor};
use crate::session::opencode::ModelChoice;
use crate::session::{JobEngine, OpenCodeClient};
use crate::sink::{DiscordSink, LogSink, NotificationSink};

#[derive(Parser)]
#[command(name = "sessionrelay")]
#[command(about = "Relays streamed output of coding agent sessions to chat destinations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ~/.sessionrelay/config.yml)
    #[arg(long)]
    config: Option<String>,

    /// Engine base URL, overrides the config file
    #[arg(long)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay session output until interrupted
    Watch {
        /// SESSION_ID=DESTINATION_ID pair, repeatable
        #[arg(long = "session", value_parser = parse_binding, required = true)]
        sessions: Vec<(String, String)>,
    },

    /// List engine sessions
    Sessions,

    /// Create a new engine session
    Create,

    /// Send a message to a session
    Send {
        /// Session ID
        session_id: String,

        /// Message text
        text: String,

        /// Provider ID, used together with --model
        #[arg(long, requires = "model")]
        provider: Option<String>,

        /// Model ID
        #[arg(long, requires = "provider")]
        model: Option<String>,
    },

    /// Abort whatever a session is doing
    Abort {
        /// Session ID
        session_id: String,
    },

    /// Print a session's messages
    Messages {
        /// Session ID
        session_id: String,
    },
}

fn parse_binding(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((session, destination)) if !session.is_empty() && !destination.is_empty() => {
            Ok((session.to_string(), destination.to_string()))
        }
        _ => Err(format!("expected SESSION_ID=DESTINATION_ID, got `{}`", raw)),
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        config.engine.base_url = url;
    }

    let engine = Arc::new(OpenCodeClient::with_timeouts(
        config.engine.base_url.clone(),
        Duration::from_secs(config.engine.request_timeout_secs),
        Duration::from_secs(config.engine.connect_timeout_secs),
    ));

    // Create a multi-threaded runtime for CLI operations
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        execute(cli.command, &config, engine)
            .await
            .map_err(|e| match e.downcast_ref::<MonitorError>() {
                Some(MonitorError::NotFound { what: "Session", id }) => anyhow::anyhow!(
                    "Session `{}` not found. Please create a new session.",
                    id
                ),
                _ => e,
            })
    })
}

async fn execute(command: Commands, config: &Config, engine: Arc<OpenCodeClient>) -> Result<()> {
    match command {
        Commands::Watch { sessions } => watch(config, engine, sessions).await,

        Commands::Sessions => {
            let sessions = engine.list_sessions().await?;

            if sessions.is_empty() {
                println!("No sessions found");
            } else {
                for session in sessions {
                    println!(
                        "{} - {}",
                        session.id,
                        session.title.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(())
        }

        Commands::Create => {
            let session = engine.create_session().await?;
            println!("Created session: {}", session.id);
            Ok(())
        }

        Commands::Send {
            session_id,
            text,
            provider,
            model,
        } => {
            let model = provider.zip(model).map(|(provider_id, model_id)| ModelChoice {
                provider_id,
                model_id,
            });
            engine
                .send_message(&session_id, text.trim(), model.as_ref())
                .await?;
            println!("Sent message to session: {}", session_id);
            Ok(())
        }

        Commands::Abort { session_id } => {
            engine.abort(&session_id).await?;
            println!("Session {} has been stopped.", session_id);
            Ok(())
        }

        Commands::Messages { session_id } => {
            let messages = engine.list_messages(&session_id).await?;

            if messages.is_empty() {
                println!("No messages found");
            }
            for message in messages {
                println!("[{}] {}", message.info.role.as_str(), message.info.id);
                println!("{}\n", message.text());
            }
            Ok(())
        }
    }
}

fn build_sink(config: &Config) -> Result<Arc<dyn NotificationSink>> {
    match config.sink.kind {
        SinkKind::Log => Ok(Arc::new(LogSink)),
        SinkKind::Discord => {
            let token = config
                .sink
                .discord_token
                .clone()
                .context("Discord sink needs a bot token (sink.discord_token or DISCORD_BOT_TOKEN)")?;
            Ok(Arc::new(DiscordSink::with_api_url(
                token,
                config.sink.discord_api_url.clone(),
            )))
        }
    }
}

async fn watch(
    config: &Config,
    engine: Arc<OpenCodeClient>,
    sessions: Vec<(String, String)>,
) -> Result<()> {
    let sink = build_sink(config)?;

    if !engine.health_check().await {
        tracing::warn!("Engine at {} is not answering yet", engine.base_url());
    }

    let monitor = SessionMonitor::new(engine.clone(), sink, config.monitor_settings());

    for (session_id, destination_id) in &sessions {
        match engine.get_session(session_id).await {
            Err(e) if e.is_not_found() => {
                println!(
                    "Session `{}` not found. Please create a new session.",
                    session_id
                );
                continue;
            }
            Err(e) => tracing::warn!(session_id = %session_id, "Could not verify session: {}", e),
            Ok(_) => {}
        }
        monitor.add_session(destination_id, session_id);
    }

    if monitor.active_sessions_count() == 0 {
        anyhow::bail!("No sessions to monitor");
    }

    monitor.start();

    let mut mode = monitor.subscribe_mode();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            changed = mode.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *mode.borrow_and_update();
                tracing::info!("Monitor mode: {}", current);
            }
        }
    }

    monitor.stop().await;

    for info in monitor.session_info() {
        println!(
            "{} -> {} ({} messages relayed)",
            info.session_id, info.destination_id, info.relayed_messages
        );
    }
    Ok(())
}
