//! Session monitor: the public face of the relay
//!
//! Owns the registry and the single background activity. That activity
//! runs the streaming connector and, if the connector gives up, the
//! fallback poller; the two never run at the same time.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::connector::{ConnectorExit, ReconnectPolicy, StreamConnector};
use super::poller::FallbackPoller;
use super::registry::SessionRegistry;
use super::router::EventRouter;
use super::state::{MonitorMode, SessionInfo};
use crate::session::provider::JobEngine;
use crate::sink::{DeliveryPolicy, Dispatcher, NotificationSink};

/// Runtime knobs of the monitor
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub reconnect: ReconnectPolicy,
    pub poll_interval: Duration,
    pub delivery: DeliveryPolicy,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            poll_interval: Duration::from_secs(30),
            delivery: DeliveryPolicy::default(),
        }
    }
}

struct RunningTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct SessionMonitor {
    engine: Arc<dyn JobEngine>,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
    settings: MonitorSettings,
    mode: Arc<watch::Sender<MonitorMode>>,
    task: Mutex<Option<RunningTask>>,
}

impl SessionMonitor {
    pub fn new(
        engine: Arc<dyn JobEngine>,
        sink: Arc<dyn NotificationSink>,
        settings: MonitorSettings,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(sink, settings.delivery.clone()));
        let (mode, _) = watch::channel(MonitorMode::Idle);

        Self {
            engine,
            registry: Arc::new(SessionRegistry::new()),
            dispatcher,
            settings,
            mode: Arc::new(mode),
            task: Mutex::new(None),
        }
    }

    /// Launch the background activity. Returns `false` if it was already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);

        if task.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            info!("Session monitor already running");
            return false;
        }

        let router = Arc::new(EventRouter::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.dispatcher),
        ));
        let connector = StreamConnector::new(
            Arc::clone(&self.engine),
            router,
            self.settings.reconnect.clone(),
            Arc::clone(&self.mode),
        );
        let poller = FallbackPoller::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.registry),
            Arc::clone(&self.dispatcher),
            self.settings.poll_interval,
        );

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            if connector.run(&mut shutdown_rx).await == ConnectorExit::Fallback {
                poller.run(&mut shutdown_rx).await;
            }
        });

        *task = Some(RunningTask { shutdown, handle });
        info!("Session monitor started");
        true
    }

    /// Stop the background activity and wait for it to wind down.
    ///
    /// Once this returns the feed connection is closed, the poll timer is
    /// gone, and nothing more is delivered.
    pub async fn stop(&self) {
        let running = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            if let Err(e) = running.handle.await {
                if e.is_panic() {
                    error!("Session monitor task panicked: {}", e);
                }
            }
        }

        self.mode.send_replace(MonitorMode::Stopped);
        info!("Session monitor stopped");
    }

    /// Start relaying a session's output to a destination
    pub fn add_session(&self, destination_id: &str, session_id: &str) {
        if self.registry.add(session_id, destination_id) {
            info!(session_id, destination_id, "Added session to monitor");
        }
    }

    pub fn remove_session(&self, session_id: &str) {
        if self.registry.remove(session_id) {
            info!(session_id, "Removed session from monitor");
        }
    }

    pub fn active_sessions_count(&self) -> usize {
        self.registry.count()
    }

    pub fn session_info(&self) -> Vec<SessionInfo> {
        self.registry.snapshot()
    }

    pub fn mode(&self) -> MonitorMode {
        *self.mode.borrow()
    }

    /// Watch mode transitions as they happen
    pub fn subscribe_mode(&self) -> watch::Receiver<MonitorMode> {
        self.mode.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    pub fn is_using_fallback(&self) -> bool {
        self.mode() == MonitorMode::Fallback
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = task.take() {
            let _ = running.shutdown.send(true);
            running.handle.abort();
        }
    }
}
