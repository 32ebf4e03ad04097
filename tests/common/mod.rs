// Shared fakes for integration tests
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::json;

use sessionrelay::monitor::error::{MonitorError, Result};
use sessionrelay::monitor::{MonitorSettings, ReconnectPolicy};
use sessionrelay::session::opencode::types::{Message, MessageInfo, MessageTime, ModelChoice, Part, Role, SessionSummary};
use sessionrelay::session::{EventFeed, JobEngine};
use sessionrelay::sink::{DeliveryPolicy, NotificationSink};

/// What the fake engine does on one `subscribe_events` call
pub enum FeedScript {
    /// Refuse the connection
    Refuse,
    /// Send these chunks, then close
    Close(Vec<String>),
    /// Send these chunks, then stay open forever
    Hold(Vec<String>),
}

#[derive(Default)]
pub struct FakeEngine {
    pub messages: Mutex<HashMap<String, Vec<Message>>>,
    pub feeds: Mutex<VecDeque<FeedScript>>,
    pub broken_sessions: Mutex<HashSet<String>>,
    pub subscribe_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_feed(&self, script: FeedScript) {
        self.feeds.lock().unwrap().push_back(script);
    }

    pub fn set_messages(&self, session_id: &str, messages: Vec<Message>) {
        self.messages
            .lock()
            .unwrap()
            .insert(session_id.to_string(), messages);
    }

    pub fn break_session(&self, session_id: &str) {
        self.broken_sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string());
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

fn chunk_stream(chunks: Vec<String>) -> impl futures::Stream<Item = Result<Bytes>> {
    futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
}

#[async_trait]
impl JobEngine for FakeEngine {
    async fn create_session(&self) -> Result<SessionSummary> {
        Ok(SessionSummary {
            id: "ses_new".to_string(),
            title: None,
            parent_id: None,
            time: None,
        })
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionSummary> {
        if self.messages.lock().unwrap().contains_key(session_id) {
            Ok(SessionSummary {
                id: session_id.to_string(),
                title: None,
                parent_id: None,
                time: None,
            })
        } else {
            Err(MonitorError::session_not_found(session_id))
        }
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        Ok(Vec::new())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken_sessions.lock().unwrap().contains(session_id) {
            return Err(MonitorError::Transport("connection reset".to_string()));
        }
        self.messages
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| MonitorError::session_not_found(session_id))
    }

    async fn get_message(&self, session_id: &str, message_id: &str) -> Result<Message> {
        self.list_messages(session_id)
            .await?
            .into_iter()
            .find(|m| m.info.id == message_id)
            .ok_or_else(|| MonitorError::NotFound {
                what: "Message",
                id: message_id.to_string(),
            })
    }

    async fn send_message(&self, _: &str, _: &str, _: Option<&ModelChoice>) -> Result<()> {
        Ok(())
    }

    async fn abort(&self, _: &str) -> Result<()> {
        Ok(())
    }

    async fn subscribe_events(&self) -> Result<EventFeed> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.feeds.lock().unwrap().pop_front();
        match script {
            None | Some(FeedScript::Refuse) => {
                Err(MonitorError::Transport("connection refused".to_string()))
            }
            Some(FeedScript::Close(chunks)) => Ok(chunk_stream(chunks).boxed()),
            Some(FeedScript::Hold(chunks)) => {
                Ok(chunk_stream(chunks).chain(futures::stream::pending()).boxed())
            }
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Records every delivered fragment
#[derive(Default)]
pub struct MemorySink {
    pub delivered: Mutex<Vec<(String, String)>>,
    pub gone: Mutex<HashSet<String>>,
    /// Calls left that fail before deliveries succeed again
    pub failures_left: AtomicUsize,
    pub delay: Mutex<Option<Duration>>,
    pub calls: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn texts(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn texts_for(&self, destination_id: &str) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(dest, _)| dest == destination_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn mark_gone(&self, destination_id: &str) {
        self.gone.lock().unwrap().insert(destination_id.to_string());
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn deliver(&self, destination_id: &str, text: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.gone.lock().unwrap().contains(destination_id) {
            return Err(MonitorError::destination_not_found(destination_id));
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MonitorError::Sink("rejected".to_string()));
        }

        self.delivered
            .lock()
            .unwrap()
            .push((destination_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Millisecond-scale settings so tests finish quickly
pub fn fast_settings() -> MonitorSettings {
    MonitorSettings {
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_attempts: 5,
        },
        poll_interval: Duration::from_millis(50),
        delivery: DeliveryPolicy {
            max_message_len: 2000,
            timeout: Duration::from_millis(500),
            retries: 1,
        },
    }
}

pub fn frame(value: serde_json::Value) -> String {
    format!("data: {}\n\n", value)
}

pub fn part_frame(session_id: &str, message_id: &str, part_id: &str, text: &str, delta: &str) -> String {
    frame(json!({
        "type": "message.part.updated",
        "properties": {
            "part": {
                "id": part_id,
                "sessionID": session_id,
                "messageID": message_id,
                "type": "text",
                "text": text
            },
            "delta": delta
        }
    }))
}

pub fn message_frame(session_id: &str, message_id: &str, role: &str, completed: bool) -> String {
    let mut time = json!({ "created": 1 });
    if completed {
        time["completed"] = json!(2);
    }
    frame(json!({
        "type": "message.updated",
        "properties": {
            "info": {
                "id": message_id,
                "sessionID": session_id,
                "role": role,
                "time": time
            }
        }
    }))
}

pub fn assistant_message(session_id: &str, message_id: &str, created: i64, texts: &[&str]) -> Message {
    Message {
        info: MessageInfo {
            id: message_id.to_string(),
            session_id: session_id.to_string(),
            role: Role::Assistant,
            time: MessageTime {
                created: Some(created),
                completed: Some(created + 1),
            },
        },
        parts: texts
            .iter()
            .enumerate()
            .map(|(i, text)| Part {
                id: Some(format!("{}_part{}", message_id, i)),
                session_id: Some(session_id.to_string()),
                message_id: Some(message_id.to_string()),
                kind: "text".to_string(),
                text: Some(text.to_string()),
                time: None,
            })
            .collect(),
    }
}

pub fn user_message(session_id: &str, message_id: &str, created: i64, text: &str) -> Message {
    let mut message = assistant_message(session_id, message_id, created, &[text]);
    message.info.role = Role::User;
    message
}

/// Poll `check` until it holds or the deadline passes
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
