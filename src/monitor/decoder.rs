//! Event feed decoding
//!
//! The engine's event feed is a Server-Sent-Events body where every
//! interesting line looks like `data: {"type": ..., "properties": {...}}`.
//! Chunks arrive with arbitrary boundaries, so the decoder keeps the
//! trailing incomplete line (as raw bytes, which also keeps split UTF-8
//! sequences intact) until the rest of it shows up.
//!
//! Payloads are decoded into the closed [`EngineEvent`] type right here.
//! Anything malformed is logged and dropped; decoding never stops the feed.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::error::{MonitorError, Result};
use crate::session::opencode::types::{MessageInfo, Part, Role};

/// Prefix of lines that carry an event payload
pub const FRAME_PREFIX: &str = "data: ";

/// Longest partial line held back before it is thrown away
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// A decoded event from the engine's feed
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// `message.updated`: message metadata changed
    MessageUpdated {
        session_id: String,
        message_id: String,
        role: Role,
        /// The message carries a completion timestamp
        completed: bool,
    },

    /// `message.part.updated`: a part of a message grew or changed
    MessagePartUpdated {
        session_id: String,
        message_id: String,
        part_id: Option<String>,
        part_kind: String,
        /// Cumulative text of the part
        text: Option<String>,
        /// Text appended since the previous update, when the engine says so
        delta: Option<String>,
    },

    /// `session.idle`: the session finished its turn
    SessionIdle { session_id: String },

    /// `session.deleted`: the session is gone for good
    SessionDeleted { session_id: String },

    /// Any other event kind
    Other {
        kind: String,
        session_id: Option<String>,
    },
}

impl EngineEvent {
    /// Session this event belongs to, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            EngineEvent::MessageUpdated { session_id, .. }
            | EngineEvent::MessagePartUpdated { session_id, .. }
            | EngineEvent::SessionIdle { session_id }
            | EngineEvent::SessionDeleted { session_id } => Some(session_id),
            EngineEvent::Other { session_id, .. } => session_id.as_deref(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            EngineEvent::MessageUpdated { .. } => "message.updated",
            EngineEvent::MessagePartUpdated { .. } => "message.part.updated",
            EngineEvent::SessionIdle { .. } => "session.idle",
            EngineEvent::SessionDeleted { .. } => "session.deleted",
            EngineEvent::Other { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    properties: Value,
}

#[derive(Debug, Default, Deserialize)]
struct RawProperties {
    #[serde(rename = "sessionID", default)]
    session_id: Option<String>,
    #[serde(default)]
    info: Option<Value>,
    #[serde(default)]
    part: Option<Part>,
    #[serde(default)]
    delta: Option<String>,
}

impl RawProperties {
    /// Owning session, looked up in message info, then part, then the flat field
    fn resolve_session_id(&self) -> Option<String> {
        self.info
            .as_ref()
            .and_then(|info| info.get("sessionID"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.part.as_ref().and_then(|part| part.session_id.clone()))
            .or_else(|| self.session_id.clone())
    }
}

fn missing(kind: &str, field: &str) -> MonitorError {
    MonitorError::Protocol(format!("{} event without {}", kind, field))
}

/// Decode one JSON payload into an event
pub fn decode_payload(payload: &str) -> Result<EngineEvent> {
    let raw: RawEvent = serde_json::from_str(payload)?;
    let props: RawProperties = if raw.properties.is_null() {
        RawProperties::default()
    } else {
        serde_json::from_value(raw.properties)?
    };

    let event = match raw.kind.as_str() {
        "message.updated" => {
            let info = props.info.ok_or_else(|| missing(&raw.kind, "info"))?;
            let info: MessageInfo = serde_json::from_value(info)?;
            EngineEvent::MessageUpdated {
                completed: info.is_completed(),
                session_id: info.session_id,
                message_id: info.id,
                role: info.role,
            }
        }
        "message.part.updated" => {
            let session_id = props
                .resolve_session_id()
                .ok_or_else(|| missing(&raw.kind, "sessionID"))?;
            let part = props.part.ok_or_else(|| missing(&raw.kind, "part"))?;
            let message_id = part
                .message_id
                .clone()
                .ok_or_else(|| missing(&raw.kind, "messageID"))?;
            EngineEvent::MessagePartUpdated {
                session_id,
                message_id,
                part_id: part.id,
                part_kind: part.kind,
                text: part.text,
                delta: props.delta,
            }
        }
        "session.idle" => EngineEvent::SessionIdle {
            session_id: props
                .resolve_session_id()
                .ok_or_else(|| missing(&raw.kind, "sessionID"))?,
        },
        "session.deleted" => EngineEvent::SessionDeleted {
            session_id: props
                .info
                .as_ref()
                .and_then(|info| info.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or(props.session_id)
                .ok_or_else(|| missing(&raw.kind, "session id"))?,
        },
        _ => EngineEvent::Other {
            session_id: props.resolve_session_id(),
            kind: raw.kind,
        },
    };

    Ok(event)
}

/// Decode one complete feed line.
///
/// Returns `Ok(None)` for lines that are not event frames (blank lines,
/// comments, `event:`/`id:` fields).
pub fn decode_line(line: &str) -> Result<Option<EngineEvent>> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    match line.strip_prefix(FRAME_PREFIX) {
        Some(payload) => decode_payload(payload).map(Some),
        None => Ok(None),
    }
}

/// Incremental decoder for one connection's worth of feed bytes
#[derive(Debug)]
pub struct FrameDecoder {
    carry: Vec<u8>,
    max_line: usize,
    /// Inside an oversized line; input is skipped up to the next newline
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that gives up on partial lines longer than `max_line` bytes
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            carry: Vec::new(),
            max_line: max_line.max(1),
            discarding: false,
        }
    }

    /// Feed a chunk and return the events completed by it, in order
    pub fn feed(&mut self, mut chunk: &[u8]) -> Vec<EngineEvent> {
        if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    self.discarding = false;
                    chunk = &chunk[end + 1..];
                }
                None => return Vec::new(),
            }
        }

        self.carry.extend_from_slice(chunk);

        let events = match self.carry.iter().rposition(|&b| b == b'\n') {
            Some(last_newline) => {
                let rest = self.carry.split_off(last_newline + 1);
                let complete = std::mem::replace(&mut self.carry, rest);
                decode_lines(&complete)
            }
            None => Vec::new(),
        };

        if self.carry.len() > self.max_line {
            warn!(
                bytes = self.carry.len(),
                limit = self.max_line,
                "Discarding oversized event frame"
            );
            self.carry = Vec::new();
            self.discarding = true;
        }

        events
    }

    /// Bytes held back waiting for the rest of their line
    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }

    /// Forget any partial line, e.g. after the connection dropped
    pub fn reset(&mut self) {
        self.carry.clear();
        self.discarding = false;
    }
}

fn decode_lines(complete: &[u8]) -> Vec<EngineEvent> {
    complete
        .split(|&b| b == b'\n')
        .filter_map(|line| {
            let line = String::from_utf8_lossy(line);
            match decode_line(&line) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed event frame");
                    None
                }
            }
        })
        .collect()
}

/// Stream adapter turning a feed byte stream into decoded events.
///
/// Ends when the byte stream ends; a transport error is passed through as
/// the stream's last item. Not restartable: build a new one per connection.
pub struct EventStream<S> {
    inner: S,
    decoder: FrameDecoder,
    ready: VecDeque<EngineEvent>,
    done: bool,
}

impl<S> EventStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }
}

impl<S> Stream for EventStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    type Item = Result<EngineEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            if self.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let this = &mut *self;
                    let events = this.decoder.feed(&chunk);
                    this.ready.extend(events);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    // An unterminated trailing line is never a complete frame
                    self.done = true;
                    self.decoder.reset();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
