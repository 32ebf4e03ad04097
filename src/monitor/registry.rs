//! Concurrent registry of monitored sessions
//!
//! The registry is the single owner of per-session relay state. The map
//! itself sits behind a read-write lock that is only held long enough to
//! look up or swap an entry; each session carries its own mutex so that
//! work on one session never blocks another. No lock is ever held across
//! an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::state::SessionInfo;
use crate::session::opencode::types::join_text_parts;

/// Streamed text of one in-flight message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialText {
    /// Text of each part seen so far, in arrival order
    parts: Vec<(String, String)>,
    /// Prefix of the rendered text already handed to the sink
    sent: String,
}

impl PartialText {
    /// The message text as streamed so far, rendered like a fetched message
    pub fn text(&self) -> String {
        join_text_parts(self.parts.iter().map(|(_, text)| text.as_str()))
    }

    /// Text already handed to the sink
    pub fn sent(&self) -> &str {
        &self.sent
    }

    /// The part of `text` not handed to the sink yet.
    ///
    /// `text` is normally an extension of what was sent. If it diverged
    /// (a part was rewritten), everything from the first difference on
    /// counts as unsent.
    pub fn unsent<'a>(&self, text: &'a str) -> &'a str {
        &text[common_prefix_len(&self.sent, text)..]
    }

    fn part_mut(&mut self, part_id: &str) -> &mut String {
        let index = match self.parts.iter().position(|(id, _)| id == part_id) {
            Some(index) => index,
            None => {
                self.parts.push((part_id.to_string(), String::new()));
                self.parts.len() - 1
            }
        };
        &mut self.parts[index].1
    }
}

/// Byte length of the longest common prefix, always on a char boundary
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, x), y)| x != y)
        .map(|((index, _), _)| index)
        .unwrap_or_else(|| a.len().min(b.len()))
}

/// How a part update changes the part's text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartText<'a> {
    /// Text appended to the part
    Append(&'a str),
    /// The part's full text so far
    Replace(&'a str),
}

#[derive(Debug)]
struct SessionState {
    destination_id: String,
    completed: HashSet<String>,
    /// Completed messages that were settled without being relayed
    skipped: usize,
    partial: HashMap<String, PartialText>,
    last_checked: Option<DateTime<Utc>>,
}

impl SessionState {
    fn new(destination_id: String) -> Self {
        Self {
            destination_id,
            completed: HashSet::new(),
            skipped: 0,
            partial: HashMap::new(),
            last_checked: None,
        }
    }

    fn info(&self, session_id: &str) -> SessionInfo {
        SessionInfo {
            session_id: session_id.to_string(),
            destination_id: self.destination_id.clone(),
            last_checked: self.last_checked,
            completed_messages: self.completed.len(),
            relayed_messages: self.completed.len() - self.skipped,
            in_flight_messages: self.partial.len(),
        }
    }

    /// Buffer entry for a message that may still receive text
    fn open_partial(&mut self, message_id: &str) -> Option<&mut PartialText> {
        if self.completed.contains(message_id) {
            return None;
        }
        Some(self.partial.entry(message_id.to_string()).or_default())
    }
}

type SessionSlot = Arc<Mutex<SessionState>>;

/// Registry of monitored sessions keyed by engine session ID
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionSlot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a session.
    ///
    /// Re-adding a session bound to the same destination keeps its state.
    /// Re-adding it with a different destination starts from scratch.
    /// Returns `true` when fresh state was created.
    pub fn add(&self, session_id: &str, destination_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(slot) = sessions.get(session_id) {
            let state = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if state.destination_id == destination_id {
                debug!(session_id, destination_id, "Session already registered");
                return false;
            }
        }

        sessions.insert(
            session_id.to_string(),
            Arc::new(Mutex::new(SessionState::new(destination_id.to_string()))),
        );
        true
    }

    /// Stop tracking a session. Returns whether it was tracked.
    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.with_session(session_id, |state| state.info(session_id))
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.slot(session_id).is_some()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Snapshot of every tracked session, ordered by session ID
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let slots: Vec<(String, SessionSlot)> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut infos: Vec<SessionInfo> = slots
            .iter()
            .map(|(id, slot)| slot.lock().unwrap_or_else(PoisonError::into_inner).info(id))
            .collect();
        infos.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        infos
    }

    pub fn destination(&self, session_id: &str) -> Option<String> {
        self.with_session(session_id, |state| state.destination_id.clone())
    }

    /// Record a message as fully delivered.
    ///
    /// Returns `true` only the first time for a given message; every
    /// delivery path must pass this gate before sending.
    pub fn mark_completed(&self, session_id: &str, message_id: &str) -> bool {
        self.with_session(session_id, |state| state.completed.insert(message_id.to_string()))
            .unwrap_or(false)
    }

    /// Complete a message that is never relayed, such as user input,
    /// dropping any text buffered for it
    pub fn settle(&self, session_id: &str, message_id: &str) {
        self.with_session(session_id, |state| {
            if state.completed.insert(message_id.to_string()) {
                state.skipped += 1;
            }
            state.partial.remove(message_id);
        });
    }

    pub fn is_completed(&self, session_id: &str, message_id: &str) -> bool {
        self.with_session(session_id, |state| state.completed.contains(message_id))
            .unwrap_or(false)
    }

    /// Apply a text update to one part of a message and return the
    /// message's text not yet handed to the sink. Returns `None` for
    /// untracked sessions and for messages that already completed.
    pub fn append_partial(
        &self,
        session_id: &str,
        message_id: &str,
        part_id: &str,
        update: PartText<'_>,
    ) -> Option<String> {
        self.with_session(session_id, |state| {
            let partial = state.open_partial(message_id)?;
            let part = partial.part_mut(part_id);
            match update {
                PartText::Append(delta) => part.push_str(delta),
                PartText::Replace(text) => {
                    part.clear();
                    part.push_str(text);
                }
            }
            let text = partial.text();
            Some(partial.unsent(&text).to_string())
        })
        .flatten()
    }

    /// Hand out the unsent complete lines of a message, leaving only the
    /// trailing incomplete line behind. The returned text counts as sent.
    pub fn drain_complete_lines(&self, session_id: &str, message_id: &str) -> Option<String> {
        self.with_session(session_id, |state| {
            if state.completed.contains(message_id) {
                return None;
            }
            let partial = state.partial.get_mut(message_id)?;
            let text = partial.text();
            let start = common_prefix_len(&partial.sent, &text);
            let cut = start + text[start..].rfind('\n')? + 1;
            let lines = text[start..cut].to_string();
            partial.sent = text[..cut].to_string();
            Some(lines)
        })
        .flatten()
    }

    /// Remove and return a message's buffer entry
    pub fn take_partial(&self, session_id: &str, message_id: &str) -> Option<PartialText> {
        self.with_session(session_id, |state| state.partial.remove(message_id))
            .flatten()
    }

    /// IDs of messages with a buffer entry, in no particular order
    pub fn in_flight(&self, session_id: &str) -> Vec<String> {
        self.with_session(session_id, |state| state.partial.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Record a successful reconciliation
    pub fn touch(&self, session_id: &str) {
        self.with_session(session_id, |state| state.last_checked = Some(Utc::now()));
    }

    fn slot(&self, session_id: &str) -> Option<SessionSlot> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
        let slot = self.slot(session_id)?;
        let mut state = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut state))
    }
}
