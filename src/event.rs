//! The structured-event wire type and the per-session event log.
//!
//! Events are JSON objects whose `type` field is a dot-separated namespace
//! (e.g. `response.done`). The bus only interprets the handful of types
//! listed below; everything else is carried opaquely through the flattened
//! payload so unrecognized events still land in the log intact.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use uuid::Uuid;

// Inbound event types recognized by the conversation state projector.
pub const SESSION_CREATED: &str = "session.created";
pub const SPEECH_STARTED: &str = "input_audio_buffer.speech_started";
pub const SPEECH_STOPPED: &str = "input_audio_buffer.speech_stopped";
pub const RESPONSE_AUDIO_DELTA: &str = "response.audio.delta";
pub const RESPONSE_TRANSCRIPT_DELTA: &str = "response.audio_transcript.delta";
pub const RESPONSE_DONE: &str = "response.done";

// Outbound event types used by this crate.
pub const CONVERSATION_ITEM_CREATE: &str = "conversation.item.create";
pub const RESPONSE_CREATE: &str = "response.create";

/// A single structured event crossing the channel in either direction.
///
/// `event_id` is client-generated for outbound events (assigned by the bus
/// just before serialization if absent) and server-assigned for inbound
/// ones. `timestamp` is local bookkeeping: it is stamped exactly once at
/// first observation and never overwritten, and it is omitted from the
/// serialized form while unset so the remote endpoint never sees a field
/// it does not expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RealtimeEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            event_id: None,
            timestamp: None,
            payload: Map::new(),
        }
    }

    /// Builds a `conversation.item.create` event carrying one text item.
    pub fn conversation_item(role: &str, text: &str) -> Self {
        let mut event = Self::new(CONVERSATION_ITEM_CREATE);
        event.payload.insert(
            "item".to_string(),
            json!({
                "type": "message",
                "role": role,
                "content": [{ "type": "input_text", "text": text }],
            }),
        );
        event
    }

    /// Builds a `response.create` event asking the remote side to respond.
    pub fn response_create() -> Self {
        Self::new(RESPONSE_CREATE)
    }

    /// Stamps the wall-clock timestamp if the event does not carry one yet.
    pub(crate) fn stamp(&mut self) {
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now().to_rfc3339());
        }
    }
}

/// Generates a session-unique client event identifier.
pub(crate) fn new_event_id() -> String {
    format!("evt_{}", Uuid::new_v4().simple())
}

/// The ordered per-session event history, newest first.
///
/// Order reflects arrival, not semantic time: an event with an earlier
/// semantic timestamp that arrives late is still prepended at the front.
/// The log is append-only during a session and cleared when a new one opens.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Mutex<VecDeque<RealtimeEvent>>,
}

impl EventLog {
    pub fn push_front(&self, event: RealtimeEvent) {
        self.entries.lock().push_front(event);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Clones the current history, newest first.
    pub fn snapshot(&self) -> Vec<RealtimeEvent> {
        self.entries.lock().iter().cloned().collect()
    }
}
