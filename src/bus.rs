//! The event channel bus.
//!
//! Wraps the structured-event channel: assigns client event ids, stamps
//! timestamps, enforces the outbound send ordering, and distributes inbound
//! events through a fixed dispatch pipeline — conversation state projection
//! first, event log second, then any registered subscribers. A failing
//! subscriber is logged and never stops dispatch; a send on a closed
//! channel is logged and dropped, never an error for the caller.

use crate::event::{self, EventLog, RealtimeEvent};
use crate::projector::{self, ConversationState};
use crate::transport::EventChannel;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A dispatch stage run after projection and logging. Returning an error
/// only produces a log line; the remaining subscribers still run.
pub type Subscriber = Box<dyn Fn(&RealtimeEvent) -> anyhow::Result<()> + Send + Sync>;

pub struct EventBus {
    channel: RwLock<Option<Arc<dyn EventChannel>>>,
    conversation: RwLock<ConversationState>,
    log: EventLog,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channel: RwLock::new(None),
            conversation: RwLock::new(ConversationState::Idle),
            log: EventLog::default(),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// The state derived from the inbound stream so far.
    pub fn conversation_state(&self) -> ConversationState {
        *self.conversation.read()
    }

    /// The event history, newest first.
    pub fn events(&self) -> Vec<RealtimeEvent> {
        self.log.snapshot()
    }

    pub fn subscribe(&self, subscriber: Subscriber) {
        self.subscribers.write().push(subscriber);
    }

    /// Wires an open channel into the bus. Inbound messages flow into
    /// [`dispatch_inbound`](Self::dispatch_inbound) from here on.
    pub(crate) fn attach(self: &Arc<Self>, channel: Arc<dyn EventChannel>) {
        let bus = Arc::downgrade(self);
        channel.on_message(Box::new(move |raw| {
            if let Some(bus) = bus.upgrade() {
                bus.dispatch_inbound(&raw);
            }
        }));
        *self.channel.write() = Some(channel);
    }

    /// Clears the log and resets the derived state for a new session.
    pub(crate) fn reset(&self) {
        self.log.clear();
        *self.conversation.write() = ConversationState::Idle;
    }

    /// Called when the channel reports open: the session starts idle.
    pub(crate) fn mark_channel_open(&self) {
        *self.conversation.write() = ConversationState::Idle;
    }

    /// Detaches the channel and resets the derived state on session close.
    pub(crate) fn detach(&self) {
        *self.channel.write() = None;
        *self.conversation.write() = ConversationState::Idle;
    }

    /// Serializes and transmits one outbound event.
    ///
    /// A missing event id is assigned before serialization; the timestamp
    /// is stamped only after the wire write succeeds, so the remote
    /// endpoint never receives local bookkeeping fields. Only successfully
    /// transmitted events reach the log.
    pub async fn send(&self, mut event: RealtimeEvent) {
        if event.kind.is_empty() {
            error!("dropping outbound event with an empty type");
            return;
        }

        let channel = self.channel.read().clone();
        let Some(channel) = channel.filter(|c| c.is_open()) else {
            error!(kind = %event.kind, "dropping outbound event: channel is not open");
            return;
        };

        if event.event_id.is_none() {
            event.event_id = Some(event::new_event_id());
        }

        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(kind = %event.kind, error = %e, "failed to serialize outbound event");
                return;
            }
        };

        if let Err(e) = channel.send_text(payload).await {
            error!(kind = %event.kind, error = %e, "failed to transmit outbound event");
            return;
        }

        event.stamp();
        debug!(kind = %event.kind, event_id = ?event.event_id, "outbound event sent");
        self.log.push_front(event);
    }

    /// Deserializes one inbound channel message and runs the dispatch
    /// pipeline: projector, log, subscribers (in that order).
    pub(crate) fn dispatch_inbound(&self, raw: &str) {
        let mut event: RealtimeEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "discarding undecodable channel message");
                return;
            }
        };
        if event.kind.is_empty() {
            warn!("discarding inbound event with an empty type");
            return;
        }
        event.stamp();

        {
            let mut state = self.conversation.write();
            let next = projector::transition(*state, &event.kind);
            if next != *state {
                debug!(from = ?*state, to = ?next, kind = %event.kind, "conversation state changed");
                *state = next;
            }
        }

        self.log.push_front(event.clone());

        for (index, subscriber) in self.subscribers.read().iter().enumerate() {
            if let Err(e) = subscriber(&event) {
                error!(subscriber = index, kind = %event.kind, error = %e,
                    "subscriber failed; continuing dispatch");
            }
        }
    }

    /// Closes the underlying channel. Idempotent: a missing or already
    /// closed channel is a no-op.
    pub(crate) async fn close(&self) {
        let channel = self.channel.read().clone();
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                warn!(error = %e, "event channel close reported an error");
            }
        }
    }
}
