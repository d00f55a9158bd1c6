//! The session lifecycle controller.
//!
//! Owns the single active `SessionConnection` and the observable session
//! state (lifecycle, conversation state, mute flag, event log). All other
//! components see borrowed views for the connection's lifetime only; the
//! controller is the sole writer.

use crate::bus::EventBus;
use crate::config::{Config, SessionConfig};
use crate::error::SessionError;
use crate::event::{self, RealtimeEvent};
use crate::negotiate::{self, NegotiatedSession};
use crate::projector::ConversationState;
use crate::token::TokenBroker;
use crate::transport::{AudioTrack, EventChannel, PeerTransport, TransportFactory};
use anyhow::Context;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Where the single transport instance is in its life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LifecycleState {
    #[default]
    Unstarted,
    Negotiating,
    Open,
    Closed,
}

/// The one active transport; exists only between a successful `start()`
/// and the next `stop()`.
struct SessionConnection<F: TransportFactory> {
    transport: Arc<F::Transport>,
    channel: Arc<dyn EventChannel>,
    track: Arc<F::Track>,
}

/// Coordinates start, stop and mute for at most one live session.
pub struct SessionController<F: TransportFactory> {
    config: Arc<Config>,
    factory: Arc<F>,
    broker: TokenBroker,
    http: reqwest::Client,
    bus: Arc<EventBus>,
    connection: Mutex<Option<SessionConnection<F>>>,
    lifecycle: Arc<RwLock<LifecycleState>>,
    muted: AtomicBool,
    /// Set by `stop()`; consulted by the negotiator at every suspension
    /// point so a stop issued mid-negotiation releases resources as each
    /// asynchronous step resolves.
    abort_intent: Arc<AtomicBool>,
    /// Instructions of the session being negotiated, transmitted once the
    /// remote side acknowledges readiness with `session.created`.
    pending_instructions: Arc<RwLock<Option<String>>>,
}

impl<F: TransportFactory> SessionController<F> {
    pub fn new(config: Config, factory: F) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let broker = TokenBroker::new(http.clone(), config.token_url.clone());
        let bus = Arc::new(EventBus::new());

        let pending_instructions = Arc::new(RwLock::new(None::<String>));
        // Readiness acknowledgement: the remote endpoint emits
        // `session.created` once it will accept conversation items, so the
        // initial system instruction is keyed to that instead of a timer.
        let greeting_bus = Arc::downgrade(&bus);
        let greeting = pending_instructions.clone();
        bus.subscribe(Box::new(move |inbound| {
            if inbound.kind != event::SESSION_CREATED {
                return Ok(());
            }
            let Some(instructions) = greeting.write().take() else {
                return Ok(());
            };
            let Some(bus) = greeting_bus.upgrade() else {
                return Ok(());
            };
            debug!("session acknowledged; transmitting initial instructions");
            tokio::spawn(async move {
                bus.send(RealtimeEvent::conversation_item("system", &instructions))
                    .await;
                bus.send(RealtimeEvent::response_create()).await;
            });
            Ok(())
        }));

        Ok(Self {
            config: Arc::new(config),
            factory: Arc::new(factory),
            broker,
            http,
            bus,
            connection: Mutex::new(None),
            lifecycle: Arc::new(RwLock::new(LifecycleState::Unstarted)),
            muted: AtomicBool::new(false),
            abort_intent: Arc::new(AtomicBool::new(false)),
            pending_instructions,
        })
    }

    /// The bus carrying this controller's session events; UI collaborators
    /// subscribe here and read the event history from it.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn conversation_state(&self) -> ConversationState {
        self.bus.conversation_state()
    }

    pub fn events(&self) -> Vec<RealtimeEvent> {
        self.bus.events()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.read()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Negotiates and installs a new session from an immutable config
    /// snapshot.
    ///
    /// Fails with [`SessionError::AlreadyActive`] if a session is open or
    /// negotiating, and with [`SessionError::Aborted`] if a `stop()` lands
    /// while the handshake is in flight.
    pub async fn start(&self, session: SessionConfig) -> Result<(), SessionError> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return Err(SessionError::AlreadyActive);
        }

        self.abort_intent.store(false, Ordering::SeqCst);
        self.muted.store(false, Ordering::SeqCst);
        self.bus.reset();
        *self.pending_instructions.write() = session.instructions.clone();
        *self.lifecycle.write() = LifecycleState::Negotiating;
        info!(model = %session.model, voice = %session.voice, "starting realtime session");

        let lifecycle = self.lifecycle.clone();
        let bus = self.bus.clone();
        let on_channel_open = Box::new(move || {
            *lifecycle.write() = LifecycleState::Open;
            bus.mark_channel_open();
            info!("event channel open; session is live");
        });

        match negotiate::negotiate(
            &session,
            &self.broker,
            self.factory.as_ref(),
            &self.http,
            &self.config.realtime_url,
            &self.bus,
            on_channel_open,
            &self.abort_intent,
        )
        .await
        {
            Ok(NegotiatedSession {
                transport,
                channel,
                track,
            }) => {
                *connection = Some(SessionConnection {
                    transport,
                    channel,
                    track,
                });
                Ok(())
            }
            Err(e) => {
                *self.lifecycle.write() = LifecycleState::Closed;
                self.pending_instructions.write().take();
                self.bus.detach();
                Err(e)
            }
        }
    }

    /// Tears the session down: channel, then track, then transport.
    ///
    /// Safe to call with no session open and safe to call twice in a row;
    /// a call that lands mid-negotiation records abort intent and lets the
    /// negotiator release resources as its pending step resolves.
    pub async fn stop(&self) {
        self.abort_intent.store(true, Ordering::SeqCst);
        let mut connection = self.connection.lock().await;

        if let Some(SessionConnection {
            transport,
            channel,
            track,
        }) = connection.take()
        {
            negotiate::teardown(
                Some(channel),
                Some(track as Arc<dyn AudioTrack>),
                Some(transport as Arc<dyn PeerTransport>),
            )
            .await;
            *self.lifecycle.write() = LifecycleState::Closed;
            info!("session stopped");
        } else {
            debug!("stop requested with no active session");
        }

        self.bus.detach();
        self.pending_instructions.write().take();
        self.muted.store(false, Ordering::SeqCst);
        self.abort_intent.store(false, Ordering::SeqCst);
    }

    /// Flips the local track's enabled flag and mirrors it into the mute
    /// state. A silent no-op when no track is owned: muting is a
    /// convenience action and must never fail a UI flow.
    pub async fn toggle_mute(&self) {
        let connection = self.connection.lock().await;
        let Some(connection) = connection.as_ref() else {
            debug!("toggle_mute ignored: no active session");
            return;
        };

        let now_enabled = !connection.track.enabled();
        connection.track.set_enabled(now_enabled);
        self.muted.store(!now_enabled, Ordering::SeqCst);
        info!(muted = !now_enabled, "microphone mute toggled");
    }

    /// Sends a user text turn and asks the remote side for a response.
    pub async fn send_user_message(&self, text: &str) {
        if text.trim().is_empty() {
            warn!("ignoring empty user message");
            return;
        }
        self.bus
            .send(RealtimeEvent::conversation_item("user", text))
            .await;
        self.bus.send(RealtimeEvent::response_create()).await;
    }
}
