//! Seam traits between the session logic and the peer-to-peer transport.
//!
//! The negotiator, bus and lifecycle controller are written against these
//! traits so the whole session flow can be exercised without a network;
//! [`crate::rtc`] provides the production implementation on top of the
//! `webrtc` crate.

use crate::error::SessionError;
use async_trait::async_trait;
use std::sync::Arc;

/// Callback invoked when the structured-event channel reports open.
pub type OpenHandler = Box<dyn Fn() + Send + Sync>;
/// Callback invoked with the raw text of every inbound channel message.
pub type MessageHandler = Box<dyn Fn(String) + Send + Sync>;
/// Callback invoked when the remote media stream arrives.
pub type RemoteTrackHandler = Box<dyn Fn(RemoteTrackInfo) + Send + Sync>;

/// Descriptor of the single remote media stream delivered by the transport.
#[derive(Debug, Clone)]
pub struct RemoteTrackInfo {
    pub kind: String,
    pub codec: String,
}

/// The bidirectional ordered message channel layered over the transport.
#[async_trait]
pub trait EventChannel: Send + Sync {
    fn is_open(&self) -> bool;
    fn on_open(&self, handler: OpenHandler);
    fn on_message(&self, handler: MessageHandler);
    async fn send_text(&self, payload: String) -> anyhow::Result<()>;
    /// Idempotent; closing an already-closed channel is a no-op.
    async fn close(&self) -> anyhow::Result<()>;
}

/// The local audio input track attached to the transport.
///
/// `set_enabled(false)` is a soft mute: the track stays attached but stops
/// producing media. `stop` releases the capture source for good.
pub trait AudioTrack: Send + Sync {
    fn set_enabled(&self, enabled: bool);
    fn enabled(&self) -> bool;
    fn stop(&self);
    fn stopped(&self) -> bool;
}

/// One negotiated peer connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Creates the structured-event channel. Must be called before
    /// [`create_offer`](Self::create_offer) so the channel is part of the
    /// initial offer's session description.
    async fn create_event_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn EventChannel>, SessionError>;

    /// Registers the handler that will receive exactly one remote media
    /// stream for the connection's lifetime.
    fn on_remote_track(&self, handler: RemoteTrackHandler);

    /// Generates and applies the local offer, returning its raw session
    /// description.
    async fn create_offer(&self) -> Result<String, SessionError>;

    /// Applies the remote answer.
    async fn apply_answer(&self, sdp: &str) -> Result<(), SessionError>;

    async fn close(&self) -> Result<(), SessionError>;
}

/// Builds the media track and the peer transport for one session.
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    type Track: AudioTrack + 'static;
    type Transport: PeerTransport + 'static;

    /// Acquires exactly one local audio input track.
    async fn acquire_audio(&self) -> Result<Arc<Self::Track>, SessionError>;

    /// Constructs the transport with the local track attached.
    async fn create(&self, track: Arc<Self::Track>)
    -> Result<Arc<Self::Transport>, SessionError>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport doubles shared by the bus, negotiator and
    //! session tests.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    pub struct MockChannel {
        open: AtomicBool,
        pub sent: Mutex<Vec<String>>,
        pub close_calls: AtomicUsize,
        pub fail_send: AtomicBool,
        open_handler: Mutex<Option<OpenHandler>>,
        message_handler: Mutex<Option<MessageHandler>>,
    }

    impl MockChannel {
        /// Flips the channel to open and fires the registered open handler.
        pub fn open_channel(&self) {
            self.open.store(true, Ordering::SeqCst);
            if let Some(handler) = self.open_handler.lock().as_ref() {
                handler();
            }
        }

        /// Delivers one raw inbound message to the registered handler.
        pub fn deliver(&self, raw: &str) {
            if let Some(handler) = self.message_handler.lock().as_ref() {
                handler(raw.to_string());
            }
        }
    }

    #[async_trait]
    impl EventChannel for MockChannel {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn on_open(&self, handler: OpenHandler) {
            *self.open_handler.lock() = Some(handler);
        }

        fn on_message(&self, handler: MessageHandler) {
            *self.message_handler.lock() = Some(handler);
        }

        async fn send_text(&self, payload: String) -> anyhow::Result<()> {
            if self.fail_send.load(Ordering::SeqCst) {
                anyhow::bail!("simulated channel write failure");
            }
            self.sent.lock().push(payload);
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.open.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    pub struct MockTrack {
        enabled: AtomicBool,
        stopped: AtomicBool,
    }

    impl Default for MockTrack {
        fn default() -> Self {
            Self {
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }
        }
    }

    impl AudioTrack for MockTrack {
        fn set_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::SeqCst);
        }

        fn enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        fn stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    pub struct MockTransport {
        pub channel: Arc<MockChannel>,
        pub close_calls: AtomicUsize,
        pub applied_answers: Mutex<Vec<String>>,
        pub fail_offer: AtomicBool,
        pub fail_answer: AtomicBool,
        pub remote_handler: Mutex<Option<RemoteTrackHandler>>,
        pub channel_created: AtomicBool,
        pub offer_created: AtomicBool,
    }

    #[async_trait]
    impl PeerTransport for MockTransport {
        async fn create_event_channel(
            &self,
            _label: &str,
        ) -> Result<Arc<dyn EventChannel>, SessionError> {
            self.channel_created.store(true, Ordering::SeqCst);
            Ok(self.channel.clone())
        }

        fn on_remote_track(&self, handler: RemoteTrackHandler) {
            *self.remote_handler.lock() = Some(handler);
        }

        async fn create_offer(&self) -> Result<String, SessionError> {
            if self.fail_offer.load(Ordering::SeqCst) {
                return Err(SessionError::Negotiation(anyhow::anyhow!(
                    "simulated offer failure"
                )));
            }
            // The channel must exist before the offer is generated.
            assert!(
                self.channel_created.load(Ordering::SeqCst),
                "offer generated before the event channel was created"
            );
            self.offer_created.store(true, Ordering::SeqCst);
            Ok("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n".to_string())
        }

        async fn apply_answer(&self, sdp: &str) -> Result<(), SessionError> {
            if self.fail_answer.load(Ordering::SeqCst) {
                return Err(SessionError::Negotiation(anyhow::anyhow!(
                    "simulated answer failure"
                )));
            }
            self.applied_answers.lock().push(sdp.to_string());
            Ok(())
        }

        async fn close(&self) -> Result<(), SessionError> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MockFactory {
        pub fail_media: AtomicBool,
        pub fail_create: AtomicBool,
        /// Arms `fail_answer` on every transport this factory creates.
        pub fail_answer_on_create: AtomicBool,
        pub acquire_calls: AtomicUsize,
        pub tracks: Mutex<Vec<Arc<MockTrack>>>,
        pub transports: Mutex<Vec<Arc<MockTransport>>>,
        /// When set, `acquire_audio` parks until notified so tests can
        /// inject a concurrent `stop()` mid-negotiation.
        pub acquire_gate: Mutex<Option<Arc<Notify>>>,
    }

    #[async_trait]
    impl TransportFactory for MockFactory {
        type Track = MockTrack;
        type Transport = MockTransport;

        async fn acquire_audio(&self) -> Result<Arc<MockTrack>, SessionError> {
            self.acquire_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.acquire_gate.lock().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail_media.load(Ordering::SeqCst) {
                return Err(SessionError::MediaAccess(
                    "no input device available".to_string(),
                ));
            }
            let track = Arc::new(MockTrack::default());
            self.tracks.lock().push(track.clone());
            Ok(track)
        }

        async fn create(
            &self,
            _track: Arc<MockTrack>,
        ) -> Result<Arc<MockTransport>, SessionError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(SessionError::Negotiation(anyhow::anyhow!(
                    "simulated transport construction failure"
                )));
            }
            let transport = Arc::new(MockTransport::default());
            if self.fail_answer_on_create.load(Ordering::SeqCst) {
                transport.fail_answer.store(true, Ordering::SeqCst);
            }
            self.transports.lock().push(transport.clone());
            Ok(transport)
        }
    }
}
