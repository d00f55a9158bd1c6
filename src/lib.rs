//! Vocalis Realtime Session Library
//!
//! This library manages the lifecycle of a single realtime conversational
//! session against a remote AI endpoint: it mints an ephemeral credential,
//! negotiates a WebRTC transport carrying one local audio track and a
//! structured-event data channel, distributes inbound events over a small
//! bus, and projects the event stream into an observable conversation
//! state. The `vocalis` binary is a thin wrapper around this library.

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod negotiate;
pub mod projector;
pub mod rtc;
pub mod session;
pub mod token;
pub mod transport;

pub use config::{Config, SessionConfig};
pub use error::SessionError;
pub use event::RealtimeEvent;
pub use projector::ConversationState;
pub use session::{LifecycleState, SessionController};
