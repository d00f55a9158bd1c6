//! The failure taxonomy surfaced by session start and teardown.

/// Errors that can abort a session start.
///
/// Every variant maps to a distinct failure stage of the negotiation so
/// callers can render a precise user-facing message. Failures inside the
/// event channel bus (a failing subscriber, a send on a closed channel)
/// are deliberately *not* part of this taxonomy: they are logged and
/// swallowed, never surfaced.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The token broker returned a non-success status, an `error` body, or
    /// no usable credential field.
    #[error("token broker rejected the credential request: {0}")]
    Credential(String),

    /// A local audio input track could not be acquired or attached.
    #[error("could not acquire a local audio track: {0}")]
    MediaAccess(String),

    /// The remote endpoint rejected the session-description offer.
    #[error("realtime endpoint rejected the offer (HTTP {status}): {detail}")]
    TransportRejected { status: u16, detail: String },

    /// The remote endpoint answered 2xx but the body does not begin with
    /// the `v=` session-description marker (typically an HTML error page
    /// disguised as a success).
    #[error("realtime endpoint returned a body that is not a session description")]
    MalformedAnswer,

    /// Any other transport or protocol failure during negotiation.
    #[error("transport negotiation failed: {0}")]
    Negotiation(#[from] anyhow::Error),

    /// `stop()` was requested while negotiation was still in flight; the
    /// partially acquired resources were released and the start abandoned.
    #[error("session start aborted by a stop request")]
    Aborted,

    /// `start()` was called while a session was already open or negotiating.
    #[error("a session is already active")]
    AlreadyActive,
}
