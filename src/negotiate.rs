//! The session negotiator: credential, media, transport, SDP exchange.
//!
//! `negotiate` owns the whole handshake. Every failure after a resource has
//! been acquired funnels through the same [`teardown`] routine used by
//! `stop()`, so no failure path can leak an open transport or a live
//! microphone track. An abort intent recorded by a concurrent `stop()` is
//! honored at every suspension point.

use crate::bus::EventBus;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::token::{TokenBroker, TokenRequest};
use crate::transport::{
    AudioTrack, EventChannel, OpenHandler, PeerTransport, TransportFactory,
};
use anyhow::anyhow;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Everything `start()` needs to own after a successful handshake.
pub(crate) struct NegotiatedSession<F: TransportFactory> {
    pub transport: Arc<F::Transport>,
    pub channel: Arc<dyn EventChannel>,
    pub track: Arc<F::Track>,
}

impl<F: TransportFactory> std::fmt::Debug for NegotiatedSession<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiatedSession").finish_non_exhaustive()
    }
}

/// Releases acquired resources in the required order: channel, then track,
/// then transport. Closing the channel first prevents spurious error events
/// from firing on an already-stopped transport. Shared by `stop()` and by
/// every negotiation failure path.
pub(crate) async fn teardown(
    channel: Option<Arc<dyn EventChannel>>,
    track: Option<Arc<dyn AudioTrack>>,
    transport: Option<Arc<dyn PeerTransport>>,
) {
    if let Some(channel) = channel {
        if let Err(e) = channel.close().await {
            warn!(error = %e, "event channel close reported an error during teardown");
        }
    }
    if let Some(track) = track {
        track.stop();
    }
    if let Some(transport) = transport {
        if let Err(e) = transport.close().await {
            warn!(error = %e, "transport close reported an error during teardown");
        }
    }
}

/// Partially acquired resources, released on any failure.
struct Acquired<F: TransportFactory> {
    channel: Option<Arc<dyn EventChannel>>,
    track: Option<Arc<F::Track>>,
    transport: Option<Arc<F::Transport>>,
}

impl<F: TransportFactory> Acquired<F> {
    fn new() -> Self {
        Self {
            channel: None,
            track: None,
            transport: None,
        }
    }

    async fn release(self) {
        teardown(
            self.channel,
            self.track.map(|t| t as Arc<dyn AudioTrack>),
            self.transport.map(|t| t as Arc<dyn PeerTransport>),
        )
        .await;
    }

    async fn fail<T>(self, error: SessionError) -> Result<T, SessionError> {
        self.release().await;
        Err(error)
    }
}

/// Runs the transport handshake against the remote endpoint.
///
/// The event channel is attached to the bus the moment it exists, before
/// the offer is generated, so no inbound message can be missed; the caller
/// supplies the open handler that promotes the session lifecycle.
pub(crate) async fn negotiate<F: TransportFactory>(
    session: &SessionConfig,
    broker: &TokenBroker,
    factory: &F,
    http: &reqwest::Client,
    realtime_url: &str,
    bus: &Arc<EventBus>,
    on_channel_open: OpenHandler,
    abort: &AtomicBool,
) -> Result<NegotiatedSession<F>, SessionError> {
    let aborted = || abort.load(Ordering::SeqCst);

    // Step 1: ephemeral credential. Nothing acquired yet, so failure and
    // abort both return directly.
    let request = TokenRequest {
        preset_voice: Some(session.voice.clone()),
        persona: session.persona.clone(),
    };
    let secret = broker.mint(&request).await?;
    if aborted() {
        return Err(SessionError::Aborted);
    }
    debug!("ephemeral credential acquired");

    // Step 2: exactly one local audio input track.
    let mut acquired = Acquired::<F>::new();
    let track = factory.acquire_audio().await?;
    acquired.track = Some(track.clone());
    if aborted() {
        return acquired.fail(SessionError::Aborted).await;
    }

    // Step 3: transport with the local track attached.
    let transport = match factory.create(track.clone()).await {
        Ok(transport) => transport,
        Err(e) => return acquired.fail(e).await,
    };
    acquired.transport = Some(transport.clone());
    transport.on_remote_track(Box::new(|info| {
        info!(kind = %info.kind, codec = %info.codec, "remote media stream received");
    }));
    if aborted() {
        return acquired.fail(SessionError::Aborted).await;
    }

    // Step 4: the event channel must exist before the offer so it is part
    // of the initial session description.
    let channel = match transport.create_event_channel(&session.channel_label).await {
        Ok(channel) => channel,
        Err(e) => return acquired.fail(e).await,
    };
    acquired.channel = Some(channel.clone());
    channel.on_open(on_channel_open);
    bus.attach(channel.clone());
    if aborted() {
        return acquired.fail(SessionError::Aborted).await;
    }

    // Step 5: generate the offer and exchange it over HTTPS.
    let offer = match transport.create_offer().await {
        Ok(offer) => offer,
        Err(e) => return acquired.fail(e).await,
    };
    if aborted() {
        return acquired.fail(SessionError::Aborted).await;
    }

    let response = match http
        .post(realtime_url)
        .query(&[("model", &session.model), ("voice", &session.voice)])
        .bearer_auth(&secret)
        .header(CONTENT_TYPE, "application/sdp")
        .body(offer)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            return acquired
                .fail(SessionError::Negotiation(
                    anyhow!(e).context("offer exchange failed"),
                ))
                .await;
        }
    };
    let status = response.status();
    let answer = match response.text().await {
        Ok(answer) => answer,
        Err(e) => {
            return acquired
                .fail(SessionError::Negotiation(
                    anyhow!(e).context("answer body unreadable"),
                ))
                .await;
        }
    };
    if aborted() {
        return acquired.fail(SessionError::Aborted).await;
    }
    if !status.is_success() {
        return acquired
            .fail(SessionError::TransportRejected {
                status: status.as_u16(),
                detail: answer.trim().to_string(),
            })
            .await;
    }

    // Step 6: a 200 carrying an HTML error page must not reach the
    // transport; a real answer always begins with the `v=` marker.
    if !answer.trim_start().starts_with("v=") {
        return acquired.fail(SessionError::MalformedAnswer).await;
    }

    // Step 7: apply the remote answer.
    if let Err(e) = transport.apply_answer(&answer).await {
        return acquired.fail(e).await;
    }
    if aborted() {
        return acquired.fail(SessionError::Aborted).await;
    }

    info!("transport negotiated; awaiting event channel open");
    Ok(NegotiatedSession {
        transport,
        channel,
        track,
    })
}
