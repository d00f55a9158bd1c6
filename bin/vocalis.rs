//! Main Entrypoint for the Vocalis Demo Client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Starting one realtime session over WebRTC.
//! 4. Printing conversation state changes until Ctrl+C, then tearing the
//!    session down.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use vocalis::config::Config;
use vocalis::rtc::RtcFactory;
use vocalis::session::SessionController;

/// Listens for the `Ctrl+C` signal to gracefully shut down the session.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Starting realtime session...");

    // --- 3. Start the Session ---
    let session = config.session_defaults();
    let controller = Arc::new(SessionController::new(config, RtcFactory::new())?);

    controller
        .bus()
        .subscribe(Box::new(|event| {
            info!(kind = %event.kind, "event received");
            Ok(())
        }));

    controller
        .start(session)
        .await
        .context("Failed to start the realtime session")?;
    info!(
        state = ?controller.conversation_state(),
        "session negotiated; speak once the channel opens"
    );

    // --- 4. Run Until Shutdown ---
    shutdown_signal().await;

    controller.stop().await;
    info!(events = controller.events().len(), "session stopped");
    Ok(())
}
