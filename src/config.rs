use crate::token::Persona;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Token broker endpoint that issues ephemeral session credentials.
    pub token_url: String,
    /// Session-creation endpoint of the remote realtime service.
    pub realtime_url: String,
    pub model: String,
    pub voice: String,
    pub instructions: Option<String>,
    pub persona: Option<Persona>,
    /// Label of the structured-event data channel.
    pub channel_label: String,
    /// Bound on the credential fetch and the SDP exchange.
    pub request_timeout: Duration,
    pub log_level: Level,
}

/// The immutable per-session snapshot handed to `start()`.
///
/// Captured once before negotiation begins so that later UI edits to voice
/// or persona cannot leak into an in-flight session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub model: String,
    pub voice: String,
    pub instructions: Option<String>,
    pub persona: Option<Persona>,
    pub channel_label: String,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let token_url = std::env::var("TOKEN_URL")
            .map_err(|_| ConfigError::MissingVar("TOKEN_URL".to_string()))?;

        let realtime_url = std::env::var("REALTIME_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/realtime".to_string());

        let model = std::env::var("REALTIME_MODEL")
            .unwrap_or_else(|_| "gpt-4o-realtime-preview-2024-12-17".to_string());

        let voice = std::env::var("REALTIME_VOICE").unwrap_or_else(|_| "verse".to_string());

        let instructions = std::env::var("SESSION_INSTRUCTIONS").ok();

        let persona_age = std::env::var("PERSONA_AGE").ok();
        let persona_gender = std::env::var("PERSONA_GENDER").ok();
        let persona = if persona_age.is_some() || persona_gender.is_some() {
            Some(Persona {
                age: persona_age,
                gender: persona_gender,
            })
        } else {
            None
        };

        let channel_label =
            std::env::var("CHANNEL_LABEL").unwrap_or_else(|_| "oai-events".to_string());

        let timeout_str =
            std::env::var("REQUEST_TIMEOUT_SECS").unwrap_or_else(|_| "10".to_string());
        let timeout_secs = timeout_str.parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(
                "REQUEST_TIMEOUT_SECS".to_string(),
                format!("'{}' is not a valid number of seconds", timeout_str),
            )
        })?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "REQUEST_TIMEOUT_SECS".to_string(),
                "timeout must be at least one second".to_string(),
            ));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            token_url,
            realtime_url,
            model,
            voice,
            instructions,
            persona,
            channel_label,
            request_timeout: Duration::from_secs(timeout_secs),
            log_level,
        })
    }

    /// Builds the default per-session snapshot from this configuration.
    pub fn session_defaults(&self) -> SessionConfig {
        SessionConfig {
            model: self.model.clone(),
            voice: self.voice.clone(),
            instructions: self.instructions.clone(),
            persona: self.persona.clone(),
            channel_label: self.channel_label.clone(),
        }
    }
}
