//! HTTP client for the token broker.
//!
//! The broker is an external collaborator: given the caller's voice and
//! persona selection it issues a short-lived credential that authorizes one
//! session against the remote realtime endpoint. Brokers in the wild return
//! the secret either as a plain string or nested under `value`; both shapes
//! are accepted.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Persona attributes forwarded to the broker so it can shape the issued
/// session (e.g. a persona-specific system prompt on the remote side).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

/// Body of the credential request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenRequest {
    #[serde(rename = "presetVoice", skip_serializing_if = "Option::is_none")]
    pub preset_voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<Persona>,
}

/// The broker's response body. `client_secret` may be a bare string or an
/// object with a `value` field, depending on the broker version.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    client_secret: Option<ClientSecret>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClientSecret {
    Plain(String),
    Nested { value: String },
}

impl ClientSecret {
    fn into_inner(self) -> String {
        match self {
            ClientSecret::Plain(value) | ClientSecret::Nested { value } => value,
        }
    }
}

/// Client for the external token broker.
#[derive(Clone)]
pub struct TokenBroker {
    http: reqwest::Client,
    endpoint: String,
}

impl TokenBroker {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    /// Requests an ephemeral credential for one session.
    ///
    /// Any failure mode here (network, non-2xx status, `error` body,
    /// missing or empty secret) is a [`SessionError::Credential`].
    pub async fn mint(&self, request: &TokenRequest) -> Result<String, SessionError> {
        debug!(endpoint = %self.endpoint, "requesting ephemeral credential");
        let response = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| SessionError::Credential(format!("broker unreachable: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::Credential(format!("broker response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(SessionError::Credential(format!(
                "broker returned HTTP {status}: {}",
                body.trim()
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| SessionError::Credential(format!("undecodable broker response: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(SessionError::Credential(error));
        }

        match parsed.client_secret.map(ClientSecret::into_inner) {
            Some(secret) if !secret.is_empty() => Ok(secret),
            _ => Err(SessionError::Credential(
                "broker response did not include a client secret".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::json;

    async fn spawn_broker(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/token")
    }

    fn broker_client(endpoint: String) -> TokenBroker {
        TokenBroker::new(reqwest::Client::new(), endpoint)
    }

    #[tokio::test]
    async fn test_mint_plain_secret() {
        let endpoint = spawn_broker(Router::new().route(
            "/token",
            post(|| async { Json(json!({ "client_secret": "ek_abc123" })) }),
        ))
        .await;

        let secret = broker_client(endpoint)
            .mint(&TokenRequest::default())
            .await
            .unwrap();
        assert_eq!(secret, "ek_abc123");
    }

    #[tokio::test]
    async fn test_mint_nested_secret() {
        let endpoint = spawn_broker(Router::new().route(
            "/token",
            post(|| async { Json(json!({ "client_secret": { "value": "ek_nested" } })) }),
        ))
        .await;

        let secret = broker_client(endpoint)
            .mint(&TokenRequest::default())
            .await
            .unwrap();
        assert_eq!(secret, "ek_nested");
    }

    #[tokio::test]
    async fn test_mint_forwards_voice_and_persona() {
        let endpoint = spawn_broker(Router::new().route(
            "/token",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["presetVoice"], "verse");
                assert_eq!(body["persona"]["gender"], "female");
                Json(json!({ "client_secret": "ek_ok" }))
            }),
        ))
        .await;

        let request = TokenRequest {
            preset_voice: Some("verse".to_string()),
            persona: Some(Persona {
                age: None,
                gender: Some("female".to_string()),
            }),
        };
        let secret = broker_client(endpoint).mint(&request).await.unwrap();
        assert_eq!(secret, "ek_ok");
    }

    #[tokio::test]
    async fn test_mint_error_body() {
        let endpoint = spawn_broker(Router::new().route(
            "/token",
            post(|| async { Json(json!({ "error": "quota exceeded" })) }),
        ))
        .await;

        let err = broker_client(endpoint)
            .mint(&TokenRequest::default())
            .await
            .unwrap_err();
        match err {
            SessionError::Credential(msg) => assert_eq!(msg, "quota exceeded"),
            other => panic!("expected Credential, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mint_non_success_status() {
        let endpoint = spawn_broker(Router::new().route(
            "/token",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;

        let err = broker_client(endpoint)
            .mint(&TokenRequest::default())
            .await
            .unwrap_err();
        match err {
            SessionError::Credential(msg) => {
                assert!(msg.contains("503"), "unexpected message: {msg}")
            }
            other => panic!("expected Credential, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mint_missing_secret() {
        let endpoint = spawn_broker(Router::new().route(
            "/token",
            post(|| async { Json(json!({ "expires_at": 1234567890 })) }),
        ))
        .await;

        let err = broker_client(endpoint)
            .mint(&TokenRequest::default())
            .await
            .unwrap_err();
        match err {
            SessionError::Credential(msg) => assert!(msg.contains("client secret")),
            other => panic!("expected Credential, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mint_empty_secret_rejected() {
        let endpoint = spawn_broker(Router::new().route(
            "/token",
            post(|| async { Json(json!({ "client_secret": "" })) }),
        ))
        .await;

        let err = broker_client(endpoint)
            .mint(&TokenRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Credential(_)));
    }
}
