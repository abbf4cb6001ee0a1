//! Credential fetch and SDP offer/answer exchange.
//!
//! ```text
//! GET  {credential_url}                → {"client_secret": {"value": "ek_..."}}
//! POST {base_url}?model={model}        body: offer SDP
//!      Authorization: Bearer ek_...    → answer SDP
//!      Content-Type: application/sdp
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use duplex_core::BridgeError;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, instrument};

const SDP_CONTENT_TYPE: &str = "application/sdp";
const MAX_ERROR_BODY: usize = 200;

/// Short-lived bearer credential for the negotiation endpoint.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw credential value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for building the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Signaling collaborator used during `start`.
#[async_trait]
pub trait Signaling: Send + Sync {
    /// Obtain a fresh credential.
    async fn fetch_credential(&self) -> Result<Credential, BridgeError>;

    /// Submit the local offer and return the remote answer SDP.
    async fn exchange(&self, credential: &Credential, offer_sdp: &str)
    -> Result<String, BridgeError>;
}

/// Endpoints for [`HttpSignaling`].
#[derive(Clone, Debug)]
pub struct HttpSignalingConfig {
    /// Credential endpoint.
    pub credential_url: String,
    /// Negotiation endpoint (without query string).
    pub base_url: String,
    /// Model id sent as the `model` query parameter.
    pub model: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

#[derive(Deserialize)]
struct CredentialResponse {
    client_secret: ClientSecret,
}

#[derive(Deserialize)]
struct ClientSecret {
    value: String,
}

/// `reqwest` implementation of [`Signaling`].
pub struct HttpSignaling {
    client: reqwest::Client,
    config: HttpSignalingConfig,
}

impl HttpSignaling {
    /// Build a client with the configured timeout.
    pub fn new(config: HttpSignalingConfig) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BridgeError::negotiation(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &HttpSignalingConfig {
        &self.config
    }
}

#[async_trait]
impl Signaling for HttpSignaling {
    #[instrument(skip_all, fields(url = %self.config.credential_url))]
    async fn fetch_credential(&self) -> Result<Credential, BridgeError> {
        let response = self
            .client
            .get(&self.config.credential_url)
            .send()
            .await
            .map_err(|e| BridgeError::negotiation(format!("credential request: {e}")))?;

        let response = check_status(response, "credential request").await?;
        let body: CredentialResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::negotiation(format!("credential response: {e}")))?;

        if body.client_secret.value.is_empty() {
            return Err(BridgeError::negotiation("credential response had an empty secret"));
        }
        debug!("credential acquired");
        Ok(Credential::new(body.client_secret.value))
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn exchange(
        &self,
        credential: &Credential,
        offer_sdp: &str,
    ) -> Result<String, BridgeError> {
        let response = self
            .client
            .post(&self.config.base_url)
            .query(&[("model", self.config.model.as_str())])
            .header(AUTHORIZATION, format!("Bearer {}", credential.expose()))
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer_sdp.to_owned())
            .send()
            .await
            .map_err(|e| BridgeError::negotiation(format!("sdp exchange: {e}")))?;

        let response = check_status(response, "sdp exchange").await?;
        let answer = response
            .text()
            .await
            .map_err(|e| BridgeError::negotiation(format!("sdp answer body: {e}")))?;

        validate_answer(&answer)?;
        debug!(bytes = answer.len(), "answer received");
        Ok(answer)
    }
}

async fn check_status(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, BridgeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    Err(BridgeError::Negotiation {
        reason: format!("{what} returned {status}: {snippet}"),
        status: Some(status.as_u16()),
    })
}

/// An answer is usable when it is a non-empty session description.
fn validate_answer(answer: &str) -> Result<(), BridgeError> {
    let trimmed = answer.trim_start();
    if trimmed.is_empty() {
        return Err(BridgeError::negotiation("empty sdp answer"));
    }
    if !trimmed.starts_with("v=") {
        return Err(BridgeError::negotiation("answer is not a session description"));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
