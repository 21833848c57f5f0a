use crate::{
    error::VerificationFailure,
    request_id::RequestId,
    secrets::{SecretRepository, TURNSTILE_SECRET_KEY},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub valid: bool,
    pub reason: Option<VerificationFailure>,
}

impl VerificationResult {
    pub fn passed() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn failed(reason: VerificationFailure) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// Mandatory gate in front of every downstream call.
#[async_trait]
pub trait BotVerifier: Send + Sync {
    async fn verify(&self, token: &str, caller_ip: &str, request_id: &RequestId)
        -> VerificationResult;
}

/// Cloudflare Turnstile siteverify client.
pub struct TurnstileVerifier {
    http: Client,
    verify_url: String,
    expected_hostname: String,
    secrets: Arc<dyn SecretRepository>,
}

#[derive(Deserialize)]
struct TurnstileResponse {
    success: bool,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

impl TurnstileVerifier {
    pub fn new(
        http: Client,
        verify_url: impl Into<String>,
        expected_hostname: impl Into<String>,
        secrets: Arc<dyn SecretRepository>,
    ) -> Self {
        Self {
            http,
            verify_url: verify_url.into(),
            expected_hostname: expected_hostname.into(),
            secrets,
        }
    }

    async fn send_token(
        &self,
        token: &str,
        caller_ip: &str,
        request_id: &RequestId,
    ) -> Result<TurnstileResponse, VerificationFailure> {
        let secret = self
            .secrets
            .get_secret(TURNSTILE_SECRET_KEY)
            .await
            .map_err(|secret_error| {
                error!(%request_id, "Could not retrieve Turnstile secret: {secret_error}");
                VerificationFailure::ServiceError
            })?;
        let response = self
            .http
            .post(&self.verify_url)
            .form(&[
                ("secret", secret.as_str()),
                ("response", token),
                ("remoteip", caller_ip),
            ])
            .send()
            .await
            .map_err(|_| {
                error!(%request_id, "Turnstile error");
                VerificationFailure::ServiceError
            })?;
        response.json().await.map_err(|_| {
            error!(%request_id, "Turnstile returned an unreadable response");
            VerificationFailure::ServiceError
        })
    }

    fn process_response(
        &self,
        response: TurnstileResponse,
        request_id: &RequestId,
    ) -> VerificationResult {
        if !response.success {
            let codes = if response.error_codes.is_empty() {
                "unknown".to_string()
            } else {
                response.error_codes.join(", ")
            };
            warn!(%request_id, "Turnstile failed: {codes}");
            return VerificationResult::failed(VerificationFailure::VerificationFailed);
        }
        match response.hostname.as_deref() {
            Some(hostname) if !hostname.is_empty() && hostname != self.expected_hostname => {
                warn!(%request_id, "Hostname mismatch");
                VerificationResult::failed(VerificationFailure::HostnameMismatch)
            }
            _ => VerificationResult::passed(),
        }
    }
}

#[async_trait]
impl BotVerifier for TurnstileVerifier {
    async fn verify(
        &self,
        token: &str,
        caller_ip: &str,
        request_id: &RequestId,
    ) -> VerificationResult {
        match self.send_token(token, caller_ip, request_id).await {
            Ok(response) => self.process_response(response, request_id),
            Err(reason) => VerificationResult::failed(reason),
        }
    }
}
