use crate::secrets::{SecretRepository, AZURE_CLIENT_SECRET};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::{fmt::Display, sync::Arc};
use tracing::{info, warn};

pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Tokens are considered expired this long before the provider says they are.
const EXPIRY_BUFFER_MS: i64 = 300_000;
/// Used when the provider does not say how long a token lives.
const DEFAULT_LIFETIME_MS: i64 = 3_600_000;

/// A bearer credential for the downstream API.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns a usable token, refreshing only when needed.
    async fn get_token(&self) -> Result<String, TokenError>;

    /// Unconditionally obtains a fresh token.
    async fn refresh(&self) -> Result<String, TokenError>;
}

/// Performs the actual credential exchange.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self) -> Result<IssuedToken, TokenError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Option<Duration>,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug)]
struct CachedCredential {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Memoises one credential for the lifetime of the warm process.
///
/// Concurrent callers that all see an expired credential each refresh; the
/// last one to finish wins. That is harmless since every refreshed token is
/// valid.
pub struct TokenCache<ProviderT: CredentialProvider, ClockT: Clock = SystemClock> {
    provider: ProviderT,
    clock: ClockT,
    cached: RwLock<Option<Arc<CachedCredential>>>,
}

impl<ProviderT: CredentialProvider> TokenCache<ProviderT> {
    pub fn new(provider: ProviderT) -> Self {
        Self::with_clock(provider, SystemClock)
    }
}

impl<ProviderT: CredentialProvider, ClockT: Clock> TokenCache<ProviderT, ClockT> {
    pub fn with_clock(provider: ProviderT, clock: ClockT) -> Self {
        Self {
            provider,
            clock,
            cached: RwLock::new(None),
        }
    }

    fn fresh_token(&self) -> Option<String> {
        let cached = self.cached.read().clone()?;
        let refresh_at = cached.expires_at - Duration::milliseconds(EXPIRY_BUFFER_MS);
        (self.clock.now() < refresh_at).then(|| cached.token.clone())
    }
}

#[async_trait]
impl<ProviderT: CredentialProvider, ClockT: Clock> TokenSource for TokenCache<ProviderT, ClockT> {
    async fn get_token(&self) -> Result<String, TokenError> {
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<String, TokenError> {
        let issued = self.provider.acquire().await?;
        if issued.access_token.is_empty() {
            return Err(TokenError::MissingToken);
        }
        let lifetime = issued
            .expires_in
            .unwrap_or_else(|| Duration::milliseconds(DEFAULT_LIFETIME_MS));
        let expires_at = self.clock.now() + lifetime;
        *self.cached.write() = Some(Arc::new(CachedCredential {
            token: issued.access_token.clone(),
            expires_at,
        }));
        info!("Acquired new downstream API token");
        Ok(issued.access_token)
    }
}

/// OAuth2 client-credential grant against the Azure AD v2 token endpoint.
pub struct AzureClientCredentials {
    http: Client,
    token_url: String,
    client_id: String,
    scope: &'static str,
    secrets: Arc<dyn SecretRepository>,
}

impl AzureClientCredentials {
    pub fn new(
        http: Client,
        authority_host: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        secrets: Arc<dyn SecretRepository>,
    ) -> Self {
        Self {
            http,
            token_url: format!(
                "{}/{tenant_id}/oauth2/v2.0/token",
                authority_host.trim_end_matches('/')
            ),
            client_id: client_id.into(),
            scope: GRAPH_SCOPE,
            secrets,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[async_trait]
impl CredentialProvider for AzureClientCredentials {
    async fn acquire(&self) -> Result<IssuedToken, TokenError> {
        let client_secret = self
            .secrets
            .get_secret(AZURE_CLIENT_SECRET)
            .await
            .map_err(|error| {
                warn!("Could not retrieve client secret: {error}");
                TokenError::MissingSecret
            })?;
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("scope", self.scope),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|_| TokenError::Unreachable)?;
        if !response.status().is_success() {
            return Err(TokenError::Rejected(response.status()));
        }
        let body: TokenResponse = response.json().await.map_err(|_| TokenError::MissingToken)?;
        let Some(access_token) = body.access_token.filter(|token| !token.is_empty()) else {
            return Err(TokenError::MissingToken);
        };
        Ok(IssuedToken {
            access_token,
            expires_in: body
                .expires_in
                .filter(|seconds| *seconds > 0)
                .map(Duration::seconds),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    MissingSecret,
    Unreachable,
    Rejected(StatusCode),
    MissingToken,
}

impl Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::MissingSecret => write!(f, "client secret unavailable"),
            TokenError::Unreachable => write!(f, "identity provider unreachable"),
            TokenError::Rejected(status) => {
                write!(f, "identity provider returned status {}", status.as_u16())
            }
            TokenError::MissingToken => write!(f, "no access token in response"),
        }
    }
}

impl std::error::Error for TokenError {}
