use crate::{
    config::Config,
    graph::GraphClient,
    response::ResponseBuilder,
    secrets::SecretRepository,
    token_cache::{AzureClientCredentials, TokenCache},
    turnstile::TurnstileVerifier,
};
use anyhow::Context;
use reqwest::Client;
use std::sync::Arc;

pub type CachedTokens = TokenCache<AzureClientCredentials>;
pub type CachedGraphClient = GraphClient<CachedTokens>;

/// Builds the collaborators a handler needs from its configuration. All of
/// them share one HTTP connection pool.
pub struct Services {
    config: Config,
    secrets: Arc<dyn SecretRepository>,
    http: Client,
}

impl Services {
    pub fn new(config: Config, secrets: Arc<dyn SecretRepository>) -> Self {
        Self {
            config,
            secrets,
            http: Client::new(),
        }
    }

    pub fn bot_verifier(&self) -> TurnstileVerifier {
        TurnstileVerifier::new(
            self.http.clone(),
            &self.config.endpoints.turnstile_verify_url,
            self.config.expected_hostname(),
            self.secrets.clone(),
        )
    }

    pub fn graph_client(&self) -> CachedGraphClient {
        let credentials = AzureClientCredentials::new(
            self.http.clone(),
            &self.config.endpoints.authority_host,
            &self.config.tenant_id,
            &self.config.client_id,
            self.secrets.clone(),
        );
        GraphClient::new(
            self.http.clone(),
            &self.config.endpoints.graph_api_url,
            TokenCache::new(credentials),
        )
    }

    pub fn responses(&self) -> anyhow::Result<ResponseBuilder> {
        let origin = self.config.cors_origin();
        ResponseBuilder::new(&origin)
            .with_context(|| format!("ALLOWED_ORIGIN {origin} is not a valid header value"))
    }
}
