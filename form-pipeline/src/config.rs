use anyhow::{anyhow, Context};
use std::borrow::Cow;
use url::Url;

const DEFAULT_ALLOWED_ORIGIN: &str = "https://www.hybe.tech";
const TURNSTILE_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";
const AZURE_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const GRAPH_API_URL: &str = "https://graph.microsoft.com/v1.0";

/// Settings shared by both form handlers. Secrets are not part of this; see
/// [`crate::secrets`].
#[derive(Clone, Debug)]
pub struct Config {
    pub allowed_origin: Url,
    pub tenant_id: String,
    pub client_id: String,
    pub endpoints: Endpoints,
}

/// External service locations. Overridable so that tests can point the
/// handlers at local fakes.
#[derive(Clone, Debug)]
pub struct Endpoints {
    pub turnstile_verify_url: String,
    pub authority_host: String,
    pub graph_api_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let allowed_origin = env_or("ALLOWED_ORIGIN", DEFAULT_ALLOWED_ORIGIN);
        Ok(Self {
            allowed_origin: parse_origin(&allowed_origin)?,
            tenant_id: required_env("AZURE_TENANT_ID")?,
            client_id: required_env("AZURE_CLIENT_ID")?,
            endpoints: Endpoints::from_env(),
        })
    }

    /// The hostname which the CAPTCHA provider must report for a token to be
    /// accepted.
    pub fn expected_hostname(&self) -> &str {
        self.allowed_origin.host_str().unwrap_or_default()
    }

    /// Origin in the form used by the CORS allow-origin header.
    pub fn cors_origin(&self) -> String {
        self.allowed_origin.origin().ascii_serialization()
    }
}

impl Endpoints {
    pub fn from_env() -> Self {
        Self {
            turnstile_verify_url: env_or("TURNSTILE_VERIFY_URL", TURNSTILE_VERIFY_URL).into(),
            authority_host: env_or("AZURE_AUTHORITY_HOST", AZURE_AUTHORITY_HOST).into(),
            graph_api_url: env_or("GRAPH_API_URL", GRAPH_API_URL).into(),
        }
    }
}

pub fn parse_origin(origin: &str) -> anyhow::Result<Url> {
    let url = Url::parse(origin).with_context(|| format!("ALLOWED_ORIGIN {origin} is not a URL"))?;
    if url.host_str().is_none() {
        return Err(anyhow!("ALLOWED_ORIGIN {origin} has no host"));
    }
    Ok(url)
}

pub fn required_env(key: &'static str) -> anyhow::Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        Ok(_) => Err(anyhow!("Environment variable {key} is empty")),
        Err(error) => Err(error).with_context(|| format!("Missing environment variable {key}")),
    }
}

fn env_or(key: &'static str, default: &'static str) -> Cow<'static, str> {
    std::env::var(key)
        .map(Cow::Owned)
        .unwrap_or(default.into())
}
