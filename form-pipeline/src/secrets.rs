use async_once_cell::OnceCell;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use std::{collections::HashMap, fmt::Display, sync::Arc};
use tracing::info;

pub const TURNSTILE_SECRET_KEY: &str = "TURNSTILE_SECRET_KEY";
pub const AZURE_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";

const SECRETS_ID_VARIABLE: &str = "FORM_SECRETS_ID";

#[async_trait]
pub trait SecretRepository: Send + Sync {
    async fn get_secret(&self, name: &'static str) -> Result<String, SecretError>;
}

/// Chooses AWS Secrets Manager when `FORM_SECRETS_ID` is set and falls back to
/// plain environment variables otherwise.
pub async fn open_secret_repository() -> Arc<dyn SecretRepository> {
    match std::env::var(SECRETS_ID_VARIABLE) {
        Ok(secret_id) => {
            info!("Reading secrets from AWS Secrets Manager");
            Arc::new(AwsSecretsManagerSecretRepository::open(secret_id).await)
        }
        Err(_) => Arc::new(EnvironmentSecretRepository),
    }
}

pub struct EnvironmentSecretRepository;

#[async_trait]
impl SecretRepository for EnvironmentSecretRepository {
    async fn get_secret(&self, name: &'static str) -> Result<String, SecretError> {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(SecretError::Missing(name)),
        }
    }
}

/// Reads a single JSON secret whose keys are the secret names. The secret is
/// fetched at most once per warm process unless the fetch fails.
pub struct AwsSecretsManagerSecretRepository {
    client: aws_sdk_secretsmanager::Client,
    secret_id: String,
    values: OnceCell<HashMap<String, String>>,
}

impl AwsSecretsManagerSecretRepository {
    pub async fn open(secret_id: String) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Ok(url) = std::env::var("AWS_ENDPOINT_URL") {
            loader = loader.endpoint_url(url);
        }
        let config = loader.load().await;
        Self {
            client: aws_sdk_secretsmanager::Client::new(&config),
            secret_id,
            values: Default::default(),
        }
    }

    async fn fetch(&self) -> Result<HashMap<String, String>, SecretError> {
        let secret = self
            .client
            .get_secret_value()
            .secret_id(&self.secret_id)
            .send()
            .await
            .map_err(|_| SecretError::Unavailable)?;
        let Some(secret_value) = secret.secret_string() else {
            return Err(SecretError::Unavailable);
        };
        serde_json::from_str(secret_value).map_err(|_| SecretError::Malformed)
    }
}

#[async_trait]
impl SecretRepository for AwsSecretsManagerSecretRepository {
    async fn get_secret(&self, name: &'static str) -> Result<String, SecretError> {
        let values = self.values.get_or_try_init(self.fetch()).await?;
        values.get(name).cloned().ok_or(SecretError::Missing(name))
    }
}

/// Secrets held in memory, for embedding the pipeline where secrets are
/// already resolved.
#[derive(Default)]
pub struct StaticSecretRepository(HashMap<&'static str, String>);

impl StaticSecretRepository {
    pub fn with_secret(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.0.insert(name, value.into());
        self
    }
}

#[async_trait]
impl SecretRepository for StaticSecretRepository {
    async fn get_secret(&self, name: &'static str) -> Result<String, SecretError> {
        self.0.get(name).cloned().ok_or(SecretError::Missing(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    Missing(&'static str),
    Unavailable,
    Malformed,
}

impl Display for SecretError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretError::Missing(name) => write!(f, "Missing secret {name}"),
            SecretError::Unavailable => write!(f, "Secret store unavailable"),
            SecretError::Malformed => write!(f, "Secret is not a JSON object of strings"),
        }
    }
}

impl std::error::Error for SecretError {}
