use secrecy::SecretString;
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

/// Where the ephemeral realtime credential comes from.
#[derive(Debug)]
pub enum CredentialConfig {
    /// A token endpoint that mints credentials on our behalf.
    Endpoint(String),
    /// Mint credentials directly with a server-side API key.
    ApiKey(SecretString),
}

/// A capability provider served over HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub name: String,
    pub url: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub realtime_url: String,
    pub api_base: String,
    pub model: String,
    pub voice: String,
    pub instructions: Option<String>,
    pub credential: CredentialConfig,
    pub providers: Vec<ProviderEndpoint>,
    pub geolocate_url: Option<String>,
    pub log_level: Level,
    pub token_timeout: Duration,
    pub connect_timeout: Duration,
    pub tool_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let realtime_url = std::env::var("REALTIME_URL")
            .unwrap_or_else(|_| "wss://api.openai.com/v1/realtime".to_string());
        let api_base = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model = std::env::var("REALTIME_MODEL")
            .unwrap_or_else(|_| "gpt-4o-realtime-preview-2024-12-17".to_string());
        let voice = std::env::var("REALTIME_VOICE").unwrap_or_else(|_| "alloy".to_string());
        let instructions = std::env::var("KELION_INSTRUCTIONS")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let credential = match (
            std::env::var("CREDENTIAL_URL").ok(),
            std::env::var("OPENAI_API_KEY").ok(),
        ) {
            (Some(url), _) => CredentialConfig::Endpoint(url),
            (None, Some(key)) => CredentialConfig::ApiKey(SecretString::from(key)),
            (None, None) => {
                return Err(ConfigError::MissingVar(
                    "CREDENTIAL_URL or OPENAI_API_KEY must be set".to_string(),
                ));
            }
        };

        let providers = match std::env::var("KELION_PROVIDERS") {
            Ok(list) => parse_providers(&list)?,
            Err(_) => Vec::new(),
        };
        let geolocate_url = std::env::var("GEOLOCATE_URL").ok();

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            realtime_url,
            api_base,
            model,
            voice,
            instructions,
            credential,
            providers,
            geolocate_url,
            log_level,
            token_timeout: millis("TOKEN_TIMEOUT_MS", 10_000)?,
            connect_timeout: millis("CONNECT_TIMEOUT_MS", 15_000)?,
            tool_timeout: millis("TOOL_TIMEOUT_MS", 15_000)?,
        })
    }
}

fn millis(var: &str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string())),
        Err(_) => Ok(Duration::from_millis(default)),
    }
}

/// Parses `name=url` pairs separated by commas.
fn parse_providers(list: &str) -> Result<Vec<ProviderEndpoint>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
                Ok(ProviderEndpoint {
                    name: name.trim().to_string(),
                    url: url.trim().to_string(),
                })
            }
            _ => Err(ConfigError::InvalidValue(
                "KELION_PROVIDERS".to_string(),
                format!("'{entry}' is not a name=url pair"),
            )),
        })
        .collect()
}
