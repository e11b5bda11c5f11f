//! Ephemeral credential sources.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::DateTime;
use kelion_core::{Credential, CredentialSource};
use kelion_realtime_types::TurnDetection;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::debug;

/// Fetches credentials from a token endpoint (GET, JSON response).
#[derive(Debug, Clone)]
pub struct HttpCredentialSource {
    client: reqwest::Client,
    url: String,
}

impl HttpCredentialSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn fetch(&self) -> Result<Credential> {
        let body: Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("token endpoint unreachable")?
            .error_for_status()
            .context("token endpoint refused")?
            .json()
            .await
            .context("token endpoint returned invalid JSON")?;
        parse_credential(&body)
    }
}

/// Mints credentials directly from the realtime sessions API using a
/// server-side key.
#[derive(Debug)]
pub struct SessionMinter {
    client: reqwest::Client,
    api_base: String,
    api_key: SecretString,
    model: String,
    voice: String,
    instructions: Option<String>,
}

impl SessionMinter {
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
        voice: impl Into<String>,
        instructions: Option<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            api_key,
            model: model.into(),
            voice: voice.into(),
            instructions,
        }
    }

    fn request_body(&self) -> Value {
        let mut body = json!({
            "model": self.model,
            "voice": self.voice,
            "turn_detection": TurnDetection::default(),
        });
        if let Some(instructions) = &self.instructions {
            body["instructions"] = Value::String(instructions.clone());
        }
        body
    }
}

#[async_trait]
impl CredentialSource for SessionMinter {
    async fn fetch(&self) -> Result<Credential> {
        let url = format!("{}/realtime/sessions", self.api_base.trim_end_matches('/'));
        debug!(%url, model = %self.model, "minting realtime session");
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.request_body())
            .send()
            .await
            .context("realtime sessions API unreachable")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("failed to create realtime session ({status}): {text}"));
        }
        let body: Value = response
            .json()
            .await
            .context("realtime sessions API returned invalid JSON")?;
        parse_credential(&body)
    }
}

/// Reads `{client_secret: {value, expires_at}, expires_at?, session_id?}`.
/// Both the secret and an expiry are required.
pub fn parse_credential(body: &Value) -> Result<Credential> {
    let secret = body
        .get("client_secret")
        .context("response has no client_secret")?;
    let token = match secret {
        Value::String(token) => token.as_str(),
        other => other
            .get("value")
            .and_then(Value::as_str)
            .context("client_secret has no value")?,
    };
    if token.is_empty() {
        return Err(anyhow!("client_secret is empty"));
    }

    let expires = secret
        .get("expires_at")
        .and_then(Value::as_i64)
        .or_else(|| body.get("expires_at").and_then(Value::as_i64))
        .context("response has no expiry")?;
    let expires_at = DateTime::from_timestamp(expires, 0)
        .with_context(|| format!("expiry {expires} is out of range"))?;

    let session_id = body
        .get("session_id")
        .or_else(|| body.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Credential {
        token: SecretString::from(token.to_string()),
        expires_at,
        session_id,
    })
}
