//! HTTP-backed capability providers.

use crate::config::ProviderEndpoint;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use kelion_core::{CapabilityProvider, ProviderRegistry, ToolSpec, provider::names};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// POSTs the call arguments as JSON and returns the JSON response body.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpProvider {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl CapabilityProvider for HttpProvider {
    async fn invoke(&self, args: Value) -> Result<Value> {
        debug!(url = %self.url, "calling provider endpoint");
        let body = self
            .client
            .post(&self.url)
            .json(&args)
            .send()
            .await
            .with_context(|| format!("{} unreachable", self.url))?
            .error_for_status()?
            .json()
            .await
            .context("provider returned invalid JSON")?;
        Ok(body)
    }
}

/// Approximate position from the caller's public IP (ip-api.com style
/// response: `{status, lat, lon, city}`).
#[derive(Debug, Clone)]
pub struct IpLocator {
    client: reqwest::Client,
    url: String,
}

impl IpLocator {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl CapabilityProvider for IpLocator {
    async fn invoke(&self, _args: Value) -> Result<Value> {
        let body: Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("geolocation service unreachable")?
            .error_for_status()?
            .json()
            .await
            .context("geolocation service returned invalid JSON")?;
        check_ip_lookup(body)
    }
}

fn check_ip_lookup(body: Value) -> Result<Value> {
    if body.get("status").and_then(Value::as_str) == Some("fail") {
        let reason = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown reason");
        bail!("IP lookup failed: {reason}");
    }
    Ok(body)
}

/// How each known capability is described to the model.
pub fn tool_spec(name: &str, timeout: Duration) -> ToolSpec {
    let spec = match name {
        names::WEATHER => ToolSpec::new(name, "Current weather at the given coordinates.")
            .with_parameters(json!({
                "type": "object",
                "properties": {
                    "lat": { "type": "number" },
                    "lon": { "type": "number" }
                },
                "required": ["lat", "lon"]
            })),
        names::WEB_SEARCH => ToolSpec::new(name, "Search the web for up-to-date information.")
            .with_parameters(json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            })),
        names::GENERATE_IMAGE => ToolSpec::new(name, "Generate an image from a description.")
            .with_parameters(json!({
                "type": "object",
                "properties": { "prompt": { "type": "string" } },
                "required": ["prompt"]
            })),
        names::GENERATE_VIDEO => ToolSpec::new(name, "Generate a short video from a description.")
            .with_parameters(json!({
                "type": "object",
                "properties": { "prompt": { "type": "string" } },
                "required": ["prompt"]
            })),
        names::EXECUTE_CODE => ToolSpec::new(name, "Write and run a short Python program.")
            .with_parameters(json!({
                "type": "object",
                "properties": { "request": { "type": "string" } },
                "required": ["request"]
            })),
        names::OPEN_DOCUMENT => ToolSpec::new(name, "Open or create a document for the user.")
            .with_parameters(json!({
                "type": "object",
                "properties": { "request": { "type": "string" } },
                "required": ["request"]
            })),
        names::GEOLOCATE => ToolSpec::new(name, "The user's approximate current location."),
        names::REVERSE_GEOCODE => {
            ToolSpec::new(name, "Street address for coordinates.").internal()
        }
        other => ToolSpec::new(other, format!("The `{other}` capability."))
            .with_parameters(json!({ "type": "object", "additionalProperties": true })),
    };
    spec.with_timeout(timeout)
}

/// Builds the registry from configured endpoints.
pub fn registry(
    client: &reqwest::Client,
    endpoints: &[ProviderEndpoint],
    geolocate_url: Option<&str>,
    timeout: Duration,
) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for endpoint in endpoints {
        registry.register(
            tool_spec(&endpoint.name, timeout),
            Arc::new(HttpProvider::new(client.clone(), endpoint.url.clone())),
        );
    }
    if let Some(url) = geolocate_url {
        if registry.contains(names::GEOLOCATE) {
            warn!("GEOLOCATE_URL overrides the geolocate provider endpoint");
        }
        registry.register(
            tool_spec(names::GEOLOCATE, timeout),
            Arc::new(IpLocator::new(client.clone(), url)),
        );
    }
    registry
}
