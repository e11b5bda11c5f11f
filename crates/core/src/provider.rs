//! Capability providers: the external lookups the assistant can use.

use crate::error::ProviderError;
use async_trait::async_trait;
use kelion_realtime_types::ToolDefinition;
use serde_json::{Value, json};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Names under which the built-in capabilities are registered.
pub mod names {
    pub const WEATHER: &str = "weather";
    pub const GEOLOCATE: &str = "geolocate";
    pub const REVERSE_GEOCODE: &str = "reverse_geocode";
    pub const WEB_SEARCH: &str = "web_search";
    pub const GENERATE_IMAGE: &str = "generate_image";
    pub const GENERATE_VIDEO: &str = "generate_video";
    pub const EXECUTE_CODE: &str = "execute_code";
    pub const OPEN_DOCUMENT: &str = "open_document";
}

/// A named external capability (weather, search, geocoding, ...).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Performs the lookup. Errors are reported to the model as text, never
    /// propagated to the session.
    async fn invoke(&self, args: Value) -> anyhow::Result<Value>;
}

/// How a provider is advertised to the model and how long it may take.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
    pub timeout: Duration,
    /// Whether the model may call it directly. Internal helpers such as
    /// reverse geocoding are only used by the orchestrator.
    pub advertised: bool,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({ "type": "object", "properties": {} }),
            timeout: Duration::from_secs(15),
            advertised: true,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn internal(mut self) -> Self {
        self.advertised = false;
        self
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.name.clone(),
            self.description.clone(),
            self.parameters.clone(),
        )
    }
}

#[derive(Clone)]
struct Entry {
    spec: ToolSpec,
    provider: Arc<dyn CapabilityProvider>,
}

/// Registry mapping function names to providers. Shared read-only once the
/// session starts.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    entries: HashMap<String, Entry>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under `spec.name`, replacing any previous entry.
    pub fn register(&mut self, spec: ToolSpec, provider: Arc<dyn CapabilityProvider>) {
        if self.entries.contains_key(&spec.name) {
            warn!(name = %spec.name, "replacing registered provider");
        }
        self.entries
            .insert(spec.name.clone(), Entry { spec, provider });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Function definitions sent to the model in `session.update`, sorted by
    /// name.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<_> = self
            .entries
            .values()
            .filter(|entry| entry.spec.advertised)
            .map(|entry| entry.spec.definition())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Calls the provider registered under `name`, bounded by its timeout.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, ProviderError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ProviderError::NotRegistered(name.to_string()))?;
        let timeout = entry.spec.timeout;
        debug!(name, "invoking provider");
        match tokio::time::timeout(timeout, entry.provider.invoke(args)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ProviderError::Failed {
                name: name.to_string(),
                message: format!("{e:#}"),
            }),
            Err(_) => Err(ProviderError::Timeout {
                name: name.to_string(),
                after: timeout,
            }),
        }
    }
}
