//! One-time context priming at session start.

use crate::{
    brain::{coordinates_args, describe_weather},
    conversation::Conversation,
    location::Location,
    provider::{ProviderRegistry, names},
};
use kelion_realtime_types::{ControlMessage, Role, SessionSettings};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

const LOCATION_UNKNOWN: &str = "Location unknown";
const WEATHER_UNKNOWN: &str = "Weather unknown";

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Context {
    pub location: Option<Location>,
    pub weather: Option<String>,
}

impl Context {
    fn message(&self) -> String {
        let location = self
            .location
            .as_ref()
            .map(Location::describe)
            .unwrap_or_else(|| LOCATION_UNKNOWN.to_string());
        let weather = self.weather.as_deref().unwrap_or(WEATHER_UNKNOWN);
        format!(
            "[REAL-TIME DATA - USE THIS, DO NOT GUESS]\n\
             User's EXACT location: {location}\n\
             Current weather: {weather}\n\
             When user asks about weather or location, use THIS data. Do not make up different data."
        )
    }
}

/// Configures the remote session, then injects best-effort location and
/// weather as a system message. Lookups never block longer than `timeout`.
pub(crate) async fn prime(
    conversation: &Conversation,
    registry: &ProviderRegistry,
    settings: SessionSettings,
    timeout: Duration,
) -> Context {
    conversation
        .channel()
        .send(ControlMessage::SessionUpdate { session: settings })
        .await;

    let context = match tokio::time::timeout(timeout, gather(conversation, registry)).await {
        Ok(context) => context,
        Err(_) => {
            warn!(?timeout, "context priming timed out");
            Context::default()
        }
    };
    info!(
        location = context.location.is_some(),
        weather = context.weather.is_some(),
        "session primed"
    );

    conversation
        .channel()
        .send(ControlMessage::text_item(Role::System, context.message()))
        .await;
    context
}

async fn gather(conversation: &Conversation, registry: &ProviderRegistry) -> Context {
    let cache = conversation.location();
    let cached = cache.get();
    let found = match cached {
        Some(location) => Some(location),
        None => locate(registry).await,
    };
    let Some(mut location) = found else {
        return Context::default();
    };

    let args = coordinates_args(&location);
    let reverse = async {
        if location.address.is_some() || !registry.contains(names::REVERSE_GEOCODE) {
            return None;
        }
        lookup(registry, names::REVERSE_GEOCODE, args.clone()).await
    };
    let weather = async {
        if !registry.contains(names::WEATHER) {
            return None;
        }
        lookup(registry, names::WEATHER, args.clone()).await
    };
    let (reverse, weather) = tokio::join!(reverse, weather);

    if let Some(place) = reverse {
        location.enrich(&place);
    }
    let city = location.city.clone().unwrap_or_else(|| location.describe());
    let weather = weather.and_then(|value| describe_weather(&value, &city));
    cache.set(location.clone());

    Context {
        location: Some(location),
        weather,
    }
}

async fn locate(registry: &ProviderRegistry) -> Option<Location> {
    if !registry.contains(names::GEOLOCATE) {
        debug!("no geolocation provider registered");
        return None;
    }
    let value = lookup(registry, names::GEOLOCATE, json!({})).await?;
    Location::from_json(&value)
}

async fn lookup(registry: &ProviderRegistry, name: &str, args: Value) -> Option<Value> {
    match registry.invoke(name, args).await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(name, error = %e, "priming lookup failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        conversation::test_support::Harness,
        provider::{CapabilityProvider, MockCapabilityProvider, ToolSpec},
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    fn system_text(message: &ControlMessage) -> String {
        match message {
            ControlMessage::ConversationItemCreate {
                item: kelion_realtime_types::ConversationItem::Message { role, content },
            } => {
                assert_eq!(*role, Role::System);
                content[0].text().to_string()
            }
            other => panic!("expected a system message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn primes_with_location_and_weather() {
        let mut harness = Harness::new();
        let mut registry = ProviderRegistry::new();
        let mut geolocate = MockCapabilityProvider::new();
        geolocate
            .expect_invoke()
            .times(1)
            .returning(|_| Ok(json!({ "lat": 47.16, "lon": 27.58, "city": "Iasi" })));
        let mut reverse = MockCapabilityProvider::new();
        reverse
            .expect_invoke()
            .returning(|_| Ok(json!({ "display_name": "Strada Lapusneanu 14, Iasi" })));
        let mut weather = MockCapabilityProvider::new();
        weather
            .expect_invoke()
            .withf(|args| args["lat"] == 47.16)
            .returning(|_| Ok(json!({ "success": true, "data": { "temp": 8, "description": "fog" } })));
        registry.register(ToolSpec::new(names::GEOLOCATE, "ip"), Arc::new(geolocate));
        registry.register(ToolSpec::new(names::REVERSE_GEOCODE, "rev").internal(), Arc::new(reverse));
        registry.register(ToolSpec::new(names::WEATHER, "wx"), Arc::new(weather));

        let context = prime(
            &harness.conversation,
            &registry,
            SessionSettings::default(),
            Duration::from_secs(5),
        )
        .await;

        let sent = harness.sent();
        assert!(matches!(sent[0], ControlMessage::SessionUpdate { .. }));
        let text = system_text(&sent[1]);
        assert!(text.contains("User's EXACT location: Strada Lapusneanu 14, Iasi"));
        assert!(text.contains("Current weather: Weather in Iasi: 8°C, fog."));
        assert_eq!(context.weather.as_deref(), Some("Weather in Iasi: 8°C, fog."));
        assert_eq!(
            harness.conversation.location().get().unwrap().city.as_deref(),
            Some("Iasi")
        );
    }

    #[tokio::test]
    async fn missing_providers_degrade_to_placeholders() {
        let mut harness = Harness::new();
        prime(
            &harness.conversation,
            &ProviderRegistry::new(),
            SessionSettings::default(),
            Duration::from_secs(5),
        )
        .await;

        let text = system_text(&harness.sent()[1]);
        assert!(text.contains("Location unknown"));
        assert!(text.contains("Weather unknown"));
        assert!(harness.conversation.location().get().is_none());
    }

    struct Hangs;

    #[async_trait]
    impl CapabilityProvider for Hangs {
        async fn invoke(&self, _args: Value) -> anyhow::Result<Value> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookups_do_not_block_priming() {
        let mut harness = Harness::new();
        let mut registry = ProviderRegistry::new();
        registry.register(
            ToolSpec::new(names::GEOLOCATE, "ip").with_timeout(Duration::from_secs(60)),
            Arc::new(Hangs),
        );

        let context = prime(
            &harness.conversation,
            &registry,
            SessionSettings::default(),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(context, Context::default());
        assert_eq!(harness.sent().len(), 2);
    }
}
