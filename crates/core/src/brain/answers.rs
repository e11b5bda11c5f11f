//! Computes the answer for a taken-over utterance.

use super::classifier::Category;
use crate::{
    error::ProviderError,
    events::UiAction,
    location::{Location, LocationCache},
    provider::{ProviderRegistry, names},
};
use regex::Regex;
use serde_json::{Value, json};
use std::sync::LazyLock;
use tracing::{debug, warn};

pub(crate) const LOCATION_UNAVAILABLE: &str = "I'm sorry, I cannot provide location-specific information at the moment. Please make sure location access is enabled and try again.";

pub(crate) const DEGRADED: &str =
    "Sorry, I couldn't complete that request right now. Please try again in a moment.";

static MEDIA_VERBS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)deseneaz[aă]|genereaz[aă]|creeaz[aă]|f[aă]-mi|\bdraw\b|\bcreate\b|\bgenerate\b|\bmake\b")
        .expect("valid regex")
});

static VIDEO_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(un |a |an )?(video|clip|filmule[tț]|animation|anima[tț]ie)\b( (cu|of|about|despre)\b)?")
        .expect("valid regex")
});

/// Text to speak plus what to show alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub actions: Vec<UiAction>,
}

impl Answer {
    fn spoken(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            actions: Vec::new(),
        }
    }

    fn with_action(mut self, action: UiAction) -> Self {
        self.actions.push(action);
        self
    }
}

/// Cached location, else a live lookup through the `geolocate` provider.
/// A live result is enriched with place names when possible and cached.
pub(crate) async fn resolve_location(
    registry: &ProviderRegistry,
    cache: &LocationCache,
) -> Option<Location> {
    if let Some(location) = cache.get() {
        return Some(location);
    }
    if !registry.contains(names::GEOLOCATE) {
        return None;
    }
    let mut location = match registry.invoke(names::GEOLOCATE, json!({})).await {
        Ok(value) => Location::from_json(&value)?,
        Err(e) => {
            warn!(error = %e, "live location lookup failed");
            return None;
        }
    };
    if location.city.is_none() && registry.contains(names::REVERSE_GEOCODE) {
        match registry
            .invoke(names::REVERSE_GEOCODE, coordinates_args(&location))
            .await
        {
            Ok(value) => location.enrich(&value),
            Err(e) => debug!(error = %e, "reverse geocoding failed"),
        }
    }
    cache.set(location.clone());
    Some(location)
}

pub(crate) fn coordinates_args(location: &Location) -> Value {
    json!({
        "lat": location.coordinates.lat,
        "lon": location.coordinates.lon,
    })
}

/// One-line weather summary from a weather provider payload, read from the
/// root or from `data`. `None` if the payload has no temperature.
pub(crate) fn describe_weather(value: &Value, fallback_city: &str) -> Option<String> {
    let body = value.get("data").filter(|d| d.is_object()).unwrap_or(value);
    let number = |key: &str| body.get(key).and_then(Value::as_f64);
    let temp = number("temp").or_else(|| number("temperature"))?;
    let city = body
        .get("city")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .unwrap_or(fallback_city);

    let mut text = format!("Weather in {city}: {temp:.0}°C");
    if let Some(description) = body.get("description").and_then(Value::as_str) {
        text.push_str(&format!(", {description}"));
    }
    text.push('.');
    if let Some(feels_like) = number("feels_like") {
        text.push_str(&format!(" Feels like {feels_like:.0}°C."));
    }
    if let Some(humidity) = number("humidity") {
        text.push_str(&format!(" Humidity: {humidity:.0}%."));
    }
    if let Some(wind) = number("wind_speed") {
        text.push_str(&format!(" Wind: {wind:.1} m/s."));
    }
    Some(text)
}

/// Plain text out of a search-like payload.
fn result_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => ["answer", "result", "message", "output"]
            .iter()
            .find_map(|key| other.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| "No results found.".to_string()),
    }
}

async fn search(registry: &ProviderRegistry, query: String) -> Result<String, ProviderError> {
    let value = registry
        .invoke(names::WEB_SEARCH, json!({ "query": query }))
        .await?;
    Ok(result_text(&value))
}

fn city_or_here(location: &Location) -> String {
    location
        .city
        .clone()
        .unwrap_or_else(|| location.describe())
}

/// Computes the answer for `category`. Location-dependent categories refuse
/// explicitly when no position is known.
pub(crate) async fn compute(
    category: Category,
    utterance: &str,
    registry: &ProviderRegistry,
    cache: &LocationCache,
) -> Result<Answer, ProviderError> {
    let location = if category.needs_location() {
        match resolve_location(registry, cache).await {
            Some(location) => Some(location),
            None => return Ok(Answer::spoken(LOCATION_UNAVAILABLE)),
        }
    } else {
        None
    };

    match (category, location) {
        (Category::Workspace, _) => Ok(Answer::spoken("I've opened the workspace for you.")
            .with_action(UiAction::OpenWorkspace)),
        (Category::Weather, Some(location)) => weather(registry, &location).await,
        (Category::Location, Some(location)) => {
            let place = location.describe();
            let text = format!(
                "You are in {place}. Coordinates: {:.5}, {:.5}.",
                location.coordinates.lat, location.coordinates.lon
            );
            Ok(Answer::spoken(text).with_action(UiAction::ShowLocation {
                lat: location.coordinates.lat,
                lon: location.coordinates.lon,
                label: place,
            }))
        }
        (Category::Navigation, Some(location)) => {
            let from = city_or_here(&location);
            let text = search(registry, format!("{utterance} route distance from {from}")).await?;
            Ok(Answer::spoken(text).with_action(UiAction::Navigate {
                destination: utterance.to_string(),
            }))
        }
        (Category::Image, _) => {
            let prompt = media_prompt(utterance, None);
            let url = generate(registry, names::GENERATE_IMAGE, &prompt).await?;
            Ok(
                Answer::spoken(format!("Here is the image: {prompt}.")).with_action(
                    UiAction::ShowImage {
                        url,
                        caption: prompt,
                    },
                ),
            )
        }
        (Category::Video, _) => {
            let prompt = media_prompt(utterance, Some(&VIDEO_WORDS));
            let url = generate(registry, names::GENERATE_VIDEO, &prompt).await?;
            Ok(
                Answer::spoken(format!("Here is the video: {prompt}.")).with_action(
                    UiAction::ShowVideo {
                        url,
                        caption: prompt,
                    },
                ),
            )
        }
        (Category::Code, _) => {
            let value = registry
                .invoke(names::EXECUTE_CODE, json!({ "request": utterance }))
                .await?;
            let code = value
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let text = result_text(&value);
            Ok(Answer::spoken(text).with_action(UiAction::OpenCodeEditor { code }))
        }
        (Category::Document, _) => {
            let value = registry
                .invoke(names::OPEN_DOCUMENT, json!({ "request": utterance }))
                .await?;
            Ok(Answer::spoken(result_text(&value)).with_action(UiAction::OpenDocument {
                request: utterance.to_string(),
            }))
        }
        (Category::Camera, _) => Ok(Answer::spoken(
            "The camera is on. Show me what you'd like me to look at.",
        )
        .with_action(UiAction::OpenCamera)),
        (Category::Search, _) => Ok(Answer::spoken(search(registry, utterance.to_string()).await?)),
        // Location-dependent categories without a location returned above.
        (Category::Weather | Category::Location | Category::Navigation, None) => {
            Ok(Answer::spoken(LOCATION_UNAVAILABLE))
        }
    }
}

/// The generation prompt: the utterance without its command words, or the
/// whole utterance if nothing else is left.
fn media_prompt(utterance: &str, extra: Option<&Regex>) -> String {
    let mut prompt = MEDIA_VERBS.replace_all(utterance, "").into_owned();
    if let Some(words) = extra {
        prompt = words.replace_all(&prompt, "").into_owned();
    }
    let prompt = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if prompt.is_empty() {
        utterance.trim().to_string()
    } else {
        prompt
    }
}

/// Invokes a generation provider and extracts the media URL.
async fn generate(
    registry: &ProviderRegistry,
    provider: &str,
    prompt: &str,
) -> Result<String, ProviderError> {
    let value = registry.invoke(provider, json!({ "prompt": prompt })).await?;
    let url = match &value {
        Value::String(url) => Some(url.clone()),
        other => ["url", "videoUrl", "video_url", "imageUrl", "image_url"]
            .iter()
            .find_map(|key| other.get(*key).and_then(Value::as_str))
            .map(str::to_string),
    };
    url.ok_or_else(|| ProviderError::Failed {
        name: provider.to_string(),
        message: "response has no media url".to_string(),
    })
}

async fn weather(registry: &ProviderRegistry, location: &Location) -> Result<Answer, ProviderError> {
    let city = city_or_here(location);
    let report = match registry
        .invoke(names::WEATHER, coordinates_args(location))
        .await
    {
        Ok(value) => describe_weather(&value, &city),
        Err(e) => {
            warn!(error = %e, "weather provider failed; falling back to search");
            None
        }
    };
    match report {
        Some(text) => Ok(Answer::spoken(text.clone()).with_action(UiAction::ShowWeatherMap {
            lat: location.coordinates.lat,
            lon: location.coordinates.lon,
            info: text,
        })),
        None => {
            let text = search(registry, format!("current weather live temperature {city}")).await?;
            Ok(Answer::spoken(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockCapabilityProvider, ToolSpec};
    use std::sync::Arc;

    fn register(registry: &mut ProviderRegistry, name: &str, provider: MockCapabilityProvider) {
        registry.register(ToolSpec::new(name, "test"), Arc::new(provider));
    }

    #[test]
    fn weather_summary_reads_nested_data() {
        let text = describe_weather(
            &json!({
                "success": true,
                "data": {
                    "city": "Cluj-Napoca", "temp": 17.6, "description": "light rain",
                    "feels_like": 16.2, "humidity": 81, "wind_speed": 3.4
                }
            }),
            "here",
        )
        .unwrap();
        assert_eq!(
            text,
            "Weather in Cluj-Napoca: 18°C, light rain. Feels like 16°C. Humidity: 81%. Wind: 3.4 m/s."
        );
    }

    #[test]
    fn weather_summary_needs_a_temperature() {
        assert!(describe_weather(&json!({ "error": "quota" }), "Iasi").is_none());
        assert_eq!(
            describe_weather(&json!({ "temp": 5 }), "Iasi").unwrap(),
            "Weather in Iasi: 5°C."
        );
    }

    #[tokio::test]
    async fn weather_without_temperature_falls_back_to_search() {
        let mut registry = ProviderRegistry::new();
        let mut weather = MockCapabilityProvider::new();
        weather.expect_invoke().returning(|_| Ok(json!({ "success": false })));
        let mut search = MockCapabilityProvider::new();
        search
            .expect_invoke()
            .withf(|args| args["query"] == "current weather live temperature Brasov")
            .times(1)
            .returning(|_| Ok(json!({ "answer": "It is 9°C in Brasov." })));
        register(&mut registry, names::WEATHER, weather);
        register(&mut registry, names::WEB_SEARCH, search);
        let cache = LocationCache::default();
        cache.set(Location::new(45.65, 25.6).with_city("Brasov"));

        let answer = compute(Category::Weather, "cât e afară", &registry, &cache)
            .await
            .unwrap();
        assert_eq!(answer.text, "It is 9°C in Brasov.");
        assert!(answer.actions.is_empty());
    }

    #[tokio::test]
    async fn live_location_is_enriched_and_cached() {
        let mut registry = ProviderRegistry::new();
        let mut geolocate = MockCapabilityProvider::new();
        geolocate
            .expect_invoke()
            .times(1)
            .returning(|_| Ok(json!({ "lat": 46.77, "lon": 23.6 })));
        let mut reverse = MockCapabilityProvider::new();
        reverse
            .expect_invoke()
            .withf(|args| args["lat"] == 46.77)
            .times(1)
            .returning(|_| Ok(json!({ "address": { "city": "Cluj-Napoca" } })));
        register(&mut registry, names::GEOLOCATE, geolocate);
        register(&mut registry, names::REVERSE_GEOCODE, reverse);
        let cache = LocationCache::default();

        let answer = compute(Category::Location, "where am i", &registry, &cache)
            .await
            .unwrap();
        assert_eq!(answer.text, "You are in Cluj-Napoca. Coordinates: 46.77000, 23.60000.");
        assert_eq!(cache.get().unwrap().city.as_deref(), Some("Cluj-Napoca"));

        // Second call is served from the cache; the mocks would panic on a second invoke.
        compute(Category::Location, "where am i", &registry, &cache)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn no_location_means_an_explicit_refusal() {
        let mut registry = ProviderRegistry::new();
        let mut geolocate = MockCapabilityProvider::new();
        geolocate
            .expect_invoke()
            .returning(|_| Err(anyhow::anyhow!("permission denied")));
        let mut search = MockCapabilityProvider::new();
        search.expect_invoke().never();
        register(&mut registry, names::GEOLOCATE, geolocate);
        register(&mut registry, names::WEB_SEARCH, search);

        let answer = compute(
            Category::Navigation,
            "how far is lidl",
            &registry,
            &LocationCache::default(),
        )
        .await
        .unwrap();
        assert_eq!(answer.text, LOCATION_UNAVAILABLE);
    }

    #[tokio::test]
    async fn image_prompt_drops_the_command_verb() {
        let mut registry = ProviderRegistry::new();
        let mut images = MockCapabilityProvider::new();
        images
            .expect_invoke()
            .withf(|args| args["prompt"] == "a red fox in the snow")
            .returning(|_| Ok(json!({ "url": "https://img.example/fox.png" })));
        register(&mut registry, names::GENERATE_IMAGE, images);

        let answer = compute(
            Category::Image,
            "draw a red fox in the snow",
            &registry,
            &LocationCache::default(),
        )
        .await
        .unwrap();
        assert_eq!(
            answer.actions,
            vec![UiAction::ShowImage {
                url: "https://img.example/fox.png".into(),
                caption: "a red fox in the snow".into(),
            }]
        );
    }

    #[tokio::test]
    async fn video_prompt_drops_command_and_media_words() {
        let mut registry = ProviderRegistry::new();
        let mut videos = MockCapabilityProvider::new();
        videos
            .expect_invoke()
            .withf(|args| args["prompt"] == "o pisică")
            .times(1)
            .returning(|_| Ok(json!({ "success": true, "videoUrl": "https://cdn.example/cat.mp4" })));
        register(&mut registry, names::GENERATE_VIDEO, videos);

        let answer = compute(
            Category::Video,
            "generează un video cu o pisică",
            &registry,
            &LocationCache::default(),
        )
        .await
        .unwrap();
        assert_eq!(answer.text, "Here is the video: o pisică.");
        assert_eq!(
            answer.actions,
            vec![UiAction::ShowVideo {
                url: "https://cdn.example/cat.mp4".into(),
                caption: "o pisică".into(),
            }]
        );
    }

    #[tokio::test]
    async fn generation_without_url_is_an_error() {
        let mut registry = ProviderRegistry::new();
        let mut videos = MockCapabilityProvider::new();
        videos
            .expect_invoke()
            .returning(|_| Ok(json!({ "success": false })));
        register(&mut registry, names::GENERATE_VIDEO, videos);

        let err = compute(
            Category::Video,
            "make a video of the sea",
            &registry,
            &LocationCache::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::Failed { ref name, .. } if name == "generate_video"));
    }

    #[tokio::test]
    async fn camera_opens_without_a_provider() {
        let answer = compute(
            Category::Camera,
            "pornește microscopul",
            &ProviderRegistry::new(),
            &LocationCache::default(),
        )
        .await
        .unwrap();
        assert_eq!(answer.actions, vec![UiAction::OpenCamera]);
    }

    #[tokio::test]
    async fn missing_provider_is_an_error() {
        let err = compute(
            Category::Search,
            "who is ada lovelace",
            &ProviderRegistry::new(),
            &LocationCache::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::NotRegistered(_)));
    }
}
