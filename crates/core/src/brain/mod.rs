//! Transcript orchestrator.
//!
//! For each completed user utterance, either leaves the turn to the remote
//! model or takes it over: interrupt, compute an answer from capability
//! providers, inject it as an assistant message and ask the model to speak it.

mod answers;
mod classifier;

pub use answers::Answer;
pub use classifier::{Category, Classifier, Decision, fold};

pub(crate) use answers::{coordinates_args, describe_weather};

use crate::{
    conversation::{Conversation, Delivery},
    events::SessionEvent,
    interrupt::{InterruptController, InterruptSource},
    provider::ProviderRegistry,
};
use kelion_realtime_types::{ControlMessage, Role};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A completed user transcript and the epoch current when it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    PassThrough,
    /// A newer interrupt superseded this utterance before it was handled.
    Stale,
    Answered { category: Category, delivered: bool },
}

#[derive(Debug, Clone)]
pub struct TranscriptOrchestrator {
    classifier: Classifier,
    registry: Arc<ProviderRegistry>,
}

impl TranscriptOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            classifier: Classifier::new(),
            registry,
        }
    }

    pub fn classify(&self, text: &str) -> Decision {
        self.classifier.classify(text)
    }

    pub async fn handle(
        &self,
        utterance: Utterance,
        interrupts: &InterruptController,
        conversation: &Conversation,
    ) -> Outcome {
        let category = match self.classify(&utterance.text) {
            Decision::PassThrough => {
                debug!("utterance left to the model");
                return Outcome::PassThrough;
            }
            Decision::Takeover(category) => category,
        };

        let current = conversation.epoch().await;
        if current > utterance.epoch {
            debug!(
                epoch = utterance.epoch,
                current, "utterance superseded before takeover"
            );
            return Outcome::Stale;
        }

        let epoch = interrupts.interrupt(InterruptSource::Override).await;
        info!(category = category.as_str(), epoch, "taking over the turn");

        let answer = match answers::compute(
            category,
            &utterance.text,
            &self.registry,
            conversation.location(),
        )
        .await
        {
            Ok(answer) => answer,
            Err(e) => {
                warn!(category = category.as_str(), error = %e, "takeover degraded");
                Answer {
                    text: answers::DEGRADED.to_string(),
                    actions: Vec::new(),
                }
            }
        };

        let delivery = conversation
            .deliver(
                epoch,
                [
                    ControlMessage::text_item(Role::Assistant, answer.text.clone()),
                    ControlMessage::ResponseCreate,
                ],
            )
            .await;

        let delivered = delivery == Delivery::Delivered;
        if delivered {
            let events = conversation.events();
            events.emit(SessionEvent::Transcript {
                role: Role::Assistant,
                text: answer.text,
            });
            for action in answer.actions {
                events.emit(SessionEvent::UiAction(action));
            }
        }
        Outcome::Answered {
            category,
            delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MonitorConfig,
        conversation::test_support::Harness,
        events::UiAction,
        location::Location,
        monitor::AudioActivityMonitor,
        provider::{MockCapabilityProvider, ToolSpec, names},
    };
    use serde_json::json;
    use std::time::Duration;

    fn interrupts(harness: &Harness) -> InterruptController {
        InterruptController::new(
            Arc::clone(&harness.conversation),
            AudioActivityMonitor::new(MonitorConfig::default(), harness.conversation.events().clone()),
            Duration::from_millis(300),
        )
    }

    fn orchestrator(providers: Vec<(&str, MockCapabilityProvider)>) -> TranscriptOrchestrator {
        let mut registry = ProviderRegistry::new();
        for (name, provider) in providers {
            registry.register(ToolSpec::new(name, "test"), Arc::new(provider));
        }
        TranscriptOrchestrator::new(Arc::new(registry))
    }

    fn utterance(text: &str) -> Utterance {
        Utterance {
            text: text.to_string(),
            epoch: 0,
        }
    }

    #[tokio::test]
    async fn greeting_passes_through_untouched() {
        let mut harness = Harness::new();
        let mut weather = MockCapabilityProvider::new();
        weather.expect_invoke().never();
        let brain = orchestrator(vec![(names::WEATHER, weather)]);

        let outcome = brain
            .handle(utterance("bună"), &interrupts(&harness), &harness.conversation)
            .await;

        assert_eq!(outcome, Outcome::PassThrough);
        assert!(harness.sent().is_empty());
        assert_eq!(harness.conversation.epoch().await, 0);
    }

    #[tokio::test]
    async fn weather_with_cached_location_takes_over_once() {
        let mut harness = Harness::new();
        harness
            .conversation
            .location()
            .set(Location::new(44.43, 26.1).with_city("Bucharest"));
        let mut weather = MockCapabilityProvider::new();
        weather
            .expect_invoke()
            .withf(|args| args["lat"] == 44.43 && args["lon"] == 26.1)
            .times(1)
            .returning(|_| Ok(json!({ "data": { "temp": 12, "description": "clear sky" } })));
        let brain = orchestrator(vec![(names::WEATHER, weather)]);

        let outcome = brain
            .handle(
                utterance("ce vreme e afară"),
                &interrupts(&harness),
                &harness.conversation,
            )
            .await;

        assert_eq!(
            outcome,
            Outcome::Answered {
                category: Category::Weather,
                delivered: true
            }
        );
        let text = "Weather in Bucharest: 12°C, clear sky.";
        assert_eq!(
            harness.sent(),
            vec![
                ControlMessage::ResponseCancel,
                ControlMessage::OutputAudioBufferClear,
                ControlMessage::text_item(Role::Assistant, text),
                ControlMessage::ResponseCreate,
            ]
        );
        assert_eq!(harness.conversation.epoch().await, 1);
        let emitted = harness.emitted();
        assert!(emitted.contains(&SessionEvent::Transcript {
            role: Role::Assistant,
            text: text.to_string()
        }));
        assert!(emitted.contains(&SessionEvent::UiAction(UiAction::ShowWeatherMap {
            lat: 44.43,
            lon: 26.1,
            info: text.to_string()
        })));
    }

    #[tokio::test]
    async fn weather_without_any_location_still_answers() {
        let mut harness = Harness::new();
        let mut weather = MockCapabilityProvider::new();
        weather.expect_invoke().never();
        let brain = orchestrator(vec![(names::WEATHER, weather)]);

        brain
            .handle(
                utterance("what's the weather like"),
                &interrupts(&harness),
                &harness.conversation,
            )
            .await;

        let sent = harness.sent();
        assert_eq!(
            &sent[2..],
            &[
                ControlMessage::text_item(Role::Assistant, answers::LOCATION_UNAVAILABLE),
                ControlMessage::ResponseCreate,
            ]
        );
    }

    #[tokio::test]
    async fn provider_failure_is_spoken_as_an_apology() {
        let mut harness = Harness::new();
        let mut search = MockCapabilityProvider::new();
        search
            .expect_invoke()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));
        let brain = orchestrator(vec![(names::WEB_SEARCH, search)]);

        brain
            .handle(
                utterance("who is the mayor of Iasi"),
                &interrupts(&harness),
                &harness.conversation,
            )
            .await;

        assert!(harness
            .sent()
            .contains(&ControlMessage::text_item(Role::Assistant, answers::DEGRADED)));
    }

    #[tokio::test]
    async fn superseded_utterance_is_dropped() {
        let mut harness = Harness::new();
        let mut search = MockCapabilityProvider::new();
        search.expect_invoke().never();
        let brain = orchestrator(vec![(names::WEB_SEARCH, search)]);
        harness.conversation.lock_state().await.epoch = 2;

        let outcome = brain
            .handle(
                Utterance {
                    text: "who is ada lovelace".into(),
                    epoch: 1,
                },
                &interrupts(&harness),
                &harness.conversation,
            )
            .await;

        assert_eq!(outcome, Outcome::Stale);
        assert!(harness.sent().is_empty());
    }
}
