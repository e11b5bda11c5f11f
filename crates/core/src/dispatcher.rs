//! Routes model-issued function calls to capability providers.

use crate::{
    conversation::{Conversation, Delivery},
    error::ProviderError,
    provider::ProviderRegistry,
};
use kelion_realtime_types::ControlMessage;
use serde_json::{Value, json};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Pending,
    Completed,
    /// Expired before the provider answered.
    Failed,
}

/// A function call issued by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    /// Raw JSON arguments as sent by the model.
    pub arguments: String,
    pub status: CallStatus,
    /// Epoch at call start; the result is dropped if it no longer matches.
    pub epoch: u64,
    pub started: Instant,
}

/// Per-session dispatcher. Owns the registry of in-flight calls.
#[derive(Debug)]
pub struct ToolDispatcher {
    conversation: Arc<Conversation>,
    registry: Arc<ProviderRegistry>,
    calls: Arc<Mutex<HashMap<String, ToolCall>>>,
    call_ttl: Duration,
}

impl ToolDispatcher {
    pub fn new(
        conversation: Arc<Conversation>,
        registry: Arc<ProviderRegistry>,
        call_ttl: Duration,
    ) -> Self {
        Self {
            conversation,
            registry,
            calls: Arc::new(Mutex::new(HashMap::new())),
            call_ttl,
        }
    }

    /// Starts a call and returns the task that will answer it.
    ///
    /// The answer is `function_call_output` followed by `response.create`,
    /// sent only if no interrupt happened in between.
    pub async fn dispatch(&self, call_id: String, name: String, arguments: String) -> JoinHandle<()> {
        self.reap_expired().await;
        let epoch = self.conversation.epoch().await;
        let call = ToolCall {
            call_id: call_id.clone(),
            name: name.clone(),
            arguments: arguments.clone(),
            status: CallStatus::Pending,
            epoch,
            started: Instant::now(),
        };
        self.calls.lock().await.insert(call_id.clone(), call);
        info!(%call_id, %name, epoch, "dispatching function call");

        let conversation = Arc::clone(&self.conversation);
        let registry = Arc::clone(&self.registry);
        let calls = Arc::clone(&self.calls);
        tokio::spawn(async move {
            let output = run_call(&registry, &name, &arguments).await;

            let Some(mut call) = calls.lock().await.remove(&call_id) else {
                debug!(%call_id, "call expired before completion; result dropped");
                return;
            };
            call.status = CallStatus::Completed;
            debug!(%call_id, status = ?call.status, elapsed = ?call.started.elapsed(), "function call answered");
            let delivery = conversation
                .deliver(
                    epoch,
                    [
                        ControlMessage::function_call_output(call_id.clone(), output),
                        ControlMessage::ResponseCreate,
                    ],
                )
                .await;
            if let Delivery::Stale { current } = delivery {
                debug!(%call_id, epoch, current, "stale function call result dropped");
            }
        })
    }

    /// Calls that have started and not yet been answered. All are `Pending`.
    pub async fn in_flight(&self) -> Vec<ToolCall> {
        let mut calls: Vec<_> = self.calls.lock().await.values().cloned().collect();
        calls.sort_by_key(|call| call.started);
        calls
    }

    /// Force-fails calls older than the TTL: the model gets an error output
    /// for each (unless an interrupt made it stale) and a late provider
    /// result is never sent.
    pub async fn reap_expired(&self) -> Vec<ToolCall> {
        let now = Instant::now();
        let expired: Vec<ToolCall> = {
            let mut calls = self.calls.lock().await;
            let ids: Vec<String> = calls
                .values()
                .filter(|call| now.duration_since(call.started) >= self.call_ttl)
                .map(|call| call.call_id.clone())
                .collect();
            ids.iter().filter_map(|call_id| calls.remove(call_id)).collect()
        };

        let mut failed = Vec::with_capacity(expired.len());
        for mut call in expired {
            warn!(call_id = %call.call_id, name = %call.name, "function call expired");
            call.status = CallStatus::Failed;
            let output = format!(
                "Error: function `{}` did not answer within {:?}",
                call.name, self.call_ttl
            );
            self.conversation
                .deliver(
                    call.epoch,
                    [
                        ControlMessage::function_call_output(call.call_id.clone(), output),
                        ControlMessage::ResponseCreate,
                    ],
                )
                .await;
            failed.push(call);
        }
        failed
    }
}

/// Produces the textual output for one call. Never fails: every problem is
/// reported to the model as the output.
async fn run_call(registry: &ProviderRegistry, name: &str, arguments: &str) -> String {
    let args: Value = if arguments.trim().is_empty() {
        json!({})
    } else {
        match serde_json::from_str(arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(name, error = %e, "unparsable function arguments");
                return format!("Error: invalid arguments: {e}");
            }
        }
    };

    match registry.invoke(name, args).await {
        Ok(Value::String(text)) => text,
        Ok(value) => value.to_string(),
        Err(ProviderError::NotRegistered(_)) => {
            warn!(name, "model called an unknown function");
            json!({ "error": "not_implemented", "name": name }).to_string()
        }
        Err(e) => {
            warn!(name, error = %e, "function call failed");
            format!("Error: {e}")
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
    use anyhow::anyhow;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn dispatcher(harness: &Harness, registry: ProviderRegistry) -> ToolDispatcher {
        ToolDispatcher::new(
            Arc::clone(&harness.conversation),
            Arc::new(registry),
            Duration::from_secs(120),
        )
    }

    fn registry_with(name: &str, provider: impl CapabilityProvider + 'static) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(ToolSpec::new(name, "test"), Arc::new(provider));
        registry
    }

    fn output_of(message: &ControlMessage) -> String {
        match message {
            ControlMessage::ConversationItemCreate {
                item: kelion_realtime_types::ConversationItem::FunctionCallOutput { output, .. },
            } => output.clone(),
            other => panic!("expected a function_call_output, got {other:?}"),
        }
    }

    /// Blocks until released, so a test can interrupt mid-call.
    struct Gated(Arc<Notify>);

    #[async_trait]
    impl CapabilityProvider for Gated {
        async fn invoke(&self, _args: Value) -> anyhow::Result<Value> {
            self.0.notified().await;
            Ok(json!({ "temp": 21 }))
        }
    }

    #[tokio::test]
    async fn result_is_sent_then_turn_resumed() {
        let mut harness = Harness::new();
        let mut provider = MockCapabilityProvider::new();
        provider
            .expect_invoke()
            .withf(|args| args["city"] == "Cluj")
            .times(1)
            .returning(|_| Ok(json!({ "temp": 18 })));
        let dispatcher = dispatcher(&harness, registry_with("weather", provider));

        dispatcher
            .dispatch("call-1".into(), "weather".into(), r#"{"city":"Cluj"}"#.into())
            .await
            .await
            .unwrap();

        let sent = harness.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0],
            ControlMessage::function_call_output("call-1", r#"{"temp":18}"#)
        );
        assert_eq!(sent[1], ControlMessage::ResponseCreate);
        assert!(dispatcher.in_flight().await.is_empty());
    }

    #[tokio::test]
    async fn string_results_are_sent_verbatim() {
        let mut harness = Harness::new();
        let mut provider = MockCapabilityProvider::new();
        provider
            .expect_invoke()
            .returning(|_| Ok(Value::String("sunny".into())));
        let dispatcher = dispatcher(&harness, registry_with("weather", provider));

        dispatcher
            .dispatch("c".into(), "weather".into(), String::new())
            .await
            .await
            .unwrap();
        assert_eq!(output_of(&harness.sent()[0]), "sunny");
    }

    #[tokio::test]
    async fn stale_result_is_never_delivered() {
        let mut harness = Harness::new();
        let release = Arc::new(Notify::new());
        let dispatcher = dispatcher(&harness, registry_with("weather", Gated(release.clone())));

        let task = dispatcher
            .dispatch("call-1".into(), "weather".into(), "{}".into())
            .await;
        assert_eq!(dispatcher.in_flight().await.len(), 1);

        harness.conversation.lock_state().await.epoch += 1;
        release.notify_one();
        task.await.unwrap();

        assert!(harness.sent().is_empty());
    }

    #[tokio::test]
    async fn unknown_function_gets_not_implemented() {
        let mut harness = Harness::new();
        let dispatcher = dispatcher(&harness, ProviderRegistry::new());

        dispatcher
            .dispatch("c".into(), "teleport".into(), "{}".into())
            .await
            .await
            .unwrap();

        let output: Value = serde_json::from_str(&output_of(&harness.sent()[0])).unwrap();
        assert_eq!(output["error"], "not_implemented");
        assert_eq!(output["name"], "teleport");
    }

    #[tokio::test]
    async fn provider_error_becomes_text_output() {
        let mut harness = Harness::new();
        let mut provider = MockCapabilityProvider::new();
        provider
            .expect_invoke()
            .returning(|_| Err(anyhow!("quota exceeded")));
        let dispatcher = dispatcher(&harness, registry_with("web_search", provider));

        dispatcher
            .dispatch("c".into(), "web_search".into(), "{}".into())
            .await
            .await
            .unwrap();

        let sent = harness.sent();
        assert_eq!(
            output_of(&sent[0]),
            "Error: provider `web_search` failed: quota exceeded"
        );
        assert_eq!(sent[1], ControlMessage::ResponseCreate);
    }

    #[tokio::test]
    async fn unparsable_arguments_are_reported_to_the_model() {
        let mut harness = Harness::new();
        let mut provider = MockCapabilityProvider::new();
        provider.expect_invoke().never();
        let dispatcher = dispatcher(&harness, registry_with("weather", provider));

        dispatcher
            .dispatch("c".into(), "weather".into(), "{not json".into())
            .await
            .await
            .unwrap();
        assert!(output_of(&harness.sent()[0]).starts_with("Error: invalid arguments"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_calls_are_reaped_and_their_results_dropped() {
        let mut harness = Harness::new();
        let release = Arc::new(Notify::new());
        let dispatcher = dispatcher(&harness, registry_with("weather", Gated(release.clone())));

        let task = dispatcher
            .dispatch("old".into(), "weather".into(), "{}".into())
            .await;
        tokio::time::advance(Duration::from_secs(121)).await;

        let reaped = dispatcher.reap_expired().await;
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].call_id, "old");
        assert_eq!(reaped[0].status, CallStatus::Failed);
        assert!(dispatcher.in_flight().await.is_empty());

        let sent = harness.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            output_of(&sent[0]),
            "Error: function `weather` did not answer within 120s"
        );
        assert_eq!(sent[1], ControlMessage::ResponseCreate);

        release.notify_one();
        task.await.unwrap();
        assert!(harness.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_call_from_an_interrupted_turn_fails_silently() {
        let mut harness = Harness::new();
        let release = Arc::new(Notify::new());
        let dispatcher = dispatcher(&harness, registry_with("weather", Gated(release.clone())));

        let _task = dispatcher
            .dispatch("old".into(), "weather".into(), "{}".into())
            .await;
        let pending = dispatcher.in_flight().await;
        assert_eq!(pending[0].status, CallStatus::Pending);
        assert_eq!(pending[0].arguments, "{}");

        harness.conversation.lock_state().await.epoch += 1;
        tokio::time::advance(Duration::from_secs(121)).await;

        assert_eq!(dispatcher.reap_expired().await.len(), 1);
        assert!(harness.sent().is_empty());
    }
}
