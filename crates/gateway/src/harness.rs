use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use courier_core::{Channel, ChannelMessage, IdempotencyKey};
use courier_executor::{AttemptOutcome, DispatchExecutor, render_request};
use courier_provider::ProviderRegistry;

use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;

/// What an operator test send carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestContent {
    /// A template stored with the remote function.
    Template {
        template_id: String,
        #[serde(default)]
        params: Map<String, Value>,
    },
    /// Inline text, rendered locally.
    Body {
        #[serde(default)]
        subject: Option<String>,
        body: String,
    },
}

/// An operator-initiated one-off send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSend {
    pub channel: Channel,
    pub recipient: String,
    pub content: TestContent,
}

impl TestSend {
    fn message(&self) -> ChannelMessage {
        match &self.content {
            TestContent::Template {
                template_id,
                params,
            } => ChannelMessage::templated(
                self.channel,
                self.recipient.clone(),
                template_id.clone(),
                params.clone(),
            ),
            TestContent::Body { subject, body } => ChannelMessage::inline(
                self.channel,
                self.recipient.clone(),
                subject.clone(),
                body.clone(),
            ),
        }
    }
}

/// The classified result of a test send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub ok: bool,
    /// `delivered`, `transient` or `permanent`.
    pub classification: String,
    pub http_status: Option<u16>,
    pub external_id: Option<String>,
    /// Absent when the message was rejected before any call was made.
    pub request_id: Option<String>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl DispatchResult {
    fn from_outcome(outcome: &AttemptOutcome, request_id: Option<String>, latency_ms: u64) -> Self {
        let (classification, external_id) = match outcome {
            AttemptOutcome::Delivered { external_id, .. } => {
                ("delivered".to_owned(), external_id.clone())
            }
            AttemptOutcome::Failed { class, .. } => (class.to_string(), None),
        };
        Self {
            ok: outcome.is_delivered(),
            classification,
            http_status: outcome.http_status(),
            external_id,
            request_id,
            latency_ms,
            error: outcome.error_text(),
        }
    }
}

/// Sends one-off messages through the same render and call path as the
/// dispatcher, without touching the queue, the automation log or execution
/// counters.
#[derive(Clone)]
pub struct TestHarness {
    providers: Arc<ProviderRegistry>,
    executor: Arc<DispatchExecutor>,
    metrics: Arc<GatewayMetrics>,
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness").finish_non_exhaustive()
    }
}

impl TestHarness {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        executor: Arc<DispatchExecutor>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            providers,
            executor,
            metrics,
        }
    }

    /// Render and send `send`, returning the classified result.
    ///
    /// Fails only when no function is registered for the channel; a message
    /// that does not render comes back as a permanent result.
    pub async fn send_test(&self, send: &TestSend) -> Result<DispatchResult, GatewayError> {
        let provider = self
            .providers
            .get(send.channel)
            .ok_or(GatewayError::NoProvider(send.channel))?;
        self.metrics.increment_test_sends();

        let key = IdempotencyKey::new(format!("test:{}", uuid::Uuid::new_v4()));
        let rendered = match render_request(&send.message(), &key) {
            Ok(rendered) => rendered,
            Err(e) => {
                return Ok(DispatchResult::from_outcome(
                    &AttemptOutcome::from(e),
                    None,
                    0,
                ));
            }
        };

        let report = self
            .executor
            .attempt(&rendered.request, provider.as_ref())
            .await;
        let latency_ms = u64::try_from(report.latency.as_millis()).unwrap_or(u64::MAX);
        let result = DispatchResult::from_outcome(
            &report.outcome,
            Some(rendered.request.request_id.clone()),
            latency_ms,
        );
        info!(
            channel = %send.channel,
            function = provider.name(),
            classification = %result.classification,
            request_id = %rendered.request.request_id,
            "test send finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unnecessary_literal_bound)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use courier_core::{DispatchRequest, FunctionReply};
    use courier_executor::ExecutorConfig;
    use courier_provider::{DynProvider, ProviderError};
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<DispatchRequest>>,
    }

    #[async_trait]
    impl DynProvider for Recorder {
        fn name(&self) -> &str {
            "send-email"
        }

        fn channel(&self) -> Channel {
            Channel::Email
        }

        async fn call(&self, request: &DispatchRequest) -> Result<FunctionReply, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            if request.recipients.iter().any(|r| r.starts_with("bounce")) {
                return Ok(FunctionReply::failed(422, json!({"error": "unknown recipient"})));
            }
            Ok(FunctionReply::ok(json!({"message_id": "em-1"})))
        }
    }

    fn harness() -> (TestHarness, Arc<Recorder>, Arc<GatewayMetrics>) {
        let recorder = Arc::new(Recorder::default());
        let mut registry = ProviderRegistry::new();
        registry.register(recorder.clone());
        let metrics = Arc::new(GatewayMetrics::default());
        let harness = TestHarness::new(
            Arc::new(registry),
            Arc::new(DispatchExecutor::new(ExecutorConfig::default())),
            Arc::clone(&metrics),
        );
        (harness, recorder, metrics)
    }

    #[tokio::test]
    async fn template_send_is_delivered() {
        let (harness, recorder, metrics) = harness();
        let result = harness
            .send_test(&TestSend {
                channel: Channel::Email,
                recipient: "buyer@example.com".into(),
                content: TestContent::Template {
                    template_id: "welcome".into(),
                    params: json!({"first_name": "Ada"}).as_object().cloned().unwrap(),
                },
            })
            .await
            .unwrap();

        assert!(result.ok);
        assert_eq!(result.classification, "delivered");
        assert_eq!(result.external_id.as_deref(), Some("em-1"));
        assert_eq!(result.http_status, Some(200));

        let requests = recorder.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].idempotency_key.as_str().starts_with("test:"));
        assert_eq!(result.request_id.as_deref(), Some(requests[0].request_id.as_str()));
        assert_eq!(metrics.snapshot().test_sends, 1);
    }

    #[tokio::test]
    async fn provider_rejection_is_permanent() {
        let (harness, _recorder, _metrics) = harness();
        let result = harness
            .send_test(&TestSend {
                channel: Channel::Email,
                recipient: "bounce@example.com".into(),
                content: TestContent::Body {
                    subject: Some("Hi".into()),
                    body: "Hello".into(),
                },
            })
            .await
            .unwrap();
        assert!(!result.ok);
        assert_eq!(result.classification, "permanent");
        assert_eq!(result.http_status, Some(422));
        assert!(result.error.unwrap().contains("unknown recipient"));
    }

    #[tokio::test]
    async fn render_failure_makes_no_call() {
        let (harness, recorder, _metrics) = harness();
        let result = harness
            .send_test(&TestSend {
                channel: Channel::Email,
                recipient: "buyer@example.com".into(),
                content: TestContent::Body {
                    subject: None,
                    body: "Hi {{ missing }}".into(),
                },
            })
            .await
            .unwrap();
        assert!(!result.ok);
        assert_eq!(result.classification, "permanent");
        assert!(result.request_id.is_none());
        assert!(recorder.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregistered_channel_is_an_error() {
        let (harness, _recorder, _metrics) = harness();
        let err = harness
            .send_test(&TestSend {
                channel: Channel::Sms,
                recipient: "+15550001111".into(),
                content: TestContent::Body {
                    subject: None,
                    body: "hi".into(),
                },
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoProvider(Channel::Sms)));
    }

    #[test]
    fn content_is_tagged_by_type() {
        let send: TestSend = serde_json::from_value(json!({
            "channel": "whatsapp",
            "recipient": "+15550001111",
            "content": {"type": "template", "template_id": "order_update"}
        }))
        .unwrap();
        assert!(matches!(
            send.content,
            TestContent::Template { ref params, .. } if params.is_empty()
        ));
    }
}
