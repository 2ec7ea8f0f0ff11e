use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tracing::debug;

use courier_core::{Channel, DispatchRequest, FunctionReply};
use courier_provider::{Provider, ProviderError};

/// A call captured by a [`ScriptedProvider`].
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub request: DispatchRequest,
    pub received_at: DateTime<Utc>,
}

/// A send function that answers from a script.
///
/// Queued replies are consumed in order, one per call; once the script is
/// empty every call gets the fallback reply, which defaults to `{ok: true}`
/// with a fresh message id. All calls are captured for later assertions.
pub struct ScriptedProvider {
    name: String,
    channel: Channel,
    script: Mutex<VecDeque<Result<FunctionReply, ProviderError>>>,
    fallback: Option<Result<FunctionReply, ProviderError>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<CapturedCall>>,
    sequence: AtomicU64,
}

impl ScriptedProvider {
    pub fn new(channel: Channel) -> Self {
        Self {
            name: format!("send-{channel}"),
            channel,
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Reply with `reply` to every call that the script does not cover.
    #[must_use]
    pub fn always(mut self, reply: Result<FunctionReply, ProviderError>) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Queue `reply` for the next unscripted call.
    #[must_use]
    pub fn then(self, reply: Result<FunctionReply, ProviderError>) -> Self {
        self.script.lock().push_back(reply);
        self
    }

    /// Queue `reply` `n` times.
    #[must_use]
    pub fn times(self, n: usize, reply: &Result<FunctionReply, ProviderError>) -> Self {
        {
            let mut script = self.script.lock();
            for _ in 0..n {
                script.push_back(reply.clone());
            }
        }
        self
    }

    /// Hold every call for `delay` before replying.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every captured call, probes included.
    pub fn calls(&self) -> Vec<CapturedCall> {
        self.calls.lock().clone()
    }

    /// Captured calls excluding health probes.
    pub fn deliveries(&self) -> Vec<DispatchRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|c| !c.request.is_health_probe())
            .map(|c| c.request.clone())
            .collect()
    }

    /// Number of non-probe calls received.
    pub fn delivery_count(&self) -> usize {
        self.deliveries().len()
    }

    /// # Panics
    ///
    /// Panics if the number of non-probe calls differs from `expected`.
    pub fn assert_called(&self, expected: usize) {
        let actual = self.delivery_count();
        assert_eq!(
            actual, expected,
            "{}: expected {expected} delivery call(s), got {actual}",
            self.name
        );
    }

    /// # Panics
    ///
    /// Panics if any non-probe call was received.
    pub fn assert_not_called(&self) {
        self.assert_called(0);
    }

    fn next_reply(&self) -> Result<FunctionReply, ProviderError> {
        if let Some(reply) = self.script.lock().pop_front() {
            return reply;
        }
        match &self.fallback {
            Some(reply) => reply.clone(),
            None => {
                let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
                Ok(FunctionReply::ok(json!({
                    "id": format!("{}-msg-{n}", self.channel),
                })))
            }
        }
    }
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("scripted", &self.script.lock().len())
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    async fn call(&self, request: &DispatchRequest) -> Result<FunctionReply, ProviderError> {
        self.calls.lock().push(CapturedCall {
            request: request.clone(),
            received_at: Utc::now(),
        });
        let reply = self.next_reply();
        debug!(
            function = %self.name,
            request_id = %request.request_id,
            ok = reply.as_ref().is_ok_and(|r| r.ok),
            "scripted reply"
        );
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        reply
    }
}

/// Reply `{ok: false, status}` with an error detail, as a failing function
/// would.
pub fn failed_reply(status: u16, detail: &str) -> Result<FunctionReply, ProviderError> {
    Ok(FunctionReply::failed(status, json!({ "error": detail })))
}

/// Reply `{ok: true}` carrying `id` as the provider message id.
pub fn ok_reply(id: &str) -> Result<FunctionReply, ProviderError> {
    Ok(FunctionReply::ok(json!({ "id": id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::IdempotencyKey;

    fn request() -> DispatchRequest {
        DispatchRequest {
            channel: Channel::Email,
            recipients: vec!["a@example.com".into()],
            template_id: None,
            subject: None,
            body: Some("hi".into()),
            template_params: None,
            request_id: "r".into(),
            idempotency_key: IdempotencyKey::new("k"),
            action: None,
        }
    }

    #[tokio::test]
    async fn script_then_fallback() {
        let provider = ScriptedProvider::new(Channel::Email)
            .then(failed_reply(500, "boom"))
            .then(Err(ProviderError::RateLimited));

        assert_eq!(provider.call(&request()).await.unwrap().status, 500);
        assert!(matches!(
            provider.call(&request()).await,
            Err(ProviderError::RateLimited)
        ));
        let reply = provider.call(&request()).await.unwrap();
        assert!(reply.ok);
        assert_eq!(reply.external_id().as_deref(), Some("email-msg-1"));
        provider.assert_called(3);
    }

    #[tokio::test]
    async fn probes_are_not_deliveries() {
        let provider = ScriptedProvider::new(Channel::Sms).always(ok_reply("x"));
        provider
            .call(&DispatchRequest::health_probe(Channel::Sms))
            .await
            .unwrap();
        assert_eq!(provider.calls().len(), 1);
        provider.assert_not_called();
    }
}
