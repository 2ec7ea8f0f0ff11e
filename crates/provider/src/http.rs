use std::collections::HashMap;
use std::time::Duration;

use courier_core::{Channel, DispatchRequest, FunctionReply};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::Provider;

/// Connection settings for one remote send function.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionConfig {
    /// Function name, reported in health records and logs.
    pub name: String,
    pub channel: Channel,
    /// Full URL the request is POSTed to.
    pub url: String,
    /// Bearer token attached as `Authorization`, if any.
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Extra headers sent with every call.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl FunctionConfig {
    pub fn new(name: impl Into<String>, channel: Channel, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel,
            url: url.into(),
            bearer_token: None,
            headers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// A remote send function reached with an HTTP POST.
///
/// The `reqwest::Client` is injected so every function in a process can share
/// one connection pool and TLS configuration.
pub struct HttpFunction {
    config: FunctionConfig,
    client: Client,
    timeout: Option<Duration>,
}

impl HttpFunction {
    pub fn new(config: FunctionConfig, client: Client) -> Self {
        Self {
            config,
            client,
            timeout: None,
        }
    }

    /// Per-request timeout enforced by the HTTP client. The executor applies
    /// its own timeout on top of this.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn config(&self) -> &FunctionConfig {
        &self.config
    }
}

impl Provider for HttpFunction {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn channel(&self) -> Channel {
        self.config.channel
    }

    async fn call(&self, request: &DispatchRequest) -> Result<FunctionReply, ProviderError> {
        let mut builder = self.client.post(&self.config.url).json(request);
        if let Some(token) = &self.config.bearer_token {
            builder = builder.bearer_auth(token);
        }
        for (key, value) in &self.config.headers {
            builder = builder.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout.unwrap_or_default())
            } else if e.is_connect() || e.is_request() {
                ProviderError::Connection(e.to_string())
            } else {
                ProviderError::ExecutionFailed(e.to_string())
            }
        })?;

        let status = response.status();
        debug!(
            function = %self.config.name,
            request_id = %request.request_id,
            status = status.as_u16(),
            "remote function responded"
        );

        match status {
            StatusCode::NOT_FOUND => {
                return Err(ProviderError::NotDeployed(self.config.name.clone()));
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(ProviderError::RateLimited),
            _ => {}
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        Ok(normalize_reply(status.as_u16(), &bytes))
    }
}

/// Interpret a raw HTTP response as a [`FunctionReply`].
///
/// Functions are expected to answer `{ ok, status, body }`. Anything else is
/// wrapped, with `ok` derived from the HTTP status. A function reply's `ok`
/// is never trusted over a failing HTTP status.
pub fn normalize_reply(http_status: u16, bytes: &[u8]) -> FunctionReply {
    let http_ok = (200..300).contains(&http_status);
    let parsed: Option<serde_json::Value> = serde_json::from_slice(bytes).ok();

    if let Some(value) = &parsed
        && let Ok(mut reply) = serde_json::from_value::<FunctionReply>(value.clone())
    {
        if !http_ok {
            reply.ok = false;
            reply.status = http_status;
        }
        return reply;
    }

    let body = parsed.unwrap_or_else(|| {
        if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    });
    FunctionReply {
        ok: http_ok,
        status: http_status,
        body,
    }
}
