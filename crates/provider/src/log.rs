use courier_core::{Channel, DispatchRequest, FunctionReply};
use tracing::info;

use crate::error::ProviderError;
use crate::provider::Provider;

/// A send function that logs the request and replies `ok` without any
/// external I/O.
///
/// Useful for local development where the real functions are not deployed.
pub struct LogFunction {
    name: String,
    channel: Channel,
}

impl LogFunction {
    pub fn new(name: impl Into<String>, channel: Channel) -> Self {
        Self {
            name: name.into(),
            channel,
        }
    }
}

impl Provider for LogFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    async fn call(&self, request: &DispatchRequest) -> Result<FunctionReply, ProviderError> {
        info!(
            function = %self.name,
            channel = %self.channel,
            request_id = %request.request_id,
            idempotency_key = %request.idempotency_key,
            recipients = request.recipients.len(),
            health = request.is_health_probe(),
            "log function received call"
        );
        Ok(FunctionReply::ok(serde_json::json!({
            "id": format!("log-{}", request.request_id),
            "logged": true,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_ok_with_synthetic_id() {
        let function = LogFunction::new("send-email", Channel::Email);
        let request = DispatchRequest::health_probe(Channel::Email);
        let reply = function.call(&request).await.unwrap();
        assert!(reply.ok);
        assert_eq!(reply.status, 200);
        assert_eq!(
            reply.external_id(),
            Some(format!("log-{}", request.request_id))
        );
    }
}
