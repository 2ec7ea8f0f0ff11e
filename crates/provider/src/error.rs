use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while calling a remote send function.
///
/// A reply with a non-success status is *not* an error at this layer; the
/// executor classifies those from the [`FunctionReply`](courier_core::FunctionReply).
/// Only transport problems and the statuses with a fixed meaning (404, 429)
/// surface here.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The remote function answered 404: it is not deployed.
    #[error("function not deployed: {0}")]
    NotDeployed(String),

    /// The remote function did not respond within the allowed duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A network or transport-level error occurred.
    #[error("connection error: {0}")]
    Connection(String),

    /// The remote function rejected the request due to rate limiting.
    #[error("rate limited")]
    RateLimited,

    /// The call could not be made for a reason retrying will not fix.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The function was given invalid configuration.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ProviderError {
    /// Returns `true` if the error is transient and the call may succeed on
    /// retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotDeployed(_) | Self::Timeout(_) | Self::Connection(_) | Self::RateLimited
        )
    }

    /// Short stable code used in logs and dispatch results.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotDeployed(_) => "NOT_DEPLOYED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Connection(_) => "CONNECTION",
            Self::RateLimited => "RATE_LIMITED",
            Self::ExecutionFailed(_) => "EXECUTION_FAILED",
            Self::Configuration(_) => "CONFIGURATION",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }

    /// HTTP status implied by the error, when there is one.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::NotDeployed(_) => Some(404),
            Self::RateLimited => Some(429),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ProviderError::NotDeployed("send-email".into()).is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(ProviderError::Connection("reset".into()).is_retryable());
        assert!(ProviderError::RateLimited.is_retryable());
    }

    #[test]
    fn non_retryable_errors() {
        assert!(!ProviderError::ExecutionFailed("x".into()).is_retryable());
        assert!(!ProviderError::Configuration("x".into()).is_retryable());
        assert!(!ProviderError::Serialization("x".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ProviderError::NotDeployed("send-sms".into());
        assert_eq!(err.to_string(), "function not deployed: send-sms");

        let err = ProviderError::Timeout(Duration::from_millis(500));
        assert_eq!(err.to_string(), "timeout after 500ms");
        assert_eq!(err.http_status(), None);

        assert_eq!(ProviderError::RateLimited.http_status(), Some(429));
    }
}
