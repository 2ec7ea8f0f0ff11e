use courier_core::{AutomationId, Channel, IdempotencyKey, PayloadError};
use thiserror::Error;

/// Errors that can occur in gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// An error occurred in the queue store or registry.
    #[error("state error: {0}")]
    State(#[from] courier_state::StateError),

    /// An error occurred in the log store.
    #[error("audit error: {0}")]
    Audit(#[from] courier_audit::AuditError),

    /// The event payload failed validation.
    #[error("invalid payload: {0}")]
    Payload(#[from] PayloadError),

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The automation or trigger exists but is switched off.
    #[error("{0} is inactive")]
    Inactive(String),

    /// The message is addressed on a channel other than the automation's.
    #[error("automation {automation} sends on {expected}, message is for {actual}")]
    ChannelMismatch {
        automation: AutomationId,
        expected: Channel,
        actual: Channel,
    },

    /// Keys in the `health:` and `test:` namespaces belong to synthetic calls.
    #[error("idempotency key {0} uses a reserved prefix")]
    ReservedKey(IdempotencyKey),

    /// No remote function is registered for the channel.
    #[error("no provider registered for channel {0}")]
    NoProvider(Channel),

    /// The gateway was misconfigured (e.g. missing required components).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::State(courier_state::StateError::NotFound(_))
        )
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::State(e) if e.is_invalid_transition())
    }

    /// Caller errors: the request itself is malformed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Payload(_) | Self::ChannelMismatch { .. } | Self::ReservedKey(_)
        )
    }
}
