use courier_core::{ActionId, ActionStatus, IdempotencyKey};
use thiserror::Error;

/// Errors from queue store and registry operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// An action with the same idempotency key already exists.
    #[error("idempotency key {key} already scheduled as {existing}")]
    DuplicateIdempotencyKey {
        key: IdempotencyKey,
        existing: ActionId,
    },

    /// The row is not in a state the transition may start from.
    #[error("cannot {transition} action {id} in state {from}")]
    InvalidTransition {
        id: ActionId,
        from: ActionStatus,
        transition: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StateError {
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}
