use courier_audit::AuditError;
use courier_gateway::GatewayError;
use courier_state::StateError;
use thiserror::Error;

/// Errors surfaced by the simulation harness.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    /// The pipeline did something the scenario did not expect.
    #[error("unexpected: {0}")]
    Unexpected(String),
}
