//! Courier Simulation Framework
//!
//! This crate provides tools for exercising the Courier pipeline in a
//! controlled local environment. It supports:
//!
//! - Several gateways sharing one queue, standing in for worker processes
//! - Scripted send functions that capture every call
//! - A log store that is always down, for failure isolation tests
//! - Assertions for queue rows and automation log rows
//!
//! # Quick Start
//!
//! ```no_run
//! use courier_core::{Channel, ChannelMessage};
//! use courier_simulation::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let harness = SimulationHarness::builder()
//!         .provider(ScriptedProvider::new(Channel::Email))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let message =
//!         ChannelMessage::inline(Channel::Email, "buyer@example.com", None, "Your order shipped");
//!     let row = harness.send(message, "order-1").await.unwrap();
//!     harness.dispatch_at(chrono::Utc::now()).await.unwrap();
//!
//!     harness.action(&row.id).await.unwrap().assert_delivered();
//!     harness.provider(Channel::Email).unwrap().assert_called(1);
//! }
//! ```

pub mod assertions;
mod error;
pub mod faults;
pub mod harness;
pub mod provider;

pub use assertions::{LogAssertions, PendingActionExt};
pub use error::SimulationError;
pub use faults::UnavailableLogStore;
pub use harness::{SimulationHarness, SimulationHarnessBuilder};
pub use provider::{CapturedCall, ScriptedProvider, failed_reply, ok_reply};

/// Prelude module for convenient imports.
///
/// ```
/// use courier_simulation::prelude::*;
/// ```
pub mod prelude {
    pub use crate::assertions::{LogAssertions, PendingActionExt};
    pub use crate::error::SimulationError;
    pub use crate::faults::UnavailableLogStore;
    pub use crate::harness::{SimulationHarness, SimulationHarnessBuilder};
    pub use crate::provider::{CapturedCall, ScriptedProvider, failed_reply, ok_reply};
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_core::{Channel, ChannelMessage};

    #[tokio::test]
    async fn harness_dispatches_on_the_first_node() {
        let harness = SimulationHarness::builder()
            .nodes(2)
            .provider(ScriptedProvider::new(Channel::Sms))
            .build()
            .await
            .unwrap();
        assert_eq!(harness.nodes().len(), 2);

        let message = ChannelMessage::inline(Channel::Sms, "+15550001111", None, "hi");
        let row = harness.send(message, "k").await.unwrap();
        assert_eq!(harness.pending().await.unwrap(), 1);

        let report = harness.dispatch_at(Utc::now()).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(harness.pending().await.unwrap(), 0);
        harness.action(&row.id).await.unwrap().assert_delivered();
    }
}
