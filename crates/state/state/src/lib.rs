pub mod error;
pub mod queue;
pub mod registry;
pub mod testing;
pub mod transition;

pub use error::StateError;
pub use queue::{QueueFilter, QueuePage, QueueStore};
pub use registry::AutomationRegistry;
pub use transition::{ClaimToken, QueueTransition, STALE_CLAIM_ERROR, release_stale_claim};
