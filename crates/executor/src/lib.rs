pub mod classify;
pub mod config;
pub mod decide;
pub mod error;
pub mod executor;
pub mod render;
pub mod retry;

pub use classify::{AttemptOutcome, FailureClass, classify};
pub use config::ExecutorConfig;
pub use decide::{Decision, decide};
pub use error::ExecutorError;
pub use executor::{CallReport, DispatchExecutor};
pub use render::{PREVIEW_CHARS, RenderedMessage, render_request, truncate_chars};
pub use retry::RetryStrategy;
