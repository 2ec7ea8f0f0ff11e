pub mod background;
pub mod builder;
pub mod csv;
mod dispatch;
pub mod dlq;
pub mod error;
pub mod gateway;
pub mod harness;
pub mod logger;
pub mod metrics;
pub mod prober;

pub use background::{BackgroundConfig, BackgroundProcessor};
pub use builder::GatewayBuilder;
pub use csv::log_entries_to_csv;
pub use dispatch::DispatchReport;
pub use dlq::{DeadLetterExport, DeadLetterManager, DeadLetterRow};
pub use error::GatewayError;
pub use gateway::{EnqueueOutcome, EnqueueRequest, FireTrigger, Gateway};
pub use harness::{DispatchResult, TestContent, TestHarness, TestSend};
pub use logger::AutomationLogger;
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use prober::{HealthProber, HealthSnapshot, ProberConfig};
