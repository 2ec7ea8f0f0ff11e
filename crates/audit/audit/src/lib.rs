pub mod entry;
pub mod error;
pub mod query;
pub mod store;
pub mod system_error;
pub mod testing;
pub mod transition;

pub use entry::{AutomationLogEntry, LogStatus, MAX_MESSAGE_CHARS, NewLogEntry};
pub use error::AuditError;
pub use query::{LogCounts, LogPage, LogQuery, PerformanceSummary};
pub use store::LogStore;
pub use system_error::{Severity, SystemErrorQuery, SystemErrorRecord};
pub use transition::{LogTransition, LogUpdate};
