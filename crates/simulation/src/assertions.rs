//! Assertion helpers for verifying pipeline outcomes in simulation tests.

use courier_audit::{AutomationLogEntry, LogStatus};
use courier_core::{ActionStatus, PendingAction};

/// Assertion helpers for queue rows.
pub trait PendingActionExt {
    /// # Panics
    ///
    /// Panics if the row is not `delivered`.
    fn assert_delivered(&self);

    /// Assert the row is dead-lettered after exactly `attempts` attempts.
    ///
    /// # Panics
    ///
    /// Panics if the row is not `failed` or the attempt count differs.
    fn assert_dead_lettered(&self, attempts: u32);

    /// # Panics
    ///
    /// Panics if the row is in a different state.
    fn assert_status(&self, expected: ActionStatus);
}

impl PendingActionExt for PendingAction {
    fn assert_delivered(&self) {
        self.assert_status(ActionStatus::Delivered);
    }

    fn assert_dead_lettered(&self, attempts: u32) {
        self.assert_status(ActionStatus::Failed);
        assert_eq!(
            self.attempts, attempts,
            "action {}: expected {attempts} attempt(s), got {}",
            self.id, self.attempts
        );
    }

    fn assert_status(&self, expected: ActionStatus) {
        assert_eq!(
            self.status, expected,
            "action {}: expected {expected}, got {} (last error: {:?})",
            self.id, self.status, self.last_error
        );
        assert!(
            self.attempts <= self.max_attempts,
            "action {}: attempts {} exceed max_attempts {}",
            self.id,
            self.attempts,
            self.max_attempts
        );
    }
}

/// Assertion helpers for automation log rows.
pub struct LogAssertions;

impl LogAssertions {
    /// Assert that a log row exists and is in `expected`.
    ///
    /// # Panics
    ///
    /// Panics if the row is missing or in a different state.
    pub fn assert_status(entry: Option<&AutomationLogEntry>, expected: LogStatus) {
        let Some(entry) = entry else {
            panic!("expected a {expected} log row, found none");
        };
        assert_eq!(
            entry.status, expected,
            "log {}: expected {expected}, got {} (error: {:?})",
            entry.id, entry.status, entry.error_message
        );
    }

    /// # Panics
    ///
    /// Panics if the row is missing, not `success`, or lacks a provider
    /// message id.
    pub fn assert_success(entry: Option<&AutomationLogEntry>) {
        Self::assert_status(entry, LogStatus::Success);
        assert!(
            entry.and_then(|e| e.external_id.as_ref()).is_some(),
            "successful log row has no external id"
        );
    }

    /// # Panics
    ///
    /// Panics if the row is missing, not `failed`, or its error does not
    /// contain `fragment`.
    pub fn assert_failed_with(entry: Option<&AutomationLogEntry>, fragment: &str) {
        Self::assert_status(entry, LogStatus::Failed);
        let error = entry
            .and_then(|e| e.error_message.as_deref())
            .unwrap_or_default();
        assert!(
            error.contains(fragment),
            "expected log error containing {fragment:?}, got {error:?}"
        );
    }
}
