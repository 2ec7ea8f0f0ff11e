use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

macro_rules! counters {
    ($($(#[$doc:meta])* $name:ident => $inc:ident),* $(,)?) => {
        /// Atomic counters tracking pipeline outcomes.
        ///
        /// All counters use relaxed ordering. For a point-in-time view, call
        /// [`snapshot`](Self::snapshot).
        #[derive(Debug, Default)]
        pub struct GatewayMetrics {
            $($(#[$doc])* pub $name: AtomicU64,)*
        }

        impl GatewayMetrics {
            $(
                pub fn $inc(&self) {
                    self.$name.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Take a snapshot of all counters.
            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }

        /// A plain data snapshot of [`GatewayMetrics`] at a point in time.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
        pub struct MetricsSnapshot {
            $(pub $name: u64,)*
        }
    };
}

counters! {
    /// Actions accepted into the queue.
    enqueued => increment_enqueued,
    /// Enqueue requests answered with an existing action.
    duplicates => increment_duplicates,
    /// Rows claimed by this process.
    claimed => increment_claimed,
    delivered => increment_delivered,
    retried => increment_retried,
    /// Actions moved to the dead-letter state by dispatch.
    failed => increment_failed,
    /// Results that arrived after the row had left `dispatching`.
    late_results => increment_late_results,
    /// Abandoned claims released by the reaper.
    stale_reclaimed => increment_stale_reclaimed,
    probes => increment_probes,
    probe_failures => increment_probe_failures,
    alerts => increment_alerts,
    test_sends => increment_test_sends,
    /// Log writes that failed and were turned into system errors.
    log_write_failures => increment_log_write_failures,
}

impl GatewayMetrics {
    pub fn add_claimed(&self, n: u64) {
        self.claimed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_stale_reclaimed(&self, n: u64) {
        self.stale_reclaimed.fetch_add(n, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        assert_eq!(GatewayMetrics::default().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn increment_and_snapshot() {
        let m = GatewayMetrics::default();
        m.increment_enqueued();
        m.increment_enqueued();
        m.increment_duplicates();
        m.add_claimed(3);
        m.increment_late_results();
        m.add_stale_reclaimed(2);

        let snap = m.snapshot();
        assert_eq!(snap.enqueued, 2);
        assert_eq!(snap.duplicates, 1);
        assert_eq!(snap.claimed, 3);
        assert_eq!(snap.late_results, 1);
        assert_eq!(snap.stale_reclaimed, 2);
        assert_eq!(snap.delivered, 0);
    }

    #[test]
    fn snapshot_serializes_field_names() {
        let json = serde_json::to_value(GatewayMetrics::default().snapshot()).unwrap();
        assert_eq!(json["log_write_failures"], 0);
        assert_eq!(json["test_sends"], 0);
    }
}
