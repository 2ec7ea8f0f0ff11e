use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use courier_audit::Severity;
use courier_core::{Channel, DispatchRequest, ProviderHealthRecord, SystemAlert};
use courier_provider::{DynProvider, ProviderError, ProviderRegistry};

use crate::logger::AutomationLogger;
use crate::metrics::GatewayMetrics;

/// Configuration for synthetic health probes.
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Deadline for a single probe call.
    pub timeout: Duration,
    /// Consecutive failed probes tolerated before alerting. The alert is
    /// raised on the next failure after this many.
    pub failure_threshold: u32,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

/// Latest probe results and the alerts currently raised.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSnapshot {
    pub records: Vec<ProviderHealthRecord>,
    pub alerts: Vec<SystemAlert>,
}

/// Probes every registered send function with `{action: "health"}`.
///
/// Probes call the providers directly rather than through the dispatch
/// pools, so a saturated channel still gets probed.
pub struct HealthProber {
    providers: Arc<ProviderRegistry>,
    logger: AutomationLogger,
    metrics: Arc<GatewayMetrics>,
    config: ProberConfig,
    latest: DashMap<Channel, ProviderHealthRecord>,
    failures: DashMap<Channel, u32>,
    alerts: DashMap<Channel, SystemAlert>,
}

impl std::fmt::Debug for HealthProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthProber")
            .field("config", &self.config)
            .field("channels", &self.providers.channels())
            .finish_non_exhaustive()
    }
}

impl HealthProber {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        logger: AutomationLogger,
        metrics: Arc<GatewayMetrics>,
        config: ProberConfig,
    ) -> Self {
        Self {
            providers,
            logger,
            metrics,
            config,
            latest: DashMap::new(),
            failures: DashMap::new(),
            alerts: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ProberConfig {
        &self.config
    }

    /// Probe every channel concurrently and return the fresh records in
    /// channel order.
    pub async fn probe_all(&self) -> Vec<ProviderHealthRecord> {
        let probes = self.providers.iter().map(|provider| self.probe(provider));
        join_all(probes).await
    }

    /// Probe one channel. Returns `None` if no function is registered for it.
    pub async fn probe_channel(&self, channel: Channel) -> Option<ProviderHealthRecord> {
        let provider = self.providers.get(channel)?;
        Some(self.probe(provider).await)
    }

    /// The most recent record per channel plus raised alerts.
    pub fn snapshot(&self) -> HealthSnapshot {
        let mut records: Vec<ProviderHealthRecord> =
            self.latest.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.channel);
        let mut alerts: Vec<SystemAlert> = self.alerts.iter().map(|a| a.value().clone()).collect();
        alerts.sort_by_key(|a| a.channel);
        HealthSnapshot { records, alerts }
    }

    pub fn consecutive_failures(&self, channel: Channel) -> u32 {
        self.failures.get(&channel).map_or(0, |n| *n)
    }

    async fn probe(&self, provider: Arc<dyn DynProvider>) -> ProviderHealthRecord {
        let channel = provider.channel();
        let request = DispatchRequest::health_probe(channel);
        self.metrics.increment_probes();

        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.timeout, provider.call(&request)).await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(ProviderError::Timeout(self.config.timeout)),
        };
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let record = match result {
            Ok(reply) => {
                let ok = reply.ok && (200..300).contains(&reply.status);
                ProviderHealthRecord {
                    function_name: provider.name().to_owned(),
                    channel,
                    ok,
                    http_status: Some(reply.status),
                    latency_ms,
                    error: (!ok).then(|| reply.error_message()),
                    checked_at: Utc::now(),
                }
            }
            Err(e) => {
                self.logger
                    .log_system_error(
                        format!("prober:{channel}"),
                        format!("{}: {e}", provider.name()),
                        Severity::Warning,
                    )
                    .await;
                ProviderHealthRecord {
                    function_name: provider.name().to_owned(),
                    channel,
                    ok: false,
                    http_status: e.http_status(),
                    latency_ms,
                    error: Some(e.to_string()),
                    checked_at: Utc::now(),
                }
            }
        };

        self.track(&record).await;
        self.latest.insert(channel, record.clone());
        record
    }

    async fn track(&self, record: &ProviderHealthRecord) {
        let channel = record.channel;
        if record.ok {
            self.failures.remove(&channel);
            if self.alerts.remove(&channel).is_some() {
                info!(%channel, function = %record.function_name, "provider recovered");
            }
            debug!(%channel, latency_ms = record.latency_ms, "probe healthy");
            return;
        }

        self.metrics.increment_probe_failures();
        let failures = {
            let mut count = self.failures.entry(channel).or_insert(0);
            *count += 1;
            *count
        };
        warn!(
            %channel,
            function = %record.function_name,
            failures,
            error = record.error.as_deref().unwrap_or_default(),
            "probe failed"
        );
        if failures != self.config.failure_threshold.saturating_add(1) {
            return;
        }

        let alert = SystemAlert {
            channel,
            function_name: record.function_name.clone(),
            consecutive_failures: failures,
            last_error: record.error.clone(),
            raised_at: Utc::now(),
        };
        error!(
            %channel,
            function = %alert.function_name,
            consecutive_failures = failures,
            "provider degraded"
        );
        self.metrics.increment_alerts();
        self.logger
            .log_system_error(
                format!("prober:{channel}"),
                format!(
                    "{} failed {failures} consecutive health probes: {}",
                    alert.function_name,
                    alert.last_error.as_deref().unwrap_or("unknown error")
                ),
                Severity::Critical,
            )
            .await;
        self.alerts.insert(channel, alert);
    }
}

#[cfg(test)]
#[allow(clippy::unnecessary_literal_bound)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use courier_audit::{LogStore, SystemErrorQuery};
    use courier_audit_memory::MemoryLogStore;
    use courier_core::FunctionReply;

    struct Switch {
        name: &'static str,
        channel: Channel,
        healthy: AtomicBool,
    }

    #[async_trait]
    impl DynProvider for Switch {
        fn name(&self) -> &str {
            self.name
        }

        fn channel(&self) -> Channel {
            self.channel
        }

        async fn call(&self, request: &DispatchRequest) -> Result<FunctionReply, ProviderError> {
            assert!(request.is_health_probe());
            if self.healthy.load(Ordering::SeqCst) {
                Ok(FunctionReply::ok(serde_json::json!({"status": "up"})))
            } else {
                Err(ProviderError::NotDeployed(self.name.to_owned()))
            }
        }
    }

    struct Hangs;

    #[async_trait]
    impl DynProvider for Hangs {
        fn name(&self) -> &str {
            "send-whatsapp"
        }

        fn channel(&self) -> Channel {
            Channel::Whatsapp
        }

        async fn call(&self, _request: &DispatchRequest) -> Result<FunctionReply, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(FunctionReply::ok(serde_json::Value::Null))
        }
    }

    struct Fixture {
        prober: HealthProber,
        logs: Arc<MemoryLogStore>,
        metrics: Arc<GatewayMetrics>,
        sms: Arc<Switch>,
    }

    fn fixture(extra: Option<Arc<dyn DynProvider>>) -> Fixture {
        let sms = Arc::new(Switch {
            name: "send-sms",
            channel: Channel::Sms,
            healthy: AtomicBool::new(false),
        });
        let email = Arc::new(Switch {
            name: "send-email",
            channel: Channel::Email,
            healthy: AtomicBool::new(true),
        });
        let mut registry = ProviderRegistry::new();
        registry.register(sms.clone());
        registry.register(email);
        if let Some(provider) = extra {
            registry.register(provider);
        }
        let logs = Arc::new(MemoryLogStore::new());
        let metrics = Arc::new(GatewayMetrics::default());
        let logger = AutomationLogger::new(logs.clone(), Arc::clone(&metrics));
        let prober = HealthProber::new(
            Arc::new(registry),
            logger,
            Arc::clone(&metrics),
            ProberConfig::default(),
        );
        Fixture {
            prober,
            logs,
            metrics,
            sms,
        }
    }

    #[tokio::test]
    async fn not_deployed_is_unhealthy() {
        let f = fixture(None);
        let records = f.prober.probe_all().await;
        assert_eq!(records.len(), 2);

        let email = &records[0];
        assert_eq!(email.channel, Channel::Email);
        assert!(email.ok);
        assert_eq!(email.http_status, Some(200));

        let sms = &records[1];
        assert_eq!(sms.channel, Channel::Sms);
        assert!(!sms.ok);
        assert_eq!(sms.http_status, Some(404));
        assert!(sms.error.as_deref().unwrap().contains("not deployed"));

        let errors = f
            .logs
            .list_system_errors(&SystemErrorQuery::default())
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, Severity::Warning);
        assert_eq!(errors[0].context, "prober:sms");
    }

    #[tokio::test]
    async fn alert_is_raised_once_and_cleared_on_recovery() {
        let f = fixture(None);
        // The default threshold tolerates three failures.
        for _ in 0..3 {
            f.prober.probe_all().await;
        }
        assert_eq!(f.prober.consecutive_failures(Channel::Sms), 3);
        assert_eq!(f.metrics.snapshot().alerts, 0);
        assert!(f.prober.snapshot().alerts.is_empty());

        for _ in 0..3 {
            f.prober.probe_all().await;
        }
        assert_eq!(f.prober.consecutive_failures(Channel::Sms), 6);
        assert_eq!(f.metrics.snapshot().alerts, 1);

        let snapshot = f.prober.snapshot();
        assert_eq!(snapshot.alerts.len(), 1);
        assert_eq!(snapshot.alerts[0].channel, Channel::Sms);
        assert_eq!(snapshot.alerts[0].consecutive_failures, 4);

        let critical = f
            .logs
            .list_system_errors(&SystemErrorQuery {
                min_severity: Some(Severity::Critical),
                ..SystemErrorQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(critical.len(), 1);

        f.sms.healthy.store(true, Ordering::SeqCst);
        let record = f.prober.probe_channel(Channel::Sms).await.unwrap();
        assert!(record.ok);
        assert_eq!(f.prober.consecutive_failures(Channel::Sms), 0);
        assert!(f.prober.snapshot().alerts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_channel_times_out_alone() {
        let f = fixture(Some(Arc::new(Hangs)));
        let records = f.prober.probe_all().await;
        assert_eq!(records.len(), 3);

        let whatsapp = records
            .iter()
            .find(|r| r.channel == Channel::Whatsapp)
            .unwrap();
        assert!(!whatsapp.ok);
        assert!(whatsapp.error.as_deref().unwrap().starts_with("timeout"));
        assert!(records.iter().any(|r| r.channel == Channel::Email && r.ok));
    }

    #[tokio::test]
    async fn unknown_channel_is_not_probed() {
        let f = fixture(None);
        assert!(f.prober.probe_channel(Channel::Whatsapp).await.is_none());
        assert_eq!(f.metrics.snapshot().probes, 0);
    }
}
