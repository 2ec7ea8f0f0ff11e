//! Background processor for periodic pipeline work.
//!
//! The background processor handles:
//! - Claiming and dispatching due actions
//! - Probing the remote send functions, on a task of its own so a slow
//!   probe cycle never holds up dispatch
//! - Releasing claims abandoned by dead workers

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::error::GatewayError;
use crate::gateway::Gateway;

/// Configuration for the background processor.
#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    /// How often to claim due actions (default: 1 second).
    pub dispatch_interval: Duration,
    /// How often to probe the send functions (default: 60 seconds).
    pub probe_interval: Duration,
    /// How often to release stale claims (default: 30 seconds).
    pub reclaim_interval: Duration,
    /// Whether this processor runs health probes.
    pub enable_probes: bool,
    /// Whether this processor releases stale claims.
    pub enable_reclaim: bool,
    /// Dispatch passes per tick while batches come back full.
    pub max_passes_per_tick: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_secs(1),
            probe_interval: Duration::from_secs(60),
            reclaim_interval: Duration::from_secs(30),
            enable_probes: true,
            enable_reclaim: true,
            max_passes_per_tick: 10,
        }
    }
}

/// Drives a [`Gateway`] on timers until shut down.
pub struct BackgroundProcessor {
    gateway: Arc<Gateway>,
    config: BackgroundConfig,
    shutdown_rx: mpsc::Receiver<()>,
}

impl BackgroundProcessor {
    /// Create a processor and the sender that stops it.
    pub fn new(gateway: Arc<Gateway>, config: BackgroundConfig) -> (Self, mpsc::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let processor = Self {
            gateway,
            config,
            shutdown_rx,
        };
        (processor, shutdown_tx)
    }

    /// Run the background processor until shutdown is signaled.
    pub async fn run(&mut self) {
        info!(
            probes = self.config.enable_probes,
            reclaim = self.config.enable_reclaim,
            "background processor starting"
        );

        let mut dispatch_interval = interval(self.config.dispatch_interval);
        let mut probe_interval = interval(self.config.probe_interval);
        let mut reclaim_interval = interval(self.config.reclaim_interval);
        let mut probe_cycle: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("background processor received shutdown signal");
                    break;
                }
                _ = dispatch_interval.tick() => {
                    if let Err(e) = self.dispatch().await {
                        error!(error = %e, "error dispatching due actions");
                    }
                }
                _ = probe_interval.tick(), if self.config.enable_probes => {
                    if probe_cycle.as_ref().is_some_and(|cycle| !cycle.is_finished()) {
                        debug!("previous probe cycle still running, skipping tick");
                    } else {
                        probe_cycle = Some(self.spawn_probe_cycle());
                    }
                }
                _ = reclaim_interval.tick(), if self.config.enable_reclaim => {
                    if let Err(e) = self.gateway.reclaim_stale_claims(Utc::now()).await {
                        error!(error = %e, "error releasing stale claims");
                    }
                }
            }
        }

        if let Some(cycle) = probe_cycle.take()
            && let Err(e) = cycle.await
        {
            error!(error = %e, "probe cycle task failed");
        }
        info!("background processor stopped");
    }

    fn spawn_probe_cycle(&self) -> JoinHandle<()> {
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            let records = gateway.prober().probe_all().await;
            let unhealthy = records.iter().filter(|r| !r.ok).count();
            debug!(probed = records.len(), unhealthy, "health probes finished");
        })
    }

    async fn dispatch(&self) -> Result<(), GatewayError> {
        let batch = self.gateway.executor().config().claim_batch_size;
        for _ in 0..self.config.max_passes_per_tick.max(1) {
            let report = self.gateway.dispatch_due().await?;
            if report.claimed > 0 {
                debug!(
                    claimed = report.claimed,
                    delivered = report.delivered,
                    retried = report.retried,
                    failed = report.failed,
                    late = report.late,
                    "dispatch pass finished"
                );
            }
            if report.claimed < batch {
                break;
            }
        }
        Ok(())
    }
}
