use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use courier_gateway::{BackgroundProcessor, GatewayBuilder};
use courier_server::api::{AppState, router};
use courier_server::audit_factory::create_log_store;
use courier_server::config::CourierConfig;
use courier_server::provider_factory::create_providers;
use courier_server::state_factory::create_stores;

/// Courier dispatch pipeline HTTP server.
#[derive(Parser, Debug)]
#[command(name = "courier-server", about = "Operator API and dispatch workers for Courier")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "courier.toml")]
    config: PathBuf,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the queue, registry and log tables for the configured backends,
    /// then exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (config, found) = CourierConfig::load(&cli.config)?;
    if !found {
        info!(path = %cli.config.display(), "config file not found, using defaults");
    }

    if let Some(Commands::Migrate) = cli.command {
        return run_migrate(&config).await;
    }

    let stores = create_stores(&config.queue).await?;
    info!(backend = %config.queue.backend, "queue store initialized");
    let logs = create_log_store(&config.audit).await?;
    info!(backend = %config.audit.backend, "log store initialized");
    let providers = create_providers(&config.functions)?;
    if providers.is_empty() {
        warn!("no send functions configured, every dispatch will be retried");
    }

    let executor_config = config
        .executor
        .to_executor_config(config.background.claim_timeout());
    let gateway = Arc::new(
        GatewayBuilder::new()
            .queue(stores.queue)
            .registry(stores.registry)
            .logs(logs)
            .providers(providers)
            .executor_config(executor_config)
            .prober_config(config.health.to_prober_config())
            .build()?,
    );

    // Dispatch workers. Only the first one probes and reclaims stale claims.
    let tracker = TaskTracker::new();
    let mut shutdown_senders = Vec::with_capacity(config.background.workers);
    for index in 0..config.background.workers {
        let worker_config = config.background.worker_config(index, &config.health);
        let (mut processor, shutdown_tx) =
            BackgroundProcessor::new(Arc::clone(&gateway), worker_config);
        shutdown_senders.push(shutdown_tx);
        tracker.spawn(async move {
            processor.run().await;
        });
    }
    tracker.close();
    info!(workers = config.background.workers, "dispatch workers started");

    let app = router(AppState {
        gateway: Arc::clone(&gateway),
    });

    let addr = config.server.bind_addr(cli.host.as_deref(), cli.port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "courier-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for tx in shutdown_senders {
        let _ = tx.send(()).await;
    }
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
    if tokio::time::timeout(shutdown_timeout, tracker.wait())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = config.server.shutdown_timeout_seconds,
            "shutdown timeout exceeded, in-flight claims will be reclaimed later"
        );
    }

    info!("courier-server shut down");
    Ok(())
}

/// Run the `migrate` subcommand: connecting a SQL backend creates its tables.
async fn run_migrate(config: &CourierConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(backend = %config.queue.backend, "running queue migrations...");
    create_stores(&config.queue).await?;
    info!(backend = %config.audit.backend, "running log store migrations...");
    create_log_store(&config.audit).await?;
    info!("all migrations complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
