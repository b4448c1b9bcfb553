//! greencheck - Green hosting classification service
//!
//! This is the main entry point for the greencheck server.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use greencheck::check::{GreenChecker, MaintenanceTask};
use greencheck::config::Config;
use greencheck::otel::{init_tracing, Metrics, OtelProvider};
use greencheck::registry::{load_providers, ProviderRegistry, RegistryRefresher};
use greencheck::resolver::{DnsResolver, Resolver};
use greencheck::server::{AppState, Server};

/// greencheck - Green hosting classification service
#[derive(Parser, Debug)]
#[command(name = "greencheck")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "GREENCHECK_CONFIG")]
    config: Option<String>,

    /// Provider file, overrides `registry.path`
    #[arg(short, long, env = "GREENCHECK_PROVIDERS")]
    providers: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(&args)?;
    if let Some(path) = &args.providers {
        config.registry.path = Some(path.clone());
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let otel_provider = OtelProvider::new(&config.otel)?;
    init_tracing(&otel_provider, &config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting greencheck");

    // Provider registry
    let registry = match &config.registry.path {
        Some(path) => {
            let providers = load_providers(Path::new(path)).await?;
            let registry = ProviderRegistry::new(providers)?;
            let snapshot = registry.current_snapshot();
            info!(
                path = %path,
                providers = snapshot.providers().len(),
                rules = snapshot.rule_count(),
                "Provider registry loaded"
            );
            registry
        }
        None => {
            warn!("No provider file configured, every domain will be grey");
            ProviderRegistry::empty()
        }
    };
    let registry = Arc::new(registry);

    // Resolver
    let resolver: Arc<dyn Resolver> = Arc::new(DnsResolver::from_config(&config.resolver)?);
    info!(
        resolver = resolver.name(),
        timeout_ms = config.resolver.timeout_ms,
        retry_timeout_ms = config.resolver.retry_timeout_ms,
        asn_lookup = config.resolver.asn_lookup_enabled,
        "Resolver initialized"
    );

    // Orchestrator
    let metrics = Arc::new(Metrics::new(&otel_provider.meter()));
    let checker = Arc::new(
        GreenChecker::from_config(&config, Arc::clone(&registry), resolver).with_metrics(metrics),
    );
    info!(
        ttl_secs = config.cache.ttl_secs,
        max_entries = config.cache.max_entries,
        rate_limit = config.rate_limit.enabled,
        "Check orchestrator initialized"
    );

    // Background tasks
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(
        MaintenanceTask::new(
            Arc::clone(&checker),
            Duration::from_secs(config.cache.sweep_interval_secs),
        )
        .run(shutdown_tx.subscribe()),
    ));

    if let Some(path) = &config.registry.path {
        tasks.push(tokio::spawn(
            RegistryRefresher::new(
                Arc::clone(&registry),
                PathBuf::from(path),
                Duration::from_secs(config.registry.refresh_interval_secs),
                config.registry.refresh_jitter_secs,
            )
            .run(shutdown_tx.subscribe()),
        ));
    }

    // HTTP server
    let state = AppState::new(checker, config.server.clone());
    let server = Server::new(config.server.clone(), state);

    info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting HTTP server"
    );

    let result = server.run(shutdown_signal()).await;

    // Stop background tasks
    let _ = shutdown_tx.send(());
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task failed");
        }
    }

    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }

    info!("greencheck shutdown complete");

    result.map_err(Into::into)
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Tracing is not initialized yet
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
