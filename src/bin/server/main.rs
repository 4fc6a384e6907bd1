//! Kuba Metrics Query HTTP Server
//!
//! Serves the metrics query API over an in-memory metrics store, optionally
//! seeded from a JSON fixture file.
//!
//! # Endpoints
//!
//! - `POST /api/v1/metrics` - Batch of metrics URIs
//! - `GET /api/v1/metrics/<path>` - Single metrics URI
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics
//!
//! # CLI Commands
//!
//! - `start` - Start the HTTP server (default if no command specified)
//! - `check-config` - Validate configuration file
//!
//! # Configuration
//!
//! The server reads configuration from:
//! 1. `--config` flag
//! 2. `METRICS_QUERY_CONFIG` environment variable (path to TOML file)
//! 3. `./metrics-query.toml` in current directory
//! 4. Default configuration

mod config;

use clap::{Parser, Subcommand};
use kuba_metrics_query::{
    batch::BatchMetricsHandler,
    config::Config,
    engine::{InMemoryMetricsStore, InMemoryTableFactory},
    http::{build_router, AppState},
    query::MetricsQueryEngine,
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::signal;
use tracing::{debug, info, warn};

// =============================================================================
// CLI Definition
// =============================================================================

/// Kuba Metrics Query - REST-style metrics query service
#[derive(Parser)]
#[command(name = "metrics-query-server")]
#[command(version)]
#[command(about = "Metrics query service with batch and single-query endpoints", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (overrides METRICS_QUERY_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long, global = true)]
    listen: Option<String>,

    /// JSON fixture to seed the in-memory metrics store
    #[arg(short, long, global = true)]
    fixture: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Start,

    /// Validate configuration file without starting the server
    CheckConfig,
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

/// Validate configuration and print summary
fn cmd_check_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config(cli.config.as_deref())?;
    config.validate()?;

    println!("Configuration is valid!");
    println!();
    println!("Server Settings:");
    println!("  Listen address: {}", config.listen_addr());
    println!();
    println!("Query Settings:");
    println!("  Second delay: {}s", config.query.second_delay);
    println!("  Resolution: {}s", config.query.resolution);
    println!("  Max count: {}", config.query.max_count);
    println!();
    println!("Batch Settings:");
    println!("  Failure policy: {:?}", config.batch.failure_policy);
    println!("  Parallelism: {}", config.batch.parallelism);
    println!("  Max items: {}", config.batch.max_items);
    println!();
    println!("Monitoring:");
    println!("  Prometheus enabled: {}", config.monitoring.metrics_enabled);
    println!("  Log level: {}", config.monitoring.log_level);

    Ok(())
}

// =============================================================================
// Server Setup
// =============================================================================

/// Graceful shutdown signal handler
///
/// A failed signal registration logs a warning and waits forever instead of
/// panicking during startup.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {},
            Err(e) => {
                warn!(
                    error = %e,
                    "Ctrl+C handler installation failed - graceful shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(
                    error = %e,
                    "SIGTERM handler installation failed - SIGTERM shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

/// Build the metrics store, the engine and the batch handler
fn init_handler(
    config: &Config,
    fixture: Option<&std::path::Path>,
) -> Result<Arc<BatchMetricsHandler>, Box<dyn std::error::Error>> {
    let store = match fixture {
        Some(path) => {
            let store = InMemoryMetricsStore::load_fixture(path)?;
            info!(
                fixture = %path.display(),
                rows = store.row_count(),
                "Loaded metrics fixture"
            );
            store
        },
        None => InMemoryMetricsStore::new(),
    };

    let factory = Arc::new(InMemoryTableFactory::new(Arc::new(store)));
    let engine = MetricsQueryEngine::from_config(factory, &config.query)?;
    Ok(Arc::new(BatchMetricsHandler::from_config(
        Arc::new(engine),
        config,
    )))
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::CheckConfig) => return cmd_check_config(&cli),
        Some(Commands::Start) | None => {},
    }

    let mut config = config::load_config(cli.config.as_deref())?;
    config.validate()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("Starting Kuba Metrics Query Server v{}", env!("CARGO_PKG_VERSION"));

    let listen_addr = cli.listen.clone().unwrap_or_else(|| config.listen_addr());
    debug!(
        listen_addr = %listen_addr,
        second_delay = config.query.second_delay,
        resolution = config.query.resolution,
        failure_policy = ?config.batch.failure_policy,
        "Configuration"
    );

    let handler = init_handler(&config, cli.fixture.as_deref())?;

    // CLI listen override wins over the configured host and port.
    let addr: SocketAddr = listen_addr.parse()?;
    config.server.host = addr.ip().to_string();
    config.server.port = addr.port();

    let app = build_router(Arc::new(AppState::new(handler, config)));

    info!("Server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
