//! pipeline-monitor-exporter
//!
//! Prometheus exporter for remote pipeline job status with tracing logging.
//! This is the main entry point that initializes the server and handles subcommands.

mod cli;
mod commands;
mod handlers;
mod scheduler;
mod state;

use axum::{routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use pipeline_monitor_exporter::config::{DEFAULT_BIND_ADDR, DEFAULT_PORT};
use pipeline_monitor_exporter::{validate_effective_config, Config, CycleStats, FetchLoop};
use prometheus::Gauge;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::{error, info, warn, Level};

use cli::{resolve_config, Args, Commands, LogLevel};
use commands::{command_check, command_config, command_discover, command_test, show_config};
use handlers::{config_handler, health_handler, metrics_handler, root_handler, targets_handler};
use scheduler::run_scheduler;
use state::AppState;

/// Initializes tracing logging subsystem with configured log level.
/// The CLI flag wins over `log_level` from the config file.
fn setup_logging(config: &Config, args: &Args) {
    let level = args
        .log_level
        .clone()
        .or_else(|| config.log_level.as_deref().and_then(LogLevel::from_config))
        .unwrap_or(LogLevel::Info);

    let max_level = match level {
        LogLevel::Off => None,
        LogLevel::Error => Some(Level::ERROR),
        LogLevel::Warn => Some(Level::WARN),
        LogLevel::Info => Some(Level::INFO),
        LogLevel::Debug => Some(Level::DEBUG),
        LogLevel::Trace => Some(Level::TRACE),
    };

    let Some(max_level) = max_level else {
        return;
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {:?}", level);
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format.clone());
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        if let Commands::Config {
            output,
            format,
            commented,
        } = command
        {
            return command_config(output.clone(), format.clone(), *commented);
        }

        let config = load_validated_config(&args)?;
        setup_logging(&config, &args);

        return match command {
            Commands::Check => command_check(&config),
            Commands::Discover => command_discover(&config),
            Commands::Test {
                iterations,
                verbose,
            } => command_test(*iterations, *verbose, &config),
            Commands::Config { .. } => unreachable!("Config handled above"),
        };
    }

    // Load configuration for main server mode
    let config = load_validated_config(&args)?;
    setup_logging(&config, &args);

    info!("Starting pipeline-monitor-exporter");

    let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);
    let metrics_path = config.metrics_path().to_string();
    let interval_secs = config
        .frequency_minutes()
        .checked_mul(60)
        .ok_or("frequency is too large for a fetch interval")?;

    // Pipeline series plus fetch telemetry share one registry
    let gauges = Arc::new(config.gauge_registry()?);
    let scrape_duration = Gauge::new(
        "pipeline_monitor_scrape_duration_seconds",
        "Time spent encoding the previous metrics response",
    )?;
    gauges
        .registry()
        .register(Box::new(scrape_duration.clone()))?;

    let stats = Arc::new(CycleStats::new());
    let orchestrator = config.orchestrator(gauges.clone(), stats.clone())?;
    let fetch_loop = Arc::new(FetchLoop::new(orchestrator));

    let state = Arc::new(AppState {
        gauges,
        scrape_duration,
        stats,
        config: Arc::new(config.clone()),
        start_time: Instant::now(),
    });

    // Background fetch loop; first cycle starts immediately
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(run_scheduler(
        fetch_loop,
        Duration::from_secs(interval_secs),
        shutdown_rx,
    ));

    // Configure HTTP server routes
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

    let mut app = Router::new()
        .route("/", get(root_handler))
        .route(&metrics_path, get(metrics_handler));

    if config.enable_health.unwrap_or(true) {
        app = app.route("/health", get(health_handler));
    }

    app = app
        .route("/config", get(config_handler))
        .route("/targets", get(targets_handler));

    let app = app.with_state(state);

    let enable_tls = config.enable_tls.unwrap_or(false);
    let server_result: Result<(), Box<dyn std::error::Error>> = match (
        enable_tls,
        config.tls_cert_path.as_deref(),
        config.tls_key_path.as_deref(),
    ) {
        (true, Some(cert_path), Some(key_path)) => {
            info!("Loading TLS certificate from: {}", cert_path);
            info!("Loading TLS private key from: {}", key_path);

            let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .map_err(|e| {
                    error!("Failed to load TLS configuration: {}", e);
                    e
                })?;

            info!(
                "pipeline-monitor-exporter listening on https://{}:{}{}",
                bind_ip_str, port, metrics_path
            );

            let server = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service());
            tokio::select! {
                result = server => result.map_err(Into::into),
                _ = shutdown_signal() => {
                    info!("Shutdown signal received, exiting...");
                    Ok(())
                }
            }
        }
        (true, _, _) => Err("TLS enabled but certificate or key path missing".into()),
        (false, _, _) => {
            let listener = TcpListener::bind(addr).await?;
            info!(
                "pipeline-monitor-exporter listening on http://{}:{}{}",
                bind_ip_str, port, metrics_path
            );

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(Into::into)
        }
    };

    // Stop starting new cycles; an in-flight cycle finishes on the blocking pool
    if shutdown_tx.send(true).is_err() {
        warn!("Fetch scheduler already stopped");
    }
    if let Err(e) = scheduler.await {
        error!("Fetch scheduler task failed: {}", e);
    }

    if let Err(e) = &server_result {
        error!("Server error: {}", e);
    }
    server_result?;

    info!("pipeline-monitor-exporter stopped gracefully");
    Ok(())
}

