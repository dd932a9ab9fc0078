//! Beacon Binary Entry Point
//!
//! Runs the battery reporter until interrupted.
//! Core functionality is provided by the `beacon` library crate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use beacon::{
    config::{AppConfig, parse_duration},
    delivery::{DeliveryClient, HttpTransport},
    reporter::{LifecycleEvent, Reporter, lifecycle_channel},
    window::ExecutionGuard,
};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Beacon - Periodic Device Telemetry Reporter
///
/// Send SIGUSR1 to signal that the device became active again; a stale
/// reporter catches up immediately.
#[derive(Parser, Debug)]
#[command(name = "beacon", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long, env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Collector endpoint (overrides config file)
    #[arg(long, env = "BEACON_ENDPOINT")]
    endpoint: Option<String>,

    /// Reporting interval, e.g. "2m" (overrides config file)
    #[arg(long, env = "BEACON_INTERVAL", value_parser = parse_duration)]
    interval: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,beacon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Beacon - Periodic Device Telemetry Reporter");

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            AppConfig::load(path)?
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            AppConfig::default()
        }
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(interval) = cli.interval {
        config.interval = interval;
    }
    config.validate()?;

    tracing::info!(
        "Endpoint: {}, interval: {}, retry: {} x {}",
        config.endpoint,
        humantime::format_duration(config.interval),
        config.retry.max_attempts,
        humantime::format_duration(config.retry.backoff),
    );

    // Build the pipeline
    let transport = Arc::new(HttpTransport::new(config.request_timeout)?);
    let client = DeliveryClient::new(transport, config.endpoint.clone()).with_policy(config.retry);
    let reporter = Reporter::new(
        config.reporter_config(),
        config.source.build(),
        client,
        ExecutionGuard::new(config.execution_window.build_host()),
    );

    let (events, rx) = lifecycle_channel();
    let listener = reporter.listen(rx);

    reporter.start().await;
    tracing::info!("Press Ctrl+C to shutdown");

    wait_for_shutdown(events).await;

    tracing::info!("Stopping reporter...");
    reporter.stop().await;
    listener.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Forward resume signals as lifecycle events until Ctrl+C or SIGTERM.
async fn wait_for_shutdown(events: mpsc::Sender<LifecycleEvent>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut term, mut resume) =
            match (signal(SignalKind::terminate()), signal(SignalKind::user_defined1())) {
                (Ok(term), Ok(resume)) => (term, resume),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!("Failed to install signal handlers: {}", e);
                    return std::future::pending::<()>().await;
                }
            };

        loop {
            tokio::select! {
                _ = term.recv() => break,
                _ = resume.recv() => {
                    tracing::info!("Received resume signal");
                    if events.send(LifecycleEvent::BecameActive).await.is_err() {
                        tracing::warn!("Lifecycle listener is gone");
                    }
                }
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = {
        let _events = events;
        std::future::pending::<()>()
    };

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
