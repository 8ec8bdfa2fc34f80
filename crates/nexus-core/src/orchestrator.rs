//! Carbon Nexus orchestrator: hotspot engine behind an HTTP API.
//!
//! Endpoints:
//! - POST /trigger-analysis - scan unprocessed events for hotspots
//! - POST /ingest, /ingest/batch - hand events to the store
//! - GET  /metrics, /health, /stats

use clap::Parser;
use nexus_core::{
    NexusConfig,
    api::{self, AppState},
    config::LoggingConfig,
    detector::HotspotDetector,
    forwarder::NotificationForwarder,
    journal::NotificationJournal,
    metrics,
    notify::NotificationHub,
    oracle::HttpOracle,
    recommend::HttpRecommendationClient,
    scanner::{self, BatchScanner},
    store::MemoryStore,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Emissions hotspot detection service")]
struct Cli {
    /// JSON config file
    #[arg(short, long, env = "NEXUS_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Seconds between scheduled scans (0 disables)
    #[arg(long)]
    scan_interval: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match NexusConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("orchestrator: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(secs) = cli.scan_interval {
        config.scan.interval_secs = secs;
    }
    config.logging.json |= cli.log_json;

    init_tracing(&config.logging);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Orchestrator failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: NexusConfig) -> Result<(), BoxError> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Initializing Carbon Nexus orchestrator"
    );
    metrics::init();

    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(NotificationHub::new(config.notifications.channel_capacity));
    let oracle = Arc::new(HttpOracle::new(&config.ml_engine)?);
    let generator = HttpRecommendationClient::new(&config.recommendation_service)?;
    let generator = Arc::new(generator);
    info!(
        ml_engine = %config.ml_engine.url,
        recommendations = %config.recommendation_service.url,
        thresholds = ?config.detection.thresholds,
        "Collaborators configured"
    );

    let forwarder = config
        .notifications
        .relay
        .clone()
        .map(|relay| NotificationForwarder::spawn(hub.subscribe_all(), relay))
        .transpose()?;
    let journal = config
        .notifications
        .journal_dir
        .clone()
        .map(|dir| NotificationJournal::spawn(hub.subscribe_all(), dir))
        .transpose()?;

    let detector = Arc::new(HotspotDetector::new(
        &config.detection,
        store.clone(),
        oracle,
        generator,
        hub.clone(),
    ));
    let scanner = Arc::new(BatchScanner::new(
        store.clone(),
        detector,
        config.scan.progress_every,
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler = (config.scan.interval_secs > 0).then(|| {
        scanner::spawn_scheduler(
            scanner.clone(),
            Duration::from_secs(config.scan.interval_secs),
            config.scan.scheduled_limit,
            stop_rx,
        )
    });

    let state = AppState {
        scanner,
        store,
        hub,
        trigger_limit: config.scan.trigger_limit,
    };
    let app = api::router(state);

    let addr = config.server.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Orchestrator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down...");
        })
        .await?;

    let _ = stop_tx.send(true);
    if let Some(handle) = scheduler {
        handle.await?;
    }
    if let Some(forwarder) = forwarder {
        let stats = forwarder.shutdown().await;
        info!(
            sent = stats.sent.load(std::sync::atomic::Ordering::Relaxed),
            failed = stats.failed.load(std::sync::atomic::Ordering::Relaxed),
            "Notification relay drained"
        );
    }
    // The router owned the last hub handles; the journal sees the close and exits.
    if let Some(handle) = journal {
        if handle.join().is_err() {
            error!("Notification journal panicked");
        }
    }

    info!("Goodbye.");
    Ok(())
}
