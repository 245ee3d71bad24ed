//! breathe-ai - Breath-sound ingestion service
//!
//! Accepts audio uploads, stores them, runs the external classifier,
//! validates its verdict and records it in the prediction history.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use breathe_ai::config::{default_config_toml, load_config, ConfigOverrides};
use breathe_ai::services::{AudioStore, ClassifierInvoker, IngestOrchestrator, PredictionRecorder};
use breathe_ai::{build_router, db, AppState};
use breathe_common::config::RootFolderInitializer;

/// Command-line arguments for breathe-ai
#[derive(Parser, Debug)]
#[command(name = "breathe-ai")]
#[command(about = "Breath-sound audio ingestion and classification service")]
#[command(version)]
struct Args {
    /// TOML config file (default: platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root folder holding breathemate.db and uploads/
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "BREATHE_PORT")]
    port: Option<u16>,

    /// Classifier program and leading arguments (whitespace separated)
    #[arg(long, env = "BREATHE_CLASSIFIER_COMMAND")]
    classifier_command: Option<String>,

    /// Classifier wall-clock limit in seconds
    #[arg(long)]
    classifier_timeout_secs: Option<u64>,

    /// Log level directive (e.g. info, debug, breathe_ai=trace)
    #[arg(long, env = "BREATHE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print the compiled default configuration as TOML and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        print!("{}", default_config_toml()?);
        return Ok(());
    }

    let overrides = ConfigOverrides {
        port: args.port,
        classifier_command: args.classifier_command.clone(),
        classifier_timeout_secs: args.classifier_timeout_secs,
        log_level: args.log_level.clone(),
    };

    // Read before tracing init: the log level may come from the TOML file
    let toml_result = load_config(args.config.as_deref());
    let default_level = overrides
        .log_level
        .clone()
        .or_else(|| toml_result.as_ref().ok().map(|c| c.logging.level.clone()))
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_level)),
        )
        .init();

    info!(
        "Starting BreatheMate ingestion service (breathe-ai) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = toml_result
        .context("Failed to load configuration")?
        .apply_overrides(&overrides);
    config.validate().context("Invalid configuration")?;

    let root_folder = config.resolve_root_folder(args.root_folder.as_deref());
    let initializer = RootFolderInitializer::new(root_folder);
    initializer.ensure_directory_exists()?;
    info!("Root folder: {}", initializer.root_folder().display());

    let db_path = initializer.database_path();
    let pool = match db::init_database_pool(&db_path).await {
        Ok(pool) => {
            info!("Connected to database: {}", db_path.display());
            pool
        }
        Err(e) => {
            error!("Failed to open database {}: {}", db_path.display(), e);
            return Err(e.into());
        }
    };

    let store = AudioStore::new(&initializer.uploads_path(), config.storage.clone())
        .context("Failed to open audio store")?;
    let invoker = ClassifierInvoker::new(&config.classifier);
    info!(
        command = ?config.classifier.command,
        timeout_secs = config.classifier.timeout_secs,
        max_concurrent = config.classifier.max_concurrent,
        "Classifier configured"
    );
    let recorder = PredictionRecorder::new(pool.clone());
    let orchestrator = IngestOrchestrator::new(store, invoker, recorder);

    let shutdown = CancellationToken::new();
    let state = AppState::new(
        pool.clone(),
        orchestrator,
        shutdown.clone(),
        config.storage.max_upload_bytes,
    );
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("breathe-ai listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    pool.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then cancel in-flight classifier runs
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    shutdown.cancel();
}
