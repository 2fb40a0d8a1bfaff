//! SMILE lakehouse ingest service (smile-ingest) - Main entry point
//!
//! Watches a landing directory for `*request.json` and `*sample.json` files
//! and maintains latest-wins request and sample tables in SQLite, with a
//! read-only HTTP view of them.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use smile_common::config::{load_or_default, resolve_config_path, CompiledDefaults};
use smile_common::EventBus;
use smile_ingest::config::{resolve_service_config, CliOverrides};
use smile_ingest::services::{DirectoryLandingStore, LandingStore};
use smile_ingest::workflow::Pipeline;
use smile_ingest::{build_router, db, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for smile-ingest
#[derive(Parser, Debug)]
#[command(name = "smile-ingest")]
#[command(about = "SMILE request/sample lakehouse ingest service")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "SMILE_CONFIG")]
    config: Option<PathBuf>,

    /// Landing directory to ingest from
    #[arg(short, long, env = "SMILE_LANDING_PATH")]
    landing_path: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "SMILE_DATABASE")]
    database: Option<PathBuf>,

    /// Landing directory polling interval
    #[arg(long, env = "SMILE_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// Port of the HTTP query surface
    #[arg(short, long, env = "SMILE_PORT")]
    port: Option<u16>,

    /// Run a single ingestion pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let toml_config =
        load_or_default(config_path.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over the config file level
    let default_filter = format!(
        "smile_ingest={level},smile_common={level},tower_http=info",
        level = toml_config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting smile-ingest v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        config_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "compiled defaults".to_string())
    );

    let cli = CliOverrides {
        landing_path: args.landing_path.clone(),
        database_path: args.database.clone(),
        poll_interval_ms: args.poll_interval_ms,
        http_port: args.port,
    };
    let service = resolve_service_config(
        &cli,
        &toml_config,
        &CompiledDefaults::for_current_platform(),
    )
    .context("Invalid configuration")?;

    let pool = db::init_database_pool(&service.database_path)
        .await
        .context("Failed to open database")?;
    info!("Database: {}", service.database_path.display());

    let event_bus = EventBus::default();
    let pipeline = Arc::new(
        Pipeline::with_storage(service.pipeline.clone(), event_bus, pool.clone())
            .await
            .context("Failed to recover pipeline state")?,
    );
    let store: Arc<dyn LandingStore> = Arc::new(
        DirectoryLandingStore::with_ledger(&service.pipeline.landing_path, pool)
            .await
            .context("Failed to load processed-file ledger")?,
    );

    if args.once {
        let summary = pipeline
            .run_pass(store.as_ref())
            .await
            .context("Ingestion pass failed")?;
        info!(
            "Single pass complete: {} files ({} requests, {} samples, {} unclassified, {} parse errors, {} skipped)",
            summary.files,
            summary.requests,
            summary.samples,
            summary.unclassified,
            summary.parse_errors,
            summary.skipped
        );
        return Ok(());
    }

    let state = AppState::new(Arc::clone(&pipeline));
    let cancel = CancellationToken::new();

    let ingest_task = {
        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.clone();
        let last_error = Arc::clone(&state.last_error);
        tokio::spawn(async move {
            let result = pipeline.run(store, cancel.clone()).await;
            if let Err(e) = &result {
                *last_error.write().await = Some(e.to_string());
                // Halting ingestion takes the whole service down
                cancel.cancel();
            }
            result
        })
    };

    let server_task = if service.http_enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], service.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind to address")?;
        info!("Starting HTTP server on {}", addr);

        let app = build_router(state);
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
        }))
    } else {
        info!("HTTP server disabled");
        None
    };

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    let ingest_result = ingest_task.await.context("Ingestion task panicked")?;
    if let Some(server) = server_task {
        server
            .await
            .context("HTTP server task panicked")?
            .context("Server error")?;
    }

    ingest_result.context("Ingestion halted")?;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
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
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing current pass and shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing current pass and shutting down");
        },
    }
}
