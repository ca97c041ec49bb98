//! Live session coordinator - Main entry point
//!
//! Hosts the REST/SSE API, the session scheduler, and the attendance
//! monitoring workers for live classroom sessions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aula_common::config::{resolve_root_folder, LiveConfig};
use aula_common::db::init::{init_database_pool, init_schema, init_settings_defaults};

use aula_live::session::SessionPhase;
use aula_live::{build_router, AppState};

/// Command-line arguments for aula-live
#[derive(Parser, Debug)]
#[command(name = "aula-live")]
#[command(about = "Live classroom session coordinator")]
#[command(version)]
struct Args {
    /// Root folder for the database and configuration
    #[arg(short, long, env = "AULA_ROOT_FOLDER")]
    root_folder: Option<String>,

    /// Path to a configuration file (defaults to <root>/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured bind address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aula_live=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), "AULA_ROOT_FOLDER");
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let db_path = root_folder.join("aula.db");
    let pool = init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;
    init_schema(&pool).await.context("Failed to initialize schema")?;
    init_settings_defaults(&pool)
        .await
        .context("Failed to seed settings defaults")?;

    let config_path = args
        .config
        .or_else(|| {
            let default = root_folder.join("config.toml");
            default.exists().then_some(default)
        });
    let mut config = LiveConfig::load(config_path.as_deref()).context("Failed to load config")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    config.validate().context("Invalid configuration")?;

    let state = AppState::new(pool.clone(), config.clone());

    // Rebuild the in-memory registry from persisted sessions
    let rows = aula_live::db::sessions::load_sessions(&pool)
        .await
        .context("Failed to load sessions")?;
    let mut restored = 0;
    for row in rows {
        match SessionPhase::from_labels(&row.phase, row.subphase.as_deref()) {
            Some(phase) => {
                state
                    .registry
                    .insert(
                        row.session_id,
                        row.title,
                        row.scheduled_at,
                        row.duration_minutes,
                        phase,
                    )
                    .await;
                restored += 1;
            }
            None => {
                warn!(
                    session_id = %row.session_id,
                    phase = %row.phase,
                    "skipping session with unrecognized phase"
                );
            }
        }
    }
    info!("Restored {} sessions from database", restored);

    let indexed = state
        .engine
        .reload()
        .await
        .context("Failed to build identity index")?;
    info!("Identity index loaded with {} entries", indexed);

    let scheduler_shutdown = CancellationToken::new();
    let scheduler_handle =
        aula_live::scheduler::Scheduler::new(state.clone(), scheduler_shutdown.clone()).spawn();

    let app = build_router(state);

    let addr: std::net::SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_addr))?;
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    scheduler_shutdown.cancel();
    if let Err(e) = scheduler_handle.await {
        warn!("Scheduler task did not shut down cleanly: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
