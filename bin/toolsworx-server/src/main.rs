//! toolsworx-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev,
//!    optionally mirrored to a daily-rolling file).
//! 3. Open the SQLite job store, run migrations and fail jobs a previous run
//!    left unfinished.
//! 4. Open the staging workspace and assemble converters and admission slots.
//! 5. Start the cleanup sweeper.
//! 6. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod entities;
mod error;
mod jobs;
mod middleware;
mod routes;
mod schemas;
mod state;
mod upstream;

use std::net::SocketAddr;
use std::sync::Arc;

use toolsworx_core::Workspace;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::Config;
use crate::entities::{JobStore, SqliteStore};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    // Flushes the file writer on drop; must live until shutdown.
    let _log_guard = init_tracing(&cfg);

    info!(version = env!("CARGO_PKG_VERSION"), "toolsworx-server starting");

    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = SqliteStore::connect(&cfg.database_url).await?;
    let interrupted = store.interrupt_unfinished_jobs().await?;
    if interrupted > 0 {
        warn!(interrupted, "jobs left unfinished by a previous run marked failed");
    }
    info!(database_url = %cfg.database_url, "database ready");

    // ── 4. Workspace, converters, admission ────────────────────────────────────
    let workspace = Workspace::open(&cfg.work_dir).await?;
    info!(work_dir = %cfg.work_dir.display(), "workspace ready");
    if cfg.mock_tools {
        warn!(delay_ms = cfg.mock_delay_ms, "mock tools enabled; uploads are copied, not converted");
    }

    let bind_address = cfg.bind_address.clone();
    let state = Arc::new(AppState::new(cfg, store, workspace)?);

    // ── 5. Cleanup sweeper ─────────────────────────────────────────────────────
    let sweeper = jobs::cleanup::spawn_sweeper(Arc::clone(&state));

    // ── 6. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("toolsworx-server stopped");
    Ok(())
}

/// Install the global subscriber. Returns the file writer's guard when
/// `TOOLSWORX_LOG_DIR` is set.
fn init_tracing(cfg: &Config) -> Option<WorkerGuard> {
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: TOOLSWORX_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                EnvFilter::new("info")
            }
        },
    };

    let console = if cfg.log_json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    };

    let (file, guard) = match &cfg.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "toolsworx-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();
    guard
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = on_signal("SIGINT", tokio::signal::ctrl_c());

    #[cfg(unix)]
    let terminate = on_signal("SIGTERM", async {
        use tokio::signal::unix::{SignalKind, signal};
        signal(SignalKind::terminate())?.recv().await;
        Ok::<(), std::io::Error>(())
    });

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}

/// Wait for `signal`. A handler that fails to install never resolves, so it
/// cannot shut the server down by itself.
async fn on_signal<F>(name: &'static str, signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!(error = %e, signal = name, "failed to install signal handler");
        std::future::pending::<()>().await;
    }
}
