//! Blog Cache - admin server for the blog cache engine
//!
//! Boots the engine against the configured store, starts the metrics and
//! cleanup tasks and serves the admin API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blog_cache::api::{create_router, AppState};
use blog_cache::config::{Config, StoreBackend};
use blog_cache::store::{KvStore, MemoryStore, RedisStore};

/// Main entry point for the blog cache admin server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Connect the backing store
/// 4. Wire the engine and start the metrics and cleanup tasks
/// 5. Serve the admin API until SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blog_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting blog cache server");

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        environment = ?config.environment,
        backend = ?config.store.backend,
        key_prefix = %config.cache.key_prefix,
        port = config.server_port,
        cleanup = config.cleanup.enabled,
        "Configuration loaded"
    );

    let mut tasks = Vec::new();
    let store: Arc<dyn KvStore> = match config.store.backend {
        StoreBackend::Redis => Arc::new(
            RedisStore::connect(&config.store)
                .await
                .context("failed to connect to Redis")?,
        ),
        StoreBackend::Memory => {
            let memory = Arc::new(MemoryStore::new(config.store.memory_max_bytes));
            tasks.push(memory.spawn_sweeper(config.cleanup.interval));
            memory
        }
    };
    info!(store = store.name(), "Backing store ready");

    let state = AppState::build(store, &config).context("failed to build cache engine")?;

    tasks.push(state.admin.metrics().spawn());
    if config.cleanup.enabled {
        tasks.push(state.admin.cleanup().spawn());
    } else {
        info!("Background cleanup disabled");
    }

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(tasks))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then aborts background tasks.
async fn shutdown_signal(tasks: Vec<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    for task in &tasks {
        task.abort();
    }
    warn!("Background tasks aborted");
}
