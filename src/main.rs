use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use deanhomes::auth::session;
use deanhomes::config::{Cli, Config};
use deanhomes::db;
use deanhomes::routes;
use deanhomes::state::AppState;
use deanhomes::storage::{Reconciler, SqliteStorage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Initialize database
    let db_path = config
        .db_path()
        .cloned()
        .unwrap_or_else(|| data_dir.join("deanhomes.db"));
    let pool = db::create_pool(&db_path)?;
    db::run_migrations(&pool)?;

    let purged = session::purge_expired(&pool)?;
    if purged > 0 {
        tracing::info!("Purged {} expired sessions", purged);
    }

    // Build app state and keep it in step with storage
    let storage = Arc::new(SqliteStorage::new(pool.clone()));
    let state = AppState::new(pool, config.clone(), storage).context("Failed to open stores")?;
    let reconciler = Reconciler::spawn(
        state.reconcile_targets(),
        config.sync.poll_interval(),
        &state.bus,
    );

    let app = routes::app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reconciler.shutdown().await;
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
