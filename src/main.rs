use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use mirror_sync::api;
use mirror_sync::storage::{SqlitePreferences, StateStore};
use mirror_sync::sync::runner::{self, interval_ticks};
use mirror_sync::sync::{MetaFileResolver, SyncEngine, SyncScheduler};
use mirror_sync::utils::{config::Config, logging};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    logging::init_tracing(config.log_json)?;

    info!("Starting mirror-sync v{}", env!("CARGO_PKG_VERSION"));
    info!("Project root: {}", config.project_root.display());

    let prefs = SqlitePreferences::new(&config.database_url).await?;
    prefs.run_migrations().await?;

    let resolver = Arc::new(MetaFileResolver::new(&config.project_root));
    let indexed = resolver.rebuild();
    info!("Indexed {} tracked ids", indexed);

    let store = StateStore::new(Arc::new(prefs), config.state_key.clone());
    let mut engine = SyncEngine::new(store, resolver, &config.project_root);
    let state = engine.snapshot().await?;
    if state.destination_path.is_empty() {
        warn!("No destination configured yet; POST /api/destination to set one");
    }
    let engine = Arc::new(Mutex::new(engine));

    // Tick loop
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let ticker = tokio::spawn(runner::drive(
        engine.clone(),
        SyncScheduler::new(config.scheduler_check_interval()),
        interval_ticks(config.tick_interval()),
        async {
            let _ = stop_rx.await;
        },
    ));

    let app = api::app(engine);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    info!("Control API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop_tx.send(());
    let ticks = ticker.await?;
    info!("Server stopped gracefully after {} ticks", ticks);
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
