use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::api;
use crate::cli::commands::ServeArgs;
use crate::config::{self, AppConfig};
use crate::errors::ScanError;
use crate::scanning::{spawn_stall_reaper, ScanEngine, ScanExecutor, SimulatedEngine, WorkerPool};

/// Overlay command-line flags on the loaded configuration.
pub fn apply_overrides(config: &mut AppConfig, args: &ServeArgs) -> Result<(), ScanError> {
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db) = &args.db {
        config.database.path = db.clone();
    }
    if let Some(workers) = args.workers {
        config.executor.workers = workers;
    }
    config::validate_conflicts(config)
}

/// Load the configuration named by `--config` (or defaults) with flags applied.
pub async fn load_serve_config(args: &ServeArgs) -> Result<AppConfig, ScanError> {
    let path = args.config.as_ref().map(PathBuf::from);
    let mut config = config::load_config(path.as_deref()).await?;
    apply_overrides(&mut config, args)?;
    Ok(config)
}

pub async fn handle_serve(config: AppConfig) -> Result<(), ScanError> {
    let wakeup = Arc::new(Notify::new());
    let cancel = CancellationToken::new();
    let state = api::create_app_state(&config, wakeup.clone())?.with_shutdown(cancel.clone());

    let engine: Arc<dyn ScanEngine> = Arc::new(SimulatedEngine::new(config.executor.simulated_delay()));
    let executor = ScanExecutor::new(state.db.clone(), engine, &config.executor);
    let workers = WorkerPool::spawn(
        executor,
        state.db.clone(),
        config.executor.workers,
        wakeup.clone(),
        config.executor.poll_interval(),
        cancel.child_token(),
    );
    let reaper = spawn_stall_reaper(
        state.db.clone(),
        config.executor.stall_timeout(),
        config.executor.reaper_interval(),
        cancel.child_token(),
    );

    let app = api::build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(db = %config.database.path, workers = workers.len(), "Listening on {}", addr);

    let shutdown = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await
        .map_err(|e| ScanError::Internal(format!("Server error: {}", e)));

    cancel.cancel();
    workers.shutdown().await;
    if let Err(e) = reaper.await {
        warn!(error = %e, "Stall reaper panicked");
    }
    info!("Server stopped");
    served
}
