pub mod routes;
pub mod models;
pub mod errors;
pub mod auth;

use std::sync::Arc;
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use crate::config::AppConfig;
use crate::db::Database;
use crate::errors::ScanError;
use crate::realtime::ChangeHub;
use crate::scanning::ScanRequestHandler;
use auth::TokenRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub hub: ChangeHub,
    pub requests: ScanRequestHandler,
    pub tokens: Arc<TokenRegistry>,
    /// Cancelled when the server shuts down; ends open event streams.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// State over an existing store. `db` must publish on `hub` for the
    /// event stream to see updates.
    pub fn new(db: Database, hub: ChangeHub, tokens: TokenRegistry, wakeup: Arc<Notify>) -> Self {
        Self {
            requests: ScanRequestHandler::new(db.clone(), wakeup),
            db,
            hub,
            tokens: Arc::new(tokens),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

pub fn create_app_state(config: &AppConfig, wakeup: Arc<Notify>) -> Result<AppState, ScanError> {
    let hub = ChangeHub::new();
    let db = Database::new(&config.database.path)?.with_change_hub(hub.clone());
    Ok(AppState::new(db, hub, TokenRegistry::from_config(&config.auth), wakeup))
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/scans", post(routes::scans::create_scan).get(routes::scans::list_scans))
        .route("/api/scans/statistics", get(routes::statistics::get_statistics))
        .route("/api/scans/events", get(routes::events::owner_events))
        .route("/api/scans/:id", get(routes::scans::get_scan).delete(routes::scans::delete_scan))
        .route("/api/scans/:id/status", patch(routes::scans::update_status))
        .route("/api/scans/:id/findings", get(routes::findings::get_findings))
        .route("/api/scans/:id/events", get(routes::events::scan_events))
        .route("/api/scans/:id/export", get(routes::export::export_scan_results))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::api_auth_middleware));

    Router::new()
        .route("/api/health", get(routes::health::health_check))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
