use axum::{extract::State, Json};
use crate::api::models::HealthResponse;
use crate::api::AppState;
use crate::errors::ScanError;

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, ScanError> {
    let dead_letter_jobs = state.db.dead_letter_count()?;
    Ok(Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        build: env!("BUILD_TIMESTAMP"),
        git_hash: env!("GIT_HASH"),
        dead_letter_jobs,
    }))
}
