use axum::{extract::State, Extension, Json};
use crate::api::auth::require_owner;
use crate::api::AppState;
use crate::errors::ScanError;
use crate::models::{Identity, ScanStatistics};

pub async fn get_statistics(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ScanStatistics>, ScanError> {
    let owner_id = require_owner(&identity)?;
    Ok(Json(state.db.scan_statistics(owner_id)?))
}
