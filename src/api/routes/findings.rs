use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde_json::{json, Value};
use crate::api::auth::require_owner;
use crate::api::AppState;
use crate::errors::ScanError;
use crate::models::Identity;

pub async fn get_findings(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ScanError> {
    let owner_id = require_owner(&identity)?;
    // First check the scan exists and belongs to the caller
    state.db.get_owned_scan(owner_id, &id)?;

    let findings = state.db.get_findings(&id)?;
    let total = findings.len();
    Ok(Json(json!({"findings": findings, "total": total})))
}
