use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};
use tracing::info;
use crate::api::auth::{require_owner, require_service};
use crate::api::models::{CreateScanResponse, ListQuery, ScanPage};
use crate::api::AppState;
use crate::errors::ScanError;
use crate::models::{Identity, ScanRecord, StatusUpdate};
use crate::scanning::CreateScanRequest;

pub async fn create_scan(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<CreateScanRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateScanResponse>), ScanError> {
    let Json(req) = payload?;
    let scan = state.requests.create(Some(&identity), &req)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateScanResponse {
            scan_id: scan.id,
            status: scan.status,
        }),
    ))
}

pub async fn list_scans(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ScanPage>, ScanError> {
    let owner_id = require_owner(&identity)?;
    let Query(query) = query?;
    let (page, limit) = query.resolve()?;
    let offset = (page as usize - 1) * limit as usize;

    let scans = state.db.list_scans(owner_id, limit as usize, offset)?;
    let total = state.db.count_scans(owner_id)?;
    let has_more = (offset + scans.len()) < total as usize;

    Ok(Json(ScanPage { scans, page, limit, total, has_more }))
}

pub async fn get_scan(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<ScanRecord>, ScanError> {
    let owner_id = require_owner(&identity)?;
    Ok(Json(state.db.get_owned_scan(owner_id, &id)?))
}

pub async fn update_status(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<ScanRecord>, ScanError> {
    require_service(&identity)?;
    let Json(update) = payload?;
    let scan = state.db.apply_status_update(&id, &update)?;
    info!(scan_id = %id, status = %scan.status, "Status reported by service");
    Ok(Json(scan))
}

pub async fn delete_scan(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ScanError> {
    let owner_id = require_owner(&identity)?;
    if state.db.delete_scan(owner_id, &id)? {
        info!(scan_id = %id, "Scan deleted");
        Ok(Json(json!({"deleted": true})))
    } else {
        Err(ScanError::NotFound("Scan".into()))
    }
}
