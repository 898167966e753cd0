use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::header,
    response::IntoResponse,
    Extension,
};
use tracing::info;
use crate::api::auth::require_owner;
use crate::api::models::ExportQuery;
use crate::api::AppState;
use crate::errors::ScanError;
use crate::models::Identity;
use crate::reporting::{export_scan, ExportFormat};

pub async fn export_scan_results(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    query: Result<Query<ExportQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ScanError> {
    let owner_id = require_owner(&identity)?;
    let Query(query) = query?;
    let format: ExportFormat = query.format.as_deref().unwrap_or("json").parse()?;

    let scan = state.db.get_owned_scan(owner_id, &id)?;
    let findings = state.db.get_findings(&id)?;
    let document = export_scan(&scan, &findings, format)?;

    info!(scan_id = %id, format = format.extension(), "Scan exported");
    Ok((
        [
            (header::CONTENT_TYPE, document.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", document.filename),
            ),
        ],
        document.body,
    ))
}
