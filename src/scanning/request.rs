use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Notify;
use tracing::info;
use url::Url;

use crate::db::Database;
use crate::errors::ScanError;
use crate::models::{Identity, NewScan, ScanKind, ScanRecord};

pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_TARGET_CHARS: usize = 500;

/// Body of `POST /api/scans`.
///
/// Fields are optional so that a missing value is reported as a validation
/// error rather than a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateScanRequest {
    #[serde(alias = "scan_name")]
    pub name: Option<String>,
    #[serde(alias = "target_url")]
    pub target: Option<String>,
    #[serde(alias = "scan_type")]
    pub scan_kind: Option<String>,
}

impl CreateScanRequest {
    pub fn new(name: &str, target: &str, scan_kind: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            target: Some(target.to_string()),
            scan_kind: Some(scan_kind.to_string()),
        }
    }

    /// Validate the request for `owner_id` without touching the store.
    pub fn validate(&self, owner_id: &str) -> Result<NewScan, ScanError> {
        let name = self.name.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(ScanError::InvalidInput("name is required".into()));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(ScanError::InvalidInput(format!(
                "name must be at most {} characters",
                MAX_NAME_CHARS
            )));
        }

        let target = self.target.as_deref().map(str::trim).unwrap_or_default();
        if target.is_empty() {
            return Err(ScanError::InvalidInput("target is required".into()));
        }
        if target.chars().count() > MAX_TARGET_CHARS {
            return Err(ScanError::InvalidInput(format!(
                "target must be at most {} characters",
                MAX_TARGET_CHARS
            )));
        }
        Url::parse(target)
            .map_err(|e| ScanError::InvalidInput(format!("target must be a valid URL: {}", e)))?;

        let scan_kind: ScanKind = self.scan_kind
            .as_deref()
            .ok_or_else(|| ScanError::InvalidInput("scan_kind is required".into()))?
            .parse()?;

        Ok(NewScan {
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            target: target.to_string(),
            scan_kind,
        })
    }
}

/// Accepts scan requests: validates, persists the record with its job, and
/// wakes the worker pool.
#[derive(Clone)]
pub struct ScanRequestHandler {
    db: Database,
    wakeup: Arc<Notify>,
}

impl ScanRequestHandler {
    pub fn new(db: Database, wakeup: Arc<Notify>) -> Self {
        Self { db, wakeup }
    }

    pub fn create(&self, identity: Option<&Identity>, request: &CreateScanRequest) -> Result<ScanRecord, ScanError> {
        let owner_id = identity
            .and_then(Identity::owner_id)
            .ok_or_else(|| ScanError::Unauthorized("an account is required to request scans".into()))?;

        let new_scan = request.validate(owner_id)?;
        let record = self.db.create_scan(&new_scan)?;

        info!(
            scan_id = %record.id,
            owner_id = %record.owner_id,
            scan_kind = %record.scan_kind,
            "Scan requested"
        );
        self.wakeup.notify_one();
        Ok(record)
    }
}

impl std::fmt::Debug for ScanRequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanRequestHandler").finish_non_exhaustive()
    }
}
