use serde::{Deserialize, Serialize};
use crate::errors::ScanError;
use crate::models::{ScanRecord, ScanStatus};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Serialize)]
pub struct CreateScanResponse {
    pub scan_id: String,
    pub status: ScanStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListQuery {
    /// Validated `(page, limit)`.
    pub fn resolve(&self) -> Result<(u32, u32), ScanError> {
        let page = self.page.unwrap_or(1);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if page == 0 {
            return Err(ScanError::InvalidInput("page must be at least 1".into()));
        }
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(ScanError::InvalidInput(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok((page, limit))
    }
}

#[derive(Serialize)]
pub struct ScanPage {
    pub scans: Vec<ScanRecord>,
    pub page: u32,
    pub limit: u32,
    pub total: u32,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub build: &'static str,
    pub git_hash: &'static str,
    pub dead_letter_jobs: u32,
}
