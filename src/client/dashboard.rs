use serde::Serialize;

use crate::models::{ScanRecord, ScanStatistics};
use super::cache::ScanCache;

pub const DEFAULT_RECENT_SCANS: usize = 5;

/// What the dashboard shows for one account, computed from cached records
/// without querying the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub statistics: ScanStatistics,
    /// Newest first.
    pub recent_scans: Vec<ScanRecord>,
}

impl DashboardSummary {
    pub fn from_cache(cache: &ScanCache, owner_id: &str, recent: usize) -> Self {
        let mut records: Vec<ScanRecord> = cache
            .records()
            .into_iter()
            .filter(|r| r.owner_id == owner_id)
            .collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let statistics = ScanStatistics::from_records(&records);
        records.truncate(recent);
        Self { statistics, recent_scans: records }
    }
}
