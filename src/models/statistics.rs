use serde::{Deserialize, Serialize};
use super::scan::{ScanRecord, ScanStatus, SeverityCounts};

/// Aggregate view over all scans of one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatistics {
    pub total_scans: u32,
    pub completed_scans: u32,
    /// Scans that have not reached a terminal state (pending or running).
    pub pending_scans: u32,
    pub failed_scans: u32,
    pub total_vulnerabilities: u32,
    pub critical_count: u32,
    pub high_count: u32,
    pub medium_count: u32,
    pub low_count: u32,
    pub info_count: u32,
}

impl ScanStatistics {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a ScanRecord>,
    {
        let mut stats = Self::default();
        let mut counts = SeverityCounts::default();
        for record in records {
            stats.total_scans += 1;
            match record.status {
                ScanStatus::Completed => stats.completed_scans += 1,
                ScanStatus::Pending | ScanStatus::Running => stats.pending_scans += 1,
                ScanStatus::Failed => stats.failed_scans += 1,
            }
            counts.add(&record.severity_counts);
        }
        stats.total_vulnerabilities = counts.total();
        stats.critical_count = counts.critical;
        stats.high_count = counts.high;
        stats.medium_count = counts.medium;
        stats.low_count = counts.low;
        stats.info_count = counts.info;
        stats
    }
}
