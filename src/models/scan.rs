use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::errors::ScanError;
use super::finding::Severity;

/// Breadth of a scan as requested by the customer. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    Full,
    Quick,
    Custom,
}

impl ScanKind {
    pub const ALL: [ScanKind; 3] = [ScanKind::Full, ScanKind::Quick, ScanKind::Custom];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Quick => "quick",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ScanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScanKind {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ScanError::InvalidInput(
                "scan_kind must be one of: full, quick, custom".into()
            ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub const ALL: [ScanStatus; 4] = [
        ScanStatus::Pending,
        ScanStatus::Running,
        ScanStatus::Completed,
        ScanStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Statuses a record may be in for a transition into `self` to be accepted.
    ///
    /// `running -> running` is a re-claim after the previous executor lost its
    /// claim. Terminal states never appear here, so the first terminal
    /// transition wins.
    pub fn predecessors(&self) -> &'static [ScanStatus] {
        match self {
            Self::Pending => &[],
            Self::Running => &[Self::Pending, Self::Running],
            Self::Completed | Self::Failed => &[Self::Pending, Self::Running],
        }
    }

    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScanStatus {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ScanError::InvalidInput(
                "status must be one of: pending, running, completed, failed".into()
            ))
    }
}

/// Per-severity finding counts of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub info: u32,
}

impl SeverityCounts {
    pub fn from_severities<I>(severities: I) -> Self
    where
        I: IntoIterator<Item = Severity>,
    {
        let mut counts = Self::default();
        for severity in severities {
            counts.record(severity);
        }
        counts
    }

    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }

    pub fn total(&self) -> u32 {
        self.critical + self.high + self.medium + self.low + self.info
    }

    pub fn add(&mut self, other: &SeverityCounts) {
        self.critical += other.critical;
        self.high += other.high;
        self.medium += other.medium;
        self.low += other.low;
        self.info += other.info;
    }
}

/// One scan as stored in the `scans` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub target: String,
    pub scan_kind: ScanKind,
    pub status: ScanStatus,
    pub severity_counts: SeverityCounts,
    /// Always `severity_counts.total()`.
    pub total_count: u32,
    /// Executor-reported progress, 0-100.
    pub progress: u8,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented by every mutation of the row.
    pub version: i64,
}

/// A validated scan request, ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewScan {
    pub owner_id: String,
    pub name: String,
    pub target: String,
    pub scan_kind: ScanKind,
}

/// Service-to-service status update (`PATCH /api/scans/{id}/status`).
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    pub status: ScanStatus,
    pub progress: Option<u8>,
    pub severity_counts: Option<SeverityCounts>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_kind_parse() {
        assert_eq!("full".parse::<ScanKind>().unwrap(), ScanKind::Full);
        assert_eq!("quick".parse::<ScanKind>().unwrap(), ScanKind::Quick);
        assert_eq!("custom".parse::<ScanKind>().unwrap(), ScanKind::Custom);
        assert!(matches!("deep".parse::<ScanKind>(), Err(ScanError::InvalidInput(_))));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ScanStatus::Pending.is_terminal());
        assert!(!ScanStatus::Running.is_terminal());
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
    }

    #[test]
    fn test_transitions_from_pending() {
        assert!(ScanStatus::Pending.can_transition_to(ScanStatus::Running));
        assert!(ScanStatus::Pending.can_transition_to(ScanStatus::Completed));
        assert!(ScanStatus::Pending.can_transition_to(ScanStatus::Failed));
        assert!(!ScanStatus::Pending.can_transition_to(ScanStatus::Pending));
    }

    #[test]
    fn test_no_transition_out_of_terminal_state() {
        for terminal in [ScanStatus::Completed, ScanStatus::Failed] {
            for next in ScanStatus::ALL {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
    }

    #[test]
    fn test_nothing_returns_to_pending() {
        for status in ScanStatus::ALL {
            assert!(!status.can_transition_to(ScanStatus::Pending));
        }
    }

    #[test]
    fn test_severity_counts_total() {
        let counts = SeverityCounts::from_severities([
            Severity::Critical,
            Severity::High,
            Severity::High,
            Severity::Info,
        ]);
        assert_eq!(counts.critical, 1);
        assert_eq!(counts.high, 2);
        assert_eq!(counts.medium, 0);
        assert_eq!(counts.info, 1);
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.get(Severity::High), 2);
    }

    #[test]
    fn test_status_update_deserialize() {
        let update: StatusUpdate = serde_json::from_value(serde_json::json!({
            "status": "completed",
            "severity_counts": {"critical": 1, "high": 0, "medium": 2, "low": 0, "info": 0}
        })).unwrap();
        assert_eq!(update.status, ScanStatus::Completed);
        assert_eq!(update.severity_counts.unwrap().total(), 3);
        assert!(update.progress.is_none());
    }
}
