use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::errors::ScanError;

/// Severity level for a security finding, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// Returns a numeric rank where lower values indicate higher severity.
    /// Critical = 0, High = 1, Medium = 2, Low = 3, Info = 4.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
            Severity::Info => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str() == s)
            .ok_or_else(|| ScanError::InvalidInput(format!(
                "severity must be one of: critical, high, medium, low, info (got '{}')",
                s
            )))
    }
}

/// A finding as produced by a scan engine, before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFinding {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub cve_id: Option<String>,
    /// File, endpoint or package the issue was found in.
    pub affected_component: Option<String>,
    pub remediation_steps: Option<String>,
    #[serde(default)]
    pub reference_urls: Vec<String>,
}

/// A persisted finding. Findings are immutable once written and are removed
/// together with their scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub scan_id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub cve_id: Option<String>,
    pub affected_component: Option<String>,
    pub remediation_steps: Option<String>,
    pub reference_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}
