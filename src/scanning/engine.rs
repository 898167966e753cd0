use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::ScanError;
use crate::models::{NewFinding, ScanRecord, Severity};

/// Produces the findings for one scan.
#[async_trait]
pub trait ScanEngine: Send + Sync {
    async fn execute(&self, scan: &ScanRecord) -> Result<Vec<NewFinding>, ScanError>;

    /// Engine name for logging
    fn engine_name(&self) -> &str;
}

/// Stand-in engine: waits for `delay` and reports two fixed web findings.
#[derive(Debug, Clone)]
pub struct SimulatedEngine {
    delay: Duration,
}

impl SimulatedEngine {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl ScanEngine for SimulatedEngine {
    async fn execute(&self, scan: &ScanRecord) -> Result<Vec<NewFinding>, ScanError> {
        debug!(scan_id = %scan.id, delay_ms = self.delay.as_millis() as u64, "Simulating scan");
        tokio::time::sleep(self.delay).await;
        Ok(simulated_findings())
    }

    fn engine_name(&self) -> &str {
        "simulated"
    }
}

pub fn simulated_findings() -> Vec<NewFinding> {
    vec![
        NewFinding {
            title: "SQL Injection Vulnerability".to_string(),
            description: "Potential SQL injection detected in login form".to_string(),
            severity: Severity::Critical,
            cve_id: Some("CVE-2024-1234".to_string()),
            affected_component: Some("login.php".to_string()),
            remediation_steps: Some("Use parameterized queries instead of string concatenation".to_string()),
            reference_urls: vec!["https://owasp.org/www-community/attacks/SQL_Injection".to_string()],
        },
        NewFinding {
            title: "Cross-Site Scripting (XSS)".to_string(),
            description: "Reflected XSS vulnerability in search parameter".to_string(),
            severity: Severity::High,
            cve_id: None,
            affected_component: Some("search.php".to_string()),
            remediation_steps: Some("Implement proper input validation and output encoding".to_string()),
            reference_urls: vec!["https://owasp.org/www-community/attacks/xss/".to_string()],
        },
    ]
}
