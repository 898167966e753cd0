use rusqlite::{params, Transaction};
use crate::errors::ScanError;
use crate::models::{Finding, NewFinding};
use super::connection::parse_db_time;
use super::scans::parse_column;
use super::Database;

/// Insert `findings` for `scan_id` inside the caller's transaction.
///
/// Failures surface as `PartialWrite`: the caller rolls back, so none of the
/// findings are kept.
pub(super) fn insert_findings(
    tx: &Transaction<'_>,
    scan_id: &str,
    findings: &[NewFinding],
    now: &str,
) -> Result<(), ScanError> {
    let mut stmt = tx.prepare(
        "INSERT INTO findings (id, scan_id, title, description, severity, cve_id, affected_component, remediation_steps, reference_urls, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
    ).map_err(|e| ScanError::PartialWrite(format!("Failed to prepare finding insert: {}", e)))?;

    for finding in findings {
        let id = uuid::Uuid::new_v4().to_string();
        let references = serde_json::to_string(&finding.reference_urls)?;
        stmt.execute(params![
            id,
            scan_id,
            finding.title,
            finding.description,
            finding.severity.as_str(),
            finding.cve_id,
            finding.affected_component,
            finding.remediation_steps,
            references,
            now,
        ]).map_err(|e| ScanError::PartialWrite(format!("Failed to insert finding '{}': {}", finding.title, e)))?;
    }
    Ok(())
}

impl Database {
    /// Findings of a scan, most severe first.
    pub fn get_findings(&self, scan_id: &str) -> Result<Vec<Finding>, ScanError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, scan_id, title, description, severity, cve_id, affected_component, remediation_steps, reference_urls, created_at FROM findings WHERE scan_id = ?1 ORDER BY CASE severity WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 WHEN 'low' THEN 3 WHEN 'info' THEN 4 ELSE 5 END, rowid"
        ).map_err(|e| ScanError::Persistence(format!("Query failed: {}", e)))?;

        let rows = stmt.query_map(params![scan_id], |row: &rusqlite::Row| {
            let references: String = row.get(8)?;
            let reference_urls: Vec<String> = serde_json::from_str(&references)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                    8,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                ))?;

            Ok(Finding {
                id: row.get(0)?,
                scan_id: row.get(1)?,
                title: row.get(2)?,
                description: row.get(3)?,
                severity: parse_column(4, &row.get::<_, String>(4)?)?,
                cve_id: row.get(5)?,
                affected_component: row.get(6)?,
                remediation_steps: row.get(7)?,
                reference_urls,
                created_at: parse_db_time(9, &row.get::<_, String>(9)?)?,
            })
        }).map_err(|e| ScanError::Persistence(format!("Query error: {}", e)))?;

        let mut findings = Vec::new();
        for row in rows {
            findings.push(row.map_err(|e| ScanError::Persistence(format!("Row error: {}", e)))?);
        }
        Ok(findings)
    }

    pub fn count_findings(&self, scan_id: &str) -> Result<u32, ScanError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM findings WHERE scan_id = ?1",
            params![scan_id],
            |row| row.get(0),
        ).map_err(|e| ScanError::Persistence(format!("Query error: {}", e)))
    }
}
