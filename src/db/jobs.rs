use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::time::Duration;
use tracing::debug;
use crate::errors::ScanError;
use super::connection::{db_now, parse_db_time, parse_opt_db_time, to_db_time};
use super::Database;

/// A claimed unit of work: run the scan `scan_id` while holding `claim_token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    pub scan_id: String,
    pub claim_token: String,
    /// 1-based attempt number of this claim.
    pub attempt: u32,
}

/// Queue-side view of a job row.
#[derive(Debug, Clone, PartialEq)]
pub struct JobState {
    pub attempts: u32,
    pub available_at: DateTime<Utc>,
    pub claimed: bool,
    pub last_error: Option<String>,
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

fn visibility_deadline(now: DateTime<Utc>, visibility: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(visibility).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

impl Database {
    /// Claim the oldest available job for `visibility`. A claim that is not
    /// extended or settled before it expires becomes claimable again.
    pub fn claim_next_job(&self, visibility: Duration) -> Result<Option<ScanJob>, ScanError> {
        let now = db_now();
        let now_text = to_db_time(&now);
        let mut conn = self.lock()?;
        let tx = conn.transaction()
            .map_err(|e| ScanError::Persistence(format!("Failed to begin transaction: {}", e)))?;

        let candidate: Option<(String, u32)> = tx.query_row(
            "SELECT scan_id, attempts FROM scan_jobs
             WHERE dead_lettered_at IS NULL
               AND available_at <= ?1
               AND (claimed_until IS NULL OR claimed_until < ?1)
             ORDER BY available_at, rowid
             LIMIT 1",
            params![now_text],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ).optional().map_err(|e| ScanError::Persistence(format!("Query error: {}", e)))?;

        let Some((scan_id, attempts)) = candidate else {
            return Ok(None);
        };

        let claim_token = uuid::Uuid::new_v4().to_string();
        let claimed_until = to_db_time(&visibility_deadline(now, visibility));
        tx.execute(
            "UPDATE scan_jobs SET claim_token = ?2, claimed_until = ?3, attempts = attempts + 1 WHERE scan_id = ?1",
            params![scan_id, claim_token, claimed_until],
        ).map_err(|e| ScanError::Persistence(format!("Failed to claim job: {}", e)))?;
        tx.commit().map_err(|e| ScanError::Persistence(format!("Failed to commit claim: {}", e)))?;

        debug!(scan_id = %scan_id, attempt = attempts + 1, "Claimed scan job");
        Ok(Some(ScanJob { scan_id, claim_token, attempt: attempts + 1 }))
    }

    /// Push the claim deadline forward. Returns false if the claim was lost.
    pub fn extend_claim(&self, scan_id: &str, claim_token: &str, visibility: Duration) -> Result<bool, ScanError> {
        let conn = self.lock()?;
        let claimed_until = to_db_time(&visibility_deadline(db_now(), visibility));
        let affected = conn.execute(
            "UPDATE scan_jobs SET claimed_until = ?3 WHERE scan_id = ?1 AND claim_token = ?2 AND dead_lettered_at IS NULL",
            params![scan_id, claim_token, claimed_until],
        ).map_err(|e| ScanError::Persistence(format!("Failed to extend claim: {}", e)))?;
        Ok(affected > 0)
    }

    /// Give a claimed job back to the queue, available again at `retry_at`.
    pub fn release_job(
        &self,
        scan_id: &str,
        claim_token: &str,
        retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, ScanError> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE scan_jobs SET claim_token = NULL, claimed_until = NULL, available_at = ?3, last_error = ?4 WHERE scan_id = ?1 AND claim_token = ?2",
            params![scan_id, claim_token, to_db_time(&retry_at), error],
        ).map_err(|e| ScanError::Persistence(format!("Failed to release job: {}", e)))?;
        Ok(affected > 0)
    }

    pub fn dead_letter_count(&self) -> Result<u32, ScanError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM scan_jobs WHERE dead_lettered_at IS NOT NULL",
            [],
            |row| row.get(0),
        ).map_err(|e| ScanError::Persistence(format!("Query error: {}", e)))
    }

    pub fn get_job(&self, scan_id: &str) -> Result<Option<JobState>, ScanError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT attempts, available_at, claim_token, last_error, dead_lettered_at FROM scan_jobs WHERE scan_id = ?1",
            params![scan_id],
            |row| {
                Ok(JobState {
                    attempts: row.get(0)?,
                    available_at: parse_db_time(1, &row.get::<_, String>(1)?)?,
                    claimed: row.get::<_, Option<String>>(2)?.is_some(),
                    last_error: row.get(3)?,
                    dead_lettered_at: parse_opt_db_time(4, row.get(4)?)?,
                })
            },
        ).optional().map_err(|e| ScanError::Persistence(format!("Query error: {}", e)))
    }
}
