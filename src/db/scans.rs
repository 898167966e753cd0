use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;
use crate::errors::ScanError;
use crate::models::{
    NewFinding, NewScan, ScanRecord, ScanStatistics, ScanStatus, SeverityCounts, StatusUpdate,
};
use super::connection::{db_now, next_update_time, parse_db_time, parse_opt_db_time, to_db_time};
use super::findings::insert_findings;
use super::Database;

const SCAN_COLUMNS: &str = "id, owner_id, name, target, scan_kind, status, critical_count, high_count, medium_count, low_count, info_count, progress, error_message, started_at, completed_at, heartbeat_at, created_at, updated_at, version";

pub(super) fn parse_column<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = ScanError>,
{
    value.parse::<T>().map_err(|e| rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(e),
    ))
}

fn scan_from_row(row: &rusqlite::Row) -> rusqlite::Result<ScanRecord> {
    let severity_counts = SeverityCounts {
        critical: row.get(6)?,
        high: row.get(7)?,
        medium: row.get(8)?,
        low: row.get(9)?,
        info: row.get(10)?,
    };
    Ok(ScanRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        target: row.get(3)?,
        scan_kind: parse_column(4, &row.get::<_, String>(4)?)?,
        status: parse_column(5, &row.get::<_, String>(5)?)?,
        total_count: severity_counts.total(),
        severity_counts,
        progress: row.get(11)?,
        error: row.get(12)?,
        started_at: parse_db_time(13, &row.get::<_, String>(13)?)?,
        completed_at: parse_opt_db_time(14, row.get(14)?)?,
        heartbeat_at: parse_opt_db_time(15, row.get(15)?)?,
        created_at: parse_db_time(16, &row.get::<_, String>(16)?)?,
        updated_at: parse_db_time(17, &row.get::<_, String>(17)?)?,
        version: row.get(18)?,
    })
}

fn fetch_scan(conn: &Connection, id: &str) -> Result<Option<ScanRecord>, ScanError> {
    conn.query_row(
        &format!("SELECT {} FROM scans WHERE id = ?1", SCAN_COLUMNS),
        params![id],
        scan_from_row,
    )
    .optional()
    .map_err(|e| ScanError::Persistence(format!("Query error: {}", e)))
}

/// The parts of a scan row a writer needs to decide whether it may proceed.
struct RowState {
    status: ScanStatus,
    claim_token: Option<String>,
    heartbeat_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

fn load_state(conn: &Connection, id: &str) -> Result<Option<RowState>, ScanError> {
    conn.query_row(
        "SELECT status, claim_token, heartbeat_at, updated_at FROM scans WHERE id = ?1",
        params![id],
        |row| {
            Ok(RowState {
                status: parse_column(0, &row.get::<_, String>(0)?)?,
                claim_token: row.get(1)?,
                heartbeat_at: parse_opt_db_time(2, row.get(2)?)?,
                updated_at: parse_db_time(3, &row.get::<_, String>(3)?)?,
            })
        },
    )
    .optional()
    .map_err(|e| ScanError::Persistence(format!("Query error: {}", e)))
}

/// Compare-and-set guard shared by every status writer.
fn check_transition(
    id: &str,
    state: &RowState,
    next: ScanStatus,
    claim_token: Option<&str>,
) -> Result<(), ScanError> {
    if !state.status.can_transition_to(next) {
        return Err(ScanError::Conflict(format!(
            "scan {} is {} and cannot move to {}",
            id, state.status, next
        )));
    }
    if let Some(token) = claim_token {
        if next != ScanStatus::Running && state.claim_token.as_deref() != Some(token) {
            return Err(ScanError::Conflict(format!(
                "scan {} is no longer claimed by this executor",
                id
            )));
        }
    }
    Ok(())
}

fn persistence(context: &'static str) -> impl Fn(rusqlite::Error) -> ScanError {
    move |e| ScanError::Persistence(format!("{}: {}", context, e))
}

impl Database {
    /// Insert a `pending` scan together with its job row, so the scan is
    /// picked up by a worker even if the process restarts.
    pub fn create_scan(&self, scan: &NewScan) -> Result<ScanRecord, ScanError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = to_db_time(&db_now());

        let record = {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(persistence("Failed to begin transaction"))?;
            tx.execute(
                "INSERT INTO scans (id, owner_id, name, target, scan_kind, status, started_at, created_at, updated_at, version) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6, ?6, 1)",
                params![id, scan.owner_id, scan.name, scan.target, scan.scan_kind.as_str(), now],
            ).map_err(persistence("Failed to create scan"))?;
            tx.execute(
                "INSERT INTO scan_jobs (scan_id, attempts, available_at, created_at) VALUES (?1, 0, ?2, ?2)",
                params![id, now],
            ).map_err(persistence("Failed to enqueue scan"))?;
            let record = fetch_scan(&tx, &id)?
                .ok_or_else(|| ScanError::Internal(format!("scan {} vanished after insert", id)))?;
            tx.commit().map_err(persistence("Failed to commit scan"))?;
            record
        };

        debug!(scan_id = %record.id, owner_id = %record.owner_id, "Scan created");
        self.publish(&record);
        Ok(record)
    }

    pub fn get_scan(&self, id: &str) -> Result<Option<ScanRecord>, ScanError> {
        let conn = self.lock()?;
        fetch_scan(&conn, id)
    }

    /// Fetch a scan visible to `owner_id`. Scans of other owners are reported
    /// as missing.
    pub fn get_owned_scan(&self, owner_id: &str, id: &str) -> Result<ScanRecord, ScanError> {
        match self.get_scan(id)? {
            Some(scan) if scan.owner_id == owner_id => Ok(scan),
            _ => Err(ScanError::NotFound("Scan".into())),
        }
    }

    pub fn list_scans(&self, owner_id: &str, limit: usize, offset: usize) -> Result<Vec<ScanRecord>, ScanError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scans WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
            SCAN_COLUMNS
        )).map_err(persistence("Query failed"))?;

        let rows = stmt.query_map(params![owner_id, limit as i64, offset as i64], scan_from_row)
            .map_err(persistence("Query error"))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(persistence("Row error"))?);
        }
        Ok(results)
    }

    pub fn count_scans(&self, owner_id: &str) -> Result<u32, ScanError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM scans WHERE owner_id = ?1",
            params![owner_id],
            |row| row.get(0),
        ).map_err(persistence("Query error"))
    }

    pub fn scan_statistics(&self, owner_id: &str) -> Result<ScanStatistics, ScanError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'completed'), 0),
                    COALESCE(SUM(status IN ('pending', 'running')), 0),
                    COALESCE(SUM(status = 'failed'), 0),
                    COALESCE(SUM(total_count), 0),
                    COALESCE(SUM(critical_count), 0),
                    COALESCE(SUM(high_count), 0),
                    COALESCE(SUM(medium_count), 0),
                    COALESCE(SUM(low_count), 0),
                    COALESCE(SUM(info_count), 0)
             FROM scans WHERE owner_id = ?1",
            params![owner_id],
            |row| {
                Ok(ScanStatistics {
                    total_scans: row.get(0)?,
                    completed_scans: row.get(1)?,
                    pending_scans: row.get(2)?,
                    failed_scans: row.get(3)?,
                    total_vulnerabilities: row.get(4)?,
                    critical_count: row.get(5)?,
                    high_count: row.get(6)?,
                    medium_count: row.get(7)?,
                    low_count: row.get(8)?,
                    info_count: row.get(9)?,
                })
            },
        ).map_err(persistence("Query error"))
    }

    /// Run one status transition inside a transaction and publish the result.
    fn transition<F>(
        &self,
        id: &str,
        next: ScanStatus,
        claim_token: Option<&str>,
        commit_error: fn(String) -> ScanError,
        apply: F,
    ) -> Result<ScanRecord, ScanError>
    where
        F: FnOnce(&Transaction<'_>, &RowState, &str) -> Result<(), ScanError>,
    {
        let record = {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(persistence("Failed to begin transaction"))?;
            let state = load_state(&tx, id)?.ok_or_else(|| ScanError::NotFound("Scan".into()))?;
            check_transition(id, &state, next, claim_token)?;

            let now = to_db_time(&next_update_time(state.updated_at));
            apply(&tx, &state, &now)?;

            let record = fetch_scan(&tx, id)?
                .ok_or_else(|| ScanError::Internal(format!("scan {} vanished mid-transaction", id)))?;
            tx.commit().map_err(|e| commit_error(format!("Failed to commit: {}", e)))?;
            record
        };

        debug!(scan_id = %id, status = %record.status, version = record.version, "Scan updated");
        self.publish(&record);
        Ok(record)
    }

    /// Move a scan into `running` under a fresh claim token.
    pub fn mark_running(&self, id: &str, claim_token: &str) -> Result<ScanRecord, ScanError> {
        self.transition(id, ScanStatus::Running, Some(claim_token), ScanError::Persistence, |tx, _, now| {
            tx.execute(
                "UPDATE scans SET status = 'running', claim_token = ?2, heartbeat_at = ?3, updated_at = ?3, version = version + 1 WHERE id = ?1",
                params![id, claim_token, now],
            ).map_err(persistence("Update failed"))?;
            Ok(())
        })
    }

    /// Record liveness of the executor holding `claim_token`.
    pub fn record_heartbeat(&self, id: &str, claim_token: &str, progress: u8) -> Result<ScanRecord, ScanError> {
        let record = {
            let conn = self.lock()?;
            let state = load_state(&conn, id)?.ok_or_else(|| ScanError::NotFound("Scan".into()))?;
            if state.status != ScanStatus::Running || state.claim_token.as_deref() != Some(claim_token) {
                return Err(ScanError::Conflict(format!(
                    "scan {} is {} and not held by this executor",
                    id, state.status
                )));
            }
            let now = to_db_time(&next_update_time(state.updated_at));
            conn.execute(
                "UPDATE scans SET heartbeat_at = ?2, progress = ?3, updated_at = ?2, version = version + 1 WHERE id = ?1",
                params![id, now, progress.min(100)],
            ).map_err(persistence("Update failed"))?;
            fetch_scan(&conn, id)?.ok_or_else(|| ScanError::NotFound("Scan".into()))?
        };
        self.publish(&record);
        Ok(record)
    }

    /// Atomically persist findings and mark the scan `completed`.
    ///
    /// Either every finding is inserted and the counts and status are
    /// updated, or nothing changes and `PartialWrite` is returned.
    pub fn complete_scan(
        &self,
        id: &str,
        claim_token: Option<&str>,
        findings: &[NewFinding],
    ) -> Result<ScanRecord, ScanError> {
        let counts = SeverityCounts::from_severities(findings.iter().map(|f| f.severity));
        self.transition(id, ScanStatus::Completed, claim_token, ScanError::PartialWrite, |tx, _, now| {
            insert_findings(tx, id, findings, now)?;
            write_completion(tx, id, &counts, now)
                .map_err(|e| ScanError::PartialWrite(format!("Failed to update scan: {}", e)))?;
            tx.execute("DELETE FROM scan_jobs WHERE scan_id = ?1", params![id])
                .map_err(|e| ScanError::PartialWrite(format!("Failed to settle job: {}", e)))?;
            Ok(())
        })
    }

    /// Mark a scan `failed` and dead-letter its job.
    pub fn fail_scan(&self, id: &str, claim_token: Option<&str>, reason: &str) -> Result<ScanRecord, ScanError> {
        self.transition(id, ScanStatus::Failed, claim_token, ScanError::Persistence, |tx, _, now| {
            write_failure(tx, id, reason, now)
        })
    }

    /// Apply a service-issued status update.
    pub fn apply_status_update(&self, id: &str, update: &StatusUpdate) -> Result<ScanRecord, ScanError> {
        if let Some(progress) = update.progress {
            if progress > 100 {
                return Err(ScanError::InvalidInput("progress must be between 0 and 100".into()));
            }
        }
        if update.severity_counts.is_some() && update.status != ScanStatus::Completed {
            return Err(ScanError::InvalidInput(
                "severity_counts may only be set together with status=completed".into()
            ));
        }

        let commit_error: fn(String) -> ScanError = if update.status == ScanStatus::Completed {
            ScanError::PartialWrite
        } else {
            ScanError::Persistence
        };
        self.transition(id, update.status, None, commit_error, |tx, _, now| {
            match update.status {
                ScanStatus::Pending => Err(ScanError::Conflict(format!("scan {} cannot return to pending", id))),
                ScanStatus::Running => {
                    tx.execute(
                        "UPDATE scans SET status = 'running', heartbeat_at = ?2, progress = COALESCE(?3, progress), updated_at = ?2, version = version + 1 WHERE id = ?1",
                        params![id, now, update.progress],
                    ).map_err(persistence("Update failed"))?;
                    Ok(())
                }
                ScanStatus::Completed => {
                    let counts = update.severity_counts.unwrap_or_default();
                    write_completion(tx, id, &counts, now)
                        .map_err(|e| ScanError::PartialWrite(format!("Failed to update scan: {}", e)))?;
                    tx.execute("DELETE FROM scan_jobs WHERE scan_id = ?1", params![id])
                        .map_err(|e| ScanError::PartialWrite(format!("Failed to settle job: {}", e)))?;
                    Ok(())
                }
                ScanStatus::Failed => {
                    let reason = update.error.as_deref().unwrap_or("reported failed by service");
                    write_failure(tx, id, reason, now)
                }
            }
        })
    }

    /// Running scans whose last heartbeat is older than `cutoff`.
    pub fn stalled_scan_ids(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, ScanError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM scans WHERE status = 'running' AND (heartbeat_at IS NULL OR heartbeat_at < ?1)"
        ).map_err(persistence("Query failed"))?;
        let rows = stmt.query_map(params![to_db_time(&cutoff)], |row| row.get::<_, String>(0))
            .map_err(persistence("Query error"))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(persistence("Row error"))?);
        }
        Ok(ids)
    }

    /// Fail `id` if it is still running without a heartbeat since `cutoff`.
    /// Returns `None` when the scan recovered or finished in the meantime.
    pub fn fail_if_stalled(&self, id: &str, cutoff: DateTime<Utc>) -> Result<Option<ScanRecord>, ScanError> {
        let result = self.transition(id, ScanStatus::Failed, None, ScanError::Persistence, |tx, state, now| {
            let stalled = state.status == ScanStatus::Running
                && state.heartbeat_at.map_or(true, |beat| beat < cutoff);
            if !stalled {
                return Err(ScanError::Conflict(format!("scan {} is not stalled", id)));
            }
            write_failure(tx, id, "heartbeat timeout", now)
        });
        match result {
            Ok(record) => Ok(Some(record)),
            Err(ScanError::Conflict(_)) | Err(ScanError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete a scan owned by `owner_id`; findings and the job row cascade.
    pub fn delete_scan(&self, owner_id: &str, id: &str) -> Result<bool, ScanError> {
        let affected = {
            let conn = self.lock()?;
            conn.execute(
                "DELETE FROM scans WHERE id = ?1 AND owner_id = ?2",
                params![id, owner_id],
            ).map_err(persistence("Delete failed"))?
        };
        if affected > 0 {
            self.forget(id);
        }
        Ok(affected > 0)
    }
}

fn write_completion(
    tx: &Transaction<'_>,
    id: &str,
    counts: &SeverityCounts,
    now: &str,
) -> rusqlite::Result<usize> {
    tx.execute(
        "UPDATE scans SET status = 'completed', critical_count = ?2, high_count = ?3, medium_count = ?4, low_count = ?5, info_count = ?6, total_count = ?7, progress = 100, completed_at = ?8, claim_token = NULL, updated_at = ?8, version = version + 1 WHERE id = ?1",
        params![id, counts.critical, counts.high, counts.medium, counts.low, counts.info, counts.total(), now],
    )
}

fn write_failure(tx: &Transaction<'_>, id: &str, reason: &str, now: &str) -> Result<(), ScanError> {
    tx.execute(
        "UPDATE scans SET status = 'failed', error_message = ?2, completed_at = ?3, claim_token = NULL, updated_at = ?3, version = version + 1 WHERE id = ?1",
        params![id, reason, now],
    ).map_err(persistence("Update failed"))?;
    tx.execute(
        "UPDATE scan_jobs SET dead_lettered_at = ?2, last_error = ?3, claim_token = NULL, claimed_until = NULL WHERE scan_id = ?1",
        params![id, now, reason],
    ).map_err(persistence("Failed to dead-letter job"))?;
    Ok(())
}
