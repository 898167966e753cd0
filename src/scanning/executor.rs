use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ExecutorConfig;
use crate::db::{Database, ScanJob};
use crate::errors::{with_retry, RetryConfig, ScanError};
use crate::models::ScanRecord;
use super::engine::ScanEngine;

/// What happened to a claimed job.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(ScanRecord),
    Failed(ScanRecord),
    /// The job was released and becomes claimable again after `delay`.
    Retrying { delay: Duration },
    /// Another writer settled the scan first, or the claim was lost.
    Abandoned,
}

/// Runs claimed scan jobs against a [`ScanEngine`] and records the result.
#[derive(Clone)]
pub struct ScanExecutor {
    db: Database,
    engine: Arc<dyn ScanEngine>,
    max_attempts: u32,
    heartbeat_interval: Duration,
    visibility_timeout: Duration,
    /// Used to turn elapsed time into a progress estimate.
    expected_duration: Duration,
}

impl ScanExecutor {
    pub fn new(db: Database, engine: Arc<dyn ScanEngine>, config: &ExecutorConfig) -> Self {
        Self {
            db,
            engine,
            max_attempts: config.max_attempts.max(1),
            heartbeat_interval: config.heartbeat_interval(),
            visibility_timeout: config.visibility_timeout(),
            expected_duration: config.simulated_delay(),
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    /// Execute one claimed job to a settled state. Errors are recorded on the
    /// scan and the job; they are never returned.
    pub async fn run(&self, job: ScanJob) -> ExecutionOutcome {
        let scan = match self.db.mark_running(&job.scan_id, &job.claim_token) {
            Ok(scan) => scan,
            Err(ScanError::Conflict(reason)) | Err(ScanError::NotFound(reason)) => {
                debug!(scan_id = %job.scan_id, reason = %reason, "Job no longer runnable");
                return ExecutionOutcome::Abandoned;
            }
            Err(e) => return self.handle_error(&job, e).await,
        };

        info!(
            scan_id = %scan.id,
            attempt = job.attempt,
            engine = self.engine.engine_name(),
            "Scan running"
        );
        let start = Instant::now();

        let claim_lost = CancellationToken::new();
        let heartbeat = self.spawn_heartbeat(&job, claim_lost.clone());

        let result = tokio::select! {
            result = self.engine.execute(&scan) => Some(result),
            _ = claim_lost.cancelled() => None,
        };
        heartbeat.stop.cancel();
        let _ = heartbeat.handle.await;

        let findings = match result {
            Some(Ok(findings)) => findings,
            Some(Err(e)) => return self.handle_error(&job, e).await,
            None => {
                warn!(scan_id = %job.scan_id, "Claim lost while scanning, abandoning");
                return ExecutionOutcome::Abandoned;
            }
        };

        match self.db.complete_scan(&job.scan_id, Some(&job.claim_token), &findings) {
            Ok(record) => {
                info!(
                    scan_id = %record.id,
                    findings = record.total_count,
                    critical = record.severity_counts.critical,
                    high = record.severity_counts.high,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Scan completed"
                );
                ExecutionOutcome::Completed(record)
            }
            Err(ScanError::Conflict(reason)) | Err(ScanError::NotFound(reason)) => {
                warn!(scan_id = %job.scan_id, reason = %reason, "Scan settled elsewhere, discarding findings");
                ExecutionOutcome::Abandoned
            }
            Err(e) => self.handle_error(&job, e).await,
        }
    }

    async fn handle_error(&self, job: &ScanJob, e: ScanError) -> ExecutionOutcome {
        let classification = e.classify();
        let reason = e.to_string();

        if classification.retryable && job.attempt < self.max_attempts {
            let delay = classification.retry_delay(job.attempt.saturating_sub(1));
            let retry_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(30));
            warn!(
                scan_id = %job.scan_id,
                attempt = job.attempt,
                max = self.max_attempts,
                error_type = classification.error_type,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Scan attempt failed, retrying"
            );
            return match self.db.release_job(&job.scan_id, &job.claim_token, retry_at, &reason) {
                Ok(true) => ExecutionOutcome::Retrying { delay },
                Ok(false) => ExecutionOutcome::Abandoned,
                Err(release_err) => {
                    // The visibility timeout hands the job out again anyway.
                    error!(scan_id = %job.scan_id, error = %release_err, "Failed to release job");
                    ExecutionOutcome::Retrying { delay: self.visibility_timeout }
                }
            };
        }

        warn!(
            scan_id = %job.scan_id,
            attempt = job.attempt,
            error_type = classification.error_type,
            error = %e,
            "Scan failed permanently"
        );
        let db = &self.db;
        let scan_id = job.scan_id.as_str();
        let token = job.claim_token.as_str();
        let reason = reason.as_str();
        let written = with_retry("fail_scan", &RetryConfig::default(), move || async move {
            db.fail_scan(scan_id, Some(token), reason)
        }).await;

        match written {
            Ok(record) => ExecutionOutcome::Failed(record),
            Err(ScanError::Conflict(_)) | Err(ScanError::NotFound(_)) => ExecutionOutcome::Abandoned,
            Err(write_err) => {
                // Left running; the stall reaper fails it once heartbeats stop.
                error!(scan_id = %job.scan_id, error = %write_err, "Failed to record scan failure");
                ExecutionOutcome::Abandoned
            }
        }
    }

    fn spawn_heartbeat(&self, job: &ScanJob, claim_lost: CancellationToken) -> Heartbeat {
        let stop = CancellationToken::new();
        let db = self.db.clone();
        let scan_id = job.scan_id.clone();
        let token = job.claim_token.clone();
        let interval = self.heartbeat_interval;
        let visibility = self.visibility_timeout;
        let expected = self.expected_duration;
        let stopped = stop.clone();

        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately; mark_running already beat.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let progress = estimate_progress(start.elapsed(), expected);
                match db.record_heartbeat(&scan_id, &token, progress) {
                    Ok(_) => {}
                    Err(ScanError::Conflict(_)) | Err(ScanError::NotFound(_)) => {
                        claim_lost.cancel();
                        break;
                    }
                    Err(e) => {
                        warn!(scan_id = %scan_id, error = %e, "Heartbeat failed");
                        continue;
                    }
                }
                match db.extend_claim(&scan_id, &token, visibility) {
                    Ok(true) => {}
                    Ok(false) => {
                        claim_lost.cancel();
                        break;
                    }
                    Err(e) => warn!(scan_id = %scan_id, error = %e, "Failed to extend claim"),
                }
            }
        });

        Heartbeat { stop, handle }
    }
}

impl std::fmt::Debug for ScanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanExecutor")
            .field("engine", &self.engine.engine_name())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

struct Heartbeat {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Progress never reaches 100 before the scan actually completes.
fn estimate_progress(elapsed: Duration, expected: Duration) -> u8 {
    if expected.is_zero() {
        return 95;
    }
    let pct = elapsed.as_secs_f64() / expected.as_secs_f64() * 100.0;
    pct.clamp(0.0, 95.0) as u8
}
