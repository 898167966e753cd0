use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use super::executor::{ExecutionOutcome, ScanExecutor};

/// Fixed set of tasks that claim and execute scan jobs.
///
/// Workers sleep until `wakeup` is notified or `poll_interval` elapses, so a
/// job whose retry delay expires is picked up without a new request.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn spawn(
        executor: ScanExecutor,
        db: Database,
        workers: usize,
        wakeup: Arc<Notify>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let handles = (0..workers.max(1))
            .map(|worker| {
                let executor = executor.clone();
                let db = db.clone();
                let wakeup = wakeup.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    worker_loop(worker, executor, db, wakeup, poll_interval, cancel).await;
                })
            })
            .collect();

        info!(workers = workers.max(1), "Scan workers started");
        Self { handles, cancel }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop claiming new jobs and wait for in-flight ones to settle.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Scan worker panicked");
            }
        }
        info!("Scan workers stopped");
    }
}

async fn worker_loop(
    worker: usize,
    executor: ScanExecutor,
    db: Database,
    wakeup: Arc<Notify>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    debug!(worker, "Worker started");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        match db.claim_next_job(executor.visibility_timeout()) {
            Ok(Some(job)) => {
                let scan_id = job.scan_id.clone();
                match executor.run(job).await {
                    ExecutionOutcome::Completed(_) | ExecutionOutcome::Failed(_) => {}
                    ExecutionOutcome::Retrying { delay } => {
                        debug!(worker, scan_id = %scan_id, delay_ms = delay.as_millis() as u64, "Job scheduled for retry");
                    }
                    ExecutionOutcome::Abandoned => {
                        debug!(worker, scan_id = %scan_id, "Job abandoned");
                    }
                }
                // Look for more work straight away.
                continue;
            }
            Ok(None) => {}
            Err(e) => warn!(worker, error = %e, "Failed to claim job"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = wakeup.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    debug!(worker, "Worker stopped");
}

/// Periodically fails running scans whose heartbeat is older than
/// `stall_timeout`.
pub fn spawn_stall_reaper(
    db: Database,
    stall_timeout: Duration,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match reap_stalled(&db, stall_timeout) {
                Ok(0) => {}
                Ok(reaped) => info!(reaped, "Failed stalled scans"),
                Err(e) => warn!(error = %e, "Stall reaper pass failed"),
            }
        }
    })
}

/// One reaper pass. Returns how many scans were failed.
pub fn reap_stalled(db: &Database, stall_timeout: Duration) -> Result<usize, crate::errors::ScanError> {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(stall_timeout).unwrap_or_else(|_| chrono::Duration::minutes(2));
    let mut reaped = 0;
    for scan_id in db.stalled_scan_ids(cutoff)? {
        if let Some(record) = db.fail_if_stalled(&scan_id, cutoff)? {
            warn!(scan_id = %record.id, "Scan stalled, marked failed");
            reaped += 1;
        }
    }
    Ok(reaped)
}
