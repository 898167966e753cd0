use std::future::Future;
use std::time::Duration;

use super::classification::ErrorClassification;
use super::types::ScanError;
use tracing::{debug, warn};

impl ErrorClassification {
    /// Backoff before the next try, `attempt` counting from 0.
    ///
    /// Store errors clear quickly (SQLite lock contention), so they back off
    /// from 500ms and cap at 10s. Engine and timeout errors double from 1s
    /// with up to 1s of jitter, capped at 30s.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let doubling = 1u64 << attempt.min(16);
        match self.error_type {
            "PersistenceFailure" | "PartialWriteFailure" => {
                Duration::from_millis(500u64.saturating_mul(doubling)).min(STORE_DELAY_CAP)
            }
            _ => {
                let jitter = Duration::from_secs_f64(rand::random::<f64>());
                (Duration::from_secs(doubling) + jitter).min(ENGINE_DELAY_CAP)
            }
        }
    }
}

const STORE_DELAY_CAP: Duration = Duration::from_secs(10);
const ENGINE_DELAY_CAP: Duration = Duration::from_secs(30);

/// How often `with_retry` re-runs a store write before giving up.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// has been retried `config.max_retries` times.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, ScanError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScanError>>,
{
    let mut retries = 0;
    loop {
        let e = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let classification = e.classify();
        if !classification.retryable {
            debug!(operation = operation_name, error_type = classification.error_type, "Not retrying");
            return Err(e);
        }
        if retries >= config.max_retries {
            warn!(operation = operation_name, retries, error = %e, "Giving up after retries");
            return Err(e);
        }

        let delay = classification.retry_delay(retries);
        retries += 1;
        warn!(
            operation = operation_name,
            retry = retries,
            max = config.max_retries,
            error_type = classification.error_type,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Store write failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
