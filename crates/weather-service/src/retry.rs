//! Retrying storage calls while the database is busy.
//!
//! SQLite reports `SQLITE_BUSY` or `SQLITE_LOCKED` when another connection
//! (for example an external reporting tool) holds the write lock longer
//! than the busy timeout. Those failures are retried with doubling waits;
//! every other storage error is returned immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use weather_store::Result;

/// Backoff schedule for busy-database retries.
#[derive(Debug, Clone, Copy)]
pub struct BusyRetry {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Wait before the first retry. Each later wait doubles.
    pub first_wait: Duration,
    /// Upper bound for a single wait.
    pub max_wait: Duration,
    /// Stretch each wait by up to a quarter at random.
    pub jitter: bool,
}

impl Default for BusyRetry {
    fn default() -> Self {
        Self {
            retries: 3,
            first_wait: Duration::from_millis(100),
            max_wait: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl BusyRetry {
    /// Wait before retry number `retry` (zero-based).
    fn wait(&self, retry: u32) -> Duration {
        let wait = self
            .first_wait
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_wait);
        if self.jitter {
            wait.mul_f64(1.0 + rand::rng().random::<f64>() * 0.25)
        } else {
            wait
        }
    }
}

/// Run `op` until it succeeds, fails with a non-busy error, or runs out of retries.
pub async fn retry_busy<F, Fut, T>(policy: &BusyRetry, what: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => {
                if retry > 0 {
                    debug!("{} went through after {} retries", what, retry);
                }
                return Ok(value);
            }
            Err(e) if e.is_busy() && retry < policy.retries => {
                let wait = policy.wait(retry);
                warn!("{} hit a busy database ({}), retrying in {:?}", what, e, wait);
                sleep(wait).await;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
