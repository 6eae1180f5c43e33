//! Best-effort relay of stored readings to a remote aggregator.
//!
//! The ingestion path only calls [`SyncQueue::push`]; all network I/O
//! happens in the periodic [`Syncer`] pass:
//!
//! 1. Probe connectivity by opening a TCP connection to the primary probe
//!    target, then the fallback. If neither answers, the queue is left as is.
//! 2. Take the pending entries and POST them oldest-first.
//! 3. On the first failure, put the failed entry (with its attempt count
//!    bumped) and every untried entry back at the front of the queue, in
//!    their original order, and end the pass.
//!
//! The queue is bounded. When it overflows, the oldest entries are dropped
//! and counted in [`SyncQueue::dropped`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::state::AppState;

/// A stored reading waiting to be relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
    /// Row id of the stored reading.
    pub row_id: i64,
    /// Form-encoded report body.
    pub payload: String,
    /// Failed relay attempts so far.
    pub attempts: u32,
    /// When the entry was queued.
    pub enqueued_at: OffsetDateTime,
}

impl SyncEntry {
    /// A fresh entry with no attempts.
    pub fn new(row_id: i64, payload: String) -> Self {
        Self {
            row_id,
            payload,
            attempts: 0,
            enqueued_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Bounded FIFO of pending relays.
///
/// Safe to share between the ingestion path and the sync task.
pub struct SyncQueue {
    entries: Mutex<VecDeque<SyncEntry>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl SyncQueue {
    /// Create an empty queue holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append an entry, dropping the oldest ones if over capacity.
    ///
    /// Returns the number of entries dropped.
    pub async fn push(&self, entry: SyncEntry) -> usize {
        let mut entries = self.entries.lock().await;
        entries.push_back(entry);
        self.enforce_bound(&mut entries)
    }

    /// Number of pending entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// True when nothing is pending.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Maximum number of pending entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries discarded by overflow since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Enqueue time of the oldest pending entry.
    pub async fn oldest_enqueued_at(&self) -> Option<OffsetDateTime> {
        self.entries.lock().await.front().map(|e| e.enqueued_at)
    }

    /// Copy of the pending entries, oldest first.
    pub async fn snapshot(&self) -> Vec<SyncEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    async fn take_all(&self) -> VecDeque<SyncEntry> {
        std::mem::take(&mut *self.entries.lock().await)
    }

    /// Put entries back ahead of anything queued since they were taken.
    async fn restore_front(&self, mut retained: VecDeque<SyncEntry>) {
        let mut entries = self.entries.lock().await;
        retained.append(&mut entries);
        *entries = retained;
        self.enforce_bound(&mut entries);
    }

    fn enforce_bound(&self, entries: &mut VecDeque<SyncEntry>) -> usize {
        let excess = entries.len().saturating_sub(self.capacity);
        if excess > 0 {
            entries.drain(..excess);
            self.dropped.fetch_add(excess as u64, Ordering::Relaxed);
            warn!(
                "Sync queue full ({}), dropped {} oldest entries",
                self.capacity, excess
            );
        }
        excess
    }
}

/// Lightweight reachability check.
#[derive(Debug, Clone)]
pub struct ConnectivityProbe {
    targets: Vec<String>,
    timeout: Duration,
}

impl ConnectivityProbe {
    /// Probe `targets` (`host:port`) in order, each with `timeout`.
    pub fn new(targets: Vec<String>, timeout: Duration) -> Self {
        Self { targets, timeout }
    }

    /// Build from sync settings.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.probe_targets(),
            Duration::from_millis(config.connect_timeout_ms),
        )
    }

    /// True if any target accepts a TCP connection in time.
    pub async fn is_online(&self) -> bool {
        for target in &self.targets {
            match timeout(self.timeout, TcpStream::connect(target.as_str())).await {
                Ok(Ok(_)) => return true,
                Ok(Err(e)) => debug!("Probe {} failed: {}", target, e),
                Err(_) => debug!("Probe {} timed out after {:?}", target, self.timeout),
            }
        }
        false
    }
}

/// Relay failures.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The request could not be sent or timed out.
    #[error("Relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The aggregator answered with something other than 200.
    #[error("Aggregator returned {0}")]
    Status(StatusCode),
}

/// HTTP client for the remote aggregator.
#[derive(Debug, Clone)]
pub struct Relay {
    client: reqwest::Client,
    url: String,
}

impl Relay {
    /// Create a relay posting to `url` with a per-request timeout.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Build from sync settings.
    pub fn from_config(config: &SyncConfig) -> Result<Self, RelayError> {
        Self::new(
            config.url.clone(),
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    /// POST one form-encoded report. Only `200 OK` counts as delivered.
    pub async fn send(&self, payload: &str) -> Result<(), RelayError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(payload.to_owned())
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(RelayError::Status(status)),
        }
    }
}

/// Summary of one sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// When the pass finished.
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    /// Whether the probe found connectivity, or `None` when the queue was
    /// empty and no probe ran.
    pub online: Option<bool>,
    /// Entries delivered.
    pub sent: usize,
    /// The error that ended the pass early, if any.
    pub error: Option<String>,
    /// Entries still pending afterwards.
    pub remaining: usize,
}

/// Periodic sync task.
pub struct Syncer {
    state: Arc<AppState>,
    probe: ConnectivityProbe,
    relay: Relay,
}

impl Syncer {
    /// Create a syncer with explicit probe and relay.
    pub fn new(state: Arc<AppState>, probe: ConnectivityProbe, relay: Relay) -> Self {
        Self {
            state,
            probe,
            relay,
        }
    }

    /// Create a syncer from the state's sync settings.
    pub fn from_state(state: Arc<AppState>) -> Result<Self, RelayError> {
        let probe = ConnectivityProbe::from_config(&state.config.sync);
        let relay = Relay::from_config(&state.config.sync)?;
        Ok(Self::new(state, probe, relay))
    }

    /// Run one sync pass and record its report.
    pub async fn run_once(&self) -> SyncReport {
        let queue = &self.state.sync_queue;

        if queue.is_empty().await {
            return self.finish(None, 0, None).await;
        }

        if !self.probe.is_online().await {
            debug!("Offline, {} readings stay queued", queue.len().await);
            return self.finish(Some(false), 0, None).await;
        }

        let mut pending = queue.take_all().await;
        let mut sent = 0;
        let mut failure = None;

        while let Some(mut entry) = pending.pop_front() {
            match self.relay.send(&entry.payload).await {
                Ok(()) => {
                    sent += 1;
                    self.mark_uploaded(entry.row_id).await;
                }
                Err(e) => {
                    entry.attempts += 1;
                    warn!(
                        "Relay of reading {} failed (attempt {}): {}",
                        entry.row_id, entry.attempts, e
                    );
                    pending.push_front(entry);
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        if !pending.is_empty() {
            queue.restore_front(pending).await;
        }
        if sent > 0 {
            info!("Relayed {} readings", sent);
        }

        self.finish(Some(true), sent, failure).await
    }

    async fn mark_uploaded(&self, row_id: i64) {
        match self
            .state
            .db
            .run(move |store| store.mark_uploaded(row_id))
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("Reading {} was removed before upload was recorded", row_id),
            Err(e) => warn!("Failed to mark reading {} uploaded: {}", row_id, e),
        }
    }

    async fn finish(
        &self,
        online: Option<bool>,
        sent: usize,
        error: Option<String>,
    ) -> SyncReport {
        let report = SyncReport {
            finished_at: OffsetDateTime::now_utc(),
            online,
            sent,
            error,
            remaining: self.state.sync_queue.len().await,
        };
        *self.state.last_sync.write().await = Some(report.clone());
        report
    }

    /// Run passes forever on the configured interval.
    pub fn start(self) -> JoinHandle<()> {
        let period = Duration::from_secs(self.state.config.sync.interval_secs.max(1));
        info!("Starting sync task (every {:?})", period);

        tokio::spawn(async move {
            let mut timer = interval(period);
            let mut consecutive_failures = 0u32;

            loop {
                timer.tick().await;
                let report = self.run_once().await;

                if report.online != Some(false) && report.error.is_none() {
                    consecutive_failures = 0;
                    continue;
                }

                consecutive_failures += 1;
                if consecutive_failures <= 3 {
                    debug!(
                        "Sync pass incomplete, {} pending (attempt {})",
                        report.remaining, consecutive_failures
                    );
                } else if consecutive_failures == 4 {
                    error!(
                        "Sync has not completed after {} passes, will keep trying silently",
                        consecutive_failures
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64) -> SyncEntry {
        SyncEntry::new(id, format!("id={id}"))
    }

    async fn ids(queue: &SyncQueue) -> Vec<i64> {
        queue.snapshot().await.iter().map(|e| e.row_id).collect()
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let queue = SyncQueue::new(10);
        for id in 1..=3 {
            assert_eq!(queue.push(entry(id)).await, 0);
        }
        assert_eq!(ids(&queue).await, vec![1, 2, 3]);
        assert_eq!(queue.dropped(), 0);
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let queue = SyncQueue::new(3);
        for id in 1..=5 {
            queue.push(entry(id)).await;
        }
        assert_eq!(queue.len().await, 3);
        assert_eq!(ids(&queue).await, vec![3, 4, 5]);
        assert_eq!(queue.dropped(), 2);
    }

    #[tokio::test]
    async fn test_restore_front_keeps_order_and_bound() {
        let queue = SyncQueue::new(4);
        queue.push(entry(1)).await;
        queue.push(entry(2)).await;

        let taken = queue.take_all().await;
        assert!(queue.is_empty().await);

        // Arrived while the pass was running.
        queue.push(entry(3)).await;
        queue.push(entry(4)).await;
        queue.push(entry(5)).await;

        queue.restore_front(taken).await;
        assert_eq!(ids(&queue).await, vec![2, 3, 4, 5]);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(SyncQueue::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn test_probe_with_no_targets_is_offline() {
        let probe = ConnectivityProbe::new(Vec::new(), Duration::from_millis(10));
        assert!(!probe.is_online().await);
    }

    #[tokio::test]
    async fn test_probe_falls_back_to_second_target() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = listener.local_addr().unwrap().to_string();

        // Port 1 on loopback is closed on any sane test host.
        let probe = ConnectivityProbe::new(
            vec!["127.0.0.1:1".to_string(), live],
            Duration::from_millis(500),
        );
        assert!(probe.is_online().await);
    }

    #[test]
    fn test_relay_error_display() {
        let error = RelayError::Status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.to_string(), "Aggregator returned 500 Internal Server Error");
    }
}
