//! Periodic retention of stored readings and daily log files.
//!
//! Each pass purges readings older than the configured horizon and, when file
//! logging is on, deletes every log file that does not belong to the current
//! day. A missed pass is not caught up; the next one simply applies the
//! horizon to whatever is stored at that time.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::Date;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::logging::date_stamp;
use crate::retry::{BusyRetry, retry_busy};
use crate::state::AppState;

/// A log file that could not be removed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedDeletion {
    pub file: String,
    pub error: String,
}

/// Result of one log pruning pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LogPruneReport {
    /// Names of the files removed.
    pub deleted: Vec<String>,
    /// Files that could not be removed. The rest of the pass still ran.
    pub failed: Vec<FailedDeletion>,
}

/// Result of one retention pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    /// Readings purged, or `None` when the purge failed.
    pub purged: Option<u64>,
    /// Log pruning result, or `None` when file logging is off or the
    /// directory could not be read.
    pub logs: Option<LogPruneReport>,
}

fn is_stale_log(name: &str, today: &str, active: Option<&str>) -> bool {
    Path::new(name).extension().is_some_and(|ext| ext == "log")
        && !name.contains(today)
        && active != Some(name)
}

/// Delete every `.log` file in `dir` not stamped with `today`, except `active`.
///
/// Per-file failures are collected in the report; only failing to read the
/// directory itself is an error.
pub async fn prune_logs(
    dir: &Path,
    today: Date,
    active: Option<&Path>,
) -> io::Result<LogPruneReport> {
    let today = date_stamp(today);
    let active = active
        .and_then(Path::file_name)
        .and_then(|name| name.to_str());

    let mut report = LogPruneReport::default();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_stale_log(&name, &today, active) {
            continue;
        }
        if !entry.file_type().await.is_ok_and(|t| t.is_file()) {
            continue;
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {
                debug!("Deleted log file {}", name);
                report.deleted.push(name);
            }
            Err(e) => {
                warn!("Failed to delete log file {}: {}", name, e);
                report.failed.push(FailedDeletion {
                    file: name,
                    error: e.to_string(),
                });
            }
        }
    }

    report.deleted.sort();
    Ok(report)
}

/// Runs retention passes over the shared store and log directory.
pub struct RetentionManager {
    state: Arc<AppState>,
}

impl RetentionManager {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Purge readings older than the configured horizon.
    ///
    /// The delete and the following `VACUUM` run on a dedicated connection,
    /// so uploads keep being stored while space is reclaimed.
    pub async fn purge(&self) -> weather_store::Result<u64> {
        let days = self.state.config.retention.horizon_days;
        let db = &self.state.db;
        retry_busy(&BusyRetry::default(), "purge readings", move || {
            db.run(move |store| store.purge_older_than(days))
        })
        .await
    }

    /// Prune stale log files, if file logging is configured.
    pub async fn prune_logs(&self) -> Option<io::Result<LogPruneReport>> {
        let dir = self.state.config.retention.log_dir.as_deref()?;
        let today = self.state.local_now().date();
        Some(prune_logs(dir, today, self.state.active_log.as_deref()).await)
    }

    /// Run a single retention pass.
    pub async fn run_once(&self) -> RetentionReport {
        let purged = match self.purge().await {
            Ok(count) => {
                if count > 0 {
                    info!(
                        "Purged {} readings older than {} days",
                        count, self.state.config.retention.horizon_days
                    );
                }
                Some(count)
            }
            Err(e) => {
                error!("Failed to purge old readings: {}", e);
                None
            }
        };

        let logs = match self.prune_logs().await {
            Some(Ok(report)) => {
                if !report.deleted.is_empty() || !report.failed.is_empty() {
                    info!(
                        "Pruned {} log files ({} failed)",
                        report.deleted.len(),
                        report.failed.len()
                    );
                }
                Some(report)
            }
            Some(Err(e)) => {
                warn!("Failed to read log directory: {}", e);
                None
            }
            None => None,
        };

        RetentionReport { purged, logs }
    }

    /// Run passes forever on the configured interval, starting immediately.
    pub fn start(self) -> JoinHandle<()> {
        let period = Duration::from_secs(self.state.config.retention.interval_secs.max(1));
        info!(
            "Starting retention task (horizon {} days, every {:?})",
            self.state.config.retention.horizon_days, period
        );

        tokio::spawn(async move {
            let mut timer = interval(period);
            loop {
                timer.tick().await;
                self.run_once().await;
            }
        })
    }
}
