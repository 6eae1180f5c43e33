//! The single decode-and-store pipeline behind every listener.

use std::sync::Arc;

use time::PrimitiveDateTime;
use tracing::{debug, error, info, warn};
use weather_store::InsertOutcome;
use weather_types::{DecodeError, TelemetryReading, TimestampPolicy, decode};

use crate::retry::{BusyRetry, retry_busy};
use crate::state::AppState;
use crate::sync::SyncEntry;

/// What happened to one incoming report.
#[derive(Debug)]
pub enum IngestOutcome {
    /// Stored under this row id.
    Stored(i64),
    /// A reading with the same device id and timestamp was already stored.
    Duplicate,
    /// The report could not be decoded.
    Rejected(DecodeError),
    /// The store failed; nothing was written.
    Failed(weather_store::Error),
}

impl IngestOutcome {
    /// True for [`IngestOutcome::Stored`].
    pub fn is_stored(&self) -> bool {
        matches!(self, IngestOutcome::Stored(_))
    }
}

/// Decode, store and (when sync is on) enqueue one raw report.
///
/// Never fails: every outcome, including storage errors, is reported
/// through [`IngestOutcome`] so listeners can keep acknowledging uploads.
pub async fn ingest(
    state: &Arc<AppState>,
    raw: &str,
    policy: TimestampPolicy,
    received_at: PrimitiveDateTime,
) -> IngestOutcome {
    let ctx = state.decode_context(policy, received_at);
    let reading = match decode(raw, &ctx) {
        Ok(reading) => reading,
        Err(e) => {
            warn!("Rejected report: {}", e);
            return IngestOutcome::Rejected(e);
        }
    };

    match store_reading(state, &reading).await {
        Ok(InsertOutcome::Inserted(id)) => {
            info!("Stored reading {}: {}", id, reading);
            if state.config.sync.enabled {
                let payload = reading.to_wire(state.config.station.utc_offset());
                state.sync_queue.push(SyncEntry::new(id, payload)).await;
            }
            IngestOutcome::Stored(id)
        }
        Ok(InsertOutcome::Duplicate) => {
            debug!(
                "Duplicate reading from device {} at {}",
                reading.device_id, reading.timestamp
            );
            IngestOutcome::Duplicate
        }
        Err(e) => {
            error!("Failed to store reading: {}", e);
            IngestOutcome::Failed(e)
        }
    }
}

async fn store_reading(
    state: &Arc<AppState>,
    reading: &TelemetryReading,
) -> weather_store::Result<InsertOutcome> {
    retry_busy(&BusyRetry::default(), "insert reading", move || {
        let reading = reading.clone();
        state.db.run(move |store| store.insert(&reading))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use time::macros::datetime;

    fn state_with(mut config: Config) -> (tempfile::TempDir, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        config.storage.path = dir.path().join("weather.db");
        (dir, AppState::open(config, None).unwrap())
    }

    async fn count(state: &AppState) -> u64 {
        state.db.run(|store| store.count()).await.unwrap()
    }

    const REPORT: &str = "PASSKEY=ABC&dateutc=2024-05-01+03:00:00&tempf=75&humidity=60&windspeedmph=5";

    #[tokio::test]
    async fn test_ingest_stores_reading() {
        let (_dir, state) = state_with(Config::default());
        let outcome = ingest(
            &state,
            REPORT,
            TimestampPolicy::Capture,
            datetime!(2024-05-01 10:00:00),
        )
        .await;
        assert!(matches!(outcome, IngestOutcome::Stored(1)));

        let latest = state.db.run(|store| store.latest()).await.unwrap().unwrap();
        assert_eq!(latest.reading.humidity_out, 60);
        assert_eq!(latest.reading.passkey, "ABC");
        assert_eq!(latest.reading.timestamp, datetime!(2024-05-01 10:00:00));
    }

    #[tokio::test]
    async fn test_ingest_reports_duplicate() {
        let (_dir, state) = state_with(Config::default());
        let at = datetime!(2024-05-01 10:00:00);

        assert!(ingest(&state, REPORT, TimestampPolicy::Device, at).await.is_stored());
        // Same dateutc, later capture: still the same reading.
        let second = ingest(
            &state,
            REPORT,
            TimestampPolicy::Device,
            datetime!(2024-05-01 10:00:05),
        )
        .await;
        assert!(matches!(second, IngestOutcome::Duplicate));
        assert_eq!(count(&state).await, 1);
    }

    #[tokio::test]
    async fn test_ingest_rejects_garbage() {
        let (_dir, state) = state_with(Config::default());
        let outcome = ingest(
            &state,
            "not a report",
            TimestampPolicy::Capture,
            datetime!(2024-05-01 10:00:00),
        )
        .await;
        assert!(matches!(outcome, IngestOutcome::Rejected(_)));
        assert_eq!(count(&state).await, 0);
    }

    #[tokio::test]
    async fn test_ingest_enqueues_only_when_sync_enabled() {
        let (_dir, state) = state_with(Config::default());
        ingest(&state, REPORT, TimestampPolicy::Capture, datetime!(2024-05-01 10:00:00)).await;
        assert!(state.sync_queue.is_empty().await);

        let mut config = Config::default();
        config.sync.enabled = true;
        config.sync.url = "http://127.0.0.1:1/ingest".to_string();
        let (_dir, state) = state_with(config);

        ingest(&state, REPORT, TimestampPolicy::Capture, datetime!(2024-05-01 10:00:00)).await;
        let pending = state.sync_queue.snapshot().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].row_id, 1);
        assert!(pending[0].payload.contains("PASSKEY=ABC"));

        // Duplicates are not relayed twice.
        ingest(&state, REPORT, TimestampPolicy::Capture, datetime!(2024-05-01 10:00:00)).await;
        assert_eq!(state.sync_queue.len().await, 1);
    }
}
