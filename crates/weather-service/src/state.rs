//! Application state shared across handlers and background tasks.
//!
//! One [`AppState`] is built at startup from the loaded [`Config`] and the
//! initialized [`Database`], then handed to every listener and periodic task
//! behind an `Arc`. Nothing else is global.
//!
//! # Locks
//!
//! - **`db`**: no lock; each unit of work opens its own connection.
//! - **`sync_queue`**: has its own internal mutex; see [`SyncQueue`].
//! - **`last_sync`** (RwLock): written once per sync pass.

use std::path::PathBuf;
use std::sync::Arc;

use time::{OffsetDateTime, PrimitiveDateTime};
use tokio::sync::RwLock;
use weather_types::{DecodeContext, TimestampPolicy};

use crate::config::Config;
use crate::db::Database;
use crate::sync::{SyncQueue, SyncReport};

/// Shared application state.
pub struct AppState {
    /// The reading store.
    pub db: Database,
    /// Configuration, fixed for the life of the process.
    pub config: Config,
    /// Readings waiting to be relayed upstream.
    pub sync_queue: SyncQueue,
    /// Outcome of the most recent sync pass.
    pub last_sync: RwLock<Option<SyncReport>>,
    /// The log file currently being written, if file logging is on.
    pub active_log: Option<PathBuf>,
}

impl AppState {
    /// Initialize the configured database and build the state around it.
    ///
    /// Fails when the store cannot be created or migrated; the service must
    /// not start without it.
    pub fn open(config: Config, active_log: Option<PathBuf>) -> weather_store::Result<Arc<Self>> {
        let db = Database::open(&config.storage.path, config.storage.busy_timeout())?;
        Ok(Self::with_active_log(db, config, active_log))
    }

    /// Create new application state.
    pub fn new(db: Database, config: Config) -> Arc<Self> {
        Self::with_active_log(db, config, None)
    }

    /// Create application state that knows which log file is in use,
    /// so log pruning never deletes it.
    pub fn with_active_log(db: Database, config: Config, active_log: Option<PathBuf>) -> Arc<Self> {
        let sync_queue = SyncQueue::new(config.sync.queue_capacity);
        Arc::new(Self {
            db,
            config,
            sync_queue,
            last_sync: RwLock::new(None),
            active_log,
        })
    }

    /// Current station-local wall-clock time, truncated to the second.
    pub fn local_now(&self) -> PrimitiveDateTime {
        let now = OffsetDateTime::now_utc().to_offset(self.config.station.utc_offset());
        let now = now.replace_nanosecond(0).unwrap_or(now);
        PrimitiveDateTime::new(now.date(), now.time())
    }

    /// Decoder inputs for a report received at `received_at`.
    pub fn decode_context(
        &self,
        policy: TimestampPolicy,
        received_at: PrimitiveDateTime,
    ) -> DecodeContext {
        DecodeContext {
            policy,
            configured_device_id: self.config.station.device_id,
            utc_offset: self.config.station.utc_offset(),
            received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn temp_config() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.path = dir.path().join("weather.db");
        (dir, config)
    }

    #[tokio::test]
    async fn test_app_state_open() {
        let (_dir, mut config) = temp_config();
        config.sync.queue_capacity = 7;

        let state = AppState::open(config, None).unwrap();
        assert_eq!(state.sync_queue.capacity(), 7);
        assert!(state.sync_queue.is_empty().await);
        assert!(state.last_sync.read().await.is_none());
        assert!(state.active_log.is_none());
        assert_eq!(state.db.run(|store| store.count()).await.unwrap(), 0);
    }

    #[test]
    fn test_app_state_open_fails_on_unusable_path() {
        let (dir, mut config) = temp_config();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        config.storage.path = blocker.join("weather.db");

        assert!(AppState::open(config, None).is_err());
    }

    #[test]
    fn test_decode_context_uses_station_config() {
        let (_dir, mut config) = temp_config();
        config.station.device_id = Some(12);
        config.station.utc_offset_hours = -3;
        let state = AppState::open(config, None).unwrap();

        let ctx = state.decode_context(TimestampPolicy::Device, datetime!(2024-01-01 00:00:00));
        assert_eq!(ctx.configured_device_id, Some(12));
        assert_eq!(ctx.utc_offset.whole_hours(), -3);
        assert_eq!(ctx.policy, TimestampPolicy::Device);
    }

    #[test]
    fn test_local_now_has_no_subsecond_part() {
        let (_dir, config) = temp_config();
        let state = AppState::open(config, None).unwrap();
        assert_eq!(state.local_now().nanosecond(), 0);
    }
}
