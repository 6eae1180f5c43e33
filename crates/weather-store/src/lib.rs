//! Durable storage for weather station readings.
//!
//! This crate provides SQLite-based storage with one row per
//! (device id, timestamp) pair, schema evolution for databases written by
//! older releases, and the aggregate and eviction queries the service needs.
//!
//! # Features
//!
//! - Deduplicating insert that reports [`InsertOutcome::Duplicate`]
//! - Recent/latest queries in insertion order
//! - Age-based purge with space reclamation
//! - Full reset, upload marker and CSV export
//!
//! # Example
//!
//! ```no_run
//! use weather_store::Store;
//!
//! let store = Store::open_default()?;
//! for row in store.recent(10)? {
//!     println!("{}", row.reading);
//! }
//! # Ok::<(), weather_store::Error>(())
//! ```

mod error;
mod models;
mod schema;
mod store;

pub use error::{Error, Result};
pub use rusqlite;
pub use models::{InsertOutcome, StoreStats, StoredReading};
pub use schema::initialize;
pub use store::{DEFAULT_BUSY_TIMEOUT, Store};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/weather-station/weather.db`
/// - macOS: `~/Library/Application Support/weather-station/weather.db`
/// - Windows: `C:\Users\<user>\AppData\Local\weather-station\weather.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("weather-station")
        .join("weather.db")
}
