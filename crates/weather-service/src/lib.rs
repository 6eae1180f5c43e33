//! Ingestion service for personal weather stations.
//!
//! This crate provides a service that:
//! - Accepts station uploads over HTTP (GET query or form POST)
//! - Optionally reads uploads captured off the wire by an external tool
//! - Decodes, deduplicates and stores readings in the local database
//! - Purges readings past the retention horizon and prunes old log files
//! - Relays stored readings to a remote aggregator when connectivity allows
//! - Exposes a small JSON API for inspection and maintenance
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/weather-station/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [station]
//! device_id = 3
//! utc_offset_hours = 7
//!
//! [ingest]
//! paths = ["/data/report/", "/post"]
//! packet_source = { file = "/run/weather/capture.fifo" }
//!
//! [retention]
//! horizon_days = 60
//! log_dir = "/var/log/weather"
//!
//! [sync]
//! enabled = true
//! url = "https://aggregator.example.com/ingest"
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod http;
pub mod ingest;
pub mod logging;
pub mod packet;
pub mod retention;
pub mod retry;
pub mod state;
pub mod sync;

pub use config::{
    Config, ConfigError, IngestConfig, PacketSourceConfig, RetentionConfig, ServerConfig,
    StationConfig, StorageConfig, SyncConfig,
};
pub use db::Database;
pub use ingest::{IngestOutcome, ingest};
pub use packet::{CommandSource, FileSource, PacketListener, PacketSource};
pub use retention::RetentionManager;
pub use state::AppState;
pub use sync::{SyncQueue, Syncer};
