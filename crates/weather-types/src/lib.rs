//! Shared types for personal weather station telemetry.
//!
//! This crate holds the canonical reading type used by the storage and
//! service crates, along with the codec for the station uplink format.
//!
//! # Features
//!
//! - [`TelemetryReading`], the normalized metric record
//! - [`decode`] for the imperial `key=value` uplink format
//! - [`TelemetryReading::to_wire`] for re-encoding a reading for relay
//! - Helpers for spotting reports inside captured traffic
//!
//! # Example
//!
//! ```
//! use time::macros::{datetime, offset};
//! use weather_types::{DecodeContext, TimestampPolicy, decode};
//!
//! let ctx = DecodeContext {
//!     policy: TimestampPolicy::Device,
//!     configured_device_id: Some(44),
//!     utc_offset: offset!(+7),
//!     received_at: datetime!(2024-05-01 10:00:00),
//! };
//! let reading = decode("dateutc=2024-05-01+02:59:30&tempf=68", &ctx)?;
//! assert_eq!(reading.device_id, 44);
//! assert_eq!(reading.timestamp, datetime!(2024-05-01 09:59:30));
//! # Ok::<(), weather_types::DecodeError>(())
//! ```

pub mod error;
pub mod types;
pub mod wire;

pub use error::{DecodeError, DecodeResult};
pub use types::{
    MPH_TO_KMH, TIMESTAMP_FORMAT, TelemetryReading, celsius_to_fahrenheit, fahrenheit_to_celsius,
    format_timestamp, kmh_to_mph, mph_to_kmh, parse_timestamp,
};
pub use wire::{
    DecodeContext, FALLBACK_DEVICE_ID, TELEMETRY_MARKERS, TimestampPolicy, decode,
    extract_payload, looks_like_telemetry,
};
