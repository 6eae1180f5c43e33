//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use weather_types::TelemetryReading;

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID. Increases with insertion order.
    pub id: i64,
    /// The normalized reading.
    #[serde(flatten)]
    pub reading: TelemetryReading,
    /// When the row was inserted (UTC).
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Whether the reading has been relayed upstream.
    pub uploaded: bool,
}

/// Outcome of [`Store::insert`](crate::Store::insert).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The reading was written with this row id.
    Inserted(i64),
    /// A row with the same device id and timestamp already exists; nothing was written.
    Duplicate,
}

impl InsertOutcome {
    /// Row id of a fresh insert.
    pub fn row_id(self) -> Option<i64> {
        match self {
            InsertOutcome::Inserted(id) => Some(id),
            InsertOutcome::Duplicate => None,
        }
    }

    /// True for [`InsertOutcome::Duplicate`].
    pub fn is_duplicate(self) -> bool {
        matches!(self, InsertOutcome::Duplicate)
    }
}

/// Aggregate database statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of stored readings.
    pub total_records: u64,
    /// Insertion time of the oldest row.
    #[serde(with = "time::serde::rfc3339::option")]
    pub oldest_record: Option<OffsetDateTime>,
    /// Insertion time of the newest row.
    #[serde(with = "time::serde::rfc3339::option")]
    pub newest_record: Option<OffsetDateTime>,
    /// Database size in bytes.
    pub database_size_bytes: u64,
    /// Database size in MiB, rounded to two decimals.
    pub database_size_mb: f64,
}

impl StoreStats {
    pub(crate) fn size_mb(bytes: u64) -> f64 {
        let mb = bytes as f64 / (1024.0 * 1024.0);
        (mb * 100.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_size_mb_rounding() {
        assert_eq!(StoreStats::size_mb(0), 0.0);
        assert_eq!(StoreStats::size_mb(1024 * 1024), 1.0);
        assert_eq!(StoreStats::size_mb(1_572_864), 1.5);
        assert_eq!(StoreStats::size_mb(12_345), 0.01);
    }

    #[test]
    fn test_insert_outcome_helpers() {
        assert_eq!(InsertOutcome::Inserted(3).row_id(), Some(3));
        assert!(InsertOutcome::Duplicate.is_duplicate());
        assert_eq!(InsertOutcome::Duplicate.row_id(), None);
    }

    #[test]
    fn test_stored_reading_serializes_flat() {
        let stored = StoredReading {
            id: 5,
            reading: TelemetryReading::empty(44, datetime!(2024-02-01 06:00:00)),
            created_at: datetime!(2024-01-31 23:00:00 UTC),
            uploaded: false,
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["id"], 5);
        assert_eq!(json["device_id"], 44);
        assert_eq!(json["timestamp"], "2024-02-01 06:00:00");
        assert_eq!(json["created_at"], "2024-01-31T23:00:00Z");
    }
}
