//! Error types for weather-store.

use std::path::PathBuf;

/// Result type for weather-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in weather-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid timestamp stored in a row.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// CSV export error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the database was busy or locked by another connection.
    ///
    /// These failures are transient and the operation may be retried.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Error::Database(other) => {
                let lower = other.to_string().to_ascii_lowercase();
                lower.contains("database is locked") || lower.contains("database is busy")
            }
            _ => false,
        }
    }
}
