//! Error types for wire-format decoding in weather-types.

use thiserror::Error;

/// Errors that can occur when decoding an uplink report.
///
/// Decoding is lenient about individual fields (a missing or malformed
/// value becomes zero), so these variants only cover reports that carry
/// nothing usable at all.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The report was empty (or only whitespace).
    #[error("Empty report")]
    Empty,

    /// The report does not contain any `key=value` pairs.
    #[error("Report is not key/value encoded: {0}")]
    NotKeyValue(String),
}

impl DecodeError {
    /// Build a [`DecodeError::NotKeyValue`] keeping at most a short prefix
    /// of the offending text so log lines stay bounded.
    pub(crate) fn not_key_value(raw: &str) -> Self {
        const MAX_PREVIEW: usize = 64;
        let preview: String = raw.chars().take(MAX_PREVIEW).collect();
        DecodeError::NotKeyValue(preview)
    }
}

/// Result type alias using weather-types' DecodeError type.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
