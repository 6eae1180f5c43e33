//! Server configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::UtcOffset;
use weather_types::TimestampPolicy;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Station identity and clock.
    pub station: StationConfig,
    /// Ingestion listeners.
    pub ingest: IngestConfig,
    /// Data and log retention.
    pub retention: RetentionConfig,
    /// Upstream relay.
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    /// when no file exists.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use weather_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.station.validate());
        errors.extend(self.ingest.validate());
        errors.extend(self.retention.validate());
        errors.extend(self.sync.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new("server.bind", "bind address cannot be empty"));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Ok(_) => {}
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
            },
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
    /// How long to wait on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: weather_store::default_db_path(),
            busy_timeout_ms: 5000,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }
        errors
    }

    /// Busy timeout as a [`Duration`].
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Station identity and clock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Device id used when a report carries none.
    pub device_id: Option<i64>,
    /// Offset of local civil time from UTC, in whole hours.
    pub utc_offset_hours: i8,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            utc_offset_hours: 7,
        }
    }
}

impl StationConfig {
    /// Validate station configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !(-12..=14).contains(&self.utc_offset_hours) {
            errors.push(ValidationError::new(
                "station.utc_offset_hours",
                format!(
                    "offset {} is out of range (-12 to 14)",
                    self.utc_offset_hours
                ),
            ));
        }
        errors
    }

    /// The configured offset. Out-of-range values collapse to UTC.
    pub fn utc_offset(&self) -> UtcOffset {
        UtcOffset::from_hms(self.utc_offset_hours, 0, 0).unwrap_or(UtcOffset::UTC)
    }
}

/// Where the packet listener reads candidate lines from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketSourceConfig {
    /// A regular file or FIFO fed by an external capture tool.
    File(PathBuf),
    /// A capture command whose stdout is read line by line.
    Command(Vec<String>),
}

/// Ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// HTTP paths that accept station uploads.
    pub paths: Vec<String>,
    /// Timestamp policy for HTTP uploads.
    pub http_timestamp: TimestampPolicy,
    /// Timestamp policy for captured packet lines.
    pub packet_timestamp: TimestampPolicy,
    /// Packet capture source; the packet listener is off when unset.
    pub packet_source: Option<PacketSourceConfig>,
    /// Delay before reopening the packet source, in seconds.
    pub restart_delay_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            paths: vec!["/data/report/".to_string(), "/post".to_string()],
            http_timestamp: TimestampPolicy::Capture,
            packet_timestamp: TimestampPolicy::Device,
            packet_source: None,
            restart_delay_secs: 5,
        }
    }
}

impl IngestConfig {
    /// Validate ingestion configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for (i, path) in self.paths.iter().enumerate() {
            let field = format!("ingest.paths[{}]", i);
            if !path.starts_with('/') {
                errors.push(ValidationError::new(
                    &field,
                    format!("path '{}' must start with '/'", path),
                ));
            } else if path.starts_with("/api/") {
                errors.push(ValidationError::new(
                    &field,
                    format!("path '{}' collides with the management API", path),
                ));
            }
            if !seen.insert(path.as_str()) {
                errors.push(ValidationError::new(
                    &field,
                    format!("duplicate path '{}'", path),
                ));
            }
        }

        if let Some(PacketSourceConfig::Command(argv)) = &self.packet_source
            && argv.is_empty()
        {
            errors.push(ValidationError::new(
                "ingest.packet_source.command",
                "capture command cannot be empty",
            ));
        }

        errors
    }
}

/// Retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Maximum age of stored readings, in days.
    pub horizon_days: u32,
    /// Time between retention passes, in seconds.
    pub interval_secs: u64,
    /// Directory holding the daily log files; file logging is off when unset.
    pub log_dir: Option<PathBuf>,
}

/// Longest accepted retention horizon, roughly a century.
pub const MAX_HORIZON_DAYS: u32 = 36_500;

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            horizon_days: 60,
            interval_secs: 86_400,
            log_dir: None,
        }
    }
}

impl RetentionConfig {
    /// Validate retention configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.horizon_days == 0 {
            errors.push(ValidationError::new(
                "retention.horizon_days",
                "horizon must be at least 1 day",
            ));
        } else if self.horizon_days > MAX_HORIZON_DAYS {
            errors.push(ValidationError::new(
                "retention.horizon_days",
                format!(
                    "horizon {} is too long (maximum {} days)",
                    self.horizon_days, MAX_HORIZON_DAYS
                ),
            ));
        }
        if self.interval_secs < 60 {
            errors.push(ValidationError::new(
                "retention.interval_secs",
                format!(
                    "interval {} is too short (minimum 60 seconds)",
                    self.interval_secs
                ),
            ));
        }
        errors
    }
}

/// Upstream relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether freshly stored readings are relayed.
    pub enabled: bool,
    /// Aggregator endpoint receiving form-encoded POSTs.
    pub url: String,
    /// Time between sync passes, in seconds.
    pub interval_secs: u64,
    /// Maximum number of pending entries.
    pub queue_capacity: usize,
    /// Connectivity probe timeout, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Timeout of one relay request, in seconds.
    pub http_timeout_secs: u64,
    /// First probe target (`host:port`).
    pub probe_primary: String,
    /// Probe target tried when the primary is unreachable.
    pub probe_fallback: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            interval_secs: 60,
            queue_capacity: 1000,
            connect_timeout_ms: 3000,
            http_timeout_secs: 10,
            probe_primary: "8.8.8.8:53".to_string(),
            probe_fallback: "1.1.1.1:53".to_string(),
        }
    }
}

impl SyncConfig {
    /// Validate sync configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.enabled {
            if self.url.is_empty() {
                errors.push(ValidationError::new(
                    "sync.url",
                    "url is required when sync is enabled",
                ));
            } else if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
                errors.push(ValidationError::new(
                    "sync.url",
                    format!("url '{}' must start with http:// or https://", self.url),
                ));
            }
        }
        if self.queue_capacity == 0 {
            errors.push(ValidationError::new(
                "sync.queue_capacity",
                "queue capacity must be at least 1",
            ));
        }
        if self.interval_secs == 0 {
            errors.push(ValidationError::new(
                "sync.interval_secs",
                "interval must be at least 1 second",
            ));
        }
        for (field, target) in [
            ("sync.probe_primary", &self.probe_primary),
            ("sync.probe_fallback", &self.probe_fallback),
        ] {
            if !target.is_empty() && target.rsplit_once(':').is_none() {
                errors.push(ValidationError::new(
                    field,
                    format!("probe target '{}' must be host:port", target),
                ));
            }
        }

        errors
    }

    /// Probe targets in the order they are tried.
    pub fn probe_targets(&self) -> Vec<String> {
        [&self.probe_primary, &self.probe_fallback]
            .into_iter()
            .filter(|t| !t.is_empty())
            .cloned()
            .collect()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `ingest.paths[0]`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("weather-station")
        .join("server.toml")
}
