//! Tracing setup and daily log file naming.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use time::Date;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_DIRECTIVES: &str = "weather_service=info,weather_store=info,tower_http=debug";

/// File name prefix shared by every daily log file.
pub const LOG_FILE_PREFIX: &str = "weather-service_";

/// `YYYYMMDD` stamp for `date`.
pub fn date_stamp(date: Date) -> String {
    format!(
        "{:04}{:02}{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Name of the log file for `date`.
pub fn log_file_name(date: Date) -> String {
    format!("{}{}.log", LOG_FILE_PREFIX, date_stamp(date))
}

/// Install the global subscriber.
///
/// Logs always go to stdout. When `log_dir` is given they are also appended
/// to today's file in that directory, whose path is returned.
pub fn init(log_dir: Option<&Path>, today: Date) -> io::Result<Option<PathBuf>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let file = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(log_file_name(today));
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            Some((layer, path))
        }
        None => None,
    };
    let (file_layer, path) = file.unzip();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(path)
}
