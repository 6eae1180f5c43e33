//! Per-unit-of-work database access.
//!
//! [`Database`] remembers where the store lives. Every call to
//! [`Database::run`] opens its own connection on the blocking pool, runs one
//! unit of work and closes the connection again, so no handle is shared
//! between concurrent tasks and slow statements never run on an async worker.
//! SQLite's own locking (WAL plus the busy timeout) serializes writers.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;
use weather_store::{Error, Result, Store};

/// Location and connection settings of the reading store.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    /// Create or migrate the store at `path` and return a handle to it.
    ///
    /// The initializing connection is closed before returning.
    pub fn open(path: impl Into<PathBuf>, busy_timeout: Duration) -> Result<Self> {
        let path = path.into();
        Store::open(&path)?.with_busy_timeout(busy_timeout)?;
        Ok(Self { path, busy_timeout })
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a connection without leaving the current thread.
    pub fn connect(&self) -> Result<Store> {
        Store::connect(&self.path)?.with_busy_timeout(self.busy_timeout)
    }

    /// Run `work` against a fresh connection on the blocking pool.
    pub async fn run<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut store = db.connect()?;
            work(&mut store)
        })
        .await;

        match result {
            Ok(result) => result,
            Err(e) => {
                debug!("Database task did not complete: {}", e);
                Err(Error::Io(io::Error::other(format!("Task failed: {e}"))))
            }
        }
    }
}
