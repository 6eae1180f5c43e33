//! Main store implementation.

use std::io;
use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Row, TransactionBehavior, params};
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::{debug, info, warn};

use weather_types::{TelemetryReading, format_timestamp, parse_timestamp};

use crate::error::{Error, Result};
use crate::models::{InsertOutcome, StoreStats, StoredReading};
use crate::schema;

/// How long a connection waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const SELECT_COLUMNS: &str = "id, device_id, datetime, windspeed_kmh, wind_gust_kmh, \
     wind_direction, rain_rate_in, daily_rain_in, rain_today_in, total_rain_in, weekly_rain_in, \
     monthly_rain_in, yearly_rain_in, max_daily_gust, temp_in_c, temp_out_c, humidity_in, \
     humidity_out, uv_index, barometric_pressure_rel_in, barometric_pressure_abs_in, \
     solar_radiation_wm2, wh65_batt, model, passkey, created_at, uploaded";

const CSV_HEADER: [&str; 27] = [
    "id",
    "device_id",
    "datetime",
    "windspeed_kmh",
    "wind_gust_kmh",
    "wind_direction",
    "rain_rate_in",
    "daily_rain_in",
    "rain_today_in",
    "total_rain_in",
    "weekly_rain_in",
    "monthly_rain_in",
    "yearly_rain_in",
    "max_daily_gust",
    "temp_in_c",
    "temp_out_c",
    "humidity_in",
    "humidity_out",
    "uv_index",
    "barometric_pressure_rel_in",
    "barometric_pressure_abs_in",
    "solar_radiation_wm2",
    "wh65_batt",
    "model",
    "passkey",
    "created_at",
    "uploaded",
];

/// SQLite-based store for weather readings.
///
/// A `Store` wraps one connection and is not shared between threads. Create
/// the database once with [`Store::open`], then open a fresh handle per unit
/// of work with [`Store::connect`].
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening database at {}", path.display());
        let store = Self::connect(path)?;
        schema::initialize(&store.conn)?;
        Ok(store)
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open a connection to an already initialized database.
    ///
    /// Skips schema work, so it is cheap enough to call per request.
    pub fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Override how long this connection waits on a locked database.
    pub fn with_busy_timeout(self, timeout: Duration) -> Result<Self> {
        self.conn.busy_timeout(timeout)?;
        Ok(self)
    }
}

// Writes
impl Store {
    /// Insert a reading unless one with the same device id and timestamp exists.
    pub fn insert(&mut self, reading: &TelemetryReading) -> Result<InsertOutcome> {
        self.insert_at(reading, OffsetDateTime::now_utc())
    }

    /// Like [`Store::insert`] with an explicit insertion time.
    pub fn insert_at(
        &mut self,
        reading: &TelemetryReading,
        created_at: OffsetDateTime,
    ) -> Result<InsertOutcome> {
        let datetime = format_timestamp(reading.timestamp);

        // IMMEDIATE takes the write lock up front, so no other writer can
        // slip a row in between the existence check and the insert.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM weather_data WHERE device_id = ?1 AND datetime = ?2)",
            params![reading.device_id, datetime],
            |row| row.get(0),
        )?;
        if exists {
            debug!(
                "Duplicate reading for device {} at {}",
                reading.device_id, datetime
            );
            return Ok(InsertOutcome::Duplicate);
        }

        tx.execute(
            "INSERT INTO weather_data (
                device_id, datetime, windspeed_kmh, wind_gust_kmh, wind_direction,
                rain_rate_in, daily_rain_in, rain_today_in, total_rain_in, weekly_rain_in,
                monthly_rain_in, yearly_rain_in, max_daily_gust, temp_in_c, temp_out_c,
                humidity_in, humidity_out, uv_index, barometric_pressure_rel_in,
                barometric_pressure_abs_in, solar_radiation_wm2, wh65_batt, model, passkey,
                created_at, uploaded
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                       ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, 0)",
            params![
                reading.device_id,
                datetime,
                reading.windspeed_kmh,
                reading.wind_gust_kmh,
                reading.wind_direction,
                reading.rain_rate_in,
                reading.daily_rain_in,
                reading.rain_today_in,
                reading.total_rain_in,
                reading.weekly_rain_in,
                reading.monthly_rain_in,
                reading.yearly_rain_in,
                reading.max_daily_gust,
                reading.temp_in_c,
                reading.temp_out_c,
                reading.humidity_in,
                reading.humidity_out,
                reading.uv_index,
                reading.barometric_pressure_rel_in,
                reading.barometric_pressure_abs_in,
                reading.solar_radiation_wm2,
                reading.wh65_batt,
                reading.model,
                reading.passkey,
                to_sql_utc(created_at),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(InsertOutcome::Inserted(id))
    }

    /// Set the uploaded marker on a row. Returns false if the row is gone.
    pub fn mark_uploaded(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("UPDATE weather_data SET uploaded = 1 WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    /// Delete rows inserted more than `days` days ago and reclaim the space.
    ///
    /// A horizon reaching past the start of the Unix epoch purges nothing.
    pub fn purge_older_than(&self, days: u32) -> Result<u64> {
        self.purge_before(purge_cutoff(OffsetDateTime::now_utc(), days))
    }

    /// Delete rows inserted before `cutoff` and reclaim the space.
    pub fn purge_before(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let cutoff = to_sql_utc(cutoff);

        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM weather_data WHERE created_at < ?1",
            [&cutoff],
            |row| row.get(0),
        )?;
        if count == 0 {
            debug!("No readings older than {}", cutoff);
            return Ok(0);
        }

        let deleted = self
            .conn
            .execute("DELETE FROM weather_data WHERE created_at < ?1", [&cutoff])?;
        // The rows are gone either way; a failed VACUUM only delays reclaiming space.
        if let Err(e) = self.conn.execute_batch("VACUUM") {
            warn!("VACUUM after purge failed: {}", e);
        }

        info!("Purged {} readings older than {}", deleted, cutoff);
        Ok(deleted as u64)
    }

    /// Delete every row and restart row ids from 1.
    pub fn reset(&mut self) -> Result<u64> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute("DELETE FROM weather_data", [])?;
        tx.execute(
            "DELETE FROM sqlite_sequence WHERE name = ?1",
            [schema::TABLE],
        )?;
        tx.commit()?;

        info!("Reset database, {} readings deleted", deleted);
        Ok(deleted as u64)
    }
}

// Queries
impl Store {
    /// The `limit` most recently inserted rows, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredReading>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM weather_data ORDER BY id DESC LIMIT ?1");
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query(&sql, [limit])
    }

    /// The most recently inserted row.
    pub fn latest(&self) -> Result<Option<StoredReading>> {
        Ok(self.recent(1)?.into_iter().next())
    }

    /// Number of stored rows.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM weather_data", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Row count, insertion time range and on-disk size.
    pub fn stats(&self) -> Result<StoreStats> {
        let (count, oldest, newest): (i64, Option<String>, Option<String>) = self.conn.query_row(
            "SELECT COUNT(*), MIN(created_at), MAX(created_at) FROM weather_data",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let page_count: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))?;
        let size = (page_count * page_size).max(0) as u64;

        Ok(StoreStats {
            total_records: count as u64,
            oldest_record: oldest.as_deref().map(from_sql_utc).transpose()?,
            newest_record: newest.as_deref().map(from_sql_utc).transpose()?,
            database_size_bytes: size,
            database_size_mb: StoreStats::size_mb(size),
        })
    }

    /// Write every row, oldest first, as CSV. Returns the number of rows written.
    pub fn export_csv<W: io::Write>(&self, writer: W) -> Result<u64> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(CSV_HEADER)?;

        let sql = format!("SELECT {SELECT_COLUMNS} FROM weather_data ORDER BY id ASC");
        let rows = self.query(&sql, [])?;
        for stored in &rows {
            out.write_record(csv_record(stored))?;
        }
        out.flush()?;

        Ok(rows.len() as u64)
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<StoredReading>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, RawRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawRow::into_stored).collect()
    }
}

/// Insertion-time cutoff for a `days` horizon, clamped to the Unix epoch.
fn purge_cutoff(now: OffsetDateTime, days: u32) -> OffsetDateTime {
    now.checked_sub(time::Duration::days(i64::from(days)))
        .filter(|cutoff| *cutoff > OffsetDateTime::UNIX_EPOCH)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// A row as read from SQLite, before timestamp parsing.
struct RawRow {
    id: i64,
    reading: TelemetryReading,
    datetime: String,
    created_at: Option<String>,
    uploaded: bool,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        // Rows written before the NOT NULL constraints may hold NULLs.
        let real = |i: usize| -> rusqlite::Result<f64> {
            Ok(row.get::<_, Option<f64>>(i)?.unwrap_or(0.0))
        };
        let int = |i: usize| -> rusqlite::Result<i64> {
            Ok(row.get::<_, Option<i64>>(i)?.unwrap_or(0))
        };
        let text = |i: usize| -> rusqlite::Result<String> {
            Ok(row.get::<_, Option<String>>(i)?.unwrap_or_default())
        };

        let mut reading = TelemetryReading::empty(int(1)?, PrimitiveDateTime::MIN);
        reading.windspeed_kmh = real(3)?;
        reading.wind_gust_kmh = real(4)?;
        reading.wind_direction = int(5)?;
        reading.rain_rate_in = real(6)?;
        reading.daily_rain_in = real(7)?;
        reading.rain_today_in = real(8)?;
        reading.total_rain_in = real(9)?;
        reading.weekly_rain_in = real(10)?;
        reading.monthly_rain_in = real(11)?;
        reading.yearly_rain_in = real(12)?;
        reading.max_daily_gust = real(13)?;
        reading.temp_in_c = real(14)?;
        reading.temp_out_c = real(15)?;
        reading.humidity_in = int(16)?;
        reading.humidity_out = int(17)?;
        reading.uv_index = real(18)?;
        reading.barometric_pressure_rel_in = real(19)?;
        reading.barometric_pressure_abs_in = real(20)?;
        reading.solar_radiation_wm2 = real(21)?;
        reading.wh65_batt = real(22)?;
        reading.model = text(23)?;
        reading.passkey = text(24)?;

        Ok(Self {
            id: row.get(0)?,
            reading,
            datetime: text(2)?,
            created_at: row.get(25)?,
            uploaded: int(26)? != 0,
        })
    }

    fn into_stored(self) -> Result<StoredReading> {
        let mut reading = self.reading;
        reading.timestamp = parse_timestamp(&self.datetime)
            .map_err(|_| Error::InvalidTimestamp(self.datetime.clone()))?;

        let created_at = match self.created_at {
            Some(s) => from_sql_utc(&s)?,
            None => OffsetDateTime::UNIX_EPOCH,
        };

        Ok(StoredReading {
            id: self.id,
            reading,
            created_at,
            uploaded: self.uploaded,
        })
    }
}

/// Format an instant the way SQLite's `CURRENT_TIMESTAMP` does (UTC).
fn to_sql_utc(at: OffsetDateTime) -> String {
    let utc = at.to_offset(UtcOffset::UTC);
    format_timestamp(PrimitiveDateTime::new(utc.date(), utc.time()))
}

fn from_sql_utc(s: &str) -> Result<OffsetDateTime> {
    parse_timestamp(s)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| Error::InvalidTimestamp(s.to_string()))
}

fn csv_record(stored: &StoredReading) -> [String; 27] {
    let r = &stored.reading;
    [
        stored.id.to_string(),
        r.device_id.to_string(),
        format_timestamp(r.timestamp),
        r.windspeed_kmh.to_string(),
        r.wind_gust_kmh.to_string(),
        r.wind_direction.to_string(),
        r.rain_rate_in.to_string(),
        r.daily_rain_in.to_string(),
        r.rain_today_in.to_string(),
        r.total_rain_in.to_string(),
        r.weekly_rain_in.to_string(),
        r.monthly_rain_in.to_string(),
        r.yearly_rain_in.to_string(),
        r.max_daily_gust.to_string(),
        r.temp_in_c.to_string(),
        r.temp_out_c.to_string(),
        r.humidity_in.to_string(),
        r.humidity_out.to_string(),
        r.uv_index.to_string(),
        r.barometric_pressure_rel_in.to_string(),
        r.barometric_pressure_abs_in.to_string(),
        r.solar_radiation_wm2.to_string(),
        r.wh65_batt.to_string(),
        r.model.clone(),
        r.passkey.clone(),
        to_sql_utc(stored.created_at),
        u8::from(stored.uploaded).to_string(),
    ]
}
