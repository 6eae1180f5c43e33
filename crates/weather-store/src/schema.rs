//! Database schema and additive column migrations.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Name of the readings table.
pub const TABLE: &str = "weather_data";

/// Columns introduced after the first deployments, with their definitions.
///
/// Databases created by older releases lack some of these; they are added
/// in place on every start.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("device_id", "INTEGER NOT NULL DEFAULT 99"),
    ("model", "TEXT NOT NULL DEFAULT ''"),
    ("passkey", "TEXT NOT NULL DEFAULT ''"),
    ("uploaded", "INTEGER NOT NULL DEFAULT 0"),
];

/// Initialize the database schema.
///
/// Idempotent: creates the table if absent, then adds any missing
/// additive column without touching existing rows.
pub fn initialize(conn: &Connection) -> Result<()> {
    create_table(conn)?;

    let existing = column_names(conn)?;
    for (name, definition) in ADDITIVE_COLUMNS {
        if existing.iter().any(|c| c == name) {
            continue;
        }
        add_column(conn, name, definition)?;
    }

    // Needs device_id, so it comes after the additive columns.
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_weather_data_key ON weather_data(device_id, datetime);
         CREATE INDEX IF NOT EXISTS idx_weather_data_created ON weather_data(created_at);",
    )?;

    Ok(())
}

fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS weather_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL DEFAULT 99,
            datetime TEXT NOT NULL,
            windspeed_kmh REAL NOT NULL DEFAULT 0,
            wind_direction INTEGER NOT NULL DEFAULT 0,
            rain_rate_in REAL NOT NULL DEFAULT 0,
            temp_in_c REAL NOT NULL DEFAULT 0,
            temp_out_c REAL NOT NULL DEFAULT 0,
            humidity_in INTEGER NOT NULL DEFAULT 0,
            humidity_out INTEGER NOT NULL DEFAULT 0,
            uv_index REAL NOT NULL DEFAULT 0,
            wind_gust_kmh REAL NOT NULL DEFAULT 0,
            barometric_pressure_rel_in REAL NOT NULL DEFAULT 0,
            barometric_pressure_abs_in REAL NOT NULL DEFAULT 0,
            solar_radiation_wm2 REAL NOT NULL DEFAULT 0,
            daily_rain_in REAL NOT NULL DEFAULT 0,
            rain_today_in REAL NOT NULL DEFAULT 0,
            total_rain_in REAL NOT NULL DEFAULT 0,
            weekly_rain_in REAL NOT NULL DEFAULT 0,
            monthly_rain_in REAL NOT NULL DEFAULT 0,
            yearly_rain_in REAL NOT NULL DEFAULT 0,
            max_daily_gust REAL NOT NULL DEFAULT 0,
            wh65_batt REAL NOT NULL DEFAULT 0,
            model TEXT NOT NULL DEFAULT '',
            passkey TEXT NOT NULL DEFAULT '',
            uploaded INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )?;
    Ok(())
}

/// Column names of the readings table.
pub(crate) fn column_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('weather_data')")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(names)
}

fn add_column(conn: &Connection, name: &str, definition: &str) -> Result<()> {
    let sql = format!("ALTER TABLE {TABLE} ADD COLUMN {name} {definition}");
    match conn.execute(&sql, []) {
        Ok(_) => {
            info!("Added column {} to {}", name, TABLE);
            Ok(())
        }
        // Another process may have added it between our check and the ALTER.
        Err(e) if e.to_string().to_ascii_lowercase().contains("duplicate column") => {
            debug!("Column {} already exists", name);
            Ok(())
        }
        Err(e) => {
            warn!("Could not add column {}: {}", name, e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Table layout written by the first release, before device ids,
    /// station metadata and the upload marker existed.
    const LEGACY_TABLE: &str = r#"
        CREATE TABLE weather_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            datetime TEXT NOT NULL,
            windspeed_kmh REAL,
            wind_direction INTEGER,
            rain_rate_in REAL,
            temp_in_c REAL,
            temp_out_c REAL,
            humidity_in INTEGER,
            humidity_out INTEGER,
            uv_index REAL,
            wind_gust_kmh REAL,
            barometric_pressure_rel_in REAL,
            barometric_pressure_abs_in REAL,
            solar_radiation_wm2 REAL,
            daily_rain_in REAL,
            rain_today_in REAL,
            total_rain_in REAL,
            weekly_rain_in REAL,
            monthly_rain_in REAL,
            yearly_rain_in REAL,
            max_daily_gust REAL,
            wh65_batt REAL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
    "#;

    #[test]
    fn test_initialize_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let columns = column_names(&conn).unwrap();
        for (name, _) in ADDITIVE_COLUMNS {
            assert!(columns.iter().any(|c| c == name), "missing {name}");
        }
        assert!(columns.iter().any(|c| c == "created_at"));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        let before = column_names(&conn).unwrap();

        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
        assert_eq!(column_names(&conn).unwrap(), before);
    }

    #[test]
    fn test_legacy_table_gains_columns_and_keeps_rows() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(LEGACY_TABLE).unwrap();
        conn.execute(
            "INSERT INTO weather_data (datetime, temp_out_c) VALUES ('2023-01-01 00:00:00', 4.5)",
            [],
        )
        .unwrap();

        initialize(&conn).unwrap();

        let columns = column_names(&conn).unwrap();
        assert!(columns.iter().any(|c| c == "device_id"));
        assert!(columns.iter().any(|c| c == "uploaded"));

        let (device_id, temp, passkey): (i64, f64, String) = conn
            .query_row(
                "SELECT device_id, temp_out_c, passkey FROM weather_data",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(device_id, 99);
        assert_eq!(temp, 4.5);
        assert_eq!(passkey, "");
    }

    #[test]
    fn test_add_existing_column_is_tolerated() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        add_column(&conn, "model", "TEXT").unwrap();
    }
}
