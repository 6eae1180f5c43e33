//! Core types for weather station telemetry.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Civil timestamp layout used on the wire (`dateutc`) and in storage.
pub const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

#[cfg(feature = "serde")]
time::serde::format_description!(
    civil_datetime,
    PrimitiveDateTime,
    "[year]-[month]-[day] [hour]:[minute]:[second]"
);

/// Format a civil timestamp as `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(timestamp: PrimitiveDateTime) -> String {
    // The format description only contains numeric components that always
    // exist on a PrimitiveDateTime, so formatting cannot fail.
    timestamp
        .format(TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Parse a `YYYY-MM-DD HH:MM:SS` civil timestamp.
pub fn parse_timestamp(s: &str) -> Result<PrimitiveDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(s.trim(), TIMESTAMP_FORMAT)
}

/// Miles per hour to kilometres per hour factor.
pub const MPH_TO_KMH: f64 = 1.60934;

/// Convert Fahrenheit to Celsius.
#[inline]
pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

/// Convert Celsius to Fahrenheit.
#[inline]
pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

/// Convert miles per hour to kilometres per hour.
#[inline]
pub fn mph_to_kmh(mph: f64) -> f64 {
    mph * MPH_TO_KMH
}

/// Convert kilometres per hour to miles per hour.
#[inline]
pub fn kmh_to_mph(kmh: f64) -> f64 {
    kmh / MPH_TO_KMH
}

/// One sensor report after unit normalization.
///
/// Identity is the pair (`device_id`, `timestamp`); see [`TelemetryReading::dedup_key`].
/// Every measurement is always present: fields the station did not send
/// are zero (numbers) or empty (text).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TelemetryReading {
    /// Station identifier.
    pub device_id: i64,
    /// Local civil time of the reading, second precision.
    #[cfg_attr(feature = "serde", serde(with = "civil_datetime"))]
    pub timestamp: PrimitiveDateTime,
    /// Wind speed in km/h.
    pub windspeed_kmh: f64,
    /// Wind gust in km/h.
    pub wind_gust_kmh: f64,
    /// Wind direction in degrees.
    pub wind_direction: i64,
    /// Rain rate in inches per hour.
    pub rain_rate_in: f64,
    /// Daily rain in inches.
    pub daily_rain_in: f64,
    /// Rain today in inches.
    pub rain_today_in: f64,
    /// Total rain in inches.
    pub total_rain_in: f64,
    /// Weekly rain in inches.
    pub weekly_rain_in: f64,
    /// Monthly rain in inches.
    pub monthly_rain_in: f64,
    /// Yearly rain in inches.
    pub yearly_rain_in: f64,
    /// Maximum daily gust, as reported by the station.
    pub max_daily_gust: f64,
    /// Indoor temperature in Celsius.
    pub temp_in_c: f64,
    /// Outdoor temperature in Celsius.
    pub temp_out_c: f64,
    /// Indoor relative humidity (%).
    pub humidity_in: i64,
    /// Outdoor relative humidity (%).
    pub humidity_out: i64,
    /// UV index.
    pub uv_index: f64,
    /// Relative barometric pressure in inHg.
    pub barometric_pressure_rel_in: f64,
    /// Absolute barometric pressure in inHg.
    pub barometric_pressure_abs_in: f64,
    /// Solar radiation in W/m².
    pub solar_radiation_wm2: f64,
    /// Outdoor sensor array battery indicator.
    pub wh65_batt: f64,
    /// Station model name.
    pub model: String,
    /// Station passkey.
    pub passkey: String,
}

impl TelemetryReading {
    /// Create a reading with every measurement zeroed.
    pub fn empty(device_id: i64, timestamp: PrimitiveDateTime) -> Self {
        Self {
            device_id,
            timestamp,
            windspeed_kmh: 0.0,
            wind_gust_kmh: 0.0,
            wind_direction: 0,
            rain_rate_in: 0.0,
            daily_rain_in: 0.0,
            rain_today_in: 0.0,
            total_rain_in: 0.0,
            weekly_rain_in: 0.0,
            monthly_rain_in: 0.0,
            yearly_rain_in: 0.0,
            max_daily_gust: 0.0,
            temp_in_c: 0.0,
            temp_out_c: 0.0,
            humidity_in: 0,
            humidity_out: 0,
            uv_index: 0.0,
            barometric_pressure_rel_in: 0.0,
            barometric_pressure_abs_in: 0.0,
            solar_radiation_wm2: 0.0,
            wh65_batt: 0.0,
            model: String::new(),
            passkey: String::new(),
        }
    }

    /// The (`device_id`, `timestamp`) pair identifying this reading.
    pub fn dedup_key(&self) -> (i64, PrimitiveDateTime) {
        (self.device_id, self.timestamp)
    }
}

impl fmt::Display for TelemetryReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device {} @ {}: {:.1}°C, {}%, wind {:.1} km/h {}°, {:.2} inHg",
            self.device_id,
            format_timestamp(self.timestamp),
            self.temp_out_c,
            self.humidity_out,
            self.windspeed_kmh,
            self.wind_direction,
            self.barometric_pressure_rel_in
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_temperature_conversions() {
        assert!((fahrenheit_to_celsius(32.0) - 0.0).abs() < 1e-9);
        assert!((fahrenheit_to_celsius(212.0) - 100.0).abs() < 1e-9);
        assert!((celsius_to_fahrenheit(-40.0) + 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_wind_conversions() {
        assert!((mph_to_kmh(10.0) - 16.0934).abs() < 1e-9);
        assert!((kmh_to_mph(16.0934) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_timestamp_format_and_parse() {
        let ts = datetime!(2024-03-05 07:08:09);
        assert_eq!(format_timestamp(ts), "2024-03-05 07:08:09");
        assert_eq!(parse_timestamp("2024-03-05 07:08:09").unwrap(), ts);
        assert!(parse_timestamp("2024-03-05T07:08:09").is_err());
        assert!(parse_timestamp("now").is_err());
    }

    #[test]
    fn test_empty_reading_is_zeroed() {
        let reading = TelemetryReading::empty(7, datetime!(2024-01-01 00:00:00));
        assert_eq!(reading.device_id, 7);
        assert_eq!(reading.humidity_out, 0);
        assert_eq!(reading.temp_out_c, 0.0);
        assert!(reading.model.is_empty());
        assert_eq!(reading.dedup_key(), (7, datetime!(2024-01-01 00:00:00)));
    }

    #[test]
    fn test_display() {
        let mut reading = TelemetryReading::empty(44, datetime!(2024-01-01 12:00:00));
        reading.temp_out_c = 23.9;
        reading.humidity_out = 60;
        let text = reading.to_string();
        assert!(text.contains("device 44"));
        assert!(text.contains("2024-01-01 12:00:00"));
        assert!(text.contains("23.9°C"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_uses_civil_timestamp() {
        let reading = TelemetryReading::empty(1, datetime!(2024-06-30 23:59:59));
        let json = serde_json::to_string(&reading).unwrap();
        assert!(json.contains("\"timestamp\":\"2024-06-30 23:59:59\""));

        let back: TelemetryReading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reading);
    }
}
