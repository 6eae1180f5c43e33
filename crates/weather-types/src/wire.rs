//! Uplink wire format: decoding, normalization and the inverse encoding.
//!
//! Stations upload one report per interval as percent-encoded `key=value`
//! pairs joined by `&`, either as an HTTP query string or as a form body.
//! Keys use the station's native imperial vocabulary:
//!
//! | key | meaning | canonical field |
//! |---|---|---|
//! | `tempf`, `tempinf` | outdoor/indoor temperature (°F) | `temp_out_c`, `temp_in_c` |
//! | `humidity`, `humidityin` | outdoor/indoor humidity (%) | `humidity_out`, `humidity_in` |
//! | `windspeedmph`, `windgustmph` | wind / gust (mph) | `windspeed_kmh`, `wind_gust_kmh` |
//! | `winddir` | wind direction (deg) | `wind_direction` |
//! | `dateutc` | `YYYY-MM-DD HH:MM:SS` in UTC | `timestamp` |
//! | `PASSKEY`, `model`, `id` | metadata | `passkey`, `model`, `device_id` |
//!
//! Rain, pressure, solar, UV and battery keys are copied without conversion.
//!
//! # Example
//!
//! ```
//! use time::UtcOffset;
//! use time::macros::datetime;
//! use weather_types::{DecodeContext, TimestampPolicy, decode};
//!
//! let ctx = DecodeContext {
//!     policy: TimestampPolicy::Capture,
//!     configured_device_id: None,
//!     utc_offset: UtcOffset::from_hms(7, 0, 0).unwrap(),
//!     received_at: datetime!(2024-05-01 10:00:00),
//! };
//! let reading = decode("tempf=75&humidity=60&windspeedmph=5&PASSKEY=ABC", &ctx)?;
//! assert_eq!(reading.humidity_out, 60);
//! assert!((reading.temp_out_c - 23.889).abs() < 1e-3);
//! # Ok::<(), weather_types::DecodeError>(())
//! ```

use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::{Duration, PrimitiveDateTime, UtcOffset};

use crate::error::{DecodeError, DecodeResult};
use crate::types::{
    TelemetryReading, celsius_to_fahrenheit, fahrenheit_to_celsius, format_timestamp, kmh_to_mph,
    mph_to_kmh, parse_timestamp,
};

/// Device id used when neither the report nor the configuration names one.
pub const FALLBACK_DEVICE_ID: i64 = 99;

/// Substrings that identify text carrying a weather report.
pub const TELEMETRY_MARKERS: [&str; 4] = ["windspeedmph=", "tempf=", "humidity=", "dateutc="];

/// Keys a captured request line may start its payload with, in priority order.
const PAYLOAD_ANCHORS: [&str; 3] = ["PASSKEY=", "tempf=", "windspeedmph="];

/// Where the reading timestamp comes from.
///
/// Different ingestion channels have historically used different clocks,
/// so this is chosen per listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TimestampPolicy {
    /// Use the station's `dateutc` shifted by the configured UTC offset.
    /// Falls back to the capture time when `dateutc` is missing or unparseable.
    Device,
    /// Use the receiving host's local wall-clock capture time as-is.
    #[default]
    Capture,
}

/// Everything the decoder needs besides the wire text.
///
/// Keeping the clock reading and configuration here makes [`decode`] a
/// pure function of its arguments.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext {
    /// Timestamp policy of the calling listener.
    pub policy: TimestampPolicy,
    /// Statically configured station id, if any.
    pub configured_device_id: Option<i64>,
    /// Offset from UTC to local civil time.
    pub utc_offset: UtcOffset,
    /// Local wall-clock time at which the report was captured.
    pub received_at: PrimitiveDateTime,
}

/// Returns true if `text` looks like it contains a weather report.
pub fn looks_like_telemetry(text: &str) -> bool {
    TELEMETRY_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Pull the encoded report out of a captured request line.
///
/// The payload starts at the first anchor key found (checked in the order
/// `PASSKEY=`, `tempf=`, `windspeedmph=`) and runs to the next whitespace.
pub fn extract_payload(line: &str) -> Option<&str> {
    PAYLOAD_ANCHORS.iter().find_map(|anchor| {
        let start = line.find(anchor)?;
        line[start..].split_whitespace().next()
    })
}

/// Decoded `key=value` pairs with typed, lenient accessors.
struct WireFields(HashMap<String, String>);

impl WireFields {
    fn parse(raw: &str) -> DecodeResult<Self> {
        let raw = raw.trim();
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        if raw.is_empty() {
            return Err(DecodeError::Empty);
        }
        if !raw.contains('=') {
            return Err(DecodeError::not_key_value(raw));
        }

        let mut fields = HashMap::new();
        for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
            // Repeated keys keep their first value.
            fields
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        Ok(Self(fields))
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    fn try_float(&self, key: &str) -> Option<f64> {
        self.text(key)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    fn float(&self, key: &str) -> f64 {
        self.try_float(key).unwrap_or(0.0)
    }

    /// Fahrenheit input as Celsius; absent or malformed input is 0°C, not -17.8°C.
    fn celsius(&self, key: &str) -> f64 {
        self.try_float(key).map(fahrenheit_to_celsius).unwrap_or(0.0)
    }

    /// Integral fields also accept a decimal value, truncated toward zero.
    fn int(&self, key: &str) -> i64 {
        let Some(v) = self.text(key) else {
            return 0;
        };
        v.parse::<i64>()
            .ok()
            .or_else(|| {
                v.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
            .unwrap_or(0)
    }

    fn string(&self, key: &str) -> String {
        self.text(key).unwrap_or_default().to_string()
    }
}

/// Resolve the station id: report `id`, then configuration, then the fallback.
fn resolve_device_id(fields: &WireFields, configured: Option<i64>) -> i64 {
    fields
        .text("id")
        .and_then(|v| v.parse::<i64>().ok())
        .or(configured)
        .unwrap_or(FALLBACK_DEVICE_ID)
}

fn resolve_timestamp(fields: &WireFields, ctx: &DecodeContext) -> PrimitiveDateTime {
    match ctx.policy {
        TimestampPolicy::Capture => ctx.received_at,
        TimestampPolicy::Device => fields
            .text("dateutc")
            .and_then(|v| parse_timestamp(v).ok())
            .and_then(|utc| utc.checked_add(Duration::seconds(ctx.utc_offset.whole_seconds().into())))
            .unwrap_or(ctx.received_at),
    }
}

/// Decode one report into a canonical [`TelemetryReading`].
///
/// Temperatures are converted to Celsius and wind speeds to km/h; every
/// other field is copied. Absent or malformed numeric values become zero.
///
/// # Errors
///
/// Returns [`DecodeError`] only when the text is empty or contains no
/// `key=value` pairs.
pub fn decode(raw: &str, ctx: &DecodeContext) -> DecodeResult<TelemetryReading> {
    let fields = WireFields::parse(raw)?;

    let mut reading = TelemetryReading::empty(
        resolve_device_id(&fields, ctx.configured_device_id),
        resolve_timestamp(&fields, ctx),
    );

    reading.windspeed_kmh = mph_to_kmh(fields.float("windspeedmph"));
    reading.wind_gust_kmh = mph_to_kmh(fields.float("windgustmph"));
    reading.wind_direction = fields.int("winddir");
    reading.rain_rate_in = fields.float("rainratein");
    reading.daily_rain_in = fields.float("dailyrainin");
    reading.rain_today_in = fields.float("raintodayin");
    reading.total_rain_in = fields.float("totalrainin");
    reading.weekly_rain_in = fields.float("weeklyrainin");
    reading.monthly_rain_in = fields.float("monthlyrainin");
    reading.yearly_rain_in = fields.float("yearlyrainin");
    reading.max_daily_gust = fields.float("maxdailygust");
    reading.temp_in_c = fields.celsius("tempinf");
    reading.temp_out_c = fields.celsius("tempf");
    reading.humidity_in = fields.int("humidityin");
    reading.humidity_out = fields.int("humidity");
    reading.uv_index = fields.float("uv");
    reading.barometric_pressure_rel_in = fields.float("baromrelin");
    reading.barometric_pressure_abs_in = fields.float("baromabsin");
    reading.solar_radiation_wm2 = fields.float("solarradiation");
    reading.wh65_batt = fields.float("wh65batt");
    reading.model = fields.string("model");
    reading.passkey = fields.string("PASSKEY");

    Ok(reading)
}

/// Render a float with at most three decimals and no trailing zeros.
fn wire_float(value: f64) -> String {
    let s = format!("{:.3}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    match s {
        "" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

impl TelemetryReading {
    /// Encode this reading back into the station's wire vocabulary.
    ///
    /// Units are converted back to imperial and the local timestamp is
    /// shifted back to UTC using `utc_offset`.
    pub fn to_wire(&self, utc_offset: UtcOffset) -> String {
        let dateutc = self
            .timestamp
            .checked_sub(Duration::seconds(utc_offset.whole_seconds().into()))
            .unwrap_or(self.timestamp);

        form_urlencoded::Serializer::new(String::new())
            .append_pair("id", &self.device_id.to_string())
            .append_pair("PASSKEY", &self.passkey)
            .append_pair("model", &self.model)
            .append_pair("dateutc", &format_timestamp(dateutc))
            .append_pair("tempinf", &wire_float(celsius_to_fahrenheit(self.temp_in_c)))
            .append_pair("humidityin", &self.humidity_in.to_string())
            .append_pair("baromrelin", &wire_float(self.barometric_pressure_rel_in))
            .append_pair("baromabsin", &wire_float(self.barometric_pressure_abs_in))
            .append_pair("tempf", &wire_float(celsius_to_fahrenheit(self.temp_out_c)))
            .append_pair("humidity", &self.humidity_out.to_string())
            .append_pair("winddir", &self.wind_direction.to_string())
            .append_pair("windspeedmph", &wire_float(kmh_to_mph(self.windspeed_kmh)))
            .append_pair("windgustmph", &wire_float(kmh_to_mph(self.wind_gust_kmh)))
            .append_pair("maxdailygust", &wire_float(self.max_daily_gust))
            .append_pair("solarradiation", &wire_float(self.solar_radiation_wm2))
            .append_pair("uv", &wire_float(self.uv_index))
            .append_pair("rainratein", &wire_float(self.rain_rate_in))
            .append_pair("dailyrainin", &wire_float(self.daily_rain_in))
            .append_pair("raintodayin", &wire_float(self.rain_today_in))
            .append_pair("weeklyrainin", &wire_float(self.weekly_rain_in))
            .append_pair("monthlyrainin", &wire_float(self.monthly_rain_in))
            .append_pair("yearlyrainin", &wire_float(self.yearly_rain_in))
            .append_pair("totalrainin", &wire_float(self.total_rain_in))
            .append_pair("wh65batt", &wire_float(self.wh65_batt))
            .finish()
    }
}
