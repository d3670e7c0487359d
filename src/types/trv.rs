//! Thermostatic radiator valve telemetry.
//!
//! TRVs report over the hub's broadcast channel, and the TRV proxy answers
//! queries with the same JSON object:
//! ```text
//! {"serial":"0538XX","cTemp":19.5,"cTarg":21.0,"batt":2.99,"output":80}
//! ```
//! Every field is optional. Fields the device did not report stay `None`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Battery voltage that maps to 0%.
pub const BATTERY_EMPTY_VOLTS: f64 = 2.22;

/// Percentage points per volt above [`BATTERY_EMPTY_VOLTS`].
pub const BATTERY_PERCENT_PER_VOLT: f64 = 110.0;

/// One TRV telemetry object as sent by the hub or the proxy.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TrvReading {
    /// Device serial.
    #[serde(default, deserialize_with = "lenient_string")]
    pub serial: Option<String>,
    /// Current temperature in Celsius.
    #[serde(rename = "cTemp", default, deserialize_with = "lenient_f64")]
    pub current_temperature: Option<f64>,
    /// Target temperature in Celsius.
    #[serde(rename = "cTarg", default, deserialize_with = "lenient_f64")]
    pub target_temperature: Option<f64>,
    /// Battery voltage.
    #[serde(rename = "batt", default, deserialize_with = "lenient_f64")]
    pub battery_voltage: Option<f64>,
    /// Valve output.
    #[serde(default, deserialize_with = "lenient_output")]
    pub output: Option<u8>,
    /// Error reported by the proxy.
    #[serde(default, deserialize_with = "lenient_string")]
    pub error: Option<String>,
}

impl TrvReading {
    /// Parses a JSON telemetry object.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Returns the battery level as a rough percentage.
    #[must_use]
    pub fn battery_percent(&self) -> Option<i32> {
        self.battery_voltage.map(battery_percentage)
    }

    /// Returns the reported fields as a status.
    #[must_use]
    pub fn status(&self) -> TrvStatus {
        TrvStatus {
            temperature: self.current_temperature,
            target: self.target_temperature,
            battery_percent: self.battery_percent(),
            output: self.output,
        }
    }
}

/// TRV status returned to callers.
///
/// An all-`None` status means nothing is known about the device.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrvStatus {
    /// Current temperature in Celsius.
    pub temperature: Option<f64>,
    /// Target temperature in Celsius.
    pub target: Option<f64>,
    /// Battery level in percent.
    pub battery_percent: Option<i32>,
    /// Valve output.
    pub output: Option<u8>,
}

impl TrvStatus {
    /// Returns true if no field is known.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.target.is_none()
            && self.battery_percent.is_none()
            && self.output.is_none()
    }

    /// Returns the status as `(temperature, target, battery, output)`.
    #[must_use]
    pub const fn as_tuple(&self) -> (Option<f64>, Option<f64>, Option<i32>, Option<u8>) {
        (
            self.temperature,
            self.target,
            self.battery_percent,
            self.output,
        )
    }
}

/// Converts a battery voltage to a rough percentage.
///
/// `floor((volts - 2.22) * 110)`, unclamped.
#[must_use]
pub fn battery_percentage(volts: f64) -> i32 {
    ((volts - BATTERY_EMPTY_VOLTS) * BATTERY_PERCENT_PER_VOLT).floor() as i32
}

// Fields of the wrong JSON type are treated as absent rather than failing
// the whole object.

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_f64())
}

fn lenient_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_output<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u8>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(on) => Some(u8::from(on)),
        Value::Number(n) => n.as_u64().and_then(|v| u8::try_from(v).ok()),
        _ => None,
    })
}
