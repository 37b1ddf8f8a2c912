use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Wire payload (MQTT `sensor/data`)
//
//   { "deviceId": "A4:CF:12:...", "temp": 22.4, "humidity": 55,
//     "soilValue": 300, "soilPercent": 35 }
//
// Every field is optional at the serde level so that a missing field is
// reported by the decoder with its name instead of a generic serde message.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTelemetry {
    pub device_id: Option<String>,
    pub temp: Option<NumericValue>,
    pub humidity: Option<NumericValue>,
    pub soil_value: Option<NumericValue>,
    pub soil_percent: Option<NumericValue>,
}

// ---------------------------------------------------------------------------
// NumericValue
//
// Firmware builds disagree on whether readings are sent as JSON numbers or as
// their string rendering ("22.40"). Both are accepted; anything else (bool,
// object, array) fails deserialization of the whole payload.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumericValue {
    Number(f64),
    Text(String),
}

impl NumericValue {
    /// Returns the value if it is a finite number.
    pub fn as_finite(&self) -> Option<f64> {
        let v = match self {
            NumericValue::Number(v) => *v,
            NumericValue::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        v.is_finite().then_some(v)
    }
}

// ---------------------------------------------------------------------------
// SensorReading
// ---------------------------------------------------------------------------

/// One validated telemetry sample. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub device_id: String,
    /// Raw ADC value from the capacitive probe (0–1023 on the reference board)
    pub soil_moisture_raw: f64,
    /// Expected 0–100, not enforced
    pub soil_moisture_percent: f64,
    /// Degrees Celsius
    pub air_temperature: f64,
    /// Relative humidity percentage
    pub air_humidity: f64,
    pub received_at: DateTime<Utc>,
}
