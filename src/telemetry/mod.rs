pub mod intake;
pub mod models;

use chrono::{DateTime, Utc};

use crate::error::PipelineError;

pub use self::models::SensorReading;
use self::models::{NumericValue, RawTelemetry};

/// Decode a raw `sensor/data` payload into a validated `SensorReading`.
///
/// `deviceId` must be a non-empty string (surrounding whitespace is trimmed).
/// `temp`, `humidity`, `soilValue` and `soilPercent` must all be present and
/// hold finite numbers. `received_at` is stamped by the caller so that the
/// timestamp reflects arrival, not processing.
pub fn decode(payload: &[u8], received_at: DateTime<Utc>) -> Result<SensorReading, PipelineError> {
    let raw: RawTelemetry = serde_json::from_slice(payload)
        .map_err(|e| PipelineError::malformed(format!("invalid JSON payload: {e}")))?;

    let device_id = raw
        .device_id
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| PipelineError::malformed("deviceId is missing or empty"))?;

    Ok(SensorReading {
        soil_moisture_raw: finite("soilValue", raw.soil_value)?,
        soil_moisture_percent: finite("soilPercent", raw.soil_percent)?,
        air_temperature: finite("temp", raw.temp)?,
        air_humidity: finite("humidity", raw.humidity)?,
        device_id,
        received_at,
    })
}

fn finite(field: &str, value: Option<NumericValue>) -> Result<f64, PipelineError> {
    let value = value.ok_or_else(|| PipelineError::malformed(format!("{field} is missing")))?;
    value
        .as_finite()
        .ok_or_else(|| PipelineError::malformed(format!("{field} is not a finite number: {value:?}")))
}
