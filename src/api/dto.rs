use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::PersistedRecord;

/// A stored reading, in the field naming the dashboard uses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SensorRecordDto {
    pub id: Uuid,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Raw soil moisture reading
    pub h_soil: f64,
    /// Soil moisture percentage
    pub h_soil_pourcentage: f64,
    /// Degrees Celsius
    pub t: f64,
    /// Relative humidity percentage
    pub h_air: f64,
    /// `1` irrigate, `0` don't, `null` if inference failed
    pub prediction: Option<i16>,
    /// Irrigation duration in seconds; `null` unless `prediction == 1`
    pub time: Option<f64>,
    /// Why inference failed, if it did
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
    /// When the record was stored
    pub timestamp: DateTime<Utc>,
}

impl From<PersistedRecord> for SensorRecordDto {
    fn from(r: PersistedRecord) -> Self {
        Self {
            id: r.id,
            device_id: r.device_id,
            h_soil: r.soil_moisture_raw,
            h_soil_pourcentage: r.soil_moisture_percent,
            t: r.air_temperature,
            h_air: r.air_humidity,
            prediction: r.prediction,
            time: r.duration_seconds,
            error: r.inference_error,
            received_at: r.received_at,
            timestamp: r.recorded_at,
        }
    }
}
