pub mod authorization;
pub mod broadcaster;
pub mod ws;

use std::fmt;

use serde_json::{json, Value};

use crate::{inference::InferenceOutcome, telemetry::SensorReading};

pub use self::{
    authorization::{AuthorizationFilter, ProfileDirectory, ProfileFilter, StaticProfileDirectory},
    broadcaster::{Broadcaster, ObserverHandle},
};

/// Event name observers listen on.
pub const SENSOR_DATA_EVENT: &str = "sensorData";

const INFERENCE_ERROR_MESSAGE: &str = "Prediction API error";
const MALFORMED_ERROR_MESSAGE: &str = "Invalid MQTT data format";

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs-{}", self.0)
    }
}

/// A live connection and the (at most one) device it follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverSubscription {
    pub id: ObserverId,
    /// User name the connection identified as, if any.
    pub user: Option<String>,
    pub device_id: Option<String>,
}

// ---------------------------------------------------------------------------
// BroadcastEvent
// ---------------------------------------------------------------------------

/// What the coordinator fans out after persisting a reading.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastEvent {
    /// A decoded reading and its outcome. A failed outcome is flagged with
    /// `error` in place of `prediction`/`time`.
    Reading {
        reading: SensorReading,
        outcome: InferenceOutcome,
    },
    /// A message could not be decoded. Carries no device, so it is delivered
    /// to every observer.
    IngestionError,
}

impl BroadcastEvent {
    /// Device the event belongs to; `None` for device-less events.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            BroadcastEvent::Reading { reading, .. } => Some(&reading.device_id),
            BroadcastEvent::IngestionError => None,
        }
    }

    /// The `data` object sent to observers.
    ///
    /// Field names are the ones the dashboard reads: `t`, `h_air`, `h_soil`,
    /// `h_soil_pourcentage`, and `ts` in Unix seconds.
    pub fn data(&self) -> Value {
        match self {
            BroadcastEvent::Reading { reading, outcome } => {
                let mut data = json!({
                    "deviceId": reading.device_id,
                    "t": reading.air_temperature,
                    "h_air": reading.air_humidity,
                    "h_soil": reading.soil_moisture_raw,
                    "h_soil_pourcentage": reading.soil_moisture_percent,
                    "ts": reading.received_at.timestamp(),
                });
                if outcome.is_available() {
                    data["prediction"] = json!(outcome.prediction());
                    data["time"] = json!(outcome.time());
                } else {
                    data["error"] = json!(INFERENCE_ERROR_MESSAGE);
                }
                data
            }
            BroadcastEvent::IngestionError => json!({ "error": MALFORMED_ERROR_MESSAGE }),
        }
    }

    /// Full frame: `{"event":"sensorData","data":{...}}`.
    pub fn to_frame(&self) -> Value {
        json!({ "event": SENSOR_DATA_EVENT, "data": self.data() })
    }

    pub fn is_error(&self) -> bool {
        match self {
            BroadcastEvent::Reading { outcome, .. } => !outcome.is_available(),
            BroadcastEvent::IngestionError => true,
        }
    }
}
