use serde::{Deserialize, Serialize};

use crate::{error::PipelineError, telemetry::SensorReading};

// ---------------------------------------------------------------------------
// Request: POST {INFERENCE_URL}
// ---------------------------------------------------------------------------

/// Body sent to the inference service. Field names are the service's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Raw soil moisture reading
    pub m: f64,
    /// Air temperature, °C
    pub t: f64,
    /// Air humidity, %
    pub h: f64,
}

impl From<&SensorReading> for InferenceRequest {
    fn from(r: &SensorReading) -> Self {
        Self {
            m: r.soil_moisture_raw,
            t: r.air_temperature,
            h: r.air_humidity,
        }
    }
}

// ---------------------------------------------------------------------------
// Response
//
//   { "prediction": 1, "time": 90 }      irrigate for 90 seconds
//   { "prediction": 0, "time": null }    no irrigation (time may be absent)
//
// `time` is always interpreted as seconds.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PredictionResponse {
    pub prediction: Option<i64>,
    #[serde(default)]
    pub time: Option<f64>,
}

impl PredictionResponse {
    /// Validate the service answer and convert it into an `InferenceOutcome`.
    pub fn into_outcome(self) -> Result<InferenceOutcome, PipelineError> {
        match self.prediction {
            Some(0) => Ok(InferenceOutcome::no_irrigation()),
            Some(1) => match self.time {
                Some(t) if t.is_finite() => Ok(InferenceOutcome::irrigate(t.max(0.0))),
                Some(t) => Err(PipelineError::InferenceUnavailable(format!(
                    "irrigation duration is not a finite number: {t}"
                ))),
                None => Err(PipelineError::InferenceUnavailable(
                    "prediction=1 without an irrigation duration".to_owned(),
                )),
            },
            Some(other) => Err(PipelineError::InferenceUnavailable(format!(
                "unexpected prediction value: {other}"
            ))),
            None => Err(PipelineError::InferenceUnavailable(
                "response has no prediction field".to_owned(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// InferenceOutcome
// ---------------------------------------------------------------------------

/// The inference result attached to exactly one reading.
///
/// `irrigation_needed` is `None` when no decision could be obtained, in which
/// case `error` carries the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceOutcome {
    pub irrigation_needed: Option<bool>,
    /// Seconds, ≥ 0. Only meaningful when `irrigation_needed == Some(true)`.
    pub recommended_duration_seconds: f64,
    pub error: Option<String>,
}

impl InferenceOutcome {
    pub fn irrigate(duration_seconds: f64) -> Self {
        Self {
            irrigation_needed: Some(true),
            recommended_duration_seconds: duration_seconds,
            error: None,
        }
    }

    pub fn no_irrigation() -> Self {
        Self {
            irrigation_needed: Some(false),
            recommended_duration_seconds: 0.0,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            irrigation_needed: None,
            recommended_duration_seconds: 0.0,
            error: Some(reason.into()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.irrigation_needed.is_some()
    }

    /// Wire/DB encoding of the decision: `1`, `0`, or `None` on failure.
    pub fn prediction(&self) -> Option<i16> {
        self.irrigation_needed.map(i16::from)
    }

    /// Duration as reported downstream: `Some` only when irrigation is needed.
    pub fn time(&self) -> Option<f64> {
        (self.irrigation_needed == Some(true)).then_some(self.recommended_duration_seconds)
    }
}
