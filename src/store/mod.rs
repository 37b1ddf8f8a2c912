pub mod memory;
pub mod postgres;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{error::PipelineError, inference::InferenceOutcome, telemetry::SensorReading};

pub use self::{memory::MemoryReadingStore, postgres::PgReadingStore};

// ---------------------------------------------------------------------------
// PersistedRecord
// ---------------------------------------------------------------------------

/// A reading together with its inference outcome, as stored.
///
/// `prediction`, `duration_seconds` and `inference_error` follow
/// `InferenceOutcome::{prediction, time, error}`.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub id: Uuid,
    pub device_id: String,
    pub soil_moisture_raw: f64,
    pub soil_moisture_percent: f64,
    /// Degrees Celsius
    pub air_temperature: f64,
    /// Relative humidity percentage
    pub air_humidity: f64,
    pub received_at: DateTime<Utc>,
    /// `1` irrigate, `0` don't, `None` when inference failed
    pub prediction: Option<i16>,
    /// Seconds; set only when `prediction == Some(1)`
    pub duration_seconds: Option<f64>,
    pub inference_error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// HistoryPeriod
// ---------------------------------------------------------------------------

/// Look-back windows supported by the history endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPeriod {
    Day,
    Week,
    Month,
}

impl HistoryPeriod {
    pub fn duration(self) -> Duration {
        match self {
            HistoryPeriod::Day => Duration::hours(24),
            HistoryPeriod::Week => Duration::days(7),
            HistoryPeriod::Month => Duration::days(30),
        }
    }

    /// Start of the window when it ends at `now`.
    pub fn since(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }
}

impl FromStr for HistoryPeriod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "24h" => Ok(Self::Day),
            "7d" => Ok(Self::Week),
            "30d" => Ok(Self::Month),
            other => Err(anyhow::anyhow!(
                "invalid period {other:?}; use 24h, 7d, or 30d"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// ReadingStore
// ---------------------------------------------------------------------------

/// Append-only durable storage for readings.
///
/// The core only ever calls `append`. `find` and `find_by_period` serve the
/// history endpoints. Implementations must accept concurrent calls.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn append(
        &self,
        reading: &SensorReading,
        outcome: Option<&InferenceOutcome>,
    ) -> Result<PersistedRecord, PipelineError>;

    /// The `limit` most recently recorded rows, newest first.
    async fn find(&self, limit: i64) -> Result<Vec<PersistedRecord>, PipelineError>;

    /// Every row recorded within `period` of now, newest first.
    async fn find_by_period(
        &self,
        period: HistoryPeriod,
    ) -> Result<Vec<PersistedRecord>, PipelineError>;
}
