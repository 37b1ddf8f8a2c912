use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgPoolOptions, PgPool};

use super::{HistoryPeriod, PersistedRecord, ReadingStore};
use crate::{error::PipelineError, inference::InferenceOutcome, telemetry::SensorReading};

pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// `ReadingStore` on the `sensor_readings` table. IDs and `recorded_at` are
/// assigned by Postgres.
#[derive(Debug, Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn append(
        &self,
        reading: &SensorReading,
        outcome: Option<&InferenceOutcome>,
    ) -> Result<PersistedRecord, PipelineError> {
        sqlx::query_as!(
            PersistedRecord,
            r#"
            INSERT INTO sensor_readings
                (device_id, soil_moisture_raw, soil_moisture_percent,
                 air_temperature, air_humidity, received_at,
                 prediction, duration_seconds, inference_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, device_id, soil_moisture_raw, soil_moisture_percent,
                      air_temperature, air_humidity, received_at,
                      prediction, duration_seconds, inference_error, recorded_at
            "#,
            reading.device_id,
            reading.soil_moisture_raw,
            reading.soil_moisture_percent,
            reading.air_temperature,
            reading.air_humidity,
            reading.received_at,
            outcome.and_then(InferenceOutcome::prediction),
            outcome.and_then(InferenceOutcome::time),
            outcome.and_then(|o| o.error.clone()),
        )
        .fetch_one(&self.pool)
        .await
        .map_err(store_unavailable)
    }

    async fn find(&self, limit: i64) -> Result<Vec<PersistedRecord>, PipelineError> {
        sqlx::query_as!(
            PersistedRecord,
            r#"
            SELECT id, device_id, soil_moisture_raw, soil_moisture_percent,
                   air_temperature, air_humidity, received_at,
                   prediction, duration_seconds, inference_error, recorded_at
            FROM sensor_readings
            ORDER BY recorded_at DESC
            LIMIT $1
            "#,
            limit,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_unavailable)
    }

    async fn find_by_period(
        &self,
        period: HistoryPeriod,
    ) -> Result<Vec<PersistedRecord>, PipelineError> {
        sqlx::query_as!(
            PersistedRecord,
            r#"
            SELECT id, device_id, soil_moisture_raw, soil_moisture_percent,
                   air_temperature, air_humidity, received_at,
                   prediction, duration_seconds, inference_error, recorded_at
            FROM sensor_readings
            WHERE recorded_at >= $1
            ORDER BY recorded_at DESC
            "#,
            period.since(Utc::now()),
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_unavailable)
    }
}

fn store_unavailable(e: sqlx::Error) -> PipelineError {
    PipelineError::StoreUnavailable(e.to_string())
}

// ---------------------------------------------------------------------------
// Tests
//
// These need a live Postgres (`DATABASE_URL`) and are ignored by default:
//   cargo test -- --ignored
//
// The query macros build from `.sqlx/` when `DATABASE_URL` is unset; refresh
// it with `cargo sqlx prepare` after changing a query.
// ---------------------------------------------------------------------------
