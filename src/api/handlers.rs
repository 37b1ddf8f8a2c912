use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::{IntoParams, OpenApi};

use super::{dto::SensorRecordDto, errors::AppError, AppState};
use crate::store::HistoryPeriod;

/// Rows returned by the unfiltered history endpoint.
const HISTORY_LIMIT: i64 = 100;

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
pub struct PeriodParams {
    /// One of `24h`, `7d`, `30d`
    pub period: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Fetch the 100 most recent readings across all devices, newest first.
#[utoipa::path(
    get,
    path = "/api/sensor-data/history",
    responses(
        (status = 200, description = "Most recent readings", body = Vec<SensorRecordDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "history"
)]
pub async fn get_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<SensorRecordDto>>, AppError> {
    let rows = state.store.find(HISTORY_LIMIT).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Fetch every reading recorded in the last `24h`, `7d` or `30d`, newest first.
#[utoipa::path(
    get,
    path = "/api/sensor-data/history/period",
    params(PeriodParams),
    responses(
        (status = 200, description = "Readings within the period", body = Vec<SensorRecordDto>),
        (status = 400, description = "Missing or invalid period"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "history"
)]
pub async fn get_history_period(
    State(state): State<AppState>,
    Query(params): Query<PeriodParams>,
) -> Result<Json<Vec<SensorRecordDto>>, AppError> {
    let period = params
        .period
        .as_deref()
        .unwrap_or_default()
        .parse::<HistoryPeriod>()
        .map_err(AppError::bad_request)?;

    let rows = state.store.find_by_period(period).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(get_history, get_history_period, health),
    components(schemas(SensorRecordDto)),
    tags(
        (name = "history", description = "Stored sensor readings"),
        (name = "system",  description = "System endpoints"),
    ),
    info(
        title = "Irrigation Service API",
        version = "0.1.0",
        description = "History of ingested soil and climate telemetry"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
