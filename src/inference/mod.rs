pub mod models;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::PipelineError;

pub use self::models::{InferenceOutcome, InferenceRequest};
use self::models::PredictionResponse;

/// Obtains an irrigation decision for one reading.
///
/// Implementations make exactly one attempt per call. Retrying would risk
/// duplicate irrigation side effects and belongs beneath this contract, if
/// anywhere.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceOutcome, PipelineError>;
}

/// `InferenceClient` backed by the HTTP prediction service.
#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    http: Client,
    url: String,
}

impl HttpInferenceClient {
    /// Every request made by this client is bounded by `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build inference HTTP client")?;
        Ok(Self { http, url: url.into() })
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceOutcome, PipelineError> {
        debug!(url = %self.url, m = request.m, t = request.t, h = request.h, "Requesting inference");

        let bytes = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| unavailable("inference request failed", e))?
            .error_for_status()
            .map_err(|e| unavailable("inference service returned error status", e))?
            .bytes()
            .await
            .map_err(|e| unavailable("failed to read inference response body", e))?;

        serde_json::from_slice::<PredictionResponse>(&bytes)
            .map_err(|e| {
                PipelineError::InferenceUnavailable(format!(
                    "failed to deserialize inference response: {e}"
                ))
            })?
            .into_outcome()
    }
}

fn unavailable(context: &str, e: reqwest::Error) -> PipelineError {
    if e.is_timeout() {
        PipelineError::InferenceUnavailable(format!("{context}: timed out"))
    } else {
        PipelineError::InferenceUnavailable(format!("{context}: {e}"))
    }
}
