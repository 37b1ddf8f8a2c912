use thiserror::Error;

/// Per-message failures of the ingestion pipeline.
///
/// None of these is fatal to the process. The coordinator turns each one into
/// an annotation on the message's `IngestReport` and carries on with whatever
/// stages can still run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The payload could not be decoded into a `SensorReading`.
    /// No persistence, no actuation.
    #[error("malformed telemetry: {0}")]
    MalformedTelemetry(String),

    /// The inference service timed out, errored, or answered nonsense.
    /// The reading is persisted without a prediction and actuation is skipped.
    #[error("inference unavailable: {0}")]
    InferenceUnavailable(String),

    /// The reading could not be written. Broadcast still happens.
    #[error("reading store unavailable: {0}")]
    StoreUnavailable(String),

    /// A control or maintenance message could not be handed to the transport.
    #[error("actuation publish unavailable: {0}")]
    PublishUnavailable(String),
}

impl PipelineError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedTelemetry(reason.into())
    }
}
