use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    actuation::{ActuationPublisher, ControlCommand},
    error::PipelineError,
    inference::{InferenceClient, InferenceOutcome, InferenceRequest},
    realtime::{BroadcastEvent, Broadcaster},
    store::ReadingStore,
    telemetry::{self, SensorReading},
};

// ---------------------------------------------------------------------------
// Per-message state machine
//
//   Received → Decoded → Inferred(ok|failed) → Persisted(ok|failed)
//            → Broadcast → Actuated(sent|skipped|failed) → Done
//   Received → Rejected
//
// A failed inference still persists and broadcasts, then goes to `Skipped`.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Decoded,
    Inferred { ok: bool },
    Persisted { ok: bool },
    Broadcast,
    Actuated(ActuationState),
    Done,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuationState {
    Sent,
    Skipped,
    Failed,
}

/// What happened at the actuation stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actuation {
    Sent(ControlCommand),
    /// Inference failed, so there was no decision to act on.
    Skipped,
    Failed {
        command: ControlCommand,
        error: PipelineError,
    },
}

impl Actuation {
    fn state(&self) -> ActuationState {
        match self {
            Actuation::Sent(_) => ActuationState::Sent,
            Actuation::Skipped => ActuationState::Skipped,
            Actuation::Failed { .. } => ActuationState::Failed,
        }
    }
}

/// Annotated result of a message that made it past decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedReading {
    pub device_id: String,
    pub outcome: InferenceOutcome,
    /// Record ID, or why the append failed.
    pub persisted: Result<Uuid, PipelineError>,
    /// Number of observers the event was queued for.
    pub delivered_to: usize,
    pub actuation: Actuation,
    /// Every state the message passed through, in order.
    pub trail: Vec<PipelineState>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestReport {
    Done(ProcessedReading),
    Rejected {
        reason: PipelineError,
        trail: Vec<PipelineState>,
    },
}

impl IngestReport {
    pub fn trail(&self) -> &[PipelineState] {
        match self {
            IngestReport::Done(p) => &p.trail,
            IngestReport::Rejected { trail, .. } => trail,
        }
    }
}

// ---------------------------------------------------------------------------
// IngestionCoordinator
// ---------------------------------------------------------------------------

/// Runs decode → infer → persist → broadcast → actuate for one message.
///
/// Every stage failure is caught here and recorded on the report; nothing a
/// single message does can abort the pipeline for the next one. The
/// coordinator itself is stateless and shared by all lanes.
pub struct IngestionCoordinator {
    inference: Arc<dyn InferenceClient>,
    store: Arc<dyn ReadingStore>,
    broadcaster: Broadcaster,
    publisher: Arc<dyn ActuationPublisher>,
    inference_timeout: Duration,
}

impl IngestionCoordinator {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        store: Arc<dyn ReadingStore>,
        broadcaster: Broadcaster,
        publisher: Arc<dyn ActuationPublisher>,
        inference_timeout: Duration,
    ) -> Self {
        Self {
            inference,
            store,
            broadcaster,
            publisher,
            inference_timeout,
        }
    }

    /// Process one raw `sensor/data` payload end to end.
    pub async fn process(&self, payload: &[u8]) -> IngestReport {
        match telemetry::decode(payload, Utc::now()) {
            Ok(reading) => IngestReport::Done(self.process_reading(reading).await),
            Err(reason) => self.reject(reason).await,
        }
    }

    /// Terminal path for a payload that failed decoding: log it and tell every
    /// observer that ingestion failed. Nothing is persisted or actuated.
    pub async fn reject(&self, reason: PipelineError) -> IngestReport {
        warn!(error = %reason, "Rejected telemetry message");
        self.broadcaster.broadcast(BroadcastEvent::IngestionError).await;
        IngestReport::Rejected {
            reason,
            trail: vec![PipelineState::Received, PipelineState::Rejected],
        }
    }

    /// Run the post-decode stages for an already validated reading.
    pub async fn process_reading(&self, reading: SensorReading) -> ProcessedReading {
        let device_id = reading.device_id.clone();
        let mut trail = vec![PipelineState::Received, PipelineState::Decoded];

        // Inference
        let outcome = self.infer(&reading).await;
        advance(&mut trail, &device_id, PipelineState::Inferred { ok: outcome.is_available() });

        // Persistence: exactly once, whatever the outcome.
        let persisted = self.store.append(&reading, Some(&outcome)).await.map(|r| r.id);
        if let Err(e) = &persisted {
            warn!(device_id = %device_id, error = %e, "Failed to persist reading; broadcasting anyway");
        }
        advance(&mut trail, &device_id, PipelineState::Persisted { ok: persisted.is_ok() });

        // Fan-out
        let delivered_to = self
            .broadcaster
            .broadcast(BroadcastEvent::Reading {
                reading,
                outcome: outcome.clone(),
            })
            .await;
        advance(&mut trail, &device_id, PipelineState::Broadcast);

        // Actuation
        let actuation = match ControlCommand::from_outcome(&device_id, &outcome) {
            None => Actuation::Skipped,
            Some(command) => match self.publisher.publish(&command).await {
                Ok(()) => Actuation::Sent(command),
                Err(error) => {
                    warn!(device_id = %device_id, error = %error, "Failed to publish control command");
                    Actuation::Failed { command, error }
                }
            },
        };
        advance(&mut trail, &device_id, PipelineState::Actuated(actuation.state()));
        advance(&mut trail, &device_id, PipelineState::Done);

        info!(
            device_id = %device_id,
            prediction = ?outcome.prediction(),
            persisted = persisted.is_ok(),
            delivered_to,
            actuation = ?actuation.state(),
            "Reading processed"
        );

        ProcessedReading {
            device_id,
            outcome,
            persisted,
            delivered_to,
            actuation,
            trail,
        }
    }

    /// One bounded inference attempt. Failures come back as a failed outcome.
    async fn infer(&self, reading: &SensorReading) -> InferenceOutcome {
        let request = InferenceRequest::from(reading);
        let result = match time::timeout(self.inference_timeout, self.inference.infer(&request)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::InferenceUnavailable(format!(
                "no answer within {} ms",
                self.inference_timeout.as_millis()
            ))),
        };

        result.unwrap_or_else(|e| {
            warn!(device_id = %reading.device_id, error = %e, "Inference failed");
            InferenceOutcome::failed(e.to_string())
        })
    }
}

fn advance(trail: &mut Vec<PipelineState>, device_id: &str, state: PipelineState) {
    debug!(device_id = %device_id, state = ?state, "Pipeline transition");
    trail.push(state);
}
