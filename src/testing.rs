//! Substitutable fakes for the pipeline stages.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    actuation::{ActuationPublisher, ControlCommand, MaintenanceKind},
    error::PipelineError,
    inference::{InferenceClient, InferenceOutcome, InferenceRequest},
    store::{HistoryPeriod, PersistedRecord, ReadingStore},
    telemetry::SensorReading,
};

pub(crate) fn reading(device_id: &str) -> SensorReading {
    SensorReading {
        device_id: device_id.to_owned(),
        soil_moisture_raw: 300.0,
        soil_moisture_percent: 35.0,
        air_temperature: 22.0,
        air_humidity: 55.0,
        received_at: Utc::now(),
    }
}

/// One scripted answer: wait `delay`, then return `result`.
pub(crate) struct Scripted {
    pub delay: Duration,
    pub result: Result<InferenceOutcome, PipelineError>,
}

/// Answers from a script, falling back to `default` once it runs out.
pub(crate) struct FakeInference {
    script: Mutex<VecDeque<Scripted>>,
    default: Result<InferenceOutcome, PipelineError>,
    pub calls: Mutex<Vec<InferenceRequest>>,
}

impl FakeInference {
    pub fn always(result: Result<InferenceOutcome, PipelineError>) -> Arc<Self> {
        Self::scripted(Vec::new(), result)
    }

    pub fn scripted(
        script: Vec<Scripted>,
        default: Result<InferenceOutcome, PipelineError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            default,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl InferenceClient for FakeInference {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceOutcome, PipelineError> {
        self.calls.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted { delay, result }) => {
                tokio::time::sleep(delay).await;
                result
            }
            None => self.default.clone(),
        }
    }
}

/// Records everything published; optionally fails every call.
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    pub commands: Mutex<Vec<ControlCommand>>,
    pub forwarded: Mutex<Vec<(MaintenanceKind, serde_json::Value)>>,
    pub fail: bool,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn commands(&self) -> Vec<ControlCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActuationPublisher for RecordingPublisher {
    async fn publish(&self, command: &ControlCommand) -> Result<(), PipelineError> {
        self.commands.lock().unwrap().push(command.clone());
        if self.fail {
            return Err(PipelineError::PublishUnavailable("broker offline".into()));
        }
        Ok(())
    }

    async fn forward(
        &self,
        kind: MaintenanceKind,
        payload: &serde_json::Value,
    ) -> Result<(), PipelineError> {
        self.forwarded.lock().unwrap().push((kind, payload.clone()));
        if self.fail {
            return Err(PipelineError::PublishUnavailable("broker offline".into()));
        }
        Ok(())
    }
}

/// A store that is always down.
pub(crate) struct UnavailableStore;

#[async_trait]
impl ReadingStore for UnavailableStore {
    async fn append(
        &self,
        _reading: &SensorReading,
        _outcome: Option<&InferenceOutcome>,
    ) -> Result<PersistedRecord, PipelineError> {
        Err(PipelineError::StoreUnavailable("connection refused".into()))
    }

    async fn find(&self, _limit: i64) -> Result<Vec<PersistedRecord>, PipelineError> {
        Err(PipelineError::StoreUnavailable("connection refused".into()))
    }

    async fn find_by_period(
        &self,
        _period: HistoryPeriod,
    ) -> Result<Vec<PersistedRecord>, PipelineError> {
        Err(PipelineError::StoreUnavailable("connection refused".into()))
    }
}
