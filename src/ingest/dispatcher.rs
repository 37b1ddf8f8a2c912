use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::mpsc,
    task::{JoinHandle, JoinSet},
    time,
};
use tracing::{debug, info, warn};

use super::IngestionCoordinator;
use crate::telemetry::{self, SensorReading};

struct Lane {
    tx: mpsc::UnboundedSender<SensorReading>,
    task: JoinHandle<()>,
}

/// Routes inbound payloads to per-device lanes.
///
/// Each device gets one task that runs the pipeline for its readings strictly
/// in arrival order; different devices proceed concurrently. `dispatch` never
/// waits on a lane, so a slow device cannot hold up intake for the others.
/// A lane that sees no reading for `idle_timeout` closes itself and is
/// reopened on the device's next reading.
pub struct Dispatcher {
    coordinator: Arc<IngestionCoordinator>,
    lanes: HashMap<String, Lane>,
    idle_timeout: Duration,
    rejections: JoinSet<()>,
}

impl Dispatcher {
    pub fn new(coordinator: Arc<IngestionCoordinator>, idle_timeout: Duration) -> Self {
        Self {
            coordinator,
            lanes: HashMap::new(),
            idle_timeout,
            rejections: JoinSet::new(),
        }
    }

    /// Decode `payload` on arrival and hand it to its device's lane.
    /// Malformed payloads are rejected on a task of their own.
    pub fn dispatch(&mut self, payload: &[u8]) {
        while self.rejections.try_join_next().is_some() {}
        self.lanes.retain(|_, lane| !lane.task.is_finished());

        match telemetry::decode(payload, Utc::now()) {
            Ok(reading) => self.enqueue(reading),
            Err(reason) => {
                let coordinator = Arc::clone(&self.coordinator);
                self.rejections.spawn(async move {
                    coordinator.reject(reason).await;
                });
            }
        }
    }

    /// Lanes whose task is still running.
    pub fn lane_count(&self) -> usize {
        self.lanes.values().filter(|lane| !lane.task.is_finished()).count()
    }

    /// Close every lane and wait for the readings already queued to finish.
    pub async fn drain(&mut self) {
        let lanes: Vec<_> = self.lanes.drain().map(|(_, lane)| lane).collect();
        info!(lanes = lanes.len(), "Draining ingestion lanes");
        for Lane { tx, task } in lanes {
            drop(tx);
            if let Err(e) = task.await {
                warn!(error = %e, "Ingestion lane ended abnormally");
            }
        }
        while self.rejections.join_next().await.is_some() {}
    }

    fn enqueue(&mut self, reading: SensorReading) {
        let reading = match self.lanes.get(&reading.device_id) {
            Some(lane) => match lane.tx.send(reading) {
                Ok(()) => return,
                Err(mpsc::error::SendError(reading)) => reading,
            },
            None => reading,
        };

        // No lane yet, or the old one closed itself. Its task may still be
        // finishing readings, so the new lane waits for it first.
        let device_id = reading.device_id.clone();
        let predecessor = self.lanes.remove(&device_id).map(|lane| lane.task);
        let lane = spawn_lane(
            Arc::clone(&self.coordinator),
            &device_id,
            self.idle_timeout,
            predecessor,
        );
        if lane.tx.send(reading).is_err() {
            warn!(device_id = %device_id, "New ingestion lane refused reading");
        }
        self.lanes.insert(device_id, lane);
    }
}

fn spawn_lane(
    coordinator: Arc<IngestionCoordinator>,
    device_id: &str,
    idle_timeout: Duration,
    predecessor: Option<JoinHandle<()>>,
) -> Lane {
    let (tx, mut rx) = mpsc::unbounded_channel::<SensorReading>();
    let device_id = device_id.to_owned();
    debug!(device_id = %device_id, "Opening ingestion lane");

    let task = tokio::spawn(async move {
        if let Some(previous) = predecessor {
            if let Err(e) = previous.await {
                warn!(device_id = %device_id, error = %e, "Previous ingestion lane ended abnormally");
            }
        }

        loop {
            match time::timeout(idle_timeout, rx.recv()).await {
                Ok(Some(reading)) => {
                    coordinator.process_reading(reading).await;
                }
                Ok(None) => break,
                Err(_) => {
                    // Refuse new readings, then finish any that raced in.
                    rx.close();
                    while let Some(reading) = rx.recv().await {
                        coordinator.process_reading(reading).await;
                    }
                    debug!(device_id = %device_id, "Closing idle ingestion lane");
                    break;
                }
            }
        }
    });

    Lane { tx, task }
}
