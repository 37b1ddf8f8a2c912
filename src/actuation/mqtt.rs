use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tracing::debug;

use super::{ActuationPublisher, ControlCommand, MaintenanceKind};
use crate::{config::Config, error::PipelineError};

/// Capacity of the request channel between `AsyncClient` and its event loop.
const REQUEST_CAPACITY: usize = 64;

/// Build the shared MQTT client and the event loop that drives it.
///
/// The event loop must be polled (see `telemetry::intake::run`) for anything
/// published through the client to leave the process.
pub fn connect(config: &Config) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(
        config.mqtt_client_id.clone(),
        config.mqtt_host.clone(),
        config.mqtt_port,
    );
    options.set_keep_alive(config.mqtt_keep_alive);
    AsyncClient::new(options, REQUEST_CAPACITY)
}

/// `ActuationPublisher` over MQTT, QoS 1.
///
/// Uses `try_publish` so that a stalled event loop surfaces as
/// `PublishUnavailable` instead of blocking the pipeline.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    control_topic: String,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, control_topic: impl Into<String>) -> Self {
        Self {
            client,
            control_topic: control_topic.into(),
        }
    }

    /// Control topic for `device_id`; `{device_id}` in the configured topic is
    /// replaced, otherwise the topic is used as is.
    pub fn control_topic_for(&self, device_id: &str) -> String {
        self.control_topic.replace("{device_id}", device_id)
    }

    fn send(&self, topic: String, payload: Vec<u8>) -> Result<(), PipelineError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| PipelineError::PublishUnavailable(e.to_string()))
    }
}

#[async_trait]
impl ActuationPublisher for MqttPublisher {
    async fn publish(&self, command: &ControlCommand) -> Result<(), PipelineError> {
        let topic = self.control_topic_for(&command.device_id);
        let payload = serde_json::to_vec(&command.message())
            .map_err(|e| PipelineError::PublishUnavailable(e.to_string()))?;
        debug!(device_id = %command.device_id, topic = %topic, "Publishing control command");
        self.send(topic, payload)
    }

    async fn forward(
        &self,
        kind: MaintenanceKind,
        payload: &serde_json::Value,
    ) -> Result<(), PipelineError> {
        let payload = serde_json::to_vec(payload)
            .map_err(|e| PipelineError::PublishUnavailable(e.to_string()))?;
        debug!(kind = %kind, topic = kind.topic(), "Forwarding maintenance request");
        self.send(kind.topic().to_owned(), payload)
    }
}
