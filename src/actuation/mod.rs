pub mod mqtt;

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::PipelineError, inference::InferenceOutcome};

pub use self::mqtt::MqttPublisher;

// ---------------------------------------------------------------------------
// ControlCommand
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PumpAction {
    On,
    Off,
}

/// Command sent back to the device that produced a reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub device_id: String,
    pub action: PumpAction,
    pub duration_seconds: u64,
}

impl ControlCommand {
    /// Derive the command for a reading's outcome.
    ///
    /// Returns `None` when inference failed: with no decision there is nothing
    /// to command, and `OFF` would itself be a command with side effects.
    /// Fractional durations are rounded up so a short positive recommendation
    /// never becomes a zero-length run.
    pub fn from_outcome(device_id: &str, outcome: &InferenceOutcome) -> Option<Self> {
        let (action, duration_seconds) = match outcome.irrigation_needed? {
            true => (
                PumpAction::On,
                outcome.recommended_duration_seconds.max(0.0).ceil() as u64,
            ),
            false => (PumpAction::Off, 0),
        };
        Some(Self {
            device_id: device_id.to_owned(),
            action,
            duration_seconds,
        })
    }

    pub fn message(&self) -> ControlMessage {
        ControlMessage {
            pump: self.action,
            duration: self.duration_seconds,
        }
    }
}

/// Wire body on the control topic: `{"pump":"ON","duration":90}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub pump: PumpAction,
    /// Seconds
    pub duration: u64,
}

// ---------------------------------------------------------------------------
// Maintenance requests relayed from observers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceKind {
    Calibrate,
    Reset,
}

impl MaintenanceKind {
    pub fn topic(self) -> &'static str {
        match self {
            MaintenanceKind::Calibrate => "sensor/calibrate",
            MaintenanceKind::Reset => "sensor/reset",
        }
    }
}

impl FromStr for MaintenanceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "calibrate" => Ok(Self::Calibrate),
            "reset" => Ok(Self::Reset),
            other => Err(anyhow::anyhow!("unknown maintenance request: {other:?}")),
        }
    }
}

impl fmt::Display for MaintenanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MaintenanceKind::Calibrate => "calibrate",
            MaintenanceKind::Reset => "reset",
        })
    }
}

// ---------------------------------------------------------------------------
// ActuationPublisher
// ---------------------------------------------------------------------------

/// Outbound side of the device transport. Shared by every pipeline instance.
#[async_trait]
pub trait ActuationPublisher: Send + Sync {
    async fn publish(&self, command: &ControlCommand) -> Result<(), PipelineError>;

    /// Relay a calibrate/reset request to the sensors.
    async fn forward(
        &self,
        kind: MaintenanceKind,
        payload: &serde_json::Value,
    ) -> Result<(), PipelineError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn irrigation_needed_maps_to_on() {
        let cmd = ControlCommand::from_outcome("dev1", &InferenceOutcome::irrigate(120.0)).unwrap();
        assert_eq!(cmd.action, PumpAction::On);
        assert_eq!(cmd.duration_seconds, 120);
        assert_eq!(cmd.device_id, "dev1");
    }

    #[test]
    fn no_irrigation_maps_to_off_zero() {
        let cmd = ControlCommand::from_outcome("dev1", &InferenceOutcome::no_irrigation()).unwrap();
        assert_eq!(cmd.action, PumpAction::Off);
        assert_eq!(cmd.duration_seconds, 0);
    }

    #[test]
    fn failed_inference_yields_no_command() {
        assert!(ControlCommand::from_outcome("dev1", &InferenceOutcome::failed("x")).is_none());
    }

    #[test]
    fn fractional_duration_rounds_up() {
        let cmd = ControlCommand::from_outcome("dev1", &InferenceOutcome::irrigate(0.2)).unwrap();
        assert_eq!(cmd.duration_seconds, 1);
    }

    #[test]
    fn message_wire_format() {
        let on = ControlCommand::from_outcome("dev1", &InferenceOutcome::irrigate(90.0)).unwrap();
        assert_eq!(
            serde_json::to_value(on.message()).unwrap(),
            json!({ "pump": "ON", "duration": 90 })
        );

        let off = ControlCommand::from_outcome("dev1", &InferenceOutcome::no_irrigation()).unwrap();
        assert_eq!(
            serde_json::to_value(off.message()).unwrap(),
            json!({ "pump": "OFF", "duration": 0 })
        );
    }

    #[test]
    fn maintenance_kind_from_str() {
        assert_eq!("calibrate".parse::<MaintenanceKind>().unwrap(), MaintenanceKind::Calibrate);
        assert_eq!("reset".parse::<MaintenanceKind>().unwrap(), MaintenanceKind::Reset);
        assert!("reboot".parse::<MaintenanceKind>().is_err());
        assert_eq!(MaintenanceKind::Reset.topic(), "sensor/reset");
    }
}
