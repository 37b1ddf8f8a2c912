use std::{collections::HashMap, time::Duration};

use anyhow::{bail, Context, Result};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. Readings are kept in memory when unset.
    pub database_url: Option<String>,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub mqtt_keep_alive: Duration,
    /// Topic the field devices publish telemetry on.
    pub telemetry_topic: String,
    /// Topic control commands are published on. `{device_id}` is substituted.
    pub control_topic: String,
    pub inference_url: String,
    /// Upper bound on a single inference call.
    pub inference_timeout: Duration,
    pub server_host: String,
    pub server_port: u16,
    /// Per-observer queue length before events are dropped for that observer.
    pub observer_queue_capacity: usize,
    /// A device's ingestion lane closes after this long without a reading.
    pub lane_idle_timeout: Duration,
    /// Maps user name → registered device IDs.
    /// Format: `"user1:device1,user1:device2,user2:device3"`.
    pub observer_devices: HashMap<String, Vec<String>>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let inference_timeout_ms: u64 = optional("INFERENCE_TIMEOUT_MS", "5000")
            .parse()
            .context("INFERENCE_TIMEOUT_MS must be a positive integer")?;
        if inference_timeout_ms == 0 {
            bail!("INFERENCE_TIMEOUT_MS must be greater than zero");
        }

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            mqtt_host: optional("MQTT_HOST", "localhost"),
            mqtt_port: optional("MQTT_PORT", "1883")
                .parse()
                .context("MQTT_PORT must be a valid port number")?,
            mqtt_client_id: std::env::var("MQTT_CLIENT_ID")
                .unwrap_or_else(|_| format!("irrigation_service_{}", Uuid::new_v4().simple())),
            mqtt_keep_alive: Duration::from_secs(
                optional("MQTT_KEEP_ALIVE_SECS", "60")
                    .parse()
                    .context("MQTT_KEEP_ALIVE_SECS must be a positive integer")?,
            ),
            telemetry_topic: optional("TELEMETRY_TOPIC", "sensor/data"),
            control_topic: optional("CONTROL_TOPIC", "pump/control"),
            inference_url: optional("INFERENCE_URL", "http://localhost:5000/predict"),
            inference_timeout: Duration::from_millis(inference_timeout_ms),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "3000")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            observer_queue_capacity: positive("OBSERVER_QUEUE_CAPACITY", "64")?,
            lane_idle_timeout: Duration::from_secs(
                positive("LANE_IDLE_SECS", "300")? as u64,
            ),
            observer_devices: parse_observer_devices(&optional("OBSERVER_DEVICES", ""))?,
        })
    }
}

/// Parse `"user1:dev1,user1:dev2,user2:dev3"` into user → device IDs.
///
/// A user may appear several times; device order is preserved so the first
/// entry acts as the user's default device.
fn parse_observer_devices(raw: &str) -> Result<HashMap<String, Vec<String>>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (user, device) = entry.split_once(':').with_context(|| {
            format!("OBSERVER_DEVICES entry must be 'user:device_id', got: {entry:?}")
        })?;
        let (user, device) = (user.trim(), device.trim());
        if user.is_empty() || device.is_empty() {
            bail!("OBSERVER_DEVICES entry has an empty user or device: {entry:?}");
        }
        let devices = map.entry(user.to_owned()).or_default();
        if !devices.iter().any(|d| d == device) {
            devices.push(device.to_owned());
        }
    }
    Ok(map)
}

fn positive(key: &str, default: &str) -> Result<usize> {
    let value: usize = optional(key, default)
        .parse()
        .with_context(|| format!("{key} must be a positive integer"))?;
    if value == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(value)
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
