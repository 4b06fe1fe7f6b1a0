//! Telemetry payload sampling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::BTreeMap;

/// Readings above this temperature raise the alert property.
pub const TEMPERATURE_ALERT_THRESHOLD: f64 = 30.0;

/// One outgoing telemetry message.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    /// Equal to the publisher sequence number
    pub message_id: u64,
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub content_encoding: &'static str,
    /// Application properties
    pub properties: BTreeMap<String, String>,
}

/// Produces the next payload for the publish loop.
pub trait TelemetrySampler: Send {
    fn next_message(&mut self, sequence: u64) -> TelemetryMessage;
}

/// Simulated temperature and humidity sensor.
#[derive(Debug)]
pub struct SensorSampler {
    rng: StdRng,
}

impl SensorSampler {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible readings, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SensorSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySampler for SensorSampler {
    fn next_message(&mut self, sequence: u64) -> TelemetryMessage {
        let temperature: f64 = self.rng.gen_range(20.0..35.0);
        let humidity: f64 = self.rng.gen_range(60.0..80.0);
        let alert = temperature > TEMPERATURE_ALERT_THRESHOLD;
        // Finite readings never render as null.
        let body = json!({ "temperature": temperature, "humidity": humidity });

        let mut properties = BTreeMap::new();
        properties.insert("temperatureAlert".to_string(), alert.to_string());

        TelemetryMessage {
            message_id: sequence,
            body: body.to_string().into_bytes(),
            content_type: "application/json",
            content_encoding: "utf-8",
            properties,
        }
    }
}
