// tempbox_shared: capability traits and sensor types shared by the host, the simulator and tests

pub mod hardware_traits;
pub mod sensor_id;

pub use hardware_traits::{Actuator, SensorBus, TimeInterface};
pub use sensor_id::{SensorId, SensorIdError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single sensor read or conversion.
///
/// Every variant is recoverable: the regulation loop skips the cycle and keeps
/// the previous actuator command in force.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("sensor {0} is disconnected")]
    Disconnected(SensorId),
    #[error("sensor conversion timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("sensor bus error: {0}")]
    Bus(String),
}

/// One reading taken during a control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSample {
    pub sensor: SensorId,
    /// `None` when the sensor could not be read this cycle.
    pub celsius: Option<f64>,
    #[serde(rename = "takenAtMs")]
    pub taken_at_ms: u64,
}

impl TemperatureSample {
    pub fn reading(sensor: SensorId, celsius: f64, taken_at_ms: u64) -> Self {
        Self { sensor, celsius: Some(celsius), taken_at_ms }
    }

    pub fn missing(sensor: SensorId, taken_at_ms: u64) -> Self {
        Self { sensor, celsius: None, taken_at_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_serializes_missing_reading_as_null() {
        let id: SensorId = "28:69:A1:69:35:19:01:5D".parse().unwrap();
        let json = serde_json::to_string(&TemperatureSample::missing(id, 1200)).unwrap();
        assert_eq!(json, r#"{"sensor":"28:69:A1:69:35:19:01:5D","celsius":null,"takenAtMs":1200}"#);
    }

    #[test]
    fn test_disconnected_error_names_sensor() {
        let id: SensorId = "28:D5:55:6B:35:19:01:99".parse().unwrap();
        let err = SensorError::Disconnected(id);
        assert_eq!(err.to_string(), "sensor 28:D5:55:6B:35:19:01:99 is disconnected");
    }
}
