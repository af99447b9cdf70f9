// Trait-based capabilities the regulation core drives (shared)

use crate::{SensorError, SensorId};
use async_trait::async_trait;

/// A bus of digital temperature sensors.
///
/// `read_celsius` returns the value latched by the most recent
/// `request_conversion`. A sensor that does not answer is reported as
/// `SensorError::Disconnected`, never as a magic temperature.
#[async_trait]
pub trait SensorBus: Send {
    /// Start a conversion on every sensor of the bus and wait for it to finish.
    async fn request_conversion(&mut self) -> Result<(), SensorError>;

    async fn read_celsius(&mut self, sensor: &SensorId) -> Result<f64, SensorError>;

    /// List the sensors currently present on the bus.
    async fn discover(&mut self) -> Result<Vec<SensorId>, SensorError>;
}

/// Relay and fan outputs. Commands are fire-and-forget.
#[async_trait]
pub trait Actuator: Send {
    async fn set_relay(&mut self, energized: bool);

    /// `percent` is in `0..=100`.
    async fn set_fan_duty(&mut self, percent: u8);
}

/// Monotonic millisecond clock driving the control loop.
pub trait TimeInterface: Send + Sync {
    fn now_ms(&self) -> u64;
}
