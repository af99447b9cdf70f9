// tempbox: enclosure temperature regulator

pub mod config;
pub mod control;
pub mod hardware;
pub mod regulation;
pub mod scheduler;
pub mod sensor;
pub mod telemetry;

pub use tempbox_shared::{Actuator, SensorBus, SensorError, SensorId, TemperatureSample, TimeInterface};
