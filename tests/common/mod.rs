// Shared fakes for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempbox::config::Config;
use tempbox::{Actuator, SensorBus, SensorError, SensorId};

pub fn low() -> SensorId {
    "28:69:A1:69:35:19:01:5D".parse().unwrap()
}

pub fn high() -> SensorId {
    "28:D5:55:6B:35:19:01:99".parse().unwrap()
}

pub fn outside() -> SensorId {
    "28:96:5F:E3:22:20:01:62".parse().unwrap()
}

/// Default configuration with a single interior sensor, so the mean equals
/// the value the test sets.
pub fn single_sensor_config() -> Config {
    let mut config = Config::default();
    config.sensors.interior = vec![low()];
    config.sensors.reference = None;
    config
}

/// Sensor bus whose readings are set by the test.
#[derive(Clone, Default)]
pub struct FakeBus {
    readings: Arc<Mutex<HashMap<SensorId, Result<f64, SensorError>>>>,
}

impl FakeBus {
    pub fn set(&self, id: SensorId, celsius: f64) {
        self.readings.lock().unwrap().insert(id, Ok(celsius));
    }

    pub fn disconnect(&self, id: SensorId) {
        self.readings.lock().unwrap().insert(id, Err(SensorError::Disconnected(id)));
    }
}

#[async_trait]
impl SensorBus for FakeBus {
    async fn request_conversion(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    async fn read_celsius(&mut self, sensor: &SensorId) -> Result<f64, SensorError> {
        self.readings
            .lock()
            .unwrap()
            .get(sensor)
            .cloned()
            .unwrap_or(Err(SensorError::Disconnected(*sensor)))
    }

    async fn discover(&mut self) -> Result<Vec<SensorId>, SensorError> {
        Ok(self.readings.lock().unwrap().keys().copied().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Relay(bool),
    Fan(u8),
}

/// Actuator that records every command.
#[derive(Clone, Default)]
pub struct Recorder {
    commands: Arc<Mutex<Vec<Command>>>,
}

impl Recorder {
    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub fn last_relay(&self) -> Option<bool> {
        self.commands().into_iter().rev().find_map(|c| match c {
            Command::Relay(on) => Some(on),
            Command::Fan(_) => None,
        })
    }

    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }
}

#[async_trait]
impl Actuator for Recorder {
    async fn set_relay(&mut self, energized: bool) {
        self.commands.lock().unwrap().push(Command::Relay(energized));
    }

    async fn set_fan_duty(&mut self, percent: u8) {
        self.commands.lock().unwrap().push(Command::Fan(percent));
    }
}
