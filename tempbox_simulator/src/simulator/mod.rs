pub mod enclosure;

use async_trait::async_trait;
use enclosure::{EnclosureModel, SimConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tempbox_shared::{Actuator, SensorBus, SensorError, SensorId, TimeInterface};

/// Physics integration step.
const PHYSICS_STEP_MS: u64 = 100;

/// DS18B20 12-bit resolution.
const SENSOR_LSB_C: f64 = 1.0 / 16.0;

#[derive(Debug, Clone)]
struct SimSensor {
    id: SensorId,
    offset_c: f64,
    tracks_ambient: bool,
    measured_c: f64,
    latched_c: Option<f64>,
    disconnected: bool,
    disconnect_at_ms: Option<u64>,
}

#[derive(Debug)]
struct SimState {
    now_ms: u64,
    config: SimConfig,
    model: EnclosureModel,
    sensors: Vec<SimSensor>,
    rng: StdRng,
    relay_switches: u64,
    conversions: u64,
}

impl SimState {
    fn sensor_target(&self, sensor: &SimSensor) -> f64 {
        if sensor.tracks_ambient {
            self.model.ambient_c
        } else {
            self.model.air_c + sensor.offset_c
        }
    }

    fn step(&mut self, dt_ms: u64) {
        let dt_s = dt_ms as f64 / 1000.0;
        self.model.step(dt_s);
        let alpha = if self.config.sensor_lag_s > 0.0 {
            (dt_s / self.config.sensor_lag_s).min(1.0)
        } else {
            1.0
        };
        self.now_ms += dt_ms;
        for i in 0..self.sensors.len() {
            let target = self.sensor_target(&self.sensors[i]);
            let sensor = &mut self.sensors[i];
            sensor.measured_c += alpha * (target - sensor.measured_c);
            if let Some(at) = sensor.disconnect_at_ms {
                if self.now_ms >= at && !sensor.disconnected {
                    tracing::info!("[Sim] sensor {} disconnected at {}ms", sensor.id, self.now_ms);
                    sensor.disconnected = true;
                    sensor.disconnect_at_ms = None;
                }
            }
        }
    }

    fn sensor_mut(&mut self, id: &SensorId) -> Option<&mut SimSensor> {
        self.sensors.iter_mut().find(|s| &s.id == id)
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated enclosure with two or more interior sensors and an optional
/// outside reference sensor.
#[derive(Debug, Clone)]
pub struct Simulator {
    state: Arc<Mutex<SimState>>,
}

impl Simulator {
    pub fn new(config: SimConfig, interior: &[SensorId], reference: Option<SensorId>) -> Self {
        let model = EnclosureModel::new(&config);
        let count = interior.len();
        let mut sensors: Vec<SimSensor> = interior
            .iter()
            .enumerate()
            .map(|(i, id)| {
                // Lowest sensor first, spread across the stratification band.
                let offset_c = if count > 1 {
                    -config.stratification_c / 2.0 + config.stratification_c * i as f64 / (count - 1) as f64
                } else {
                    0.0
                };
                SimSensor {
                    id: *id,
                    offset_c,
                    tracks_ambient: false,
                    measured_c: model.air_c + offset_c,
                    latched_c: None,
                    disconnected: false,
                    disconnect_at_ms: None,
                }
            })
            .collect();
        if let Some(id) = reference {
            sensors.push(SimSensor {
                id,
                offset_c: 0.0,
                tracks_ambient: true,
                measured_c: model.ambient_c,
                latched_c: None,
                disconnected: false,
                disconnect_at_ms: None,
            });
        }
        tracing::info!(
            "[Sim] enclosure at {:.2}C, ambient {:.2}C, {} sensors",
            model.air_c,
            model.ambient_c,
            sensors.len()
        );
        Self {
            state: Arc::new(Mutex::new(SimState {
                now_ms: 0,
                rng: StdRng::seed_from_u64(config.seed),
                config,
                model,
                sensors,
                relay_switches: 0,
                conversions: 0,
            })),
        }
    }

    pub fn bus(&self) -> SimBus {
        SimBus { state: self.state.clone() }
    }

    pub fn actuator(&self) -> SimActuator {
        SimActuator { state: self.state.clone() }
    }

    pub fn clock(&self) -> SimClock {
        SimClock { state: self.state.clone() }
    }

    /// Advance simulated time, integrating the model in fixed steps.
    pub fn advance_ms(&self, ms: u64) {
        let mut state = lock(&self.state);
        let mut remaining = ms;
        while remaining > 0 {
            let dt = remaining.min(PHYSICS_STEP_MS);
            state.step(dt);
            remaining -= dt;
        }
    }

    pub fn now_ms(&self) -> u64 {
        lock(&self.state).now_ms
    }

    pub fn air_temperature(&self) -> f64 {
        lock(&self.state).model.air_c
    }

    pub fn relay_on(&self) -> bool {
        lock(&self.state).model.relay_on
    }

    pub fn fan_duty(&self) -> u8 {
        lock(&self.state).model.fan_duty
    }

    /// Number of relay transitions commanded so far.
    pub fn relay_switch_count(&self) -> u64 {
        lock(&self.state).relay_switches
    }

    pub fn conversion_count(&self) -> u64 {
        lock(&self.state).conversions
    }

    pub fn disconnect(&self, id: &SensorId) {
        if let Some(sensor) = lock(&self.state).sensor_mut(id) {
            sensor.disconnected = true;
            sensor.latched_c = None;
        }
    }

    /// Schedule a disconnect at an absolute simulated time.
    pub fn disconnect_at(&self, id: &SensorId, at_ms: u64) {
        if let Some(sensor) = lock(&self.state).sensor_mut(id) {
            sensor.disconnect_at_ms = Some(at_ms);
        }
    }

    pub fn reconnect(&self, id: &SensorId) {
        if let Some(sensor) = lock(&self.state).sensor_mut(id) {
            sensor.disconnected = false;
            sensor.disconnect_at_ms = None;
        }
    }

    pub fn set_conversion_delay_ms(&self, ms: u64) {
        lock(&self.state).config.conversion_delay_ms = ms;
    }
}

/// Sensor bus handle of a [`Simulator`].
#[derive(Debug, Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

#[async_trait]
impl SensorBus for SimBus {
    async fn request_conversion(&mut self) -> Result<(), SensorError> {
        let delay_ms = lock(&self.state).config.conversion_delay_ms;
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        let mut state = lock(&self.state);
        let noise_c = state.config.sensor_noise_c;
        let SimState { sensors, rng, .. } = &mut *state;
        for sensor in sensors.iter_mut() {
            sensor.latched_c = if sensor.disconnected {
                None
            } else {
                let noisy = sensor.measured_c + noise_c * (rng.random::<f64>() - 0.5);
                Some((noisy / SENSOR_LSB_C).round() * SENSOR_LSB_C)
            };
        }
        state.conversions += 1;
        Ok(())
    }

    async fn read_celsius(&mut self, sensor: &SensorId) -> Result<f64, SensorError> {
        let state = lock(&self.state);
        match state.sensors.iter().find(|s| &s.id == sensor) {
            Some(s) if !s.disconnected => s
                .latched_c
                .ok_or_else(|| SensorError::Bus(format!("no conversion latched for {}", sensor))),
            // A missing or silent device looks the same on a one-wire bus.
            _ => Err(SensorError::Disconnected(*sensor)),
        }
    }

    async fn discover(&mut self) -> Result<Vec<SensorId>, SensorError> {
        let state = lock(&self.state);
        Ok(state.sensors.iter().filter(|s| !s.disconnected).map(|s| s.id).collect())
    }
}

/// Relay and fan handle of a [`Simulator`].
#[derive(Debug, Clone)]
pub struct SimActuator {
    state: Arc<Mutex<SimState>>,
}

#[async_trait]
impl Actuator for SimActuator {
    async fn set_relay(&mut self, energized: bool) {
        let mut state = lock(&self.state);
        if state.model.relay_on != energized {
            state.relay_switches += 1;
            tracing::debug!("[Sim] relay -> {} at {}ms", energized, state.now_ms);
        }
        state.model.relay_on = energized;
    }

    async fn set_fan_duty(&mut self, percent: u8) {
        lock(&self.state).model.fan_duty = percent.min(100);
    }
}

/// Simulated time source; only [`Simulator::advance_ms`] moves it.
#[derive(Debug, Clone)]
pub struct SimClock {
    state: Arc<Mutex<SimState>>,
}

impl TimeInterface for SimClock {
    fn now_ms(&self) -> u64 {
        lock(&self.state).now_ms
    }
}
