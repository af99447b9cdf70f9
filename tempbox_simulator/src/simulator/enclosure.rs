// Lumped thermal model of the enclosure

use serde::{Deserialize, Serialize};

/// Physical parameters of the simulated box.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimConfig {
    #[serde(default = "default_ambient_c")]
    pub ambient_c: f64,
    #[serde(default = "default_initial_c")]
    pub initial_c: f64,
    #[serde(default = "default_heater_power_w")]
    pub heater_power_w: f64,
    /// Heat capacity of the enclosure air and walls (J/K).
    #[serde(default = "default_heat_capacity")]
    pub heat_capacity_j_per_k: f64,
    /// Conductive loss to ambient with the fan stopped (W/K).
    #[serde(default = "default_loss")]
    pub loss_w_per_k: f64,
    /// Additional loss at 100 % fan duty (W/K).
    #[serde(default = "default_fan_loss")]
    pub fan_loss_w_per_k: f64,
    /// First-order lag of the sensor packages (s).
    #[serde(default = "default_sensor_lag_s")]
    pub sensor_lag_s: f64,
    /// Peak-to-peak uniform noise added to each reading (°C).
    #[serde(default)]
    pub sensor_noise_c: f64,
    /// Difference between the upper and lower interior sensor (°C).
    #[serde(default = "default_stratification_c")]
    pub stratification_c: f64,
    /// Time a conversion takes before readings are latched.
    #[serde(default)]
    pub conversion_delay_ms: u64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ambient_c: default_ambient_c(),
            initial_c: default_initial_c(),
            heater_power_w: default_heater_power_w(),
            heat_capacity_j_per_k: default_heat_capacity(),
            loss_w_per_k: default_loss(),
            fan_loss_w_per_k: default_fan_loss(),
            sensor_lag_s: default_sensor_lag_s(),
            sensor_noise_c: 0.0,
            stratification_c: default_stratification_c(),
            conversion_delay_ms: 0,
            seed: default_seed(),
        }
    }
}

fn default_ambient_c() -> f64 { 20.0 }
fn default_initial_c() -> f64 { 20.0 }
fn default_heater_power_w() -> f64 { 40.0 }
fn default_heat_capacity() -> f64 { 2000.0 }
fn default_loss() -> f64 { 0.8 }
fn default_fan_loss() -> f64 { 0.4 }
fn default_sensor_lag_s() -> f64 { 5.0 }
fn default_stratification_c() -> f64 { 0.3 }
fn default_seed() -> u64 { 7 }

/// Air temperature of the box driven by the heater relay and the fan.
#[derive(Debug, Clone)]
pub struct EnclosureModel {
    pub air_c: f64,
    pub ambient_c: f64,
    pub relay_on: bool,
    pub fan_duty: u8,
    heater_power_w: f64,
    heat_capacity_j_per_k: f64,
    loss_w_per_k: f64,
    fan_loss_w_per_k: f64,
}

impl EnclosureModel {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            air_c: config.initial_c,
            ambient_c: config.ambient_c,
            relay_on: false,
            fan_duty: 0,
            heater_power_w: config.heater_power_w,
            heat_capacity_j_per_k: config.heat_capacity_j_per_k,
            loss_w_per_k: config.loss_w_per_k,
            fan_loss_w_per_k: config.fan_loss_w_per_k,
        }
    }

    /// Total loss coefficient at the current fan duty (W/K).
    pub fn loss_coefficient(&self) -> f64 {
        self.loss_w_per_k + self.fan_loss_w_per_k * f64::from(self.fan_duty) / 100.0
    }

    /// Temperature the box settles at with the heater permanently on.
    pub fn max_reachable_c(&self) -> f64 {
        self.ambient_c + self.heater_power_w / self.loss_coefficient()
    }

    /// Explicit Euler step of `dt_s` seconds.
    pub fn step(&mut self, dt_s: f64) {
        let gain = if self.relay_on { self.heater_power_w } else { 0.0 };
        let loss = self.loss_coefficient() * (self.air_c - self.ambient_c);
        self.air_c += (gain - loss) * dt_s / self.heat_capacity_j_per_k;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heater_raises_temperature() {
        let mut model = EnclosureModel::new(&SimConfig::default());
        model.relay_on = true;
        for _ in 0..900 {
            model.step(1.0);
        }
        assert!(model.air_c > 30.0, "air temperature {}", model.air_c);
        assert!(model.air_c < model.max_reachable_c());
    }

    #[test]
    fn test_cools_towards_ambient() {
        let config = SimConfig { initial_c: 35.0, ..SimConfig::default() };
        let mut model = EnclosureModel::new(&config);
        model.fan_duty = 100;
        for _ in 0..3600 {
            model.step(1.0);
        }
        assert!(model.air_c < 35.0);
        assert!(model.air_c > config.ambient_c);
    }

    #[test]
    fn test_fan_increases_losses() {
        let mut model = EnclosureModel::new(&SimConfig::default());
        let still = model.loss_coefficient();
        model.fan_duty = 86;
        assert!(model.loss_coefficient() > still);
    }
}
