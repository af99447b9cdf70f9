//! # Regulator Configuration
//!
//! Settings for the control loop, sensors, fan, MCU link, telemetry and the
//! optional enclosure simulator, loaded from a single TOML file. Every field
//! has a default matching the enclosure the regulator was first built for, so
//! a file only needs to list what differs.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [regulation]
//! setpoint_c = 27.5
//! deadband_c = 0.2
//! mode = "time_proportioned_pid"
//!
//! [regulation.pid]
//! kp = 1.0
//! ki = 0.2
//! kd = 0.9
//! window_ms = 5000
//!
//! [sensors]
//! interior = ["28:69:A1:69:35:19:01:5D", "28:D5:55:6B:35:19:01:99"]
//! reference = "28:96:5F:E3:22:20:01:62"
//!
//! [mcu]
//! serial = "/dev/ttyACM0"
//! ```
//!
//! `load_config` parses and validates; a configuration that fails
//! [`Config::validate`] is rejected at startup and never reaches the loop.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use tempbox_shared::SensorId;
use tempbox_simulator::SimConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ControllerConfigError),
}

/// A setting the controller cannot run with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerConfigError {
    #[error("deadband_c must be > 0 (got {0})")]
    NonPositiveDeadband(f64),
    #[error("setpoint_c must be a finite temperature (got {0})")]
    NonFiniteSetpoint(f64),
    #[error("tick_ms must be > 0")]
    ZeroTick,
    #[error("sensor_timeout_ms must be > 0")]
    ZeroSensorTimeout,
    #[error("pid.window_ms must be > 0")]
    ZeroPidWindow,
    #[error("pid gain {name} must be finite (got {value})")]
    NonFiniteGain { name: &'static str, value: f64 },
    #[error("pid.output_limit must be > 0 (got {0})")]
    NonPositiveOutputLimit(f64),
    #[error("pid.integral_limit must be > 0 (got {0})")]
    NonPositiveIntegralLimit(f64),
    #[error("at least one interior sensor is required")]
    NoInteriorSensors,
    #[error("sensor {0} is listed more than once")]
    DuplicateSensor(SensorId),
    #[error("fan.duty_percent must be within 0..=100 (got {0})")]
    FanDutyOutOfRange(u8),
}

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub regulation: RegulationConfig,
    #[serde(default)]
    pub sensors: SensorConfig,
    #[serde(default)]
    pub fan: FanConfig,
    #[serde(default)]
    pub mcu: McuConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub simulation: SimConfig,
}

/// Which controller decides the relay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Hysteresis around the setpoint, decided every tick.
    Threshold,
    /// PID output turned into an on-time within a fixed window.
    #[serde(alias = "pid")]
    TimeProportionedPid,
}

impl std::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMode::Threshold => f.write_str("threshold"),
            ControlMode::TimeProportionedPid => f.write_str("time_proportioned_pid"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegulationConfig {
    #[serde(default = "default_setpoint_c")]
    pub setpoint_c: f64,
    #[serde(default = "default_deadband_c")]
    pub deadband_c: f64,
    #[serde(default = "default_mode")]
    pub mode: ControlMode,
    /// Control loop period.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Upper bound on one conversion plus all reads.
    #[serde(default = "default_sensor_timeout_ms")]
    pub sensor_timeout_ms: u64,
    #[serde(default)]
    pub pid: PidConfig,
}

impl Default for RegulationConfig {
    fn default() -> Self {
        Self {
            setpoint_c: default_setpoint_c(),
            deadband_c: default_deadband_c(),
            mode: default_mode(),
            tick_ms: default_tick_ms(),
            sensor_timeout_ms: default_sensor_timeout_ms(),
            pid: PidConfig::default(),
        }
    }
}

/// Gains and window of the time-proportioned PID controller.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PidConfig {
    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default = "default_ki")]
    pub ki: f64,
    #[serde(default = "default_kd")]
    pub kd: f64,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Raw output is clamped to `[-output_limit, output_limit]` before rescaling.
    #[serde(default = "default_output_limit")]
    pub output_limit: f64,
    /// Clamp on the accumulated error (°C·s). Unbounded when absent.
    #[serde(default)]
    pub integral_limit: Option<f64>,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            ki: default_ki(),
            kd: default_kd(),
            window_ms: default_window_ms(),
            output_limit: default_output_limit(),
            integral_limit: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensorConfig {
    /// Sensors inside the box; their mean is the controlled temperature.
    #[serde(default = "default_interior_sensors")]
    pub interior: Vec<SensorId>,
    /// Outside sensor, reported in telemetry only.
    #[serde(default)]
    pub reference: Option<SensorId>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            interior: default_interior_sensors(),
            reference: default_reference_sensor(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FanConfig {
    #[serde(default = "default_fan_duty")]
    pub duty_percent: u8,
}

impl Default for FanConfig {
    fn default() -> Self {
        Self { duty_percent: default_fan_duty() }
    }
}

/// Serial link to the box microcontroller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McuConfig {
    #[serde(default = "default_serial")]
    pub serial: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for McuConfig {
    fn default() -> Self {
        Self {
            serial: default_serial(),
            baud: default_baud(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// `"stdout"` or a file path; records are appended as JSON lines.
    #[serde(default = "default_telemetry_output")]
    pub output: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { output: default_telemetry_output() }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ControllerConfigError> {
        let regulation = &self.regulation;
        if !regulation.setpoint_c.is_finite() {
            return Err(ControllerConfigError::NonFiniteSetpoint(regulation.setpoint_c));
        }
        if regulation.deadband_c.partial_cmp(&0.0) != Some(Ordering::Greater) {
            return Err(ControllerConfigError::NonPositiveDeadband(regulation.deadband_c));
        }
        if regulation.tick_ms == 0 {
            return Err(ControllerConfigError::ZeroTick);
        }
        if regulation.sensor_timeout_ms == 0 {
            return Err(ControllerConfigError::ZeroSensorTimeout);
        }
        regulation.pid.validate()?;

        if self.sensors.interior.is_empty() {
            return Err(ControllerConfigError::NoInteriorSensors);
        }
        let mut seen = HashSet::new();
        for id in self.sensors.interior.iter().chain(self.sensors.reference.iter()) {
            if !seen.insert(*id) {
                return Err(ControllerConfigError::DuplicateSensor(*id));
            }
        }
        if self.fan.duty_percent > 100 {
            return Err(ControllerConfigError::FanDutyOutOfRange(self.fan.duty_percent));
        }
        Ok(())
    }
}

impl PidConfig {
    pub fn validate(&self) -> Result<(), ControllerConfigError> {
        if self.window_ms == 0 {
            return Err(ControllerConfigError::ZeroPidWindow);
        }
        for (name, value) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !value.is_finite() {
                return Err(ControllerConfigError::NonFiniteGain { name, value });
            }
        }
        if !(self.output_limit > 0.0) || !self.output_limit.is_finite() {
            return Err(ControllerConfigError::NonPositiveOutputLimit(self.output_limit));
        }
        if let Some(limit) = self.integral_limit {
            if !(limit > 0.0) {
                return Err(ControllerConfigError::NonPositiveIntegralLimit(limit));
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_setpoint_c() -> f64 { 27.5 }
fn default_deadband_c() -> f64 { 0.2 }
fn default_mode() -> ControlMode { ControlMode::Threshold }
fn default_tick_ms() -> u64 { 1000 }
fn default_sensor_timeout_ms() -> u64 { 1000 }
fn default_kp() -> f64 { 1.0 }
fn default_ki() -> f64 { 0.2 }
fn default_kd() -> f64 { 0.9 }
fn default_window_ms() -> u64 { 5000 }
fn default_output_limit() -> f64 { 1000.0 }
fn default_fan_duty() -> u8 { 86 } // PWM 220/255
fn default_serial() -> String { "/dev/ttyACM0".to_string() }
fn default_baud() -> u32 { 9600 }
fn default_response_timeout_ms() -> u64 { 2000 }
fn default_telemetry_output() -> String { "stdout".to_string() }

fn default_interior_sensors() -> Vec<SensorId> {
    // Lower and upper sensor of the original box.
    [[0x28, 0x69, 0xA1, 0x69, 0x35, 0x19, 0x01, 0x5D], [0x28, 0xD5, 0x55, 0x6B, 0x35, 0x19, 0x01, 0x99]]
        .into_iter()
        .filter_map(|rom| SensorId::from_rom(rom).ok())
        .collect()
}

fn default_reference_sensor() -> Option<SensorId> {
    SensorId::from_rom([0x28, 0x96, 0x5F, 0xE3, 0x22, 0x20, 0x01, 0x62]).ok()
}

/// Load and validate configuration from a TOML file at the given path.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path.display(), e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate().map_err(|e| {
        tracing::error!("Rejected configuration '{}': {}", path.display(), e);
        ConfigError::Invalid(e)
    })?;
    Ok(config)
}
