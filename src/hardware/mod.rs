// src/hardware/mod.rs - host side of the box hardware
pub mod serial;

pub use serial::{BridgeError, BridgeHandle, SerialBridge, SerialStats, DEVICE_DISCONNECTED_C};

use crate::config::McuConfig;
use std::time::Duration;

/// Sensor bus and actuator handle of the MCU on the configured serial port.
pub type McuHandle = BridgeHandle<serial2_tokio::SerialPort>;

/// Connect to the MCU described by `config`.
pub fn connect(config: &McuConfig) -> Result<McuHandle, BridgeError> {
    let bridge = SerialBridge::open(&config.serial, config.baud, Duration::from_millis(config.response_timeout_ms))?;
    tracing::info!("Connected to MCU successfully");
    Ok(BridgeHandle::new(bridge))
}
