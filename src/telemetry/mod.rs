//! Per-cycle telemetry records and the sinks that emit them.
//!
//! One [`TelemetryRecord`] is produced for every actuated cycle and written as
//! a single JSON object per line. The key names are the ones the log analysis
//! in [`summary`] reads back.

pub mod summary;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempbox_shared::TemperatureSample;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub use summary::{summarize, LogSummary, SummaryError};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("telemetry encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// State of one actuated control cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Loop timestamp of the cycle.
    pub ms: u64,
    /// Interior readings, then the reference reading when configured.
    pub sensors: Vec<TemperatureSample>,
    #[serde(rename = "sensorMean")]
    pub sensor_mean: f64,
    pub setpoint: f64,
    /// Duty fraction of the current PID window; absent in threshold mode.
    #[serde(rename = "dutycycle", default, skip_serializing_if = "Option::is_none")]
    pub duty_cycle: Option<f64>,
    #[serde(rename = "fanDuty")]
    pub fan_duty: u8,
    /// Fan duty on the 0..=255 PWM scale.
    pub fan: u8,
    #[serde(rename = "heatingElement")]
    pub heating_element: bool,
}

/// Convert a fan duty percentage to the 8-bit PWM value, rounding up.
pub fn fan_pwm(percent: u8) -> u8 {
    let pwm = (u16::from(percent.min(100)) * 255).div_ceil(100);
    u8::try_from(pwm).unwrap_or(u8::MAX)
}

/// Destination for telemetry records.
#[async_trait]
pub trait TelemetrySink: Send {
    async fn emit(&mut self, record: &TelemetryRecord) -> Result<(), TelemetryError>;
}

/// Collects records in memory.
#[async_trait]
impl TelemetrySink for Vec<TelemetryRecord> {
    async fn emit(&mut self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        self.push(record.clone());
        Ok(())
    }
}

/// Writes each record as one line of JSON.
pub struct JsonLineSink<W> {
    writer: W,
    lines_written: u64,
}

impl<W: AsyncWrite + Unpin + Send> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, lines_written: 0 }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TelemetrySink for JsonLineSink<W> {
    async fn emit(&mut self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        self.lines_written += 1;
        Ok(())
    }
}
