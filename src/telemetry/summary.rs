// Offline analysis of a telemetry log

use serde::Deserialize;
use std::io::{BufRead, Write};
use thiserror::Error;

pub const DEFAULT_MOVING_AVERAGE_WINDOW: usize = 1000;

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("log contains no telemetry records")]
    Empty,
    #[error("moving average window must be > 0")]
    ZeroWindow,
}

/// Statistics over every telemetry record of a log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSummary {
    pub samples: usize,
    /// Lines that looked like JSON objects but did not parse as a record.
    pub malformed: usize,
    pub first_ms: u64,
    pub last_ms: u64,
    pub mean_temperature: f64,
    pub min_temperature: f64,
    pub max_temperature: f64,
    /// Fraction of samples with the heating element on.
    pub heating_fraction: f64,
    /// Mean of the last `window` samples; `None` when the log is shorter.
    pub moving_average: Option<f64>,
    pub window: usize,
}

impl std::fmt::Display for LogSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "samples:          {}", self.samples)?;
        if self.malformed > 0 {
            writeln!(f, "malformed lines:  {}", self.malformed)?;
        }
        writeln!(f, "span:             {:.1}s", self.last_ms.saturating_sub(self.first_ms) as f64 / 1000.0)?;
        writeln!(f, "average mean:     {:.3}°C", self.mean_temperature)?;
        writeln!(f, "min / max mean:   {:.3}°C / {:.3}°C", self.min_temperature, self.max_temperature)?;
        writeln!(f, "heating:          {:.1}%", self.heating_fraction * 100.0)?;
        match self.moving_average {
            Some(avg) => write!(f, "moving average:   {:.3}°C (last {} samples)", avg, self.window),
            None => write!(f, "moving average:   not enough samples for a window of {}", self.window),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LogLine {
    ms: u64,
    #[serde(rename = "sensorMean")]
    sensor_mean: f64,
    #[serde(rename = "heatingElement", deserialize_with = "bool_or_int")]
    heating_element: bool,
}

/// Older firmware wrote the relay state as `0`/`1`.
fn bool_or_int<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

fn is_record_line(line: &str) -> bool {
    line.starts_with('{') && line.ends_with('}')
}

/// Lines of a serial capture. Bytes that are not UTF-8 (line noise while the
/// MCU boots) are replaced instead of failing the read.
struct LossyLines<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: BufRead> Iterator for LossyLines<R> {
    type Item = std::io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buffer.clear();
        match self.reader.read_until(b'\n', &mut self.buffer) {
            Ok(0) => None,
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.buffer);
                Some(Ok(line.trim_end_matches(['\n', '\r']).to_string()))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

fn lossy_lines<R: BufRead>(reader: R) -> LossyLines<R> {
    LossyLines { reader, buffer: Vec::new() }
}

/// Copy the record lines of a log to `out`, dropping console chatter.
pub fn extract<R: BufRead, W: Write>(reader: R, mut out: W) -> Result<usize, SummaryError> {
    let mut count = 0;
    for line in lossy_lines(reader) {
        let line = line?;
        if is_record_line(&line) {
            writeln!(out, "{}", line)?;
            count += 1;
        }
    }
    Ok(count)
}

/// Summarize a telemetry log. Lines that are not JSON objects are ignored.
pub fn summarize<R: BufRead>(reader: R, window: usize) -> Result<LogSummary, SummaryError> {
    if window == 0 {
        return Err(SummaryError::ZeroWindow);
    }
    let mut means = Vec::new();
    let mut heating = 0usize;
    let mut malformed = 0usize;
    let mut first_ms = None;
    let mut last_ms = 0;

    for line in lossy_lines(reader) {
        let line = line?;
        if !is_record_line(&line) {
            continue;
        }
        match serde_json::from_str::<LogLine>(&line) {
            Ok(record) => {
                first_ms.get_or_insert(record.ms);
                last_ms = record.ms;
                means.push(record.sensor_mean);
                if record.heating_element {
                    heating += 1;
                }
            }
            Err(e) => {
                tracing::debug!("Skipping malformed telemetry line: {}", e);
                malformed += 1;
            }
        }
    }

    let Some(first_ms) = first_ms else {
        return Err(SummaryError::Empty);
    };
    let samples = means.len();
    let total: f64 = means.iter().sum();
    let min_temperature = means.iter().copied().fold(f64::INFINITY, f64::min);
    let max_temperature = means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let moving_average = (samples >= window).then(|| means[samples - window..].iter().sum::<f64>() / window as f64);

    Ok(LogSummary {
        samples,
        malformed,
        first_ms,
        last_ms,
        mean_temperature: total / samples as f64,
        min_temperature,
        max_temperature,
        heating_fraction: heating as f64 / samples as f64,
        moving_average,
        window,
    })
}
