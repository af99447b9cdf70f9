// src/sensor.rs - interior mean and reference reading over a SensorBus

use std::time::Duration;
use tempbox_shared::{SensorBus, SensorError, SensorId, TemperatureSample};
use tokio::time::timeout;

/// Readings of one control cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSnapshot {
    pub interior: Vec<TemperatureSample>,
    /// Outside sensor; `celsius` is `None` when it could not be read.
    pub reference: Option<TemperatureSample>,
    pub mean_c: f64,
}

impl SensorSnapshot {
    /// Interior readings followed by the reference reading, if any.
    pub fn all_samples(&self) -> Vec<TemperatureSample> {
        self.interior.iter().copied().chain(self.reference).collect()
    }
}

/// Reads the configured sensors through a [`SensorBus`].
///
/// Nothing is cached: every call requests a conversion and reads each sensor
/// again. The conversion and all reads together are bounded by the timeout.
pub struct SensorReader<B: SensorBus> {
    bus: B,
    interior: Vec<SensorId>,
    reference: Option<SensorId>,
    timeout: Duration,
}

impl<B: SensorBus> SensorReader<B> {
    pub fn new(bus: B, interior: Vec<SensorId>, reference: Option<SensorId>, timeout: Duration) -> Self {
        Self { bus, interior, reference, timeout }
    }

    pub fn interior(&self) -> &[SensorId] {
        &self.interior
    }

    pub fn reference(&self) -> Option<SensorId> {
        self.reference
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Mean of `sensor_ids` after a fresh conversion.
    ///
    /// Fails with the first sensor that reports disconnected, or with
    /// `SensorError::Timeout` when the bus does not answer in time.
    pub async fn read_mean(&mut self, sensor_ids: &[SensorId]) -> Result<f64, SensorError> {
        let after_ms = self.timeout_ms();
        let bus = &mut self.bus;
        let readings = timeout(self.timeout, async move {
            bus.request_conversion().await?;
            let mut readings = Vec::with_capacity(sensor_ids.len());
            for id in sensor_ids {
                readings.push(read_checked(bus, id).await?);
            }
            Ok::<_, SensorError>(readings)
        })
        .await
        .map_err(|_| SensorError::Timeout { after_ms })??;
        mean(&readings).ok_or_else(|| SensorError::Bus("no sensors to average".to_string()))
    }

    /// Read every configured sensor for the cycle taken at `now_ms`.
    ///
    /// An interior failure fails the whole cycle. A reference failure is
    /// logged and recorded as a missing sample.
    pub async fn sample(&mut self, now_ms: u64) -> Result<SensorSnapshot, SensorError> {
        let after_ms = self.timeout_ms();
        let Self { bus, interior, reference, timeout: limit } = self;
        let result = timeout(*limit, async {
            bus.request_conversion().await?;
            let mut samples = Vec::with_capacity(interior.len());
            for id in interior.iter() {
                let celsius = read_checked(bus, id).await?;
                samples.push(TemperatureSample::reading(*id, celsius, now_ms));
            }
            let reference_sample = match reference {
                Some(id) => Some(match read_checked(bus, id).await {
                    Ok(celsius) => TemperatureSample::reading(*id, celsius, now_ms),
                    Err(e) => {
                        tracing::debug!("Reference sensor unavailable: {}", e);
                        TemperatureSample::missing(*id, now_ms)
                    }
                }),
                None => None,
            };
            Ok::<_, SensorError>((samples, reference_sample))
        })
        .await;

        let (samples, reference_sample) = match result {
            Ok(inner) => inner?,
            Err(_) => return Err(SensorError::Timeout { after_ms }),
        };
        let values: Vec<f64> = samples.iter().filter_map(|s| s.celsius).collect();
        let mean_c = mean(&values).ok_or_else(|| SensorError::Bus("no interior sensors configured".to_string()))?;
        Ok(SensorSnapshot { interior: samples, reference: reference_sample, mean_c })
    }

    /// Ask the bus which sensors are present and warn about configured ones
    /// that are not. Returns the ids that were found.
    pub async fn resolve(&mut self) -> Result<Vec<SensorId>, SensorError> {
        let after_ms = self.timeout_ms();
        let present = timeout(self.timeout, self.bus.discover())
            .await
            .map_err(|_| SensorError::Timeout { after_ms })??;
        for id in &present {
            tracing::info!("Found sensor {}", id);
        }
        for id in self.interior.iter().chain(self.reference.iter()) {
            if !present.contains(id) {
                tracing::warn!("Configured sensor {} not present on the bus", id);
            }
        }
        Ok(present)
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

async fn read_checked<B: SensorBus>(bus: &mut B, id: &SensorId) -> Result<f64, SensorError> {
    let celsius = bus.read_celsius(id).await?;
    if celsius.is_finite() {
        Ok(celsius)
    } else {
        Err(SensorError::Bus(format!("sensor {} returned a non-finite reading", id)))
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
