//! # Regulation Loop
//!
//! Periodic cycle of the regulator: `Idle -> Sampling -> Deciding ->
//! Actuating -> Idle`. Sampling reads the sensors through a [`SensorReader`];
//! deciding runs the active controller; actuating commands the relay and the
//! fan and produces a [`TelemetryRecord`].
//!
//! A sensor failure ends the cycle in `Sampling`: nothing is decided and the
//! previous relay and fan commands stay in force. In PID mode the relay keeps
//! following the last window's on-time, with the last duty carried into the
//! following windows, until samples come back. No per-cycle failure ever
//! leaves [`RegulationLoop::run`].
//!
//! In time-proportioned PID mode the controller is consulted once per duty
//! window. Every tick in between only checks whether the current time is
//! still inside the window's on-time.

pub mod channel;

use crate::config::{Config, ControlMode, ControllerConfigError};
use crate::control::{on_duration_ms, ThresholdController, TimeProportionedPid};
use crate::sensor::SensorReader;
use crate::telemetry::{fan_pwm, TelemetryRecord, TelemetrySink};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tempbox_shared::{Actuator, SensorBus, SensorError, TimeInterface};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

pub use channel::{RegulationError, RegulationHandle, RegulationRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Sampling,
    Deciding,
    Actuating,
}

/// On-time of the heater within one PID window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DutyCycleWindow {
    pub window_start_ms: u64,
    pub window_length_ms: u64,
    /// Always within `0..=window_length_ms`.
    pub on_duration_ms: u64,
    pub duty_percent: f64,
}

impl DutyCycleWindow {
    pub fn new(window_start_ms: u64, window_length_ms: u64, duty_percent: f64) -> Self {
        Self {
            window_start_ms,
            window_length_ms,
            on_duration_ms: on_duration_ms(window_length_ms, duty_percent),
            duty_percent,
        }
    }

    pub fn has_elapsed(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.window_start_ms) >= self.window_length_ms
    }

    /// Start of the window that contains `now_ms`, on the grid of this one.
    pub fn next_start(&self, now_ms: u64) -> u64 {
        let periods = now_ms.saturating_sub(self.window_start_ms) / self.window_length_ms.max(1);
        self.window_start_ms + periods * self.window_length_ms
    }

    pub fn relay_on(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.window_start_ms) < self.on_duration_ms
    }
}

/// Result of one [`RegulationLoop::tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Actuated(TelemetryRecord),
    /// Sampling failed; no command was issued.
    Skipped(SensorError),
    Paused,
}

/// Snapshot answered to the console.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegulationStatus {
    pub phase: LoopPhase,
    pub paused: bool,
    pub mode: ControlMode,
    pub setpoint: f64,
    pub relay_on: bool,
    pub fan_duty: u8,
    pub window: Option<DutyCycleWindow>,
    pub last_mean: Option<f64>,
    pub cycles: u64,
    pub skipped_cycles: u64,
    pub consecutive_failures: u32,
}

pub struct RegulationLoop<B: SensorBus, A: Actuator> {
    reader: SensorReader<B>,
    actuator: A,
    mode: ControlMode,
    threshold: ThresholdController,
    pid: TimeProportionedPid,
    window: Option<DutyCycleWindow>,
    tick_ms: u64,

    relay_on: bool,
    fan_duty: u8,
    configured_fan_duty: u8,

    phase: LoopPhase,
    paused: bool,
    last_record: Option<TelemetryRecord>,
    cycles: u64,
    skipped_cycles: u64,
    consecutive_failures: u32,
}

impl<B: SensorBus, A: Actuator> RegulationLoop<B, A> {
    /// Build a loop from a configuration; rejects invalid settings.
    pub fn new(config: &Config, bus: B, actuator: A) -> Result<Self, ControllerConfigError> {
        config.validate()?;
        let regulation = &config.regulation;
        let reader = SensorReader::new(
            bus,
            config.sensors.interior.clone(),
            config.sensors.reference,
            Duration::from_millis(regulation.sensor_timeout_ms),
        );
        Ok(Self {
            reader,
            actuator,
            mode: regulation.mode,
            threshold: ThresholdController::new(regulation.setpoint_c, regulation.deadband_c),
            pid: TimeProportionedPid::new(regulation.setpoint_c, regulation.pid.clone()),
            window: None,
            tick_ms: regulation.tick_ms,
            relay_on: false,
            fan_duty: config.fan.duty_percent,
            configured_fan_duty: config.fan.duty_percent,
            phase: LoopPhase::Idle,
            paused: false,
            last_record: None,
            cycles: 0,
            skipped_cycles: 0,
            consecutive_failures: 0,
        })
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Last commanded relay state.
    pub fn relay_on(&self) -> bool {
        self.relay_on
    }

    pub fn fan_duty(&self) -> u8 {
        self.fan_duty
    }

    pub fn window(&self) -> Option<&DutyCycleWindow> {
        self.window.as_ref()
    }

    pub fn last_record(&self) -> Option<&TelemetryRecord> {
        self.last_record.as_ref()
    }

    pub fn pid(&self) -> &TimeProportionedPid {
        &self.pid
    }

    /// Resolve the configured sensors and put the actuators in a known state:
    /// heater off, fan at its configured duty.
    pub async fn start(&mut self) {
        tracing::info!(
            "Starting regulation: mode={} setpoint={:.2}°C tick={}ms",
            self.mode,
            self.threshold.setpoint(),
            self.tick_ms
        );
        if let Err(e) = self.reader.resolve().await {
            tracing::warn!("Sensor discovery failed: {}", e);
        }
        self.actuator.set_relay(false).await;
        self.actuator.set_fan_duty(self.fan_duty).await;
        self.relay_on = false;
    }

    /// Run one cycle at loop time `now_ms`.
    pub async fn tick(&mut self, now_ms: u64) -> CycleOutcome {
        if self.paused {
            return CycleOutcome::Paused;
        }

        self.phase = LoopPhase::Sampling;
        let snapshot = match self.reader.sample(now_ms).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.consecutive_failures += 1;
                self.skipped_cycles += 1;
                match &e {
                    SensorError::Timeout { .. } => tracing::warn!("Sensor timeout, skipping cycle: {}", e),
                    _ => tracing::warn!("Sensor fault, skipping cycle: {}", e),
                }
                self.hold_window_schedule(now_ms).await;
                self.phase = LoopPhase::Idle;
                return CycleOutcome::Skipped(e);
            }
        };
        if self.consecutive_failures > 0 {
            tracing::info!("Sensors recovered after {} skipped cycles", self.consecutive_failures);
            self.consecutive_failures = 0;
        }

        self.phase = LoopPhase::Deciding;
        let mean = snapshot.mean_c;
        let (relay, duty_cycle) = match self.mode {
            ControlMode::Threshold => (self.threshold.decide(mean, self.relay_on), None),
            ControlMode::TimeProportionedPid => {
                let window = self.current_window(mean, now_ms);
                (window.relay_on(now_ms), Some(window.duty_percent))
            }
        };

        self.phase = LoopPhase::Actuating;
        if relay != self.relay_on {
            tracing::info!("Heating element {} at {:.2}°C", if relay { "on" } else { "off" }, mean);
        }
        self.actuator.set_relay(relay).await;
        self.actuator.set_fan_duty(self.fan_duty).await;
        self.relay_on = relay;

        let record = TelemetryRecord {
            ms: now_ms,
            sensors: snapshot.all_samples(),
            sensor_mean: mean,
            setpoint: self.threshold.setpoint(),
            duty_cycle,
            fan_duty: self.fan_duty,
            fan: fan_pwm(self.fan_duty),
            heating_element: relay,
        };
        tracing::debug!("Cycle {} at {}ms: mean={:.3}°C relay={}", self.cycles, now_ms, mean, relay);
        self.last_record = Some(record.clone());
        self.cycles += 1;
        self.phase = LoopPhase::Idle;
        CycleOutcome::Actuated(record)
    }

    /// Window covering `now_ms`, recomputing the PID output on rollover.
    fn current_window(&mut self, mean: f64, now_ms: u64) -> DutyCycleWindow {
        match self.window {
            Some(window) if !window.has_elapsed(now_ms) => window,
            previous => {
                let start = previous.map_or(now_ms, |w| w.next_start(now_ms));
                let duty = self.pid.update(mean, now_ms);
                let window = DutyCycleWindow::new(start, self.pid.config().window_ms, duty);
                tracing::debug!(
                    "New PID window at {}ms: duty={:.2}% on={}ms",
                    window.window_start_ms,
                    window.duty_percent,
                    window.on_duration_ms
                );
                self.window = Some(window);
                window
            }
        }
    }

    /// Switch the relay on the last window's schedule without a new sample.
    async fn hold_window_schedule(&mut self, now_ms: u64) {
        if self.mode != ControlMode::TimeProportionedPid {
            return;
        }
        let Some(mut window) = self.window else {
            return;
        };
        if window.has_elapsed(now_ms) {
            window = DutyCycleWindow::new(window.next_start(now_ms), window.window_length_ms, window.duty_percent);
            self.window = Some(window);
        }
        let relay = window.relay_on(now_ms);
        if relay != self.relay_on {
            tracing::info!(
                "Heating element {} on held duty {:.2}%",
                if relay { "on" } else { "off" },
                window.duty_percent
            );
        }
        self.actuator.set_relay(relay).await;
        self.relay_on = relay;
    }

    /// Clear PID state and the duty window.
    pub fn reset(&mut self) {
        self.pid.reset();
        self.window = None;
    }

    pub fn pause(&mut self) {
        if !self.paused {
            tracing::info!("Regulation paused; manual commands enabled");
        }
        self.paused = true;
        self.phase = LoopPhase::Idle;
    }

    /// Hand control back to the loop. The PID window restarts on the next
    /// tick and the paused interval is not integrated.
    pub fn resume(&mut self) {
        if self.paused {
            tracing::info!("Regulation resumed");
        }
        self.paused = false;
        self.window = None;
        self.pid.restart_timing();
        self.fan_duty = self.configured_fan_duty;
    }

    pub async fn set_relay_manual(&mut self, energized: bool) -> Result<(), RegulationError> {
        if !self.paused {
            return Err(RegulationError::NotPaused);
        }
        tracing::info!("Manual relay command: {}", energized);
        self.actuator.set_relay(energized).await;
        self.relay_on = energized;
        Ok(())
    }

    pub async fn set_fan_manual(&mut self, percent: u8) -> Result<(), RegulationError> {
        if !self.paused {
            return Err(RegulationError::NotPaused);
        }
        if percent > 100 {
            return Err(RegulationError::InvalidFanDuty(percent));
        }
        tracing::info!("Manual fan command: {}%", percent);
        self.actuator.set_fan_duty(percent).await;
        self.fan_duty = percent;
        Ok(())
    }

    pub fn status(&self) -> RegulationStatus {
        RegulationStatus {
            phase: self.phase,
            paused: self.paused,
            mode: self.mode,
            setpoint: self.threshold.setpoint(),
            relay_on: self.relay_on,
            fan_duty: self.fan_duty,
            window: self.window,
            last_mean: self.last_record.as_ref().map(|r| r.sensor_mean),
            cycles: self.cycles,
            skipped_cycles: self.skipped_cycles,
            consecutive_failures: self.consecutive_failures,
        }
    }

    /// De-energize the heater.
    pub async fn shutdown(&mut self) {
        tracing::info!("Regulation stopping; heater off");
        self.actuator.set_relay(false).await;
        self.relay_on = false;
    }

    pub async fn handle_request(&mut self, request: RegulationRequest) {
        match request {
            RegulationRequest::Status { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            RegulationRequest::Pause { respond_to } => {
                self.pause();
                let _ = respond_to.send(Ok(()));
            }
            RegulationRequest::Resume { respond_to } => {
                self.resume();
                let _ = respond_to.send(Ok(()));
            }
            RegulationRequest::SetRelay { energized, respond_to } => {
                let result = self.set_relay_manual(energized).await;
                let _ = respond_to.send(result);
            }
            RegulationRequest::SetFan { percent, respond_to } => {
                let result = self.set_fan_manual(percent).await;
                let _ = respond_to.send(result);
            }
        }
    }

    /// Drive the loop at the configured tick until `shutdown` completes,
    /// serving console requests between cycles. The heater is switched off
    /// before returning.
    pub async fn run<C, S, F>(
        &mut self,
        clock: &C,
        sink: &mut S,
        mut requests: mpsc::Receiver<RegulationRequest>,
        shutdown: F,
    ) where
        C: TimeInterface,
        S: TelemetrySink,
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(Duration::from_millis(self.tick_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        let mut requests_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                request = requests.recv(), if requests_open => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        tracing::debug!("Console channel closed");
                        requests_open = false;
                    }
                },
                _ = interval.tick() => {
                    if let CycleOutcome::Actuated(record) = self.tick(clock.now_ms()).await {
                        if let Err(e) = sink.emit(&record).await {
                            tracing::warn!("Failed to emit telemetry: {}", e);
                        }
                    }
                }
            }
        }
        self.shutdown().await;
    }
}
