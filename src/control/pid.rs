//! Time-proportioned PID controller.
//!
//! The controller turns the error between setpoint and mean interior
//! temperature into a duty fraction in `0..=100`. The regulation loop turns
//! that fraction into an on-time inside a fixed window, so a slow relay can
//! still deliver a proportional amount of heat.
//!
//! Each [`TimeProportionedPid::update`] does, in order:
//!
//! 1. elapsed time since the previous sample (the first call of a session
//!    seeds the sample clock, so its elapsed time is zero);
//! 2. `error = setpoint - mean_temp`;
//! 3. integral accumulation in °C·s;
//! 4. derivative in °C/s, taken as zero when no time has elapsed;
//! 5. `raw = kp*error + ki*integral + kd*derivative`;
//! 6. clamp to `[-output_limit, output_limit]`;
//! 7. linear rescale to `[0, 100]`;
//! 8. store error and timestamp for the next call.

use crate::config::PidConfig;

#[derive(Debug, Clone)]
pub struct TimeProportionedPid {
    setpoint: f64,
    config: PidConfig,

    previous_error: f64,
    cumulative_error: f64,
    previous_sample_time_ms: Option<u64>,
    last_raw_output: f64,
}

impl TimeProportionedPid {
    pub fn new(setpoint: f64, config: PidConfig) -> Self {
        Self {
            setpoint,
            config,
            previous_error: 0.0,
            cumulative_error: 0.0,
            previous_sample_time_ms: None,
            last_raw_output: 0.0,
        }
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn config(&self) -> &PidConfig {
        &self.config
    }

    pub fn cumulative_error(&self) -> f64 {
        self.cumulative_error
    }

    pub fn previous_error(&self) -> f64 {
        self.previous_error
    }

    /// Raw output of the last update, after clamping.
    pub fn last_raw_output(&self) -> f64 {
        self.last_raw_output
    }

    /// Feed one mean temperature sampled at `now_ms`; returns the duty
    /// fraction in `0..=100`.
    #[must_use = "the duty fraction must be applied to the relay window"]
    pub fn update(&mut self, mean_temp: f64, now_ms: u64) -> f64 {
        let previous_ms = *self.previous_sample_time_ms.get_or_insert(now_ms);
        let elapsed_ms = now_ms.saturating_sub(previous_ms);
        let elapsed_s = elapsed_ms as f64 / 1000.0;

        let error = self.setpoint - mean_temp;

        self.cumulative_error += error * elapsed_s;
        if let Some(limit) = self.config.integral_limit {
            self.cumulative_error = self.cumulative_error.clamp(-limit, limit);
        }

        let rate_error = if elapsed_ms > 0 {
            (error - self.previous_error) / elapsed_s
        } else {
            0.0
        };

        let raw = self.config.kp * error + self.config.ki * self.cumulative_error + self.config.kd * rate_error;
        let limit = self.config.output_limit;
        let clamped = raw.clamp(-limit, limit);

        self.previous_error = error;
        self.previous_sample_time_ms = Some(now_ms);
        self.last_raw_output = clamped;

        let duty = rescale_to_duty(clamped, limit);
        tracing::trace!(
            "PID error={:.3} integral={:.3} rate={:.3} raw={:.3} duty={:.2}",
            error,
            self.cumulative_error,
            rate_error,
            raw,
            duty
        );
        duty
    }

    /// Forget when the last sample was taken while keeping the accumulated
    /// error, so a pause is not integrated as one long interval.
    pub fn restart_timing(&mut self) {
        self.previous_sample_time_ms = None;
    }

    /// Reset PID state.
    pub fn reset(&mut self) {
        self.previous_error = 0.0;
        self.cumulative_error = 0.0;
        self.previous_sample_time_ms = None;
        self.last_raw_output = 0.0;
    }
}

/// Map `[-limit, limit]` linearly onto `[0, 100]`.
fn rescale_to_duty(clamped: f64, limit: f64) -> f64 {
    ((clamped + limit) * 100.0 / (2.0 * limit)).clamp(0.0, 100.0)
}

/// On-time within a window of `window_ms` for a duty fraction in `0..=100`.
pub fn on_duration_ms(window_ms: u64, duty_percent: f64) -> u64 {
    let on = (window_ms as f64 * duty_percent / 100.0).round();
    if on <= 0.0 {
        0
    } else {
        (on as u64).min(window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gains(kp: f64, ki: f64, kd: f64) -> PidConfig {
        PidConfig { kp, ki, kd, ..PidConfig::default() }
    }

    #[test]
    fn test_zero_error_is_midpoint() {
        let mut pid = TimeProportionedPid::new(27.5, PidConfig::default());
        assert_eq!(pid.update(27.5, 10_000), 50.0);
        assert_eq!(pid.last_raw_output(), 0.0);
    }

    #[test]
    fn test_first_call_seeds_sample_clock() {
        let mut pid = TimeProportionedPid::new(27.5, PidConfig::default());
        // 2.5 °C below setpoint, no integral or derivative on the first call.
        let duty = pid.update(25.0, 123_456);
        assert_eq!(pid.cumulative_error(), 0.0);
        assert_eq!(pid.last_raw_output(), 2.5);
        assert_eq!(duty, (2.5 + 1000.0) * 100.0 / 2000.0);
    }

    #[test]
    fn test_identical_timestamps_stay_finite() {
        let mut pid = TimeProportionedPid::new(27.5, PidConfig::default());
        let first = pid.update(20.0, 5_000);
        let second = pid.update(35.0, 5_000);
        assert!(first.is_finite());
        assert!(second.is_finite());
        // kd contributes nothing without elapsed time: only kp * error remains.
        assert_eq!(pid.last_raw_output(), -7.5);
    }

    #[test]
    fn test_integral_and_derivative_use_seconds() {
        let mut pid = TimeProportionedPid::new(10.0, gains(0.0, 1.0, 0.0));
        let _ = pid.update(8.0, 0);
        let _ = pid.update(8.0, 2_000);
        // error 2 °C held for 2 s
        assert_eq!(pid.cumulative_error(), 4.0);
        assert_eq!(pid.last_raw_output(), 4.0);

        let mut pid = TimeProportionedPid::new(10.0, gains(0.0, 0.0, 1.0));
        let _ = pid.update(10.0, 0);
        let _ = pid.update(6.0, 500);
        // error rose by 4 °C in 0.5 s
        assert_eq!(pid.last_raw_output(), 8.0);
    }

    #[test]
    fn test_output_is_clamped_and_bounded() {
        let mut pid = TimeProportionedPid::new(27.5, gains(1000.0, 0.0, 0.0));
        assert_eq!(pid.update(-100.0, 0), 100.0);
        assert_eq!(pid.last_raw_output(), 1000.0);
        assert_eq!(pid.update(500.0, 1_000), 0.0);
        assert_eq!(pid.last_raw_output(), -1000.0);

        let mut pid = TimeProportionedPid::new(27.5, PidConfig::default());
        let mut now = 0;
        for temp in [-50.0, 0.0, 27.5, 60.0, 1.0e9, -1.0e9, 27.4, 27.6] {
            let duty = pid.update(temp, now);
            assert!((0.0..=100.0).contains(&duty), "duty {} for {}", duty, temp);
            assert!(pid.last_raw_output().abs() <= 1000.0);
            now += 5_000;
        }
    }

    #[test]
    fn test_integral_unbounded_by_default() {
        let mut pid = TimeProportionedPid::new(30.0, gains(0.0, 0.0, 0.0));
        for i in 0..=100 {
            let _ = pid.update(20.0, i * 10_000);
        }
        assert_eq!(pid.cumulative_error(), 10_000.0);
    }

    #[test]
    fn test_integral_limit_clamps_windup() {
        let config = PidConfig { integral_limit: Some(50.0), ..gains(0.0, 1.0, 0.0) };
        let mut pid = TimeProportionedPid::new(30.0, config);
        for i in 0..=100 {
            let _ = pid.update(20.0, i * 10_000);
        }
        assert_eq!(pid.cumulative_error(), 50.0);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut pid = TimeProportionedPid::new(27.5, PidConfig::default());
        let _ = pid.update(20.0, 0);
        let _ = pid.update(21.0, 5_000);
        pid.reset();
        assert_eq!(pid.cumulative_error(), 0.0);
        assert_eq!(pid.previous_error(), 0.0);
        assert_eq!(pid.update(27.5, 99_000), 50.0);
    }

    #[test]
    fn test_restart_timing_skips_paused_interval() {
        let mut pid = TimeProportionedPid::new(30.0, gains(0.0, 1.0, 0.0));
        let _ = pid.update(29.0, 0);
        let _ = pid.update(29.0, 1_000);
        assert_eq!(pid.cumulative_error(), 1.0);
        pid.restart_timing();
        let _ = pid.update(29.0, 3_600_000);
        assert_eq!(pid.cumulative_error(), 1.0);
    }

    #[test]
    fn test_on_duration() {
        assert_eq!(on_duration_ms(5000, 20.0), 1000);
        assert_eq!(on_duration_ms(5000, 0.0), 0);
        assert_eq!(on_duration_ms(5000, 100.0), 5000);
        assert_eq!(on_duration_ms(5000, 50.0), 2500);
        assert_eq!(on_duration_ms(5000, 150.0), 5000);
        assert_eq!(on_duration_ms(5000, -3.0), 0);
    }
}
