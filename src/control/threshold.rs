// Hysteresis (bang-bang) relay decision

/// Decide the relay state from the mean interior temperature.
///
/// Energize at or below `setpoint - deadband`, de-energize at or above
/// `setpoint + deadband`, otherwise keep `previous_state` so the relay does
/// not chatter around the setpoint.
pub fn decide(mean_temp: f64, setpoint: f64, deadband: f64, previous_state: bool) -> bool {
    if mean_temp <= setpoint - deadband {
        true
    } else if mean_temp >= setpoint + deadband {
        false
    } else {
        previous_state
    }
}

/// [`decide`] bound to a fixed setpoint and deadband.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdController {
    setpoint: f64,
    deadband: f64,
}

impl ThresholdController {
    pub fn new(setpoint: f64, deadband: f64) -> Self {
        Self { setpoint, deadband }
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn decide(&self, mean_temp: f64, previous_state: bool) -> bool {
        decide(mean_temp, self.setpoint, self.deadband, previous_state)
    }
}
