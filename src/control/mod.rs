//! Relay decision logic: a hysteresis controller and a time-proportioned PID.

pub mod pid;
pub mod threshold;

pub use pid::{on_duration_ms, TimeProportionedPid};
pub use threshold::ThresholdController;
