//! Simulated enclosure for running the regulation loop without hardware.
//!
//! [`Simulator`] owns a lumped thermal model of the box plus a set of
//! simulated one-wire sensors, and hands out capability handles
//! ([`SimBus`], [`SimActuator`], [`SimClock`]) implementing the traits from
//! `tempbox_shared`. Time only moves when [`Simulator::advance_ms`] is called.

pub mod simulator;

pub use simulator::enclosure::{EnclosureModel, SimConfig};
pub use simulator::{SimActuator, SimBus, SimClock, Simulator};
