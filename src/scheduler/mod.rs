pub mod time_interface;

pub use time_interface::MonotonicClock;
