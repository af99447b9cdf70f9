use tempbox_shared::TimeInterface;

/// Milliseconds since the regulator started, from the tokio clock.
///
/// Reads `tokio::time::Instant`, so it follows paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    started: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { started: tokio::time::Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeInterface for MonotonicClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
