use std::{sync::Arc, time::Instant};

/// Abstraction over a time source to improve testability.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time instant.
    fn now(&self) -> Instant;
}

/// System clock using `Instant::now()`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Millisecond service time derived from a [`Clock`].
///
/// Wire timestamps are 32-bit milliseconds that wrap; the first reading is 1 so
/// that 0 can keep meaning "never" in peer bookkeeping.
pub(crate) struct HostClock {
    clock: Arc<dyn Clock>,
    start: Instant,
}

impl HostClock {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        Self { clock, start }
    }

    pub(crate) fn now_ms(&self) -> u32 {
        let elapsed = self.clock.now().saturating_duration_since(self.start).as_millis() as u64;
        elapsed.wrapping_add(1) as u32
    }
}
