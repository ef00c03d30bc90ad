use std::cell::Cell;
use std::time::Instant;

/// Monotonic nanosecond clock.
pub trait HostClock {
    fn now_ns(&self) -> u64;
}

/// `Instant`-backed clock; time zero is the moment the clock was created.
#[derive(Debug, Clone)]
pub struct StdHostClock {
    origin: Instant,
}

impl StdHostClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StdHostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for StdHostClock {
    fn now_ns(&self) -> u64 {
        // Saturate instead of wrapping; 584 years of uptime is not a concern.
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Manually driven clock for tests.
///
/// With a non-zero `auto_advance_ns`, every read moves time forward by that step. Polling loops
/// that spin on the clock then make progress without a second thread.
#[derive(Debug, Default)]
pub struct FakeHostClock {
    now_ns: Cell<u64>,
    auto_advance_ns: u64,
}

impl FakeHostClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now_ns: Cell::new(start_ns),
            auto_advance_ns: 0,
        }
    }

    pub fn with_auto_advance(start_ns: u64, step_ns: u64) -> Self {
        Self {
            now_ns: Cell::new(start_ns),
            auto_advance_ns: step_ns,
        }
    }

    pub fn set_ns(&self, now_ns: u64) {
        self.now_ns.set(now_ns);
    }

    pub fn advance_ns(&self, delta_ns: u64) {
        self.now_ns.set(self.now_ns.get().saturating_add(delta_ns));
    }
}

impl HostClock for FakeHostClock {
    fn now_ns(&self) -> u64 {
        let now = self.now_ns.get();
        if self.auto_advance_ns != 0 {
            self.now_ns.set(now.saturating_add(self.auto_advance_ns));
        }
        now
    }
}
