//! Host time and deferred timer primitives for the display engine.
//!
//! Every deadline in the engine is expressed in **host monotonic nanoseconds** read from a
//! [`HostClock`]. In production the clock is backed by `Instant`; unit tests drive the engine
//! deterministically with [`FakeHostClock`].
//!
//! [`DeferredTimers`] is the timer service used to run work outside of the notification path
//! that requested it. Each timer holds a `Weak` reference to its target, so a timer that fires
//! after the target has been torn down does nothing.
#![forbid(unsafe_code)]

mod clock;
mod deferred;
mod timer_queue;

pub use clock::{FakeHostClock, HostClock, StdHostClock};
pub use deferred::{run_due, DeferredCallback, DeferredTimers};
pub use timer_queue::{TimerEvent, TimerId, TimerQueue};

pub const NANOS_PER_MICRO: u64 = 1_000;
pub const NANOS_PER_MILLI: u64 = 1_000_000;
pub const NANOS_PER_SEC: u64 = 1_000_000_000;
