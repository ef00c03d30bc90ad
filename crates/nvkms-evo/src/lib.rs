//! EVO/NVDisplay channel programming.
//!
//! This crate models the display engine's DMA channels (core, window, window-immediate and
//! cursor) and turns a per-transaction accumulation of pending channel writes into the UPDATE
//! method submissions that make those writes latch in one hardware frame:
//! - [`UpdateState`] collects which channels were touched while a modeset or flip is staged,
//! - [`EvoDevice::update`] computes the interlock groups, handles fliplock groups that only
//!   partially participate, brackets null/non-null surface transitions, and posts the UPDATEs
//!   through a [`ChannelRegisterSink`].
//!
//! Register encodings are delegated to a per-generation [`EvoHal`] selected once when the
//! device is created.
#![forbid(unsafe_code)]

pub mod channel;
pub mod device;
pub mod error;
pub mod fliplock;
pub mod hal;
pub mod head;
pub mod rm;
pub mod sink;
pub mod update;
pub mod update_state;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use channel::{Channel, ChannelId, ChannelMask, ChannelTable, MAX_HEADS, MAX_WINDOWS};
pub use device::{EvoDevice, EvoLayout, WindowFlip, CHANNEL_IDLE_TIMEOUT_NS, MAX_SUBDEVICES};
pub use error::EvoError;
pub use fliplock::{process_flip_lock_updates, FlipLockPlan};
pub use hal::{hal_for, EvoHal, Generation, HalCaps};
pub use head::{HeadControl, LockMode, LockPin, NUM_EXTERNAL_LOCK_PINS, NUM_INTERNAL_LOCK_PINS};
pub use rm::{
    EventHandle, MemoryHandle, RgLineActiveParams, RmControl, RmError, SharedMemoryMapping,
};
pub use sink::{ChannelRegisterSink, MethodWrite, NullSink};
pub use update::{UpdateKind, UpdateMethod, UpdateReport};
pub use update_state::{SubdevUpdateState, UpdateState};
