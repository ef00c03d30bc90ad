//! NVDisplay/EVO display engine programming.
//!
//! - [`evo`]: channels, interlocked UPDATE transactions, fliplock and the per-generation HAL.
//! - [`vrr`]: the VRR state machine, minimum-refresh policy and software frame pacing.
//! - [`time`]: host clock and weak-target deferred timers.
#![forbid(unsafe_code)]

pub use nvkms_evo as evo;
pub use nvkms_time as time;
pub use nvkms_vrr as vrr;

pub use nvkms_evo::{EvoDevice, EvoError, Generation};
pub use nvkms_vrr::{DisplayDevice, DisplayDeviceConfig, FlipRequest, ModesetRequest, VrrError};
