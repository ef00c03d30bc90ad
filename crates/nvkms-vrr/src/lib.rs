//! Variable refresh rate orchestration on top of [`nvkms_evo`].
//!
//! [`DisplayDevice`] owns the display engine and drives VRR through three states:
//! `Disabled`, `Enabled` (configured at modeset) and `Active` (flip pacing engaged). Activation
//! programs stall lock and, on hardware with display-rate support, the minimum refresh interval
//! and the firmware frame pacing session of Adaptive-Sync heads.
#![forbid(unsafe_code)]

pub mod config;
pub mod device;
pub mod error;
pub mod frame_pacing;
pub mod link;
pub mod refresh;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{
    AllowAdaptiveSync, DisplayDeviceConfig, FlipRequest, HeadFlip, HeadModeset, ModesetRequest,
    RasterTimings,
};
pub use device::{run_timers, DisplayDevice, FlipReply, Head, MergeMode};
pub use error::VrrError;
pub use frame_pacing::{
    read_snapshot, track_and_delay_flip, FramePacingController, FramePacingInfo,
    FramePacingSnapshot, FrameTimeBounds, FRAME_PACING_MAX_SNAPSHOT_ATTEMPTS,
};
pub use link::{ConnectorKind, DisplayLink, LinkError, NullLink};
pub use refresh::{
    adjust_timings_for_vrr, effective_vrr_type, min_refresh_range, DpyVrrCaps, DpyVrrType,
    HwModeTimings, MinRefreshRange, VRR_MIN_REFRESH_RATE_MAX_VARIANCE,
};
pub use state::{ActiveVrr, EnabledVrr, VrrState, MAX_VRR_FLIP_DELTA};
