//! Minimum-refresh policy: which displays qualify for VRR, the self-refresh timeout to program
//! and whether a mode leaves enough headroom above the panel's minimum refresh rate.

use serde::{Deserialize, Serialize};

use crate::config::{AllowAdaptiveSync, RasterTimings};
use crate::link::ConnectorKind;

/// How far an Adaptive-Sync minimum refresh override may stray from the EDID value, in Hz.
pub const VRR_MIN_REFRESH_RATE_MAX_VARIANCE: u32 = 10;

/// `refresh_mHz * timeout_us` must reach this for the mode to keep 10% headroom above fmin.
const MIN_REFRESH_HEADROOM: u64 = 1_100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DpyVrrType {
    #[default]
    None,
    Gsync,
    AdaptiveSyncDefaultlisted,
    AdaptiveSyncNonDefaultlisted,
}

impl DpyVrrType {
    pub fn is_vrr(self) -> bool {
        self != DpyVrrType::None
    }

    pub fn is_gsync(self) -> bool {
        self == DpyVrrType::Gsync
    }

    pub fn is_adaptive_sync(self) -> bool {
        matches!(
            self,
            DpyVrrType::AdaptiveSyncDefaultlisted | DpyVrrType::AdaptiveSyncNonDefaultlisted
        )
    }
}

/// VRR capabilities of the display attached to a head.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DpyVrrCaps {
    pub vrr_type: DpyVrrType,
    pub connector: ConnectorKind,
    /// Minimum refresh rate advertised in the display's VRR range descriptor.
    pub edid_min_refresh_hz: Option<u32>,
    /// Internal panel whose VRR support is vouched for by a platform cookie.
    pub has_platform_cookie: bool,
    /// G-SYNC panel that refreshes itself indefinitely.
    pub native_self_refresh: bool,
}

/// The display's VRR type as allowed by the client's modeset request.
pub fn effective_vrr_type(
    dpy: DpyVrrType,
    allow_vrr: bool,
    allow_adaptive_sync: AllowAdaptiveSync,
) -> DpyVrrType {
    if !allow_vrr {
        return DpyVrrType::None;
    }
    let allowed = match dpy {
        DpyVrrType::None => false,
        DpyVrrType::Gsync => true,
        DpyVrrType::AdaptiveSyncDefaultlisted => matches!(
            allow_adaptive_sync,
            AllowAdaptiveSync::DefaultlistedOnly | AllowAdaptiveSync::All
        ),
        DpyVrrType::AdaptiveSyncNonDefaultlisted => allow_adaptive_sync == AllowAdaptiveSync::All,
    };
    if allowed {
        dpy
    } else {
        DpyVrrType::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinRefreshRange {
    pub min_hz: u32,
    pub max_hz: u32,
}

impl MinRefreshRange {
    pub fn clamp(&self, requested_hz: u32) -> u32 {
        requested_hz.clamp(self.min_hz, self.max_hz)
    }
}

/// Range an Adaptive-Sync minimum refresh override is clamped into.
///
/// The upper end never exceeds what the raster can refresh at and the lower end never drops
/// below 1 Hz.
pub fn min_refresh_range(
    edid_min_hz: u32,
    variance_hz: u32,
    max_raster_hz: u32,
) -> MinRefreshRange {
    let max_hz = edid_min_hz
        .saturating_add(variance_hz)
        .min(max_raster_hz)
        .max(1);
    let min_hz = edid_min_hz.saturating_sub(variance_hz).max(1).min(max_hz);
    MinRefreshRange { min_hz, max_hz }
}

/// Self-refresh timeout for a display, in microseconds. `Some(0)` means no forced refresh;
/// `None` means the display gives no usable minimum refresh rate.
pub fn vrr_timeout_us(
    dpy: &DpyVrrCaps,
    raster: &RasterTimings,
    fmin_hz: Option<u32>,
) -> Option<u32> {
    if let Some(fmin) = fmin_hz.filter(|&f| f > 0) {
        return Some(1_000_000 / fmin);
    }
    if dpy.connector == ConnectorKind::Internal && dpy.has_platform_cookie {
        // fmin = refresh / 2.4, i.e. 2.4 nominal frame times.
        if raster.pixel_clock_khz == 0 {
            return None;
        }
        let pixels = u64::from(raster.raster_width) * u64::from(raster.raster_height);
        let timeout = 2_400 * pixels / u64::from(raster.pixel_clock_khz);
        return u32::try_from(timeout).ok();
    }
    if dpy.vrr_type.is_gsync() && dpy.native_self_refresh {
        return Some(0);
    }
    None
}

/// Whether a mode refreshing at `refresh_mhz` keeps at least 10% headroom above the minimum
/// refresh rate implied by `timeout_us`. A zero timeout imposes no floor.
pub fn refresh_allows_vrr(refresh_mhz: u64, timeout_us: u32) -> bool {
    timeout_us == 0 || refresh_mhz.saturating_mul(u64::from(timeout_us)) >= MIN_REFRESH_HEADROOM
}

/// Mode timings as adjusted for VRR on one head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HwModeTimings {
    pub raster: RasterTimings,
    pub vrr_type: DpyVrrType,
    pub vrr_timeout_us: u32,
    pub needs_sw_frame_pacing: bool,
}

/// Decides the VRR type and timeout a mode is programmed with.
///
/// Falls back to a fixed-refresh mode when the display or the mode does not qualify.
pub fn adjust_timings_for_vrr(
    raster: RasterTimings,
    dpy: &DpyVrrCaps,
    allow_vrr: bool,
    allow_adaptive_sync: AllowAdaptiveSync,
    min_refresh_override_hz: Option<u32>,
    supports_display_rate: bool,
) -> HwModeTimings {
    let fixed = HwModeTimings {
        raster,
        ..HwModeTimings::default()
    };
    let vrr_type = effective_vrr_type(dpy.vrr_type, allow_vrr, allow_adaptive_sync);
    if !vrr_type.is_vrr() {
        return fixed;
    }

    let fmin_hz = match (dpy.edid_min_refresh_hz, min_refresh_override_hz) {
        (Some(edid), Some(requested)) if vrr_type.is_adaptive_sync() => {
            let range = min_refresh_range(
                edid,
                VRR_MIN_REFRESH_RATE_MAX_VARIANCE,
                raster.refresh_rate_hz(),
            );
            Some(range.clamp(requested))
        }
        (edid, _) => edid,
    };

    let Some(timeout_us) = vrr_timeout_us(dpy, &raster, fmin_hz) else {
        tracing::debug!(?vrr_type, "display has no usable minimum refresh rate");
        return fixed;
    };
    if !refresh_allows_vrr(raster.refresh_rate_mhz(), timeout_us) {
        tracing::debug!(
            refresh_mhz = raster.refresh_rate_mhz(),
            timeout_us,
            "mode too close to minimum refresh rate for VRR"
        );
        return fixed;
    }

    HwModeTimings {
        raster,
        vrr_type,
        vrr_timeout_us: timeout_us,
        needs_sw_frame_pacing: vrr_type.is_adaptive_sync() && supports_display_rate,
    }
}
