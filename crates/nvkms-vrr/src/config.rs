//! Device configuration and the modeset/flip request shapes consumed by [`crate::DisplayDevice`].

use nvkms_evo::{EvoLayout, Generation, LockPin};
use serde::{Deserialize, Serialize};

use crate::error::VrrError;
use crate::frame_pacing::FRAME_PACING_BLOCK_SIZE;
use crate::refresh::DpyVrrCaps;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayDeviceConfig {
    pub generation: Generation,
    pub num_subdevices: u32,
    pub num_heads: u32,
    pub windows_per_head: u32,
    /// Size of the device-memory block shared with firmware for frame pacing.
    pub frame_pacing_block_size: usize,
}

impl Default for DisplayDeviceConfig {
    fn default() -> Self {
        let layout = EvoLayout::default();
        Self {
            generation: Generation::Gen6,
            num_subdevices: layout.num_subdevices,
            num_heads: layout.num_heads,
            windows_per_head: layout.windows_per_head,
            frame_pacing_block_size: FRAME_PACING_BLOCK_SIZE,
        }
    }
}

impl DisplayDeviceConfig {
    pub fn layout(&self) -> EvoLayout {
        EvoLayout {
            num_subdevices: self.num_subdevices,
            num_heads: self.num_heads,
            windows_per_head: self.windows_per_head,
        }
    }

    pub fn validate(&self) -> Result<(), VrrError> {
        if self.frame_pacing_block_size < crate::frame_pacing::layout::SIZE {
            return Err(VrrError::InvalidConfig(format!(
                "frame pacing block of {} bytes is smaller than the shared record",
                self.frame_pacing_block_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowAdaptiveSync {
    #[default]
    Disabled,
    DefaultlistedOnly,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RasterTimings {
    /// Total pixels per line, blanking included.
    pub raster_width: u32,
    /// Total lines per frame, blanking included.
    pub raster_height: u32,
    pub pixel_clock_khz: u32,
    pub interlaced: bool,
}

impl RasterTimings {
    fn pixels_per_frame(&self) -> u64 {
        u64::from(self.raster_width) * u64::from(self.raster_height)
    }

    /// Nominal refresh rate in millihertz; 0 for degenerate timings.
    pub fn refresh_rate_mhz(&self) -> u64 {
        let pixels = self.pixels_per_frame();
        if pixels == 0 {
            return 0;
        }
        u64::from(self.pixel_clock_khz) * 1_000_000 / pixels
    }

    pub fn refresh_rate_hz(&self) -> u32 {
        u32::try_from(self.refresh_rate_mhz() / 1000).unwrap_or(u32::MAX)
    }

    /// Duration of one full raster; the shortest frame this mode can produce.
    pub fn frame_time_ns(&self) -> u64 {
        if self.pixel_clock_khz == 0 {
            return 0;
        }
        self.pixels_per_frame() * 1_000_000 / u64::from(self.pixel_clock_khz)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadModeset {
    pub sd: u32,
    pub head: u32,
    /// `None` shuts the head down.
    pub timings: Option<RasterTimings>,
    pub dpy: DpyVrrCaps,
    /// Requested Adaptive-Sync minimum refresh rate in Hz.
    pub vrr_override_min_refresh_rate: Option<u32>,
    pub flip_lock_pin: Option<LockPin>,
    /// Heads that scan out the other halves of this head's image.
    pub merge_secondary_heads: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ModesetRequest {
    pub allow_vrr: bool,
    pub allow_adaptive_sync: AllowAdaptiveSync,
    pub heads: Vec<HeadModeset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadFlip {
    pub sd: u32,
    pub head: u32,
    pub surface_offset: Option<u64>,
    pub tearing: bool,
    pub min_present_interval: u32,
    /// Earliest presentation time; 0 presents as soon as possible.
    pub timestamp_ns: u64,
    pub flip_lock_qualifying: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FlipRequest {
    /// `Some` applies the client's VRR preference with this flip.
    pub allow_vrr: Option<bool>,
    pub heads: Vec<HeadFlip>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_device_config_with_defaults() {
        let cfg: DisplayDeviceConfig =
            serde_json::from_str(r#"{ "generation": "gen5", "num_heads": 2 }"#).unwrap();
        assert_eq!(
            cfg,
            DisplayDeviceConfig {
                generation: Generation::Gen5,
                num_heads: 2,
                ..DisplayDeviceConfig::default()
            }
        );
        assert!(serde_json::from_str::<DisplayDeviceConfig>(r#"{ "bogus": 1 }"#).is_err());
    }

    #[test]
    fn parses_modeset_request() {
        let req: ModesetRequest = serde_json::from_str(
            r#"{
                "allow_vrr": true,
                "allow_adaptive_sync": "defaultlisted_only",
                "heads": [{
                    "head": 1,
                    "timings": { "raster_width": 2200, "raster_height": 1125, "pixel_clock_khz": 148500 },
                    "dpy": { "vrr_type": "adaptive_sync_defaultlisted", "edid_min_refresh_hz": 48 },
                    "flip_lock_pin": { "internal": 0 }
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(
            req.allow_adaptive_sync,
            AllowAdaptiveSync::DefaultlistedOnly
        );
        let head = &req.heads[0];
        assert_eq!(head.flip_lock_pin, Some(LockPin::Internal(0)));
        assert_eq!(head.timings.unwrap().refresh_rate_mhz(), 60_000);
    }

    #[test]
    fn raster_rates_are_exact_integers() {
        let t = RasterTimings {
            raster_width: 2200,
            raster_height: 1125,
            pixel_clock_khz: 148_500,
            interlaced: false,
        };
        assert_eq!(t.refresh_rate_hz(), 60);
        assert_eq!(t.frame_time_ns(), 16_666_666);
        assert_eq!(RasterTimings::default().refresh_rate_mhz(), 0);
    }
}
