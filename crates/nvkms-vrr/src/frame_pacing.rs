//! Software frame pacing for Adaptive-Sync heads.
//!
//! Firmware keeps a small record in device memory up to date once per raster-generator
//! interrupt. The driver never locks that record; it takes an optimistic snapshot guarded by
//! the record's timestamp and retries a bounded number of times.

use nvkms_evo::{
    EventHandle, MemoryHandle, RgLineActiveParams, RmControl, RmError, SharedMemoryMapping,
};

use crate::config::{HeadFlip, RasterTimings};
use crate::error::VrrError;

pub const FRAME_PACING_MAX_SNAPSHOT_ATTEMPTS: u32 = 5;

/// Default size of the device-memory block allocated per frame pacing session.
pub const FRAME_PACING_BLOCK_SIZE: usize = 4096;

/// Byte offsets of the firmware record.
pub mod layout {
    pub const DATA_TIMESTAMP: usize = 0x00;
    pub const EXPECTED_FRAME_NUM: usize = 0x08;
    pub const FLIP_TIME_ADJUSTMENT: usize = 0x0c;
    pub const CHECK_FLIP_TIME: usize = 0x10;
    pub const TIMEOUT_US: usize = 0x14;
    pub const FLIP_TIMESTAMP: usize = 0x18;
    pub const SIZE: usize = 0x20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramePacingSnapshot {
    pub data_timestamp: u64,
    pub expected_frame_num: u32,
    pub flip_time_adjustment: bool,
    pub check_flip_time: bool,
    pub timeout_us: u32,
    pub flip_timestamp_ns: u64,
}

/// Reads a consistent copy of the firmware record.
///
/// The record is accepted only if its timestamp reads the same before and after the payload.
/// Gives up after [`FRAME_PACING_MAX_SNAPSHOT_ATTEMPTS`].
pub fn read_snapshot(mapping: &dyn SharedMemoryMapping) -> Result<FramePacingSnapshot, VrrError> {
    for _ in 0..FRAME_PACING_MAX_SNAPSHOT_ATTEMPTS {
        let before = mapping.read_u64(layout::DATA_TIMESTAMP);
        let snapshot = FramePacingSnapshot {
            data_timestamp: before,
            expected_frame_num: mapping.read_u32(layout::EXPECTED_FRAME_NUM),
            flip_time_adjustment: mapping.read_u32(layout::FLIP_TIME_ADJUSTMENT) != 0,
            check_flip_time: mapping.read_u32(layout::CHECK_FLIP_TIME) != 0,
            timeout_us: mapping.read_u32(layout::TIMEOUT_US),
            flip_timestamp_ns: mapping.read_u64(layout::FLIP_TIMESTAMP),
        };
        if mapping.read_u64(layout::DATA_TIMESTAMP) == before {
            return Ok(snapshot);
        }
    }
    tracing::error!(
        attempts = FRAME_PACING_MAX_SNAPSHOT_ATTEMPTS,
        "frame pacing data kept changing while being read"
    );
    Err(VrrError::SnapshotDesync(FRAME_PACING_MAX_SNAPSHOT_ATTEMPTS))
}

/// Frame time limits handed to firmware when a session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTimeBounds {
    pub min_ns: u64,
    pub max_ns: u64,
}

impl FrameTimeBounds {
    /// `min` is the raster's full frame time, `max` the self-refresh timeout.
    pub fn from_timings(raster: &RasterTimings, timeout_us: u32) -> Self {
        Self {
            min_ns: raster.frame_time_ns(),
            max_ns: u64::from(timeout_us) * nvkms_time::NANOS_PER_MICRO,
        }
    }

    pub fn validate(&self) -> Result<(), VrrError> {
        if self.min_ns == 0 || self.max_ns == 0 || self.min_ns >= self.max_ns {
            return Err(VrrError::InvalidFramePacingBounds {
                min_ns: self.min_ns,
                max_ns: self.max_ns,
            });
        }
        Ok(())
    }
}

struct Session {
    memory: MemoryHandle,
    mapping: Box<dyn SharedMemoryMapping>,
}

/// Per-head frame pacing state.
#[derive(Default)]
pub struct FramePacingInfo {
    session: Option<Session>,
    /// Display-rate timeout last programmed on this head, in microseconds.
    pub display_rate_timeout_us: u32,
}

impl std::fmt::Debug for FramePacingInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePacingInfo")
            .field("active", &self.is_active())
            .field("memory", &self.session.as_ref().map(|s| s.memory))
            .field("display_rate_timeout_us", &self.display_rate_timeout_us)
            .finish()
    }
}

impl FramePacingInfo {
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Snapshot of the firmware record, if a session is open.
    pub fn snapshot(&self) -> Option<Result<FramePacingSnapshot, VrrError>> {
        self.session
            .as_ref()
            .map(|session| read_snapshot(session.mapping.as_ref()))
    }
}

/// Applies the firmware's pacing decision to a flip about to be built.
///
/// A desynced snapshot is logged and leaves the flip untouched.
pub fn track_and_delay_flip(info: &FramePacingInfo, flip: &mut HeadFlip) {
    let snapshot = match info.snapshot() {
        None => return,
        Some(Ok(snapshot)) => snapshot,
        Some(Err(err)) => {
            tracing::error!(sd = flip.sd, head = flip.head, %err, "skipping frame pacing adjustment");
            return;
        }
    };

    if snapshot.expected_frame_num > 1 {
        flip.tearing = false;
    }
    if snapshot.flip_time_adjustment && !(flip.tearing && snapshot.check_flip_time) {
        flip.timestamp_ns = snapshot.flip_timestamp_ns;
    }
}

#[derive(Debug, Default)]
struct TimeoutSubscription {
    event: Option<EventHandle>,
    refs: u32,
}

/// Opens and closes frame pacing sessions and shares the per-subdevice set-timeout event
/// subscription between them.
#[derive(Debug)]
pub struct FramePacingController {
    block_size: usize,
    subscriptions: Vec<TimeoutSubscription>,
}

impl FramePacingController {
    pub fn new(num_subdevices: u32, block_size: usize) -> Self {
        Self {
            block_size,
            subscriptions: (0..num_subdevices)
                .map(|_| TimeoutSubscription::default())
                .collect(),
        }
    }

    pub fn subscription_refs(&self, sd: u32) -> u32 {
        self.subscriptions.get(sd as usize).map_or(0, |s| s.refs)
    }

    /// Opens a session on `head`. Bounds are checked before any privileged call; on a later
    /// failure everything acquired so far is released again.
    pub fn enable(
        &mut self,
        rm: &mut dyn RmControl,
        info: &mut FramePacingInfo,
        sd: u32,
        head: u32,
        bounds: FrameTimeBounds,
    ) -> Result<(), VrrError> {
        if info.is_active() {
            return Ok(());
        }
        if let Err(err) = bounds.validate() {
            tracing::error!(sd, head, %err, "refusing to enable frame pacing");
            return Err(err);
        }

        self.acquire_event(rm, sd)?;
        let session = match self.open_session(rm, sd, head, bounds) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(sd, head, %err, "failed to enable frame pacing");
                self.release_event(rm, sd);
                return Err(err.into());
            }
        };
        tracing::debug!(sd, head, ?bounds, "frame pacing enabled");
        info.session = Some(session);
        Ok(())
    }

    /// Closes the session on `head`, if any.
    pub fn disable(
        &mut self,
        rm: &mut dyn RmControl,
        info: &mut FramePacingInfo,
        sd: u32,
        head: u32,
    ) {
        let Some(session) = info.session.take() else {
            return;
        };
        let params = RgLineActiveParams {
            enable: false,
            memory: None,
            max_frame_time_ns: 0,
            min_frame_time_ns: 0,
        };
        if let Err(err) = rm.set_rg_line_active(sd, head, &params) {
            tracing::warn!(sd, head, %err, "failed to disable firmware frame pacing");
        }
        drop(session.mapping);
        rm.unmap_memory(sd, session.memory);
        rm.free_memory(sd, session.memory);
        self.release_event(rm, sd);
        tracing::debug!(sd, head, "frame pacing disabled");
    }

    fn open_session(
        &self,
        rm: &mut dyn RmControl,
        sd: u32,
        head: u32,
        bounds: FrameTimeBounds,
    ) -> Result<Session, RmError> {
        let memory = rm.alloc_device_memory(sd, self.block_size)?;
        let mapping = match rm.map_memory(sd, memory) {
            Ok(mapping) => mapping,
            Err(err) => {
                rm.free_memory(sd, memory);
                return Err(err);
            }
        };
        let params = RgLineActiveParams {
            enable: true,
            memory: Some(memory),
            max_frame_time_ns: bounds.max_ns,
            min_frame_time_ns: bounds.min_ns,
        };
        if let Err(err) = rm.set_rg_line_active(sd, head, &params) {
            drop(mapping);
            rm.unmap_memory(sd, memory);
            rm.free_memory(sd, memory);
            return Err(err);
        }
        Ok(Session { memory, mapping })
    }

    fn acquire_event(&mut self, rm: &mut dyn RmControl, sd: u32) -> Result<(), VrrError> {
        let sub = self
            .subscriptions
            .get_mut(sd as usize)
            .ok_or(nvkms_evo::EvoError::InvalidSubdevice(sd))?;
        if sub.refs == 0 {
            sub.event = Some(rm.subscribe_vrr_set_timeout(sd)?);
        }
        sub.refs += 1;
        Ok(())
    }

    fn release_event(&mut self, rm: &mut dyn RmControl, sd: u32) {
        let Some(sub) = self.subscriptions.get_mut(sd as usize) else {
            return;
        };
        sub.refs = sub.refs.saturating_sub(1);
        if sub.refs == 0 {
            if let Some(event) = sub.event.take() {
                rm.unsubscribe(sd, event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvkms_evo::testing::{FakeSharedMemory, MockRm, RmCall};
    use pretty_assertions::assert_eq;

    fn bounds() -> FrameTimeBounds {
        FrameTimeBounds {
            min_ns: 6_944_444,
            max_ns: 25_000_000,
        }
    }

    #[test]
    fn consistent_record_is_read_once() {
        let shm = FakeSharedMemory::new(layout::SIZE);
        shm.write_u64(layout::DATA_TIMESTAMP, 77);
        shm.write_u32(layout::EXPECTED_FRAME_NUM, 2);
        shm.write_u32(layout::TIMEOUT_US, 20_000);
        shm.write_u64(layout::FLIP_TIMESTAMP, 1_000);

        let snapshot = read_snapshot(&shm).unwrap();
        assert_eq!(
            snapshot,
            FramePacingSnapshot {
                data_timestamp: 77,
                expected_frame_num: 2,
                flip_time_adjustment: false,
                check_flip_time: false,
                timeout_us: 20_000,
                flip_timestamp_ns: 1_000,
            }
        );
        assert_eq!(shm.reads(layout::EXPECTED_FRAME_NUM), 1);
    }

    #[test]
    fn gives_up_after_five_attempts_when_writer_never_settles() {
        let shm = FakeSharedMemory::new(layout::SIZE);
        shm.tick_on_read(layout::DATA_TIMESTAMP);

        let err = read_snapshot(&shm).unwrap_err();
        assert!(matches!(err, VrrError::SnapshotDesync(5)));
        assert_eq!(shm.reads(layout::EXPECTED_FRAME_NUM), 5);
        assert_eq!(shm.reads(layout::DATA_TIMESTAMP), 10);
    }

    #[test]
    fn bad_bounds_make_no_privileged_calls() {
        let mut rm = MockRm::new();
        let mut ctl = FramePacingController::new(1, FRAME_PACING_BLOCK_SIZE);
        let mut info = FramePacingInfo::default();

        for bounds in [
            FrameTimeBounds {
                min_ns: 20,
                max_ns: 20,
            },
            FrameTimeBounds {
                min_ns: 0,
                max_ns: 20,
            },
            FrameTimeBounds {
                min_ns: 10,
                max_ns: 0,
            },
        ] {
            let err = ctl.enable(&mut rm, &mut info, 0, 0, bounds).unwrap_err();
            assert!(matches!(err, VrrError::InvalidFramePacingBounds { .. }));
        }
        assert!(!info.is_active());
        assert!(rm.calls().is_empty());
    }

    #[test]
    fn heads_share_one_event_subscription() {
        let mut rm = MockRm::new();
        let mut ctl = FramePacingController::new(1, FRAME_PACING_BLOCK_SIZE);
        let mut a = FramePacingInfo::default();
        let mut b = FramePacingInfo::default();

        ctl.enable(&mut rm, &mut a, 0, 0, bounds()).unwrap();
        ctl.enable(&mut rm, &mut b, 0, 1, bounds()).unwrap();
        assert_eq!(rm.call_count("subscribe_vrr_set_timeout"), 1);
        assert_eq!(ctl.subscription_refs(0), 2);

        ctl.disable(&mut rm, &mut a, 0, 0);
        assert_eq!(rm.call_count("unsubscribe"), 0);
        ctl.disable(&mut rm, &mut b, 0, 1);
        assert_eq!(rm.call_count("unsubscribe"), 1);
        assert_eq!(rm.call_count("free_memory"), 2);
    }

    #[test]
    fn failed_rg_line_call_unwinds_everything() {
        let mut rm = MockRm::new();
        rm.fail("set_rg_line_active", 0x1f);
        let mut ctl = FramePacingController::new(1, FRAME_PACING_BLOCK_SIZE);
        let mut info = FramePacingInfo::default();

        let err = ctl.enable(&mut rm, &mut info, 0, 2, bounds()).unwrap_err();
        assert!(matches!(err, VrrError::Rm(RmError { status: 0x1f, .. })));
        assert!(!info.is_active());

        let names: Vec<_> = rm.calls().iter().map(RmCall::name).collect();
        assert_eq!(
            names,
            vec![
                "subscribe_vrr_set_timeout",
                "alloc_device_memory",
                "map_memory",
                "set_rg_line_active",
                "unmap_memory",
                "free_memory",
                "unsubscribe",
            ]
        );
        assert_eq!(ctl.subscription_refs(0), 0);
    }

    #[test]
    fn firmware_adjusts_flip_timestamp_and_tearing() {
        let mut rm = MockRm::new();
        let shm = rm.shared_memory();
        let mut ctl = FramePacingController::new(1, FRAME_PACING_BLOCK_SIZE);
        let mut info = FramePacingInfo::default();
        ctl.enable(&mut rm, &mut info, 0, 0, bounds()).unwrap();

        shm.write_u32(layout::EXPECTED_FRAME_NUM, 2);
        shm.write_u32(layout::FLIP_TIME_ADJUSTMENT, 1);
        shm.write_u64(layout::FLIP_TIMESTAMP, 5_000_000);

        let mut flip = HeadFlip {
            tearing: true,
            timestamp_ns: 1,
            ..HeadFlip::default()
        };
        track_and_delay_flip(&info, &mut flip);
        assert!(!flip.tearing);
        assert_eq!(flip.timestamp_ns, 5_000_000);
    }

    #[test]
    fn checked_tearing_flip_keeps_its_timestamp() {
        let mut rm = MockRm::new();
        let shm = rm.shared_memory();
        let mut ctl = FramePacingController::new(1, FRAME_PACING_BLOCK_SIZE);
        let mut info = FramePacingInfo::default();
        ctl.enable(&mut rm, &mut info, 0, 0, bounds()).unwrap();

        shm.write_u32(layout::EXPECTED_FRAME_NUM, 1);
        shm.write_u32(layout::FLIP_TIME_ADJUSTMENT, 1);
        shm.write_u32(layout::CHECK_FLIP_TIME, 1);
        shm.write_u64(layout::FLIP_TIMESTAMP, 5_000_000);

        let mut flip = HeadFlip {
            tearing: true,
            timestamp_ns: 1,
            ..HeadFlip::default()
        };
        track_and_delay_flip(&info, &mut flip);
        assert!(flip.tearing);
        assert_eq!(flip.timestamp_ns, 1);
    }

    #[test]
    fn bounds_come_from_raster_and_timeout() {
        let raster = RasterTimings {
            raster_width: 2200,
            raster_height: 1125,
            pixel_clock_khz: 297_000,
            interlaced: false,
        };
        let b = FrameTimeBounds::from_timings(&raster, 25_000);
        assert_eq!(
            b,
            FrameTimeBounds {
                min_ns: 8_333_333,
                max_ns: 25_000_000
            }
        );
        assert!(b.validate().is_ok());
    }
}
