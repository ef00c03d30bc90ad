#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    NoLock,
    FrameLock,
    RasterLock,
}

/// Lock signal routing. Internal pins are on-chip, external pins go through the framelock
/// connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPin {
    Internal(u8),
    External(u8),
}

pub const NUM_INTERNAL_LOCK_PINS: u8 = 8;
pub const NUM_EXTERNAL_LOCK_PINS: u8 = 16;

impl LockPin {
    pub fn is_valid(self) -> bool {
        match self {
            LockPin::Internal(n) => n < NUM_INTERNAL_LOCK_PINS,
            LockPin::External(n) => n < NUM_EXTERNAL_LOCK_PINS,
        }
    }
}

/// Locking setup of one head on one subdevice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadControl {
    pub interlaced: bool,
    pub server_lock: LockMode,
    pub server_lock_pin: Option<LockPin>,
    pub client_lock: LockMode,
    pub client_lock_pin: Option<LockPin>,
    pub flip_lock: bool,
    pub flip_lock_pin: Option<LockPin>,
    pub stereo_locked: bool,
    pub stereo_pin: Option<LockPin>,
    /// Pin the raster generator waits on while stall-locked. `None` means the stall is only
    /// released by a content UPDATE with release-ELV.
    pub stall_lock_pin: Option<LockPin>,
    pub crash_lock_unstall: bool,
}

impl HeadControl {
    /// The pin this head is fliplocked to, if fliplock is enabled and routed.
    pub fn active_flip_lock_pin(&self) -> Option<LockPin> {
        if self.flip_lock {
            self.flip_lock_pin
        } else {
            None
        }
    }

    /// First routed pin that does not exist on the chip.
    pub fn invalid_pin(&self) -> Option<LockPin> {
        [
            self.server_lock_pin,
            self.client_lock_pin,
            self.flip_lock_pin,
            self.stereo_pin,
            self.stall_lock_pin,
        ]
        .into_iter()
        .flatten()
        .find(|pin| !pin.is_valid())
    }

    pub fn is_locked(&self) -> bool {
        self.server_lock != LockMode::NoLock || self.client_lock != LockMode::NoLock
    }
}
