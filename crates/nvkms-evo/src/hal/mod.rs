//! Per-generation method encodings.
//!
//! The HAL is picked once per device with [`hal_for`]. Everything that is identical across
//! generations lives in the trait's provided methods; each generation overrides what differs.

use std::fmt;

use crate::channel::{ChannelId, ChannelMask};
use crate::head::{HeadControl, LockMode, LockPin};
use crate::sink::MethodWrite;
use crate::update::UpdateMethod;

mod gen3;
mod gen5;
mod gen6;
pub mod regs;

pub use gen3::Gen3Hal;
pub use gen5::Gen5Hal;
pub use gen6::Gen6Hal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    /// Volta-class NVDisplay.
    Gen3,
    /// Turing-class NVDisplay.
    Gen5,
    /// Ampere/Orin and later: display-rate based minimum refresh.
    Gen6,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalCaps {
    /// Minimum refresh is programmed as a display rate instead of being driven by semaphore
    /// releases and unstall timers.
    pub supports_display_rate: bool,
    pub needs_flip_transition_war: bool,
    pub supports_crash_lock_unstall: bool,
    pub max_min_refresh_interval_us: u32,
    pub core_class: u32,
    pub window_class: u32,
    pub window_imm_class: u32,
    pub cursor_class: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarPhase {
    PreUpdate,
    PostUpdate,
}

pub trait EvoHal: fmt::Debug + Sync {
    fn generation(&self) -> Generation;

    fn caps(&self) -> &HalCaps;

    fn encode_update(&self, update: &UpdateMethod, out: &mut Vec<MethodWrite>) {
        encode_update_common(update, out);
    }

    /// Software trap methods around the UPDATE of a window whose surface toggles between null
    /// and non-null. Generations without the defect emit nothing.
    fn encode_transition_war(&self, _phase: WarPhase, _out: &mut Vec<MethodWrite>) {}

    fn encode_head_control(&self, head: u32, hc: &HeadControl, out: &mut Vec<MethodWrite>) {
        use regs::head_control as f;

        let mut data = 0;
        if hc.interlaced {
            data |= f::INTERLACED;
        }
        data |= lock_mode(hc.server_lock) << f::SERVER_LOCK_SHIFT;
        data |= encode_lock_pin(hc.server_lock_pin) << f::SERVER_LOCK_PIN_SHIFT;
        data |= lock_mode(hc.client_lock) << f::CLIENT_LOCK_SHIFT;
        data |= encode_lock_pin(hc.client_lock_pin) << f::CLIENT_LOCK_PIN_SHIFT;
        if let Some(pin) = hc.active_flip_lock_pin() {
            data |= f::FLIP_LOCK | encode_lock_pin(Some(pin)) << f::FLIP_LOCK_PIN_SHIFT;
        }
        if hc.stereo_locked {
            data |= f::STEREO_LOCK | encode_lock_pin(hc.stereo_pin) << f::STEREO_PIN_SHIFT;
        }
        out.push(MethodWrite::new(
            regs::core::head(regs::core::HEAD_SET_CONTROL, head),
            data,
        ));
    }

    fn encode_stall_lock(
        &self,
        head: u32,
        enable: bool,
        hc: &HeadControl,
        out: &mut Vec<MethodWrite>,
    ) {
        use regs::stall_lock as f;

        let mut data = 0;
        if enable {
            data |= f::ENABLE | f::MODE_ONE_SHOT;
            data |= encode_lock_pin(hc.stall_lock_pin) << f::LOCK_PIN_SHIFT;
            if hc.crash_lock_unstall && self.caps().supports_crash_lock_unstall {
                data |= f::UNSTALL_MODE_CRASH_LOCK;
            }
        }
        out.push(MethodWrite::new(
            regs::core::head(regs::core::HEAD_SET_STALL_LOCK, head),
            data,
        ));
    }

    /// Programs the minimum-refresh interval. Generations without display-rate support emit
    /// nothing; callers are expected to check [`HalCaps::supports_display_rate`].
    fn encode_display_rate(
        &self,
        _head: u32,
        _enable: bool,
        _timeout_us: u32,
        _out: &mut Vec<MethodWrite>,
    ) {
    }

    fn encode_window_surface(&self, surface_offset: Option<u64>, out: &mut Vec<MethodWrite>) {
        use regs::window as m;

        let (present, offset) = match surface_offset {
            Some(offset) => (regs::present_control::SURFACE_PRESENT, offset),
            None => (0, 0),
        };
        out.push(MethodWrite::new(m::SET_PRESENT_CONTROL, present));
        out.push(MethodWrite::new(
            m::SET_SURFACE_ADDRESS_HI,
            (offset >> 32) as u32,
        ));
        out.push(MethodWrite::new(m::SET_SURFACE_ADDRESS_LO, offset as u32));
    }

    fn encode_window_point(&self, x: i16, y: i16, out: &mut Vec<MethodWrite>) {
        out.push(MethodWrite::new(
            regs::window_imm::SET_POINT_OUT,
            pack_point(x, y),
        ));
    }

    fn encode_cursor_position(&self, x: i16, y: i16, out: &mut Vec<MethodWrite>) {
        out.push(MethodWrite::new(
            regs::cursor::SET_CURSOR_HOT_SPOT_POINT_OUT,
            pack_point(x, y),
        ));
    }
}

/// Returns the HAL for `generation`.
pub fn hal_for(generation: Generation) -> &'static dyn EvoHal {
    match generation {
        Generation::Gen3 => &Gen3Hal,
        Generation::Gen5 => &Gen5Hal,
        Generation::Gen6 => &Gen6Hal,
    }
}

/// Pins must have been checked with [`LockPin::is_valid`]; the value is masked to the
/// field width so a bad pin cannot reach neighbouring fields.
pub fn encode_lock_pin(pin: Option<LockPin>) -> u32 {
    debug_assert!(
        pin.map_or(true, LockPin::is_valid),
        "invalid lock pin {pin:?}"
    );
    let value = match pin {
        None => regs::lock_pin::NONE,
        Some(LockPin::External(n)) => regs::lock_pin::EXTERNAL_BASE + u32::from(n),
        Some(LockPin::Internal(n)) => regs::lock_pin::INTERNAL_BASE + u32::from(n),
    };
    value & regs::lock_pin::FIELD_MASK
}

fn lock_mode(mode: LockMode) -> u32 {
    match mode {
        LockMode::NoLock => 0,
        LockMode::FrameLock => 1,
        LockMode::RasterLock => 2,
    }
}

fn pack_point(x: i16, y: i16) -> u32 {
    (u32::from(y as u16) << 16) | u32::from(x as u16)
}

/// Splits an interlock set into the cursor/core word and the window word.
pub fn interlock_words(flags: ChannelMask) -> (u32, u32) {
    let mut cursor_core = flags
        .cursor_heads()
        .fold(0, |acc, head| acc | regs::interlock::cursor(head));
    if flags.contains(ChannelMask::CORE) {
        cursor_core |= regs::interlock::CORE;
    }
    let windows = flags.window_indices().fold(0u32, |acc, n| acc | (1 << n));
    (cursor_core, windows)
}

fn encode_update_common(update: &UpdateMethod, out: &mut Vec<MethodWrite>) {
    use regs::update as f;

    let mut data = encode_lock_pin(update.flip_lock_pin) << f::FLIP_LOCK_PIN_SHIFT;
    if update.release_elv {
        data |= f::RELEASE_ELV;
    }

    let (cursor_core, windows) = interlock_words(update.interlock_flags());
    match update.channel {
        ChannelId::Core => {
            out.push(MethodWrite::new(
                regs::core::SET_INTERLOCK_FLAGS,
                cursor_core,
            ));
            out.push(MethodWrite::new(
                regs::core::SET_WINDOW_INTERLOCK_FLAGS,
                windows,
            ));
            out.push(MethodWrite::new(regs::core::UPDATE, data));
        }
        ChannelId::Window(_) => {
            if update.interlock_with_imm {
                data |= f::INTERLOCK_WITH_WIN_IMM;
            }
            out.push(MethodWrite::new(
                regs::window::SET_INTERLOCK_FLAGS,
                cursor_core,
            ));
            out.push(MethodWrite::new(
                regs::window::SET_WINDOW_INTERLOCK_FLAGS,
                windows,
            ));
            out.push(MethodWrite::new(regs::window::UPDATE, data));
        }
        ChannelId::WindowImm(_) => {
            let imm = if update.interlock_group.is_empty() {
                0
            } else {
                f::IMM_INTERLOCK
            };
            out.push(MethodWrite::new(regs::window_imm::UPDATE, imm));
        }
        ChannelId::Cursor(_) => {
            out.push(MethodWrite::new(
                regs::cursor::SET_INTERLOCK_FLAGS,
                cursor_core,
            ));
            out.push(MethodWrite::new(regs::cursor::UPDATE, 0));
        }
    }
}
