//! Method offsets and field layouts shared by the supported display classes.
//!
//! Only the methods this crate emits are described. Field positions follow the NVDisplay
//! layout closely enough for the command streams to be inspected in tests; they are not a
//! replacement for the vendor class headers.

pub mod core {
    pub const UPDATE: u32 = 0x0200;
    pub const SET_INTERLOCK_FLAGS: u32 = 0x0218;
    pub const SET_WINDOW_INTERLOCK_FLAGS: u32 = 0x021c;

    pub const HEAD_STRIDE: u32 = 0x0400;
    pub const HEAD_SET_CONTROL: u32 = 0x2000;
    pub const HEAD_SET_STALL_LOCK: u32 = 0x2004;
    pub const HEAD_SET_DISPLAY_RATE: u32 = 0x2008;

    pub const fn head(method: u32, head: u32) -> u32 {
        method + head * HEAD_STRIDE
    }
}

pub mod window {
    pub const UPDATE: u32 = 0x0200;
    pub const SET_INTERLOCK_FLAGS: u32 = 0x0204;
    pub const SET_WINDOW_INTERLOCK_FLAGS: u32 = 0x0208;
    pub const SET_SPARE_PRE_UPDATE_TRAP: u32 = 0x0214;
    pub const SET_SPARE_POST_UPDATE_TRAP: u32 = 0x0218;
    pub const SET_PRESENT_CONTROL: u32 = 0x0308;
    pub const SET_SURFACE_ADDRESS_HI: u32 = 0x0400;
    pub const SET_SURFACE_ADDRESS_LO: u32 = 0x0404;
}

pub mod window_imm {
    pub const UPDATE: u32 = 0x0200;
    pub const SET_POINT_OUT: u32 = 0x0208;
}

pub mod cursor {
    pub const UPDATE: u32 = 0x0200;
    pub const SET_INTERLOCK_FLAGS: u32 = 0x0204;
    pub const SET_CURSOR_HOT_SPOT_POINT_OUT: u32 = 0x0208;
}

pub mod update {
    pub const RELEASE_ELV: u32 = 1 << 0;
    pub const FLIP_LOCK_PIN_SHIFT: u32 = 4;
    pub const INTERLOCK_WITH_WIN_IMM: u32 = 1 << 12;
    /// Window-immediate UPDATE: latch together with the owning window.
    pub const IMM_INTERLOCK: u32 = 1 << 0;
}

pub mod interlock {
    pub const fn cursor(head: u32) -> u32 {
        1 << head
    }
    pub const CORE: u32 = 1 << 16;
}

pub mod lock_pin {
    pub const NONE: u32 = 0;
    pub const EXTERNAL_BASE: u32 = 0x01;
    pub const INTERNAL_BASE: u32 = 0x18;
    pub const FIELD_MASK: u32 = 0x1f;
}

pub mod head_control {
    pub const INTERLACED: u32 = 1 << 0;
    pub const SERVER_LOCK_SHIFT: u32 = 4;
    pub const SERVER_LOCK_PIN_SHIFT: u32 = 6;
    pub const CLIENT_LOCK_SHIFT: u32 = 12;
    pub const CLIENT_LOCK_PIN_SHIFT: u32 = 14;
    pub const FLIP_LOCK: u32 = 1 << 20;
    pub const FLIP_LOCK_PIN_SHIFT: u32 = 21;
    pub const STEREO_LOCK: u32 = 1 << 26;
    pub const STEREO_PIN_SHIFT: u32 = 27;
}

pub mod stall_lock {
    pub const ENABLE: u32 = 1 << 0;
    pub const MODE_ONE_SHOT: u32 = 1 << 1;
    pub const LOCK_PIN_SHIFT: u32 = 2;
    pub const UNSTALL_MODE_CRASH_LOCK: u32 = 1 << 7;
}

pub mod display_rate {
    pub const RUN_MODE_ONE_SHOT: u32 = 1 << 0;
    pub const MIN_REFRESH_ENABLE: u32 = 1 << 1;
    pub const MIN_REFRESH_INTERVAL_SHIFT: u32 = 4;
    pub const MIN_REFRESH_INTERVAL_MAX: u32 = 0x003f_ffff;
}

pub mod present_control {
    pub const SURFACE_PRESENT: u32 = 1 << 0;
}
