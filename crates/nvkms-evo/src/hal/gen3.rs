use super::{EvoHal, Generation, HalCaps};

/// Volta-class display engine (C37x classes).
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen3Hal;

static CAPS: HalCaps = HalCaps {
    supports_display_rate: false,
    needs_flip_transition_war: false,
    supports_crash_lock_unstall: true,
    max_min_refresh_interval_us: 0,
    core_class: 0xc37d,
    window_class: 0xc37e,
    window_imm_class: 0xc37b,
    cursor_class: 0xc37a,
};

impl EvoHal for Gen3Hal {
    fn generation(&self) -> Generation {
        Generation::Gen3
    }

    fn caps(&self) -> &HalCaps {
        &CAPS
    }
}
