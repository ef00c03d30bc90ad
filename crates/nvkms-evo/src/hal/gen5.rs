use super::{regs, EvoHal, Generation, HalCaps, WarPhase};
use crate::sink::MethodWrite;

/// Turing-class display engine (C57x classes).
///
/// A window whose surface goes from null to non-null (or back) in a flip can latch a stale
/// present control here, so its UPDATE is bracketed with software traps that RM services.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen5Hal;

static CAPS: HalCaps = HalCaps {
    supports_display_rate: false,
    needs_flip_transition_war: true,
    supports_crash_lock_unstall: true,
    max_min_refresh_interval_us: 0,
    core_class: 0xc57d,
    window_class: 0xc57e,
    window_imm_class: 0xc57b,
    cursor_class: 0xc57a,
};

impl EvoHal for Gen5Hal {
    fn generation(&self) -> Generation {
        Generation::Gen5
    }

    fn caps(&self) -> &HalCaps {
        &CAPS
    }

    fn encode_transition_war(&self, phase: WarPhase, out: &mut Vec<MethodWrite>) {
        let method = match phase {
            WarPhase::PreUpdate => regs::window::SET_SPARE_PRE_UPDATE_TRAP,
            WarPhase::PostUpdate => regs::window::SET_SPARE_POST_UPDATE_TRAP,
        };
        out.push(MethodWrite::new(method, 1));
    }
}
