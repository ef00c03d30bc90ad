use super::{encode_lock_pin, regs, EvoHal, Generation, HalCaps};
use crate::head::HeadControl;
use crate::sink::MethodWrite;

/// Ampere/Orin-class display engine (C67x classes and later).
///
/// Minimum refresh is a per-head display rate; stall lock only supports line-lock unstall.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen6Hal;

static CAPS: HalCaps = HalCaps {
    supports_display_rate: true,
    needs_flip_transition_war: false,
    supports_crash_lock_unstall: false,
    max_min_refresh_interval_us: regs::display_rate::MIN_REFRESH_INTERVAL_MAX,
    core_class: 0xc67d,
    window_class: 0xc67e,
    window_imm_class: 0xc67b,
    cursor_class: 0xc67a,
};

impl EvoHal for Gen6Hal {
    fn generation(&self) -> Generation {
        Generation::Gen6
    }

    fn caps(&self) -> &HalCaps {
        &CAPS
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
            if hc.crash_lock_unstall {
                tracing::warn!(head, "crash-lock unstall requested; using line lock");
            }
            data |= f::ENABLE | f::MODE_ONE_SHOT;
            data |= encode_lock_pin(hc.stall_lock_pin) << f::LOCK_PIN_SHIFT;
        }
        out.push(MethodWrite::new(
            regs::core::head(regs::core::HEAD_SET_STALL_LOCK, head),
            data,
        ));
    }

    fn encode_display_rate(
        &self,
        head: u32,
        enable: bool,
        timeout_us: u32,
        out: &mut Vec<MethodWrite>,
    ) {
        use regs::display_rate as f;

        let data = if enable {
            let interval = timeout_us.min(f::MIN_REFRESH_INTERVAL_MAX);
            let mut data = f::RUN_MODE_ONE_SHOT | (interval << f::MIN_REFRESH_INTERVAL_SHIFT);
            if interval != 0 {
                data |= f::MIN_REFRESH_ENABLE;
            }
            data
        } else {
            0
        };
        out.push(MethodWrite::new(
            regs::core::head(regs::core::HEAD_SET_DISPLAY_RATE, head),
            data,
        ));
    }
}
