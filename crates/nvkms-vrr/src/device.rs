use std::cell::RefCell;
use std::rc::{Rc, Weak};

use nvkms_evo::{
    ChannelId, ChannelRegisterSink, EvoDevice, EvoError, HeadControl, RmControl, UpdateReport,
    UpdateState, WindowFlip,
};
use nvkms_time::{run_due, DeferredTimers, HostClock, TimerId, NANOS_PER_MICRO};

use crate::config::{DisplayDeviceConfig, FlipRequest, HeadFlip, ModesetRequest};
use crate::error::VrrError;
use crate::frame_pacing::{
    track_and_delay_flip, FramePacingController, FramePacingInfo, FrameTimeBounds,
};
use crate::link::{set_link_vrr, DisplayLink};
use crate::refresh::{adjust_timings_for_vrr, DpyVrrCaps, HwModeTimings};
use crate::state::VrrState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    #[default]
    Single,
    Primary,
    Secondary {
        primary: u32,
    },
}

/// Per-head display state on one subdevice.
#[derive(Debug, Default)]
pub struct Head {
    /// `None` while the head is shut down.
    pub timings: Option<HwModeTimings>,
    pub dpy: DpyVrrCaps,
    pub merge: MergeMode,
    pub merge_secondary_heads: Vec<u32>,
    vrr_active: bool,
    frame_pacing: FramePacingInfo,
    unstall_timer: Option<TimerId>,
    retimeout_timer: Option<TimerId>,
}

impl Head {
    pub fn is_active(&self) -> bool {
        self.timings.is_some()
    }

    pub fn is_vrr(&self) -> bool {
        self.timings.is_some_and(|t| t.vrr_type.is_vrr())
    }

    pub fn is_vrr_active(&self) -> bool {
        self.vrr_active
    }

    pub fn frame_pacing(&self) -> &FramePacingInfo {
        &self.frame_pacing
    }

    pub fn unstall_timer(&self) -> Option<TimerId> {
        self.unstall_timer
    }

    fn pacing_head(&self, head: u32) -> u32 {
        match self.merge {
            MergeMode::Secondary { primary } => primary,
            MergeMode::Single | MergeMode::Primary => head,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlipReply {
    /// Semaphore slot the flip releases on hardware without display-rate support.
    pub vrr_semaphore_index: Option<u32>,
    pub report: UpdateReport,
}

/// A display engine plus the VRR state layered on top of it.
///
/// Always lives in an `Rc<RefCell<_>>`; deferred timers hold a weak handle to it and do
/// nothing once it is dropped.
pub struct DisplayDevice {
    evo: EvoDevice,
    rm: Box<dyn RmControl>,
    link: Box<dyn DisplayLink>,
    clock: Rc<dyn HostClock>,
    config: DisplayDeviceConfig,
    vrr: VrrState,
    heads: Vec<Vec<Head>>,
    pacing: FramePacingController,
    timers: Rc<RefCell<DeferredTimers<DisplayDevice>>>,
    me: Weak<RefCell<DisplayDevice>>,
    framelock_attached: bool,
}

impl std::fmt::Debug for DisplayDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayDevice")
            .field("evo", &self.evo)
            .field("vrr", &self.vrr)
            .field("heads", &self.heads)
            .field("framelock_attached", &self.framelock_attached)
            .finish_non_exhaustive()
    }
}

/// Fires every deferred timer of `device` that is due.
pub fn run_timers(device: &Rc<RefCell<DisplayDevice>>) -> usize {
    let (timers, now) = {
        let dev = device.borrow();
        (dev.timers.clone(), dev.clock.now_ns())
    };
    run_due(&timers, now)
}

impl DisplayDevice {
    pub fn new(
        config: DisplayDeviceConfig,
        sink: Box<dyn ChannelRegisterSink>,
        rm: Box<dyn RmControl>,
        link: Box<dyn DisplayLink>,
        clock: Rc<dyn HostClock>,
    ) -> Result<Rc<RefCell<Self>>, VrrError> {
        config.validate()?;
        let evo = EvoDevice::new(config.generation, config.layout(), sink)?;
        let heads = (0..config.num_subdevices)
            .map(|_| (0..config.num_heads).map(|_| Head::default()).collect())
            .collect();
        let pacing =
            FramePacingController::new(config.num_subdevices, config.frame_pacing_block_size);

        Ok(Rc::new_cyclic(|me| {
            RefCell::new(Self {
                evo,
                rm,
                link,
                clock,
                config,
                vrr: VrrState::default(),
                heads,
                pacing,
                timers: Rc::new(RefCell::new(DeferredTimers::new())),
                me: me.clone(),
                framelock_attached: false,
            })
        }))
    }

    pub fn config(&self) -> &DisplayDeviceConfig {
        &self.config
    }

    pub fn evo(&self) -> &EvoDevice {
        &self.evo
    }

    pub fn vrr(&self) -> &VrrState {
        &self.vrr
    }

    pub fn head(&self, sd: u32, head: u32) -> Option<&Head> {
        self.heads.get(sd as usize)?.get(head as usize)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().pending()
    }

    /// Shared handle to the timer service; stays usable after the device is dropped.
    pub fn timer_service(&self) -> Rc<RefCell<DeferredTimers<DisplayDevice>>> {
        self.timers.clone()
    }

    pub fn frame_pacing_subscription_refs(&self, sd: u32) -> u32 {
        self.pacing.subscription_refs(sd)
    }

    /// VRR stays off while a framelock device is attached; attaching one disables it.
    pub fn set_framelock_attached(&mut self, attached: bool) {
        self.framelock_attached = attached;
        if attached {
            self.disable_vrr();
        }
    }

    /// `(sd, head)` of every active head driving a VRR mode.
    fn vrr_heads(&self) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        for (sd, heads) in (0u32..).zip(&self.heads) {
            for (head, h) in (0u32..).zip(heads) {
                if h.is_vrr() {
                    out.push((sd, head));
                }
            }
        }
        out
    }

    fn vrr_active_heads(&self) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        for (sd, heads) in (0u32..).zip(&self.heads) {
            for (head, h) in (0u32..).zip(heads) {
                if h.vrr_active {
                    out.push((sd, head));
                }
            }
        }
        out
    }

    fn head_mut(&mut self, sd: u32, head: u32) -> Result<&mut Head, VrrError> {
        self.heads
            .get_mut(sd as usize)
            .ok_or(EvoError::InvalidSubdevice(sd))?
            .get_mut(head as usize)
            .ok_or(VrrError::Evo(EvoError::InvalidHead(head)))
    }

    /// `Disabled -> Enabled`. Returns whether VRR is enabled afterwards.
    pub fn enable_vrr(&mut self) -> bool {
        if self.vrr.is_enabled() {
            return true;
        }
        if self.framelock_attached {
            tracing::debug!("framelock attached; not enabling VRR");
            return false;
        }
        let vrr_heads = self.vrr_heads();
        if vrr_heads.is_empty() {
            return false;
        }

        let mut done = Vec::with_capacity(vrr_heads.len());
        for &(sd, head) in &vrr_heads {
            if let Err(err) = self.enable_vrr_on_head(sd, head) {
                tracing::warn!(sd, head, %err, "failed to enable VRR on head");
                self.revert_vrr_heads(&done);
                self.revert_links(&[(sd, head)]);
                return false;
            }
            done.push((sd, head));
        }

        let mut subdevices: Vec<u32> = vrr_heads.iter().map(|&(sd, _)| sd).collect();
        subdevices.dedup();
        for sd in subdevices {
            if let Err(err) = self.rm.query_vrr_support(sd) {
                tracing::warn!(sd, %err, "VRR capability query failed");
                self.revert_vrr_heads(&done);
                return false;
            }
        }

        self.vrr.enable();
        tracing::info!(heads = vrr_heads.len(), "VRR enabled");
        true
    }

    fn enable_vrr_on_head(&mut self, sd: u32, head: u32) -> Result<(), VrrError> {
        let h = &self.heads[sd as usize][head as usize];
        if h.timings.is_some_and(|t| t.vrr_type.is_adaptive_sync()) {
            set_link_vrr(self.link.as_mut(), h.dpy.connector, sd, head, true)?;
        }
        self.rm.set_vrr_capable(sd, head, true)?;
        Ok(())
    }

    fn revert_vrr_heads(&mut self, heads: &[(u32, u32)]) {
        for &(sd, head) in heads {
            if let Err(err) = self.rm.set_vrr_capable(sd, head, false) {
                tracing::warn!(sd, head, %err, "failed to clear VRR capable head");
            }
        }
        self.revert_links(heads);
    }

    fn revert_links(&mut self, heads: &[(u32, u32)]) {
        for &(sd, head) in heads {
            let h = &self.heads[sd as usize][head as usize];
            if !h.timings.is_some_and(|t| t.vrr_type.is_adaptive_sync()) {
                continue;
            }
            if let Err(err) = set_link_vrr(self.link.as_mut(), h.dpy.connector, sd, head, false) {
                tracing::warn!(sd, head, %err, "failed to revert link VRR mode");
            }
        }
    }

    /// Any state `-> Disabled`. Does nothing, and touches no hardware, when already disabled.
    pub fn disable_vrr(&mut self) {
        if !self.vrr.is_enabled() {
            return;
        }
        let vrr_heads = self.vrr_heads();

        for &(sd, head) in &vrr_heads {
            if let Err(err) = self.rm.set_vrr_capable(sd, head, false) {
                tracing::warn!(sd, head, %err, "failed to clear VRR capable head");
            }
        }
        for (sd, heads) in (0u32..).zip(self.heads.iter_mut()) {
            for (head, h) in (0u32..).zip(heads.iter_mut()) {
                self.pacing
                    .disable(self.rm.as_mut(), &mut h.frame_pacing, sd, head);
            }
        }
        let any_head_active = self.heads.iter().flatten().any(|h| h.vrr_active);
        if self.vrr.is_active() || any_head_active {
            if let Err(err) = self.program_vrr_active(false) {
                tracing::warn!(%err, "failed to deactivate VRR while disabling");
            }
        }
        self.cancel_frame_release_timers();
        for sd in 0..self.config.num_subdevices {
            if let Err(err) = self.rm.clear_vrr_pstate_switch(sd) {
                tracing::warn!(sd, %err, "failed to clear VRR pstate switch");
            }
        }
        self.revert_links(&vrr_heads);

        for heads in &mut self.heads {
            for h in heads {
                h.vrr_active = false;
            }
        }
        self.vrr.disable();
        tracing::info!("VRR disabled");
    }

    /// `Enabled <-> Active`. A failed activation disables VRR entirely.
    pub fn set_vrr_active(&mut self, active: bool) -> Result<(), VrrError> {
        if !self.vrr.is_enabled() || self.vrr.is_active() == active {
            return Ok(());
        }
        match self.program_vrr_active(active) {
            Ok(()) => {
                self.vrr.set_active(active);
                if !active {
                    self.cancel_frame_release_timers();
                }
                tracing::debug!(active, "VRR activity changed");
                Ok(())
            }
            Err(err) => {
                tracing::error!(active, %err, "failed to change VRR activity; disabling VRR");
                self.disable_vrr();
                Err(err)
            }
        }
    }

    fn program_vrr_active(&mut self, active: bool) -> Result<(), VrrError> {
        for sd in 0..self.config.num_subdevices {
            self.program_vrr_active_on(sd, active)?;
        }
        Ok(())
    }

    /// Stages stall lock, display rate and frame pacing for every active head of `sd` and
    /// commits them in one UPDATE, with the lightweight supervisor armed around it.
    fn program_vrr_active_on(&mut self, sd: u32, active: bool) -> Result<(), VrrError> {
        let supports_display_rate = self.evo.caps().supports_display_rate;
        let heads: Vec<(u32, bool)> = (0u32..)
            .zip(&self.heads[sd as usize])
            .filter(|(_, h)| h.is_active())
            .map(|(head, h)| (head, h.is_vrr()))
            .collect();
        if heads.is_empty() {
            return Ok(());
        }

        let mut armed = Vec::with_capacity(heads.len());
        for &(head, is_vrr) in &heads {
            if let Err(err) = self.rm.arm_lightweight_supervisor(sd, head, is_vrr, true) {
                self.disarm_lightweight_supervisor(sd, &armed);
                return Err(err.into());
            }
            armed.push((head, is_vrr));
        }

        let heads: Vec<u32> = heads.into_iter().map(|(head, _)| head).collect();
        let result = self.stage_vrr_active_on(sd, &heads, active, supports_display_rate);
        self.disarm_lightweight_supervisor(sd, &armed);
        result
    }

    fn disarm_lightweight_supervisor(&mut self, sd: u32, armed: &[(u32, bool)]) {
        for &(head, is_vrr) in armed {
            if let Err(err) = self.rm.arm_lightweight_supervisor(sd, head, is_vrr, false) {
                tracing::warn!(sd, head, %err, "failed to disarm lightweight supervisor");
            }
        }
    }

    fn stage_vrr_active_on(
        &mut self,
        sd: u32,
        heads: &[u32],
        active: bool,
        supports_display_rate: bool,
    ) -> Result<(), VrrError> {
        let mut state = UpdateState::new();
        for &head in heads {
            let h = &mut self.heads[sd as usize][head as usize];
            let Some(timings) = h.timings else {
                continue;
            };
            let head_active = active && timings.vrr_type.is_vrr();
            self.evo.set_stall_lock(sd, head, head_active, &mut state)?;

            if supports_display_rate {
                let timeout_us = if head_active {
                    timings.vrr_timeout_us
                } else {
                    0
                };
                self.evo
                    .set_display_rate(sd, head, head_active, timeout_us, &mut state)?;
                h.frame_pacing.display_rate_timeout_us = timeout_us;

                let pacing_input = !matches!(h.merge, MergeMode::Secondary { .. });
                if timings.needs_sw_frame_pacing && pacing_input {
                    if head_active {
                        let bounds =
                            FrameTimeBounds::from_timings(&timings.raster, timings.vrr_timeout_us);
                        self.pacing.enable(
                            self.rm.as_mut(),
                            &mut h.frame_pacing,
                            sd,
                            head,
                            bounds,
                        )?;
                    } else {
                        self.pacing
                            .disable(self.rm.as_mut(), &mut h.frame_pacing, sd, head);
                    }
                }
            }
            h.vrr_active = head_active;
        }
        self.evo.update(&state, true)?;
        Ok(())
    }

    /// Applies a new mode to the heads named in `request`.
    ///
    /// VRR is disabled for the duration and re-enabled afterwards if any head qualifies.
    /// Nothing is touched when any head of the request fails validation.
    pub fn modeset(&mut self, request: &ModesetRequest) -> Result<(), VrrError> {
        self.validate_modeset(request)?;
        self.disable_vrr();
        let supports_display_rate = self.evo.caps().supports_display_rate;
        let mut state = UpdateState::new();

        for hm in &request.heads {
            let (sd, head) = (hm.sd, hm.head);
            let current = self.evo.head_control(sd, head)?.clone();

            let Some(raster) = hm.timings else {
                if self.heads[sd as usize][head as usize].is_active() {
                    self.shut_down_head(sd, head, &mut state)?;
                }
                continue;
            };

            let timings = adjust_timings_for_vrr(
                raster,
                &hm.dpy,
                request.allow_vrr,
                request.allow_adaptive_sync,
                hm.vrr_override_min_refresh_rate,
                supports_display_rate,
            );
            tracing::debug!(sd, head, ?timings, "head timings");

            let hc = HeadControl {
                interlaced: raster.interlaced,
                flip_lock: hm.flip_lock_pin.is_some(),
                flip_lock_pin: hm.flip_lock_pin,
                ..current
            };
            self.evo.set_head_control(sd, head, hc, &mut state)?;

            let h = self.head_mut(sd, head)?;
            h.timings = Some(timings);
            h.dpy = hm.dpy.clone();
            h.merge = if hm.merge_secondary_heads.is_empty() {
                MergeMode::Single
            } else {
                MergeMode::Primary
            };
            h.merge_secondary_heads = hm.merge_secondary_heads.clone();
        }

        for hm in &request.heads {
            for &secondary in &hm.merge_secondary_heads {
                self.head_mut(hm.sd, secondary)?.merge = MergeMode::Secondary { primary: hm.head };
            }
        }

        self.evo.update(&state, true)?;
        self.enable_vrr();
        Ok(())
    }

    fn validate_modeset(&self, request: &ModesetRequest) -> Result<(), VrrError> {
        for hm in &request.heads {
            self.evo.head_control(hm.sd, hm.head)?;
            for &secondary in &hm.merge_secondary_heads {
                if secondary == hm.head {
                    return Err(VrrError::Evo(EvoError::InvalidHead(secondary)));
                }
                self.evo.head_control(hm.sd, secondary)?;
            }
            if let Some(pin) = hm.flip_lock_pin.filter(|pin| !pin.is_valid()) {
                return Err(VrrError::Evo(EvoError::InvalidLockPin(pin)));
            }
        }
        Ok(())
    }

    fn shut_down_head(
        &mut self,
        sd: u32,
        head: u32,
        state: &mut UpdateState,
    ) -> Result<(), VrrError> {
        let windows: Vec<u32> = self.evo.head_windows(head).collect();
        for &window in &windows {
            if let Err(err) = self.evo.idle_channel(
                sd,
                ChannelId::Window(window),
                self.rm.as_mut(),
                self.clock.as_ref(),
            ) {
                tracing::warn!(sd, head, window, %err, "shutting down head with busy window");
            }
            self.evo
                .flip_window(sd, window, &WindowFlip::default(), state)?;
        }
        self.evo
            .set_head_control(sd, head, HeadControl::default(), state)?;

        let timers = self.timers.clone();
        let h = self.head_mut(sd, head)?;
        for id in [h.unstall_timer.take(), h.retimeout_timer.take()]
            .into_iter()
            .flatten()
        {
            timers.borrow_mut().cancel(id);
        }
        *h = Head::default();
        tracing::debug!(sd, head, "head shut down");
        Ok(())
    }

    /// Flips the main layer of every head in `request`.
    ///
    /// Frame pacing may rewrite a flip's tearing flag and timestamp; `request` holds the
    /// adjusted values afterwards.
    pub fn flip(&mut self, request: &mut FlipRequest) -> Result<FlipReply, VrrError> {
        for hf in &request.heads {
            let active = self
                .head(hf.sd, hf.head)
                .ok_or(EvoError::InvalidHead(hf.head))?
                .is_active();
            if !active {
                return Err(VrrError::HeadInactive {
                    sd: hf.sd,
                    head: hf.head,
                });
            }
        }

        if let Some(allow_vrr) = request.allow_vrr {
            if allow_vrr && self.vrr.is_enabled() {
                for hf in &mut request.heads {
                    self.apply_vrr_flip_overrides(hf);
                }
            }
            // Failure has already fallen back to fixed refresh.
            let _ = self.set_vrr_active(allow_vrr);
        }

        if self.vrr.is_active() {
            for hf in &mut request.heads {
                let pacing_head = self.heads[hf.sd as usize][hf.head as usize].pacing_head(hf.head);
                let info = &self.heads[hf.sd as usize][pacing_head as usize].frame_pacing;
                track_and_delay_flip(info, hf);
            }
        }

        let mut state = UpdateState::new();
        for hf in &request.heads {
            let Some(window) = self.evo.head_windows(hf.head).next() else {
                continue;
            };
            let flip = WindowFlip {
                surface_offset: hf.surface_offset,
                flip_lock_qualifying: hf.flip_lock_qualifying,
                skip_core_interlock: false,
            };
            self.evo.flip_window(hf.sd, window, &flip, &mut state)?;
        }
        let report = self.evo.update(&state, true)?;

        let vrr_semaphore_index = if self.vrr.is_active() && !self.evo.caps().supports_display_rate
        {
            self.cancel_frame_release_timers();
            let index = self.vrr.next_semaphore_index();
            for (sd, head) in self.vrr_active_heads() {
                self.schedule_unstall(sd, head);
            }
            index
        } else {
            None
        };

        Ok(FlipReply {
            vrr_semaphore_index,
            report,
        })
    }

    fn apply_vrr_flip_overrides(&self, hf: &mut HeadFlip) {
        let is_vrr = self.heads[hf.sd as usize][hf.head as usize].is_vrr();
        if is_vrr && hf.min_present_interval > 1 {
            hf.min_present_interval = 1;
        }
    }

    /// Cancels every pending unstall timer. Must run before a new semaphore index is handed out.
    pub fn cancel_frame_release_timers(&mut self) {
        let mut timers = self.timers.borrow_mut();
        for heads in &mut self.heads {
            for h in heads {
                if let Some(id) = h.unstall_timer.take() {
                    timers.cancel(id);
                }
            }
        }
    }

    fn schedule_unstall(&mut self, sd: u32, head: u32) {
        let h = &self.heads[sd as usize][head as usize];
        let Some(timings) = h.timings.filter(|_| h.vrr_active) else {
            return;
        };
        if timings.vrr_timeout_us == 0 {
            return;
        }
        let deadline = self
            .clock
            .now_ns()
            .saturating_add(u64::from(timings.vrr_timeout_us) * NANOS_PER_MICRO);
        let id = self.timers.borrow_mut().alloc(
            self.me.clone(),
            deadline,
            move |dev: &mut DisplayDevice| dev.unstall(sd, head),
        );
        self.heads[sd as usize][head as usize].unstall_timer = Some(id);
    }

    /// Releases a stalled raster with a content-free core UPDATE and re-arms while VRR stays
    /// active.
    fn unstall(&mut self, sd: u32, head: u32) {
        self.heads[sd as usize][head as usize].unstall_timer = None;
        if !self.vrr.is_active() {
            return;
        }
        let mut state = UpdateState::new();
        state.add_channel(sd as usize, ChannelId::Core);
        if let Err(err) = self.evo.update(&state, true) {
            tracing::warn!(sd, head, %err, "unstall update failed");
            return;
        }
        tracing::trace!(sd, head, "unstalled head");
        self.schedule_unstall(sd, head);
    }

    /// Firmware asked for a new per-frame timeout on `head`. The work runs from a deferred
    /// timer; repeated notifications before it fires are coalesced.
    pub fn on_vrr_set_timeout_event(&mut self, sd: u32, head: u32) -> Result<(), VrrError> {
        let now = self.clock.now_ns();
        let me = self.me.clone();
        let timers = self.timers.clone();
        let h = self.head_mut(sd, head)?;
        if h.retimeout_timer
            .is_some_and(|id| timers.borrow().is_pending(id))
        {
            return Ok(());
        }
        let id = timers
            .borrow_mut()
            .alloc(me, now, move |dev: &mut DisplayDevice| {
                dev.set_timeout_per_frame(sd, head)
            });
        h.retimeout_timer = Some(id);
        Ok(())
    }

    fn set_timeout_per_frame(&mut self, sd: u32, head: u32) {
        self.heads[sd as usize][head as usize].retimeout_timer = None;
        let primary = self.heads[sd as usize][head as usize].pacing_head(head);
        let p = &self.heads[sd as usize][primary as usize];
        let snapshot = match p.frame_pacing.snapshot() {
            None => return,
            Some(Ok(snapshot)) => snapshot,
            Some(Err(err)) => {
                tracing::warn!(sd, head, %err, "skipping frame pacing re-timeout");
                return;
            }
        };
        if snapshot.timeout_us == p.frame_pacing.display_rate_timeout_us {
            return;
        }

        let group: Vec<u32> = std::iter::once(primary)
            .chain(p.merge_secondary_heads.iter().copied())
            .collect();
        let mut state = UpdateState::new();
        for &h in &group {
            if let Err(err) =
                self.evo
                    .set_display_rate(sd, h, true, snapshot.timeout_us, &mut state)
            {
                tracing::warn!(sd, head = h, %err, "failed to reprogram display rate");
                continue;
            }
            self.heads[sd as usize][h as usize]
                .frame_pacing
                .display_rate_timeout_us = snapshot.timeout_us;
        }
        if let Err(err) = self.evo.update(&state, false) {
            tracing::warn!(sd, head, %err, "display rate update failed");
            return;
        }
        tracing::debug!(
            sd,
            head,
            timeout_us = snapshot.timeout_us,
            "frame pacing re-timeout"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeadModeset, RasterTimings};
    use crate::refresh::DpyVrrType;
    use nvkms_evo::testing::{MockRm, RecordingSink};
    use nvkms_evo::Generation;
    use nvkms_time::FakeHostClock;

    fn device(generation: Generation) -> (Rc<RefCell<DisplayDevice>>, MockRm) {
        let rm = MockRm::new();
        let config = DisplayDeviceConfig {
            generation,
            ..DisplayDeviceConfig::default()
        };
        let dev = DisplayDevice::new(
            config,
            Box::new(RecordingSink::new()),
            Box::new(rm.clone()),
            Box::new(crate::link::NullLink),
            Rc::new(FakeHostClock::new(0)),
        )
        .unwrap();
        (dev, rm)
    }

    fn gsync_modeset(head: u32) -> ModesetRequest {
        ModesetRequest {
            allow_vrr: true,
            heads: vec![HeadModeset {
                head,
                timings: Some(RasterTimings {
                    raster_width: 2200,
                    raster_height: 1125,
                    pixel_clock_khz: 148_500,
                    interlaced: false,
                }),
                dpy: DpyVrrCaps {
                    vrr_type: DpyVrrType::Gsync,
                    edid_min_refresh_hz: Some(30),
                    ..DpyVrrCaps::default()
                },
                ..HeadModeset::default()
            }],
            ..ModesetRequest::default()
        }
    }

    #[test]
    fn modeset_without_vrr_display_leaves_vrr_disabled() {
        let (dev, rm) = device(Generation::Gen6);
        let mut req = gsync_modeset(0);
        req.allow_vrr = false;
        dev.borrow_mut().modeset(&req).unwrap();
        assert!(!dev.borrow().vrr().is_enabled());
        assert_eq!(rm.call_count("set_vrr_capable"), 0);
    }

    #[test]
    fn framelock_blocks_enable() {
        let (dev, rm) = device(Generation::Gen6);
        dev.borrow_mut().set_framelock_attached(true);
        dev.borrow_mut().modeset(&gsync_modeset(0)).unwrap();
        assert!(!dev.borrow().vrr().is_enabled());
        assert_eq!(rm.call_count("query_vrr_support"), 0);
    }

    #[test]
    fn failed_capability_query_reverts_heads() {
        let (dev, rm) = device(Generation::Gen6);
        rm.fail("query_vrr_support", 0x22);
        dev.borrow_mut().modeset(&gsync_modeset(1)).unwrap();
        assert!(!dev.borrow().vrr().is_enabled());
        let capable: Vec<_> = rm
            .calls()
            .into_iter()
            .filter(|c| c.name() == "set_vrr_capable")
            .collect();
        assert_eq!(capable.len(), 2);
    }

    #[test]
    fn flip_on_inactive_head_is_rejected() {
        let (dev, _rm) = device(Generation::Gen6);
        let mut req = FlipRequest {
            heads: vec![HeadFlip {
                head: 2,
                ..HeadFlip::default()
            }],
            ..FlipRequest::default()
        };
        assert!(matches!(
            dev.borrow_mut().flip(&mut req),
            Err(VrrError::HeadInactive { sd: 0, head: 2 })
        ));
    }

    #[test]
    fn vrr_flip_clamps_present_interval() {
        let (dev, _rm) = device(Generation::Gen6);
        dev.borrow_mut().modeset(&gsync_modeset(0)).unwrap();
        let mut req = FlipRequest {
            allow_vrr: Some(true),
            heads: vec![HeadFlip {
                surface_offset: Some(0x10_0000),
                min_present_interval: 3,
                ..HeadFlip::default()
            }],
        };
        dev.borrow_mut().flip(&mut req).unwrap();
        assert_eq!(req.heads[0].min_present_interval, 1);
        assert!(dev.borrow().vrr().is_active());
        assert!(dev.borrow().head(0, 0).unwrap().is_vrr_active());
    }
}
