use nvkms_time::{HostClock, NANOS_PER_SEC};

use crate::channel::{Channel, ChannelId, ChannelTable, MAX_HEADS, MAX_WINDOWS};
use crate::error::EvoError;
use crate::hal::{hal_for, EvoHal, Generation, HalCaps};
use crate::head::HeadControl;
use crate::rm::RmControl;
use crate::sink::{ChannelRegisterSink, MethodWrite};
use crate::update::{plan_subdevice_updates, post_updates, UpdateReport};
use crate::update_state::UpdateState;

pub const MAX_SUBDEVICES: usize = 4;

/// Upper bound on how long [`EvoDevice::idle_channel`] polls before forcing the channel idle.
pub const CHANNEL_IDLE_TIMEOUT_NS: u64 = 2 * NANOS_PER_SEC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvoLayout {
    pub num_subdevices: u32,
    pub num_heads: u32,
    pub windows_per_head: u32,
}

impl Default for EvoLayout {
    fn default() -> Self {
        Self {
            num_subdevices: 1,
            num_heads: 4,
            windows_per_head: 2,
        }
    }
}

/// Main-layer flip parameters for one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowFlip {
    /// `None` disables the window.
    pub surface_offset: Option<u64>,
    /// Latch on the head's fliplock pin.
    pub flip_lock_qualifying: bool,
    /// Latch independently of the core channel.
    pub skip_core_interlock: bool,
}

/// One display engine: its channels, per-subdevice head locking and the sink its methods go to.
pub struct EvoDevice {
    hal: &'static dyn EvoHal,
    sink: Box<dyn ChannelRegisterSink>,
    layout: EvoLayout,
    channels: ChannelTable,
    head_control: Vec<Vec<HeadControl>>,
}

impl std::fmt::Debug for EvoDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvoDevice")
            .field("generation", &self.hal.generation())
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl EvoDevice {
    pub fn new(
        generation: Generation,
        layout: EvoLayout,
        sink: Box<dyn ChannelRegisterSink>,
    ) -> Result<Self, EvoError> {
        if layout.num_subdevices == 0 || layout.num_subdevices as usize > MAX_SUBDEVICES {
            return Err(EvoError::InvalidLayout(format!(
                "{} subdevices",
                layout.num_subdevices
            )));
        }
        if layout.num_heads == 0 || layout.num_heads > MAX_HEADS {
            return Err(EvoError::InvalidLayout(format!(
                "{} heads",
                layout.num_heads
            )));
        }
        let num_windows = layout.num_heads * layout.windows_per_head;
        if layout.windows_per_head == 0 || num_windows > MAX_WINDOWS {
            return Err(EvoError::InvalidLayout(format!("{num_windows} windows")));
        }

        let hal = hal_for(generation);
        let caps = hal.caps();
        let window_head = |n: u32| Some(n / layout.windows_per_head);
        let channels = ChannelTable {
            core: Channel::new(ChannelId::Core, caps.core_class, None),
            windows: (0..num_windows)
                .map(|n| Channel::new(ChannelId::Window(n), caps.window_class, window_head(n)))
                .collect(),
            window_imms: (0..num_windows)
                .map(|n| {
                    Channel::new(
                        ChannelId::WindowImm(n),
                        caps.window_imm_class,
                        window_head(n),
                    )
                })
                .collect(),
            cursors: (0..layout.num_heads)
                .map(|h| Channel::new(ChannelId::Cursor(h), caps.cursor_class, Some(h)))
                .collect(),
        };

        tracing::debug!(?generation, ?layout, "created display engine");

        Ok(Self {
            hal,
            sink,
            layout,
            channels,
            head_control: vec![
                vec![HeadControl::default(); layout.num_heads as usize];
                layout.num_subdevices as usize
            ],
        })
    }

    pub fn hal(&self) -> &'static dyn EvoHal {
        self.hal
    }

    pub fn caps(&self) -> &HalCaps {
        self.hal.caps()
    }

    pub fn layout(&self) -> EvoLayout {
        self.layout
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    /// Windows scanning out on `head`, in index order.
    pub fn head_windows(&self, head: u32) -> impl Iterator<Item = u32> {
        self.channels.windows_on_head(head).window_indices()
    }

    pub fn head_control(&self, sd: u32, head: u32) -> Result<&HeadControl, EvoError> {
        self.check_head(sd, head)?;
        Ok(&self.head_control[sd as usize][head as usize])
    }

    /// Stores `hc` and stages the core HEAD_SET_CONTROL for it.
    pub fn set_head_control(
        &mut self,
        sd: u32,
        head: u32,
        hc: HeadControl,
        state: &mut UpdateState,
    ) -> Result<(), EvoError> {
        self.check_head(sd, head)?;
        if let Some(pin) = hc.invalid_pin() {
            return Err(EvoError::InvalidLockPin(pin));
        }
        let mut writes = Vec::new();
        self.hal.encode_head_control(head, &hc, &mut writes);
        self.stage(sd, ChannelId::Core, &writes, state);
        self.head_control[sd as usize][head as usize] = hc;
        Ok(())
    }

    pub fn set_stall_lock(
        &mut self,
        sd: u32,
        head: u32,
        enable: bool,
        state: &mut UpdateState,
    ) -> Result<(), EvoError> {
        self.check_head(sd, head)?;
        let mut writes = Vec::new();
        let hc = &self.head_control[sd as usize][head as usize];
        self.hal.encode_stall_lock(head, enable, hc, &mut writes);
        self.stage(sd, ChannelId::Core, &writes, state);
        Ok(())
    }

    /// Programs the head's minimum-refresh interval. A timeout of 0 keeps the one-shot display
    /// rate but disables the minimum refresh.
    pub fn set_display_rate(
        &mut self,
        sd: u32,
        head: u32,
        enable: bool,
        timeout_us: u32,
        state: &mut UpdateState,
    ) -> Result<(), EvoError> {
        self.check_head(sd, head)?;
        let caps = self.hal.caps();
        if !caps.supports_display_rate {
            return Err(EvoError::Unsupported("display rate"));
        }
        let timeout_us = timeout_us.min(caps.max_min_refresh_interval_us);
        let mut writes = Vec::new();
        self.hal
            .encode_display_rate(head, enable, timeout_us, &mut writes);
        self.stage(sd, ChannelId::Core, &writes, state);
        Ok(())
    }

    /// Stages a main-layer flip on `window`.
    ///
    /// Compares the new surface presence with the cached one so a null/non-null toggle gets the
    /// transition bracket at commit time.
    pub fn flip_window(
        &mut self,
        sd: u32,
        window: u32,
        flip: &WindowFlip,
        state: &mut UpdateState,
    ) -> Result<(), EvoError> {
        self.check_subdevice(sd)?;
        let present = flip.surface_offset.is_some();
        let previous = self
            .channels
            .window_mut(window)
            .ok_or(EvoError::InvalidWindow(window))?
            .replace_surface_present(sd as usize, present);

        let channel = ChannelId::Window(window);
        let mut writes = Vec::new();
        self.hal
            .encode_window_surface(flip.surface_offset, &mut writes);
        self.stage(sd, channel, &writes, state);

        let sd = sd as usize;
        if previous != present {
            state.mark_flip_transition(sd, channel);
        }
        if flip.flip_lock_qualifying {
            state.mark_flip_lock_qualifying(sd, channel);
        }
        if flip.skip_core_interlock {
            state.exclude_from_core_interlock(sd, channel);
        }
        Ok(())
    }

    pub fn set_window_immediate_point(
        &mut self,
        sd: u32,
        window: u32,
        x: i16,
        y: i16,
        interlock: bool,
        state: &mut UpdateState,
    ) -> Result<(), EvoError> {
        self.check_subdevice(sd)?;
        if self.channels.window(window).is_none() {
            return Err(EvoError::InvalidWindow(window));
        }
        let mut writes = Vec::new();
        self.hal.encode_window_point(x, y, &mut writes);
        self.stage(sd, ChannelId::WindowImm(window), &writes, state);
        if interlock {
            state.interlock_window_immediate(sd as usize, window);
        }
        Ok(())
    }

    pub fn set_cursor_position(
        &mut self,
        sd: u32,
        head: u32,
        x: i16,
        y: i16,
        state: &mut UpdateState,
    ) -> Result<(), EvoError> {
        self.check_head(sd, head)?;
        let mut writes = Vec::new();
        self.hal.encode_cursor_position(x, y, &mut writes);
        self.stage(sd, ChannelId::Cursor(head), &writes, state);
        Ok(())
    }

    /// Commits `state`: plans every subdevice, then posts and kicks off the UPDATEs.
    ///
    /// Nothing is posted if planning any subdevice fails.
    pub fn update(
        &mut self,
        state: &UpdateState,
        release_elv: bool,
    ) -> Result<UpdateReport, EvoError> {
        let mut report = UpdateReport::default();
        for sd in 0..self.layout.num_subdevices {
            let s = state.subdev(sd as usize);
            if s.is_empty() {
                continue;
            }
            let mut methods = plan_subdevice_updates(
                &self.channels,
                &self.head_control[sd as usize],
                self.hal.caps(),
                sd,
                s,
                release_elv,
            )?;
            report.methods.append(&mut methods);
        }

        post_updates(self.hal, self.sink.as_mut(), &report.methods);
        tracing::debug!(
            submissions = report.methods.len(),
            release_elv,
            "posted update"
        );
        Ok(report)
    }

    /// Waits for `channel` to drain, forcing it idle after [`CHANNEL_IDLE_TIMEOUT_NS`].
    pub fn idle_channel(
        &self,
        sd: u32,
        channel: ChannelId,
        rm: &mut dyn RmControl,
        clock: &dyn HostClock,
    ) -> Result<(), EvoError> {
        self.check_subdevice(sd)?;
        let deadline = clock.now_ns().saturating_add(CHANNEL_IDLE_TIMEOUT_NS);
        loop {
            if rm.is_channel_idle(sd, channel)? {
                return Ok(());
            }
            if clock.now_ns() >= deadline {
                tracing::warn!(sd, %channel, "timed out waiting for channel idle; forcing");
                if let Err(err) = rm.force_channel_idle(sd, channel) {
                    tracing::warn!(sd, %channel, %err, "failed to force channel idle");
                }
                return Err(EvoError::IdleTimeout { sd, channel });
            }
            std::hint::spin_loop();
        }
    }

    fn stage(
        &mut self,
        sd: u32,
        channel: ChannelId,
        writes: &[MethodWrite],
        state: &mut UpdateState,
    ) {
        self.sink.submit(sd, channel, writes);
        state.add_channel(sd as usize, channel);
    }

    fn check_subdevice(&self, sd: u32) -> Result<(), EvoError> {
        if sd < self.layout.num_subdevices {
            Ok(())
        } else {
            Err(EvoError::InvalidSubdevice(sd))
        }
    }

    fn check_head(&self, sd: u32, head: u32) -> Result<(), EvoError> {
        self.check_subdevice(sd)?;
        if head < self.layout.num_heads {
            Ok(())
        } else {
            Err(EvoError::InvalidHead(head))
        }
    }
}
