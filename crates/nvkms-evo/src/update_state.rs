use crate::channel::{ChannelId, ChannelMask};
use crate::device::MAX_SUBDEVICES;

/// Channels touched on one subdevice while a transaction is staged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubdevUpdateState {
    pub channel_mask: ChannelMask,
    pub no_core_interlock_mask: ChannelMask,
    pub flip_lock_qualifying_mask: ChannelMask,
    /// Channels whose surface is toggling between null and non-null.
    pub flip_transition_war: ChannelMask,
    /// Windows whose immediate channel has pending methods.
    pub win_imm_channel_mask: ChannelMask,
    /// Windows that must latch together with their immediate channel.
    pub win_imm_interlock_mask: ChannelMask,
}

impl SubdevUpdateState {
    pub fn is_empty(&self) -> bool {
        self.channel_mask.is_empty() && self.win_imm_channel_mask.is_empty()
    }
}

/// Accumulator for one UPDATE transaction. Built fresh by the caller, consumed by
/// [`crate::EvoDevice::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateState {
    subdev: [SubdevUpdateState; MAX_SUBDEVICES],
}

impl UpdateState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subdev(&self, sd: usize) -> &SubdevUpdateState {
        &self.subdev[sd]
    }

    pub fn subdev_mut(&mut self, sd: usize) -> &mut SubdevUpdateState {
        &mut self.subdev[sd]
    }

    pub fn is_empty(&self) -> bool {
        self.subdev.iter().all(SubdevUpdateState::is_empty)
    }

    /// Marks `channel` as having pending writes on `sd`.
    pub fn add_channel(&mut self, sd: usize, channel: ChannelId) {
        let s = &mut self.subdev[sd];
        match channel {
            ChannelId::WindowImm(_) => s.win_imm_channel_mask |= channel.mask(),
            _ => s.channel_mask |= channel.mask(),
        }
    }

    pub fn exclude_from_core_interlock(&mut self, sd: usize, channel: ChannelId) {
        self.subdev[sd].no_core_interlock_mask |= channel.mask();
    }

    pub fn mark_flip_lock_qualifying(&mut self, sd: usize, channel: ChannelId) {
        self.subdev[sd].flip_lock_qualifying_mask |= channel.mask();
    }

    pub fn mark_flip_transition(&mut self, sd: usize, channel: ChannelId) {
        self.subdev[sd].flip_transition_war |= channel.mask();
    }

    pub fn interlock_window_immediate(&mut self, sd: usize, window: u32) {
        self.subdev[sd].win_imm_interlock_mask |= ChannelMask::window(window);
    }
}
