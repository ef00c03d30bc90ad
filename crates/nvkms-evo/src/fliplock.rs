use crate::channel::{ChannelMask, ChannelTable};
use crate::error::EvoError;
use crate::head::{HeadControl, LockPin};
use crate::update_state::SubdevUpdateState;

/// Fliplock handling decided for one subdevice of a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlipLockPlan {
    /// The single pin shared by the fliplocked channels of this transaction.
    pub pin: Option<LockPin>,
    /// Every window of every head fliplocked to `pin` on this subdevice.
    pub full_group: ChannelMask,
    /// Channels that must get their own UPDATE (content or kick) tagged with `pin` and
    /// interlocked with `full_group`. Empty when the whole group already participates.
    pub handled: ChannelMask,
}

impl FlipLockPlan {
    /// Windows of the transaction that latch on the fliplock pin through the normal path.
    pub fn normal_path_members(&self, update_mask: ChannelMask) -> ChannelMask {
        if self.handled.is_empty() {
            update_mask & self.full_group
        } else {
            ChannelMask::empty()
        }
    }
}

/// Works out which channels of `state` latch on a fliplock pin and whether the transaction
/// covers that pin's whole group.
///
/// Fails with [`EvoError::FlipLockPinConflict`] when the qualifying channels are spread over
/// heads fliplocked to different pins.
pub fn process_flip_lock_updates(
    channels: &ChannelTable,
    head_controls: &[HeadControl],
    sd: u32,
    state: &SubdevUpdateState,
) -> Result<FlipLockPlan, EvoError> {
    let qualifying = state.channel_mask & state.flip_lock_qualifying_mask & ChannelMask::WINDOWS;
    if qualifying.is_empty() {
        return Ok(FlipLockPlan::default());
    }

    let mut pin: Option<LockPin> = None;
    for (head, hc) in (0u32..).zip(head_controls) {
        let Some(head_pin) = hc.active_flip_lock_pin() else {
            continue;
        };
        if (qualifying & channels.windows_on_head(head)).is_empty() {
            continue;
        }
        match pin {
            None => pin = Some(head_pin),
            Some(first) if first == head_pin => {}
            Some(first) => {
                tracing::error!(sd, ?first, second = ?head_pin, "fliplock pin conflict");
                return Err(EvoError::FlipLockPinConflict {
                    sd,
                    first,
                    second: head_pin,
                });
            }
        }
    }
    let Some(pin) = pin else {
        return Ok(FlipLockPlan::default());
    };

    let full_group = (0u32..)
        .zip(head_controls)
        .filter(|(_, hc)| hc.active_flip_lock_pin() == Some(pin))
        .fold(ChannelMask::empty(), |acc, (head, _)| {
            acc | channels.windows_on_head(head)
        });

    let participating = state.channel_mask & full_group;
    let handled = if participating == full_group {
        ChannelMask::empty()
    } else {
        full_group
    };

    Ok(FlipLockPlan {
        pin: Some(pin),
        full_group,
        handled,
    })
}
