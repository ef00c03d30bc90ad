use crate::channel::{ChannelId, ChannelMask, ChannelTable};
use crate::error::EvoError;
use crate::fliplock::process_flip_lock_updates;
use crate::hal::{EvoHal, HalCaps, WarPhase};
use crate::head::{HeadControl, LockPin};
use crate::sink::ChannelRegisterSink;
use crate::update_state::SubdevUpdateState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// The channel has staged methods this frame.
    Content,
    /// Content-free UPDATE that only completes the fliplock group.
    Kick,
}

/// One UPDATE submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMethod {
    pub sd: u32,
    pub channel: ChannelId,
    /// Channels this UPDATE latches together with. May include the channel's own bit.
    pub interlock_group: ChannelMask,
    pub flip_lock_pin: Option<LockPin>,
    pub release_elv: bool,
    pub kind: UpdateKind,
    /// Window UPDATE waits for the window's immediate channel.
    pub interlock_with_imm: bool,
    pub transition_war: bool,
}

impl UpdateMethod {
    /// The interlock flags actually emitted: the group minus the channel itself.
    ///
    /// A window-immediate channel's group names its window, which is a different channel even
    /// though it shares the bit.
    pub fn interlock_flags(&self) -> ChannelMask {
        match self.channel {
            ChannelId::WindowImm(_) => self.interlock_group,
            other => self.interlock_group - other.mask(),
        }
    }
}

/// Submissions posted by one [`crate::EvoDevice::update`] call, in posting order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub methods: Vec<UpdateMethod>,
}

impl UpdateReport {
    pub fn for_channel(&self, sd: u32, channel: ChannelId) -> impl Iterator<Item = &UpdateMethod> {
        self.methods
            .iter()
            .filter(move |m| m.sd == sd && m.channel == channel)
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Computes the UPDATE submissions for one subdevice.
///
/// Core first, then windows (each followed by its interlocked immediate channel), cursors, and
/// finally standalone immediate updates.
pub fn plan_subdevice_updates(
    channels: &ChannelTable,
    head_controls: &[HeadControl],
    caps: &HalCaps,
    sd: u32,
    state: &SubdevUpdateState,
    release_elv: bool,
) -> Result<Vec<UpdateMethod>, EvoError> {
    let flip = process_flip_lock_updates(channels, head_controls, sd, state)?;
    let update_mask = state.channel_mask;
    let excluded = state.no_core_interlock_mask;
    let group = (update_mask - excluded) | flip.handled;
    let normal_fliplock = flip.normal_path_members(update_mask);
    let war = if caps.needs_flip_transition_war {
        state.flip_transition_war
    } else {
        ChannelMask::empty()
    };

    let content = |channel: ChannelId, interlock_group: ChannelMask| UpdateMethod {
        sd,
        channel,
        interlock_group,
        flip_lock_pin: None,
        release_elv,
        kind: UpdateKind::Content,
        interlock_with_imm: false,
        transition_war: false,
    };

    let mut methods = Vec::new();

    if update_mask.contains(ChannelMask::CORE) {
        methods.push(UpdateMethod {
            flip_lock_pin: flip.pin,
            ..content(ChannelId::Core, group)
        });
    }

    let mut imm_done = ChannelMask::empty();
    for n in (update_mask | flip.handled).window_indices() {
        let bit = ChannelMask::window(n);
        let in_update = update_mask.contains(bit);

        let (interlock_group, flip_lock_pin) = if flip.handled.contains(bit) {
            (group, flip.pin)
        } else {
            let pin = normal_fliplock.contains(bit).then_some(flip.pin).flatten();
            if excluded.contains(bit) {
                (ChannelMask::empty(), pin)
            } else {
                (group, pin)
            }
        };
        let interlock_with_imm = in_update && state.win_imm_interlock_mask.contains(bit);

        methods.push(UpdateMethod {
            flip_lock_pin,
            kind: if in_update {
                UpdateKind::Content
            } else {
                UpdateKind::Kick
            },
            interlock_with_imm,
            transition_war: in_update && war.contains(bit),
            ..content(ChannelId::Window(n), interlock_group)
        });

        if interlock_with_imm {
            imm_done |= bit;
            methods.push(UpdateMethod {
                release_elv: false,
                ..content(ChannelId::WindowImm(n), bit)
            });
        }
    }

    for head in update_mask.cursor_heads() {
        let bit = ChannelMask::cursor(head);
        let interlock_group = if excluded.contains(bit) {
            ChannelMask::empty()
        } else {
            group
        };
        methods.push(content(ChannelId::Cursor(head), interlock_group));
    }

    for n in (state.win_imm_channel_mask - imm_done).window_indices() {
        methods.push(UpdateMethod {
            release_elv: false,
            ..content(ChannelId::WindowImm(n), ChannelMask::empty())
        });
    }

    Ok(methods)
}

/// Encodes and posts `methods`, kicking off each channel after its UPDATE.
pub(crate) fn post_updates(
    hal: &dyn EvoHal,
    sink: &mut dyn ChannelRegisterSink,
    methods: &[UpdateMethod],
) {
    let mut writes = Vec::new();
    for method in methods {
        writes.clear();
        if method.transition_war {
            hal.encode_transition_war(WarPhase::PreUpdate, &mut writes);
        }
        hal.encode_update(method, &mut writes);
        if method.transition_war {
            hal.encode_transition_war(WarPhase::PostUpdate, &mut writes);
        }
        sink.submit(method.sd, method.channel, &writes);
        sink.kickoff(method.sd, method.channel);
    }
}
