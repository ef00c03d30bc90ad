use std::fmt;

use bitflags::bitflags;

pub const MAX_HEADS: u32 = 8;
pub const MAX_WINDOWS: u32 = 32;

const WINDOW_SHIFT: u32 = 8;
const CURSOR_SHIFT: u32 = WINDOW_SHIFT + MAX_WINDOWS;

bitflags! {
    /// Set of display channels.
    ///
    /// Window-immediate channel `n` shares the `window(n)` bit; the immediate masks in
    /// [`crate::SubdevUpdateState`] are interpreted relative to that.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelMask: u64 {
        const CORE = 1 << 0;
        const WINDOWS = 0xffff_ffff << WINDOW_SHIFT;
        const CURSORS = 0xff << CURSOR_SHIFT;
    }
}

impl ChannelMask {
    pub const fn window(n: u32) -> Self {
        Self::from_bits_retain(1 << (WINDOW_SHIFT + n))
    }

    pub const fn cursor(head: u32) -> Self {
        Self::from_bits_retain(1 << (CURSOR_SHIFT + head))
    }

    pub fn window_indices(self) -> impl Iterator<Item = u32> {
        (0..MAX_WINDOWS).filter(move |&n| self.contains(Self::window(n)))
    }

    pub fn cursor_heads(self) -> impl Iterator<Item = u32> {
        (0..MAX_HEADS).filter(move |&h| self.contains(Self::cursor(h)))
    }

    /// Channels named by this mask in submission order: core, windows, cursors.
    pub fn channel_ids(self) -> impl Iterator<Item = ChannelId> {
        let core = self.contains(Self::CORE).then_some(ChannelId::Core);
        core.into_iter()
            .chain(self.window_indices().map(ChannelId::Window))
            .chain(self.cursor_heads().map(ChannelId::Cursor))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    Core,
    Window(u32),
    WindowImm(u32),
    Cursor(u32),
}

impl ChannelId {
    pub fn mask(self) -> ChannelMask {
        match self {
            ChannelId::Core => ChannelMask::CORE,
            ChannelId::Window(n) | ChannelId::WindowImm(n) => ChannelMask::window(n),
            ChannelId::Cursor(head) => ChannelMask::cursor(head),
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Core => f.write_str("core"),
            ChannelId::Window(n) => write!(f, "window{n}"),
            ChannelId::WindowImm(n) => write!(f, "window-imm{n}"),
            ChannelId::Cursor(head) => write!(f, "cursor{head}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub hw_class: u32,
    /// Head the channel scans out on. `None` for the core channel.
    pub head: Option<u32>,
    /// Whether the last staged flip on each subdevice had a surface bound.
    surface_present: [bool; crate::MAX_SUBDEVICES],
}

impl Channel {
    pub fn new(id: ChannelId, hw_class: u32, head: Option<u32>) -> Self {
        Self {
            id,
            hw_class,
            head,
            surface_present: [false; crate::MAX_SUBDEVICES],
        }
    }

    pub fn surface_present(&self, sd: usize) -> bool {
        self.surface_present[sd]
    }

    /// Records the new presence state and returns the previous one.
    pub(crate) fn replace_surface_present(&mut self, sd: usize, present: bool) -> bool {
        std::mem::replace(&mut self.surface_present[sd], present)
    }
}

/// Every channel owned by one device, indexed by window number or head.
#[derive(Debug, Clone)]
pub struct ChannelTable {
    pub core: Channel,
    pub windows: Vec<Channel>,
    pub window_imms: Vec<Channel>,
    pub cursors: Vec<Channel>,
}

impl ChannelTable {
    pub fn window(&self, n: u32) -> Option<&Channel> {
        self.windows.get(n as usize)
    }

    pub(crate) fn window_mut(&mut self, n: u32) -> Option<&mut Channel> {
        self.windows.get_mut(n as usize)
    }

    pub fn windows_on_head(&self, head: u32) -> ChannelMask {
        self.windows
            .iter()
            .filter(|ch| ch.head == Some(head))
            .fold(ChannelMask::empty(), |acc, ch| acc | ch.id.mask())
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        match id {
            ChannelId::Core => Some(&self.core),
            ChannelId::Window(n) => self.windows.get(n as usize),
            ChannelId::WindowImm(n) => self.window_imms.get(n as usize),
            ChannelId::Cursor(head) => self.cursors.get(head as usize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn window_and_cursor_bits_do_not_overlap_core() {
        for n in 0..MAX_WINDOWS {
            let bit = ChannelMask::window(n);
            assert!(ChannelMask::WINDOWS.contains(bit));
            assert!(!bit.intersects(ChannelMask::CORE | ChannelMask::CURSORS));
        }
        for h in 0..MAX_HEADS {
            let bit = ChannelMask::cursor(h);
            assert!(ChannelMask::CURSORS.contains(bit));
            assert!(!bit.intersects(ChannelMask::CORE | ChannelMask::WINDOWS));
        }
    }

    #[test]
    fn channel_ids_are_listed_core_first() {
        let mask = ChannelMask::cursor(1) | ChannelMask::window(3) | ChannelMask::CORE;
        let ids: Vec<_> = mask.channel_ids().collect();
        assert_eq!(
            ids,
            vec![ChannelId::Core, ChannelId::Window(3), ChannelId::Cursor(1)]
        );
    }

    #[test]
    fn immediate_channel_shares_window_bit() {
        assert_eq!(ChannelId::WindowImm(5).mask(), ChannelId::Window(5).mask());
    }
}
