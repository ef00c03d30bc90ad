//! Privileged resource-manager control calls.

use crate::channel::ChannelId;

/// A privileged call returned a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{call} failed with status {status:#010x}")]
pub struct RmError {
    pub call: &'static str,
    pub status: u32,
}

impl RmError {
    pub fn new(call: &'static str, status: u32) -> Self {
        Self { call, status }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub u32);

/// Arguments of the RG-line-active call that enables firmware frame pacing on a head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgLineActiveParams {
    pub enable: bool,
    pub memory: Option<MemoryHandle>,
    pub max_frame_time_ns: u64,
    pub min_frame_time_ns: u64,
}

/// Driver-side view of a device-memory block that firmware writes concurrently.
///
/// Reads are plain loads; a value may change between any two calls.
pub trait SharedMemoryMapping {
    fn read_u32(&self, offset: usize) -> u32;

    fn read_u64(&self, offset: usize) -> u64;
}

pub trait RmControl {
    /// Tells RM whether `head` drives a display capable of extended-vblank timing.
    fn set_vrr_capable(&mut self, sd: u32, head: u32, capable: bool) -> Result<(), RmError>;

    fn query_vrr_support(&mut self, sd: u32) -> Result<(), RmError>;

    fn clear_vrr_pstate_switch(&mut self, sd: u32) -> Result<(), RmError>;

    fn arm_lightweight_supervisor(
        &mut self,
        sd: u32,
        head: u32,
        is_vrr: bool,
        arm: bool,
    ) -> Result<(), RmError>;

    fn subscribe_vrr_set_timeout(&mut self, sd: u32) -> Result<EventHandle, RmError>;

    fn unsubscribe(&mut self, sd: u32, event: EventHandle);

    fn alloc_device_memory(&mut self, sd: u32, size: usize) -> Result<MemoryHandle, RmError>;

    fn map_memory(
        &mut self,
        sd: u32,
        memory: MemoryHandle,
    ) -> Result<Box<dyn SharedMemoryMapping>, RmError>;

    fn unmap_memory(&mut self, sd: u32, memory: MemoryHandle);

    fn free_memory(&mut self, sd: u32, memory: MemoryHandle);

    fn set_rg_line_active(
        &mut self,
        sd: u32,
        head: u32,
        params: &RgLineActiveParams,
    ) -> Result<(), RmError>;

    fn is_channel_idle(&mut self, sd: u32, channel: ChannelId) -> Result<bool, RmError>;

    fn force_channel_idle(&mut self, sd: u32, channel: ChannelId) -> Result<(), RmError>;
}
