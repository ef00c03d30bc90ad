use crate::channel::ChannelId;

/// One method write into a channel's push buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodWrite {
    pub offset: u32,
    pub value: u32,
}

impl MethodWrite {
    pub const fn new(offset: u32, value: u32) -> Self {
        Self { offset, value }
    }
}

/// Boundary between this crate and the per-channel command buffers.
///
/// Submission is posted: nothing is acknowledged back. `kickoff` makes the hardware fetch
/// everything submitted to the channel so far.
pub trait ChannelRegisterSink {
    fn submit(&mut self, sd: u32, channel: ChannelId, writes: &[MethodWrite]);

    fn kickoff(&mut self, sd: u32, channel: ChannelId);
}

/// Sink that drops every write.
#[derive(Debug, Default)]
pub struct NullSink;

impl ChannelRegisterSink for NullSink {
    fn submit(&mut self, _sd: u32, _channel: ChannelId, _writes: &[MethodWrite]) {}

    fn kickoff(&mut self, _sd: u32, _channel: ChannelId) {}
}
