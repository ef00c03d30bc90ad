//! In-memory doubles for the register sink and the privileged control calls.
//!
//! Every double is a cheap-to-clone handle over shared state so a test can keep one clone for
//! inspection after handing another to the device.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::channel::ChannelId;
use crate::rm::{
    EventHandle, MemoryHandle, RgLineActiveParams, RmControl, RmError, SharedMemoryMapping,
};
use crate::sink::{ChannelRegisterSink, MethodWrite};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Submit {
        sd: u32,
        channel: ChannelId,
        writes: Vec<MethodWrite>,
    },
    Kickoff {
        sd: u32,
        channel: ChannelId,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<SinkEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.borrow().clone()
    }

    pub fn kickoffs(&self) -> Vec<(u32, ChannelId)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|ev| match ev {
                SinkEvent::Kickoff { sd, channel } => Some((*sd, *channel)),
                SinkEvent::Submit { .. } => None,
            })
            .collect()
    }

    /// All writes submitted to `channel` on `sd`, concatenated.
    pub fn writes_to(&self, sd: u32, channel: ChannelId) -> Vec<MethodWrite> {
        self.events
            .borrow()
            .iter()
            .filter_map(|ev| match ev {
                SinkEvent::Submit {
                    sd: s,
                    channel: c,
                    writes,
                } if *s == sd && *c == channel => Some(writes.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl ChannelRegisterSink for RecordingSink {
    fn submit(&mut self, sd: u32, channel: ChannelId, writes: &[MethodWrite]) {
        self.events.borrow_mut().push(SinkEvent::Submit {
            sd,
            channel,
            writes: writes.to_vec(),
        });
    }

    fn kickoff(&mut self, sd: u32, channel: ChannelId) {
        self.events
            .borrow_mut()
            .push(SinkEvent::Kickoff { sd, channel });
    }
}

#[derive(Debug, Default)]
struct SharedMemoryState {
    bytes: Vec<u8>,
    /// u64 fields that advance by one after every read, like a firmware writer that never
    /// settles.
    ticking: HashSet<usize>,
    reads: HashMap<usize, u32>,
}

/// Firmware side of a shared memory block.
#[derive(Debug, Clone, Default)]
pub struct FakeSharedMemory {
    state: Rc<RefCell<SharedMemoryState>>,
}

impl FakeSharedMemory {
    pub fn new(size: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(SharedMemoryState {
                bytes: vec![0; size],
                ..SharedMemoryState::default()
            })),
        }
    }

    pub fn write_u32(&self, offset: usize, value: u32) {
        self.state.borrow_mut().bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&self, offset: usize, value: u64) {
        self.state.borrow_mut().bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub fn tick_on_read(&self, offset: usize) {
        self.state.borrow_mut().ticking.insert(offset);
    }

    /// Number of driver reads at `offset` so far.
    pub fn reads(&self, offset: usize) -> u32 {
        self.state.borrow().reads.get(&offset).copied().unwrap_or(0)
    }
}

impl SharedMemoryMapping for FakeSharedMemory {
    fn read_u32(&self, offset: usize) -> u32 {
        let mut state = self.state.borrow_mut();
        *state.reads.entry(offset).or_default() += 1;
        let mut raw = [0; 4];
        raw.copy_from_slice(&state.bytes[offset..offset + 4]);
        u32::from_le_bytes(raw)
    }

    fn read_u64(&self, offset: usize) -> u64 {
        let mut state = self.state.borrow_mut();
        *state.reads.entry(offset).or_default() += 1;
        let mut raw = [0; 8];
        raw.copy_from_slice(&state.bytes[offset..offset + 8]);
        let value = u64::from_le_bytes(raw);
        if state.ticking.contains(&offset) {
            state.bytes[offset..offset + 8].copy_from_slice(&value.wrapping_add(1).to_le_bytes());
        }
        value
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RmCall {
    SetVrrCapable {
        sd: u32,
        head: u32,
        capable: bool,
    },
    QueryVrrSupport {
        sd: u32,
    },
    ClearVrrPstateSwitch {
        sd: u32,
    },
    ArmLightweightSupervisor {
        sd: u32,
        head: u32,
        is_vrr: bool,
        arm: bool,
    },
    SubscribeVrrSetTimeout {
        sd: u32,
    },
    Unsubscribe {
        sd: u32,
        event: EventHandle,
    },
    AllocDeviceMemory {
        sd: u32,
        size: usize,
    },
    MapMemory {
        sd: u32,
        memory: MemoryHandle,
    },
    UnmapMemory {
        sd: u32,
        memory: MemoryHandle,
    },
    FreeMemory {
        sd: u32,
        memory: MemoryHandle,
    },
    SetRgLineActive {
        sd: u32,
        head: u32,
        params: RgLineActiveParams,
    },
    IsChannelIdle {
        sd: u32,
        channel: ChannelId,
    },
    ForceChannelIdle {
        sd: u32,
        channel: ChannelId,
    },
}

impl RmCall {
    pub fn name(&self) -> &'static str {
        match self {
            RmCall::SetVrrCapable { .. } => "set_vrr_capable",
            RmCall::QueryVrrSupport { .. } => "query_vrr_support",
            RmCall::ClearVrrPstateSwitch { .. } => "clear_vrr_pstate_switch",
            RmCall::ArmLightweightSupervisor { .. } => "arm_lightweight_supervisor",
            RmCall::SubscribeVrrSetTimeout { .. } => "subscribe_vrr_set_timeout",
            RmCall::Unsubscribe { .. } => "unsubscribe",
            RmCall::AllocDeviceMemory { .. } => "alloc_device_memory",
            RmCall::MapMemory { .. } => "map_memory",
            RmCall::UnmapMemory { .. } => "unmap_memory",
            RmCall::FreeMemory { .. } => "free_memory",
            RmCall::SetRgLineActive { .. } => "set_rg_line_active",
            RmCall::IsChannelIdle { .. } => "is_channel_idle",
            RmCall::ForceChannelIdle { .. } => "force_channel_idle",
        }
    }

    pub fn head(&self) -> Option<u32> {
        match self {
            RmCall::SetVrrCapable { head, .. }
            | RmCall::ArmLightweightSupervisor { head, .. }
            | RmCall::SetRgLineActive { head, .. } => Some(*head),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct MockRmState {
    calls: Vec<RmCall>,
    failures: HashMap<&'static str, u32>,
    head_failures: HashMap<(&'static str, u32), u32>,
    next_handle: u32,
    shared: FakeSharedMemory,
    /// `None` keeps every channel busy forever.
    idle_after_polls: Option<u32>,
    idle_polls: u32,
}

/// Privileged-call double with a call log and per-call failure injection.
///
/// Channels report idle immediately unless [`MockRm::set_idle_after_polls`] says otherwise.
#[derive(Debug, Clone)]
pub struct MockRm {
    state: Rc<RefCell<MockRmState>>,
}

impl Default for MockRm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRm {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockRmState {
                next_handle: 1,
                shared: FakeSharedMemory::new(4096),
                idle_after_polls: Some(0),
                ..MockRmState::default()
            })),
        }
    }

    pub fn calls(&self) -> Vec<RmCall> {
        self.state.borrow().calls.clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.name() == name)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Makes every later `call` fail with `status`.
    pub fn fail(&self, call: &'static str, status: u32) {
        self.state.borrow_mut().failures.insert(call, status);
    }

    /// Makes every later `call` naming `head` fail with `status`.
    pub fn fail_on_head(&self, call: &'static str, head: u32, status: u32) {
        self.state
            .borrow_mut()
            .head_failures
            .insert((call, head), status);
    }

    pub fn succeed(&self, call: &'static str) {
        let mut state = self.state.borrow_mut();
        state.failures.remove(call);
        state.head_failures.retain(|&(name, _), _| name != call);
    }

    /// The memory block every `map_memory` call maps.
    pub fn shared_memory(&self) -> FakeSharedMemory {
        self.state.borrow().shared.clone()
    }

    pub fn set_idle_after_polls(&self, polls: Option<u32>) {
        let mut state = self.state.borrow_mut();
        state.idle_after_polls = polls;
        state.idle_polls = 0;
    }

    fn record(&self, call: RmCall) -> Result<(), RmError> {
        let mut state = self.state.borrow_mut();
        let name = call.name();
        let head_failure = call
            .head()
            .and_then(|head| state.head_failures.get(&(name, head)).copied());
        state.calls.push(call);
        match head_failure.or_else(|| state.failures.get(name).copied()) {
            Some(status) => Err(RmError::new(name, status)),
            None => Ok(()),
        }
    }

    fn handle(&self) -> u32 {
        let mut state = self.state.borrow_mut();
        let handle = state.next_handle;
        state.next_handle += 1;
        handle
    }
}

impl RmControl for MockRm {
    fn set_vrr_capable(&mut self, sd: u32, head: u32, capable: bool) -> Result<(), RmError> {
        self.record(RmCall::SetVrrCapable { sd, head, capable })
    }

    fn query_vrr_support(&mut self, sd: u32) -> Result<(), RmError> {
        self.record(RmCall::QueryVrrSupport { sd })
    }

    fn clear_vrr_pstate_switch(&mut self, sd: u32) -> Result<(), RmError> {
        self.record(RmCall::ClearVrrPstateSwitch { sd })
    }

    fn arm_lightweight_supervisor(
        &mut self,
        sd: u32,
        head: u32,
        is_vrr: bool,
        arm: bool,
    ) -> Result<(), RmError> {
        self.record(RmCall::ArmLightweightSupervisor {
            sd,
            head,
            is_vrr,
            arm,
        })
    }

    fn subscribe_vrr_set_timeout(&mut self, sd: u32) -> Result<EventHandle, RmError> {
        self.record(RmCall::SubscribeVrrSetTimeout { sd })?;
        Ok(EventHandle(self.handle()))
    }

    fn unsubscribe(&mut self, sd: u32, event: EventHandle) {
        let _ = self.record(RmCall::Unsubscribe { sd, event });
    }

    fn alloc_device_memory(&mut self, sd: u32, size: usize) -> Result<MemoryHandle, RmError> {
        self.record(RmCall::AllocDeviceMemory { sd, size })?;
        Ok(MemoryHandle(self.handle()))
    }

    fn map_memory(
        &mut self,
        sd: u32,
        memory: MemoryHandle,
    ) -> Result<Box<dyn SharedMemoryMapping>, RmError> {
        self.record(RmCall::MapMemory { sd, memory })?;
        Ok(Box::new(self.shared_memory()))
    }

    fn unmap_memory(&mut self, sd: u32, memory: MemoryHandle) {
        let _ = self.record(RmCall::UnmapMemory { sd, memory });
    }

    fn free_memory(&mut self, sd: u32, memory: MemoryHandle) {
        let _ = self.record(RmCall::FreeMemory { sd, memory });
    }

    fn set_rg_line_active(
        &mut self,
        sd: u32,
        head: u32,
        params: &RgLineActiveParams,
    ) -> Result<(), RmError> {
        self.record(RmCall::SetRgLineActive {
            sd,
            head,
            params: params.clone(),
        })
    }

    fn is_channel_idle(&mut self, sd: u32, channel: ChannelId) -> Result<bool, RmError> {
        self.record(RmCall::IsChannelIdle { sd, channel })?;
        let mut state = self.state.borrow_mut();
        let Some(after) = state.idle_after_polls else {
            return Ok(false);
        };
        let idle = state.idle_polls >= after;
        state.idle_polls += 1;
        Ok(idle)
    }

    fn force_channel_idle(&mut self, sd: u32, channel: ChannelId) -> Result<(), RmError> {
        self.record(RmCall::ForceChannelIdle { sd, channel })
    }
}
