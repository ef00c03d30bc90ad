//! Display-link double, plus re-exports of the engine doubles.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

pub use nvkms_evo::testing::{FakeSharedMemory, MockRm, RecordingSink, RmCall, SinkEvent};

use crate::link::{DisplayLink, LinkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCall {
    AdaptiveSync { sd: u32, head: u32, enable: bool },
    HdmiVrr { sd: u32, head: u32, enable: bool },
}

#[derive(Debug, Default)]
struct MockLinkState {
    calls: Vec<LinkCall>,
    rejected: HashSet<(u32, u32)>,
}

/// Link double with a call log. Heads added with [`MockLink::reject`] refuse every setting.
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    state: Rc<RefCell<MockLinkState>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.state.borrow().calls.clone()
    }

    pub fn reject(&self, sd: u32, head: u32) {
        self.state.borrow_mut().rejected.insert((sd, head));
    }

    fn record(&self, call: LinkCall, sd: u32, head: u32) -> Result<(), LinkError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        if state.rejected.contains(&(sd, head)) {
            return Err(LinkError::Rejected { sd, head });
        }
        Ok(())
    }
}

impl DisplayLink for MockLink {
    fn set_adaptive_sync(&mut self, sd: u32, head: u32, enable: bool) -> Result<(), LinkError> {
        self.record(LinkCall::AdaptiveSync { sd, head, enable }, sd, head)
    }

    fn set_hdmi_vrr(&mut self, sd: u32, head: u32, enable: bool) -> Result<(), LinkError> {
        self.record(LinkCall::HdmiVrr { sd, head, enable }, sd, head)
    }
}
