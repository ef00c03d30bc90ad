use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    #[default]
    DisplayPort,
    Hdmi,
    /// Embedded panel (eDP).
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("subdevice {sd} head {head}: sink rejected the VRR link setting")]
    Rejected { sd: u32, head: u32 },

    #[error("subdevice {sd} head {head}: no display link")]
    NotConnected { sd: u32, head: u32 },
}

/// Protocol-specific VRR switch of the link driving a head.
pub trait DisplayLink {
    fn set_adaptive_sync(&mut self, sd: u32, head: u32, enable: bool) -> Result<(), LinkError>;

    fn set_hdmi_vrr(&mut self, sd: u32, head: u32, enable: bool) -> Result<(), LinkError>;
}

/// Link that accepts every setting.
#[derive(Debug, Default)]
pub struct NullLink;

impl DisplayLink for NullLink {
    fn set_adaptive_sync(&mut self, _sd: u32, _head: u32, _enable: bool) -> Result<(), LinkError> {
        Ok(())
    }

    fn set_hdmi_vrr(&mut self, _sd: u32, _head: u32, _enable: bool) -> Result<(), LinkError> {
        Ok(())
    }
}

/// Routes the Adaptive-Sync toggle to the protocol the connector speaks.
pub fn set_link_vrr(
    link: &mut dyn DisplayLink,
    connector: ConnectorKind,
    sd: u32,
    head: u32,
    enable: bool,
) -> Result<(), LinkError> {
    match connector {
        ConnectorKind::DisplayPort | ConnectorKind::Internal => {
            link.set_adaptive_sync(sd, head, enable)
        }
        ConnectorKind::Hdmi => link.set_hdmi_vrr(sd, head, enable),
    }
}
