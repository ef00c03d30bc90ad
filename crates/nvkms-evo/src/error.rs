use crate::channel::ChannelId;
use crate::head::LockPin;
use crate::rm::RmError;

#[derive(Debug, thiserror::Error)]
pub enum EvoError {
    #[error("subdevice {sd}: fliplocked channels use both {first:?} and {second:?}")]
    FlipLockPinConflict {
        sd: u32,
        first: LockPin,
        second: LockPin,
    },

    #[error("invalid subdevice {0}")]
    InvalidSubdevice(u32),

    #[error("invalid head {0}")]
    InvalidHead(u32),

    #[error("lock pin {0:?} does not exist")]
    InvalidLockPin(LockPin),

    #[error("invalid window {0}")]
    InvalidWindow(u32),

    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    #[error("{0} is not supported by this display engine")]
    Unsupported(&'static str),

    #[error("subdevice {sd}: {channel} did not go idle")]
    IdleTimeout { sd: u32, channel: ChannelId },

    #[error(transparent)]
    Rm(#[from] RmError),
}
