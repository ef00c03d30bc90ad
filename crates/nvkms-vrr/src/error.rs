use nvkms_evo::{EvoError, RmError};

use crate::link::LinkError;

#[derive(Debug, thiserror::Error)]
pub enum VrrError {
    #[error("frame pacing bounds rejected (min {min_ns} ns, max {max_ns} ns)")]
    InvalidFramePacingBounds { min_ns: u64, max_ns: u64 },

    #[error("frame pacing shared data did not settle after {0} attempts")]
    SnapshotDesync(u32),

    #[error("head {head} on subdevice {sd} is not active")]
    HeadInactive { sd: u32, head: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Evo(#[from] EvoError),

    #[error(transparent)]
    Rm(#[from] RmError),
}
