/// Number of VRR semaphore slots the legacy release path rotates through.
pub const MAX_VRR_FLIP_DELTA: u32 = 8;

/// VRR configured at modeset, not pacing flips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledVrr {
    flip_counter: u32,
}

/// VRR pacing flips. Only reachable through [`EnabledVrr::activate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveVrr {
    flip_counter: u32,
}

impl EnabledVrr {
    fn new() -> Self {
        Self { flip_counter: 0 }
    }

    pub fn activate(self) -> ActiveVrr {
        ActiveVrr {
            flip_counter: self.flip_counter,
        }
    }

    pub fn flip_counter(&self) -> u32 {
        self.flip_counter
    }
}

impl ActiveVrr {
    pub fn deactivate(self) -> EnabledVrr {
        EnabledVrr {
            flip_counter: self.flip_counter,
        }
    }

    pub fn flip_counter(&self) -> u32 {
        self.flip_counter
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VrrState {
    #[default]
    Disabled,
    Enabled(EnabledVrr),
    Active(ActiveVrr),
}

impl VrrState {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, VrrState::Disabled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, VrrState::Active(_))
    }

    /// `Disabled -> Enabled`. Returns `false` if VRR was already enabled.
    pub fn enable(&mut self) -> bool {
        if self.is_enabled() {
            return false;
        }
        *self = VrrState::Enabled(EnabledVrr::new());
        true
    }

    /// Moves between `Enabled` and `Active`. Returns whether the state changed; a disabled
    /// state never changes here.
    pub fn set_active(&mut self, active: bool) -> bool {
        match (std::mem::take(self), active) {
            (VrrState::Enabled(enabled), true) => {
                *self = VrrState::Active(enabled.activate());
                true
            }
            (VrrState::Active(active), false) => {
                *self = VrrState::Enabled(active.deactivate());
                true
            }
            (unchanged, _) => {
                *self = unchanged;
                false
            }
        }
    }

    /// Any state `-> Disabled`. Returns `false` if VRR was already disabled.
    pub fn disable(&mut self) -> bool {
        !matches!(std::mem::take(self), VrrState::Disabled)
    }

    /// Advances the flip counter and returns the semaphore slot for the next VRR flip.
    pub fn next_semaphore_index(&mut self) -> Option<u32> {
        let counter = match self {
            VrrState::Disabled => return None,
            VrrState::Enabled(e) => &mut e.flip_counter,
            VrrState::Active(a) => &mut a.flip_counter,
        };
        let index = *counter % MAX_VRR_FLIP_DELTA;
        *counter = counter.wrapping_add(1);
        Some(index)
    }
}
