//! Hot-plug gating.

use crate::model::PowerState;

/// Decides whether newly created children are plugged into the VM.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveAttachGate;

impl LiveAttachGate {
    /// Only a running VM accepts a plug; halted VMs attach at next boot.
    #[must_use]
    pub const fn should_plug(self, power_state: PowerState) -> bool {
        matches!(power_state, PowerState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_plugs() {
        let gate = LiveAttachGate;
        assert!(gate.should_plug(PowerState::Running));
        assert!(!gate.should_plug(PowerState::Halted));
        assert!(!gate.should_plug(PowerState::Suspended));
        assert!(!gate.should_plug(PowerState::Paused));
    }
}
