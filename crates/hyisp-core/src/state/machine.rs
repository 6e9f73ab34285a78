//! State machine of a single device session.

use std::fmt;

use crate::protocol::Opcode;

/// Where a session stands in the flash procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No usable connection. Also the state after a chip reset that is not
    /// the final one: the device has dropped off the bus.
    #[default]
    Disconnected,
    /// Interface claimed, nothing sent yet.
    Connected,
    /// Profile header accepted.
    IspReady,
    /// Application flash erased.
    Erased,
    /// At least one block written.
    Flashing,
    /// Final reset issued; device is booting the new firmware.
    Done,
    /// A command failed. The session is unusable.
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "DISCONNECTED"),
            SessionState::Connected => write!(f, "CONNECTED"),
            SessionState::IspReady => write!(f, "ISP_READY"),
            SessionState::Erased => write!(f, "ERASED"),
            SessionState::Flashing => write!(f, "FLASHING"),
            SessionState::Done => write!(f, "DONE"),
            SessionState::Error => write!(f, "ERROR"),
        }
    }
}

impl SessionState {
    /// Check if the device can be talked to.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Connected
                | SessionState::IspReady
                | SessionState::Erased
                | SessionState::Flashing
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Disconnected | SessionState::Done | SessionState::Error
        )
    }

    /// Whether `opcode` may be issued in this state.
    pub fn permits(&self, opcode: Opcode) -> bool {
        if !self.is_live() {
            return false;
        }
        match opcode {
            Opcode::GetFwVersionIsp | Opcode::GetFwVersionKbd | Opcode::ResetChip => true,
            Opcode::EnterIspMode | Opcode::EnterBlIspMode | Opcode::GetFwProfile => {
                *self == SessionState::Connected
            }
            Opcode::EraseChip => *self == SessionState::IspReady,
            Opcode::WriteBlock => {
                matches!(self, SessionState::Erased | SessionState::Flashing)
            }
        }
    }

    /// State after `opcode` completed successfully.
    pub fn after(self, opcode: Opcode) -> SessionState {
        match opcode {
            Opcode::GetFwProfile => SessionState::IspReady,
            Opcode::EraseChip => SessionState::Erased,
            Opcode::WriteBlock => SessionState::Flashing,
            Opcode::ResetChip if self == SessionState::Flashing => SessionState::Done,
            Opcode::ResetChip => SessionState::Disconnected,
            Opcode::GetFwVersionIsp
            | Opcode::GetFwVersionKbd
            | Opcode::EnterIspMode
            | Opcode::EnterBlIspMode => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = SessionState::Connected;
        for op in [
            Opcode::GetFwProfile,
            Opcode::EraseChip,
            Opcode::WriteBlock,
            Opcode::WriteBlock,
            Opcode::ResetChip,
        ] {
            assert!(state.permits(op), "{} in {}", op, state);
            state = state.after(op);
        }
        assert_eq!(state, SessionState::Done);
    }

    #[test]
    fn test_reset_before_flashing_disconnects() {
        let state = SessionState::Connected;
        assert!(state.permits(Opcode::ResetChip));
        assert_eq!(state.after(Opcode::ResetChip), SessionState::Disconnected);
    }

    #[test]
    fn test_ordering_is_enforced() {
        assert!(!SessionState::Connected.permits(Opcode::EraseChip));
        assert!(!SessionState::Connected.permits(Opcode::WriteBlock));
        assert!(!SessionState::IspReady.permits(Opcode::WriteBlock));
        assert!(!SessionState::Erased.permits(Opcode::GetFwProfile));
        assert!(!SessionState::Flashing.permits(Opcode::EraseChip));
    }

    #[test]
    fn test_terminal_states_permit_nothing() {
        for state in [
            SessionState::Disconnected,
            SessionState::Done,
            SessionState::Error,
        ] {
            assert!(state.is_terminal());
            for op in Opcode::ALL {
                assert!(!state.permits(op));
            }
        }
    }
}
