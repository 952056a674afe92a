//! Device-state publication towards the routing engine's presence layer

use serde::{Deserialize, Serialize};

use crate::types::ChannelState;

/// Externally visible availability of a line
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum PresenceState {
    NotInUse,
    InUse,
    Busy,
    Unavailable,
    Ringing,
    OnHold,
}

impl From<ChannelState> for PresenceState {
    fn from(state: ChannelState) -> Self {
        match state {
            ChannelState::Down | ChannelState::OnHook => PresenceState::NotInUse,
            ChannelState::Ringing => PresenceState::Ringing,
            ChannelState::Hold => PresenceState::OnHold,
            ChannelState::Busy | ChannelState::Dnd => PresenceState::Busy,
            ChannelState::Congestion | ChannelState::Zombie => PresenceState::Unavailable,
            _ => PresenceState::InUse,
        }
    }
}

pub trait PresenceEngine: Send + Sync {
    fn publish_device_state(&self, line_key: &str, state: PresenceState, caller_name: &str, caller_number: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_state_mapping() {
        assert_eq!(PresenceState::from(ChannelState::OnHook), PresenceState::NotInUse);
        assert_eq!(PresenceState::from(ChannelState::Down), PresenceState::NotInUse);
        assert_eq!(PresenceState::from(ChannelState::Ringing), PresenceState::Ringing);
        assert_eq!(PresenceState::from(ChannelState::Hold), PresenceState::OnHold);
        assert_eq!(PresenceState::from(ChannelState::Dnd), PresenceState::Busy);
        assert_eq!(PresenceState::from(ChannelState::Congestion), PresenceState::Unavailable);
        assert_eq!(PresenceState::from(ChannelState::Connected), PresenceState::InUse);
        assert_eq!(PresenceState::from(ChannelState::RingOut), PresenceState::InUse);
    }
}
