//! Shared identifiers and value types for lines, devices and channels

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-unique call identifier
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CallId(pub u32);

impl CallId {
    /// Token used by the phone to correlate media acknowledgements
    pub fn passthru_party_id(&self) -> u32 {
        self.0 ^ 0xFFFF_FFFF
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Device identity, usually the MAC based name such as `SEP001122334455`
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport session a registered device talks through
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionHandle(pub String);

impl SessionHandle {
    pub fn new() -> Self {
        Self(format!("session-{}", uuid::Uuid::new_v4()))
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conference identifier handed out by the mixing service
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConferenceId(pub String);

impl ConferenceId {
    pub fn new() -> Self {
        Self(format!("conf-{}", uuid::Uuid::new_v4()))
    }
}

impl fmt::Display for ConferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Call leg handle assigned by the routing engine
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct LegId(pub String);

impl fmt::Display for LegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel states as understood by the phone and the state machine
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChannelState {
    Down,
    OffHook,
    OnHook,
    RingOut,
    Ringing,
    Connected,
    Busy,
    Congestion,
    Hold,
    CallWaiting,
    CallTransfer,
    CallPark,
    Proceed,
    CallRemoteMultiline,
    InvalidNumber,
    Dialing,
    Progress,
    DigitsFoll,
    BlindTransfer,
    CallConference,
    ConnectedConference,
    Speeddial,
    Dnd,
    Zombie,
}

/// Coarse grouping of channel states used for edge predicates
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum StateGroup {
    Idle,
    Dialing,
    SettingUp,
    Connected,
    Terminating,
}

impl ChannelState {
    pub fn group(&self) -> StateGroup {
        use ChannelState::*;
        match self {
            Down | OnHook => StateGroup::Idle,
            OffHook | Dialing | DigitsFoll | Speeddial => StateGroup::Dialing,
            RingOut | Ringing | Proceed | Progress | CallWaiting => StateGroup::SettingUp,
            Connected | Hold | CallTransfer | CallConference | ConnectedConference | BlindTransfer
            | CallPark | CallRemoteMultiline => StateGroup::Connected,
            Busy | Congestion | InvalidNumber | Dnd | Zombie => StateGroup::Terminating,
        }
    }

    /// States a channel may be put on hold from
    pub fn is_holdable(&self) -> bool {
        matches!(self, ChannelState::Connected | ChannelState::Proceed)
    }

    /// States a channel may be resumed from
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            ChannelState::Hold | ChannelState::CallTransfer | ChannelState::CallConference
        )
    }

    pub fn type_name(&self) -> &'static str {
        use ChannelState::*;
        match self {
            Down => "DOWN",
            OffHook => "OFFHOOK",
            OnHook => "ONHOOK",
            RingOut => "RINGOUT",
            Ringing => "RINGING",
            Connected => "CONNECTED",
            Busy => "BUSY",
            Congestion => "CONGESTION",
            Hold => "HOLD",
            CallWaiting => "CALLWAITING",
            CallTransfer => "CALLTRANSFER",
            CallPark => "CALLPARK",
            Proceed => "PROCEED",
            CallRemoteMultiline => "CALLREMOTEMULTILINE",
            InvalidNumber => "INVALIDNUMBER",
            Dialing => "DIALING",
            Progress => "PROGRESS",
            DigitsFoll => "DIGITSFOLL",
            BlindTransfer => "BLINDTRANSFER",
            CallConference => "CALLCONFERENCE",
            ConnectedConference => "CONNECTEDCONFERENCE",
            Speeddial => "SPEEDDIAL",
            Dnd => "DND",
            Zombie => "ZOMBIE",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Direction of a call leg relative to the phone
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallType {
    Inbound,
    Outbound,
    Forward,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum RingerMode {
    Off,
    Inside,
    Outside,
    Feature,
    FlashOnly,
}

/// Do-not-disturb handling configured on a device
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Default)]
pub enum DndMode {
    #[default]
    Off,
    /// Refuse new calls; the line reports busy/DND
    Reject,
    /// Let calls through without ringing
    Silent,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Default)]
pub enum Presentation {
    #[default]
    Allowed,
    Restricted,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Default)]
pub enum CallPriority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Default)]
pub enum CallVisibility {
    #[default]
    Default,
    Collapsed,
    Hidden,
}

/// Why a channel went on hold; only normal holds are shown on shared-line peers
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Default)]
pub enum HoldReason {
    #[default]
    Normal,
    Barge,
    Feature,
}

/// One party of a call. `None` fields are not valid/present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub name: Option<String>,
    pub number: Option<String>,
}

impl Party {
    pub fn new(name: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            number: Some(number.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.number.is_none()
    }

    /// Name if valid, number otherwise
    pub fn display(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.number.as_deref())
            .unwrap_or("")
    }
}

/// Caller information presented on the phone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
    pub calling: Party,
    pub called: Party,
    pub original_calling: Party,
    pub original_called: Party,
    pub last_redirecting: Party,
    pub presentation: Presentation,
}

impl CallInfo {
    /// Copy with every party blanked, used when the call is private
    pub fn hidden(&self) -> Self {
        Self {
            presentation: Presentation::Restricted,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Codec {
    G711Ulaw,
    G711Alaw,
    G722,
    G729,
    G729a,
    Ilbc,
    H264,
}

/// Ordered preference list plus capability set of codecs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecSets {
    pub preferences: Vec<Codec>,
    pub capabilities: Vec<Codec>,
}

impl CodecSets {
    pub fn new(preferences: Vec<Codec>, capabilities: Vec<Codec>) -> Self {
        Self { preferences, capabilities }
    }

    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty() && self.capabilities.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Tone {
    Silence,
    InsideDial,
    OutsideDial,
    Alerting,
    Busy,
    Reorder,
    BeepBonk,
    CallWaiting,
    Zip,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Lamp {
    Off,
    On,
    Wink,
    Flash,
    Blink,
}

/// Soft key set selected for a call plane
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum KeySet {
    OnHook,
    Connected,
    OnHold,
    RingIn,
    OffHook,
    ConnectedTransfer,
    DigitsFoll,
    ConnectedConference,
    RingOut,
    OffHookFeature,
    OnHookStealable,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum MediaType {
    Audio,
    Video,
}

/// Sub-state of one media direction
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Default)]
pub enum MediaStreamState {
    #[default]
    Closed,
    Opening,
    Open,
}

impl MediaStreamState {
    pub fn is_active(&self) -> bool {
        !matches!(self, MediaStreamState::Closed)
    }
}

/// Receive/transmit sub-state for one media type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDirections {
    pub receive: MediaStreamState,
    pub transmit: MediaStreamState,
    pub codec: Option<Codec>,
}

/// Media sub-state for every media type of a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMedia {
    pub audio: MediaDirections,
    pub video: MediaDirections,
}

impl ChannelMedia {
    pub fn get(&self, media_type: MediaType) -> &MediaDirections {
        match media_type {
            MediaType::Audio => &self.audio,
            MediaType::Video => &self.video,
        }
    }

    pub fn get_mut(&mut self, media_type: MediaType) -> &mut MediaDirections {
        match media_type {
            MediaType::Audio => &mut self.audio,
            MediaType::Video => &mut self.video,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthru_party_id() {
        assert_eq!(CallId(1).passthru_party_id(), 0xFFFF_FFFE);
        assert_eq!(CallId(0xFFFF_FFFF).passthru_party_id(), 0);
        assert_eq!(CallId(0x1234).to_string(), "00001234");
    }

    #[test]
    fn test_state_groups() {
        assert_eq!(ChannelState::OnHook.group(), StateGroup::Idle);
        assert_eq!(ChannelState::DigitsFoll.group(), StateGroup::Dialing);
        assert_eq!(ChannelState::Ringing.group(), StateGroup::SettingUp);
        assert_eq!(ChannelState::Hold.group(), StateGroup::Connected);
        assert_eq!(ChannelState::Congestion.group(), StateGroup::Terminating);
        assert!(ChannelState::Proceed.is_holdable());
        assert!(!ChannelState::Hold.is_holdable());
        assert!(ChannelState::CallTransfer.is_resumable());
    }

    #[test]
    fn test_party_display() {
        assert_eq!(Party::new("Alice", "100").display(), "Alice");
        let number_only = Party { name: None, number: Some("200".into()) };
        assert_eq!(number_only.display(), "200");
        assert_eq!(Party::default().display(), "");
    }
}
