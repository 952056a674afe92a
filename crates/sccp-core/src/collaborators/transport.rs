//! Outbound messages to phones
//!
//! Encoding to the skinny wire format happens behind [`DeviceTransport`].

use serde::{Deserialize, Serialize};

use crate::types::{
    CallId, CallInfo, CallPriority, CallType, CallVisibility, ChannelState, Codec, KeySet, Lamp,
    RingerMode, SessionHandle, Tone,
};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum SpeakerMode {
    On,
    Off,
}

/// Busy-lamp-field status shown on a speed-dial button
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum BlfStatus {
    Unknown,
    Idle,
    InUse,
    Dnd,
    Alerting,
}

/// Display, tone, lamp and media directives sent to a phone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceMessage {
    DisplayPrompt {
        line_instance: u16,
        call_id: CallId,
        text: String,
    },
    ClearPrompt {
        line_instance: u16,
        call_id: CallId,
    },
    StartTone {
        tone: Tone,
        line_instance: u16,
        call_id: CallId,
    },
    StopTone {
        line_instance: u16,
        call_id: CallId,
    },
    SetLamp {
        line_instance: u16,
        lamp: Lamp,
    },
    SetRinger {
        mode: RingerMode,
        line_instance: u16,
        call_id: CallId,
    },
    SetSpeaker(SpeakerMode),
    ActivateCallPlane {
        line_instance: u16,
    },
    CallState {
        state: ChannelState,
        line_instance: u16,
        call_id: CallId,
        visibility: CallVisibility,
        priority: CallPriority,
    },
    CallInfo {
        line_instance: u16,
        call_id: CallId,
        call_type: CallType,
        info: CallInfo,
    },
    SelectSoftKeys {
        line_instance: u16,
        call_id: CallId,
        keyset: KeySet,
    },
    DialedNumber {
        line_instance: u16,
        call_id: CallId,
        number: String,
    },
    OpenReceiveChannel {
        call_id: CallId,
        passthru_party_id: u32,
        codec: Codec,
    },
    CloseReceiveChannel {
        call_id: CallId,
        passthru_party_id: u32,
    },
    StartMediaTransmission {
        call_id: CallId,
        passthru_party_id: u32,
        codec: Codec,
    },
    StopMediaTransmission {
        call_id: CallId,
        passthru_party_id: u32,
    },
    FeatureStatus {
        instance: u16,
        status: BlfStatus,
        label: String,
    },
}

impl DeviceMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            DeviceMessage::DisplayPrompt { .. } => "DisplayPromptStatus",
            DeviceMessage::ClearPrompt { .. } => "ClearPromptStatus",
            DeviceMessage::StartTone { .. } => "StartTone",
            DeviceMessage::StopTone { .. } => "StopTone",
            DeviceMessage::SetLamp { .. } => "SetLamp",
            DeviceMessage::SetRinger { .. } => "SetRinger",
            DeviceMessage::SetSpeaker(_) => "SetSpeakerMode",
            DeviceMessage::ActivateCallPlane { .. } => "ActivateCallPlane",
            DeviceMessage::CallState { .. } => "CallState",
            DeviceMessage::CallInfo { .. } => "CallInfo",
            DeviceMessage::SelectSoftKeys { .. } => "SelectSoftKeys",
            DeviceMessage::DialedNumber { .. } => "DialedNumber",
            DeviceMessage::OpenReceiveChannel { .. } => "OpenReceiveChannel",
            DeviceMessage::CloseReceiveChannel { .. } => "CloseReceiveChannel",
            DeviceMessage::StartMediaTransmission { .. } => "StartMediaTransmission",
            DeviceMessage::StopMediaTransmission { .. } => "StopMediaTransmission",
            DeviceMessage::FeatureStatus { .. } => "FeatureStatDynamic",
        }
    }
}

/// Queue a message for a device session. Must not block.
pub trait DeviceTransport: Send + Sync {
    fn send(&self, session: &SessionHandle, message: DeviceMessage) -> anyhow::Result<()>;
}
