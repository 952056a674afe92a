//! Per-state directive tables
//!
//! Pure functions from (requested state, call facts) to the ordered list of
//! phone directives. Execution against the transport and media engine
//! happens in the parent module.

use crate::types::{
    CallInfo, CallPriority, CallType, CallVisibility, ChannelState, HoldReason, KeySet, Lamp, RingerMode, Tone,
};
use crate::collaborators::SpeakerMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Speaker(SpeakerMode),
    CallPlane,
    CallState(ChannelState, CallVisibility),
    CallInfo,
    KeySet(KeySet),
    Prompt(String),
    ClearPrompt,
    Tone(Tone),
    StopTone,
    Ringer(RingerMode),
    Lamp(Lamp),
    DialedNumber,
    OpenReceive,
    CloseMedia,
}

/// Facts about the call a local directive table depends on
#[derive(Debug, Clone)]
pub struct DirectiveInput {
    pub previous: ChannelState,
    pub call_type: CallType,
    pub call_info: CallInfo,
    /// Ringer mode after DND and subscription overrides
    pub ringer: RingerMode,
    pub priority: CallPriority,
    pub answered_elsewhere: bool,
    /// The channel is the device's active one
    pub is_active: bool,
    pub receive_active: bool,
    pub early_rtp: bool,
}

/// Facts a shared-line peer's directive table depends on
#[derive(Debug, Clone, Copy)]
pub struct RemoteInput {
    pub answered_elsewhere: bool,
    pub visibility: CallVisibility,
    pub hold_reason: HoldReason,
}

fn incoming_prompt(input: &DirectiveInput) -> String {
    let who = input.call_info.calling.display();
    if input.priority == CallPriority::Urgent {
        format!("Urgent Call from: {}", who)
    } else {
        format!("Incoming Call from: {}", who)
    }
}

/// Directives for the device the state is indicated on
pub fn local_directives(state: ChannelState, input: &DirectiveInput) -> Vec<Directive> {
    use ChannelState::*;
    use Directive as D;

    match state {
        Down => Vec::new(),
        OffHook => {
            let mut d = vec![
                D::Speaker(SpeakerMode::On),
                D::CallState(OffHook, CallVisibility::Default),
                D::CallPlane,
                D::Prompt("Enter number".to_string()),
                D::KeySet(KeySet::OffHook),
            ];
            if input.previous == Down {
                d.push(D::Tone(Tone::InsideDial));
            }
            d
        }
        OnHook => {
            let mut d = vec![D::CloseMedia, D::StopTone, D::ClearPrompt];
            if input.answered_elsewhere {
                d.push(D::CallState(Connected, CallVisibility::Hidden));
            }
            d.extend([
                D::Ringer(RingerMode::Off),
                D::CallState(OnHook, CallVisibility::Default),
                D::KeySet(KeySet::OnHook),
                D::Lamp(Lamp::Off),
            ]);
            if input.is_active {
                d.push(D::Speaker(SpeakerMode::Off));
            }
            d
        }
        RingOut => {
            let mut d = vec![
                D::CallState(RingOut, CallVisibility::Default),
                D::CallInfo,
                D::KeySet(KeySet::RingOut),
                D::Prompt("Ring Out".to_string()),
            ];
            if !input.early_rtp && !input.receive_active {
                d.push(D::Tone(Tone::Alerting));
            }
            d
        }
        Ringing => vec![
            D::CallState(Ringing, CallVisibility::Default),
            D::CallInfo,
            D::Lamp(Lamp::Blink),
            D::Ringer(input.ringer),
            D::KeySet(KeySet::RingIn),
            D::Prompt(incoming_prompt(input)),
        ],
        Connected => {
            let mut d = vec![
                D::StopTone,
                D::Ringer(RingerMode::Off),
                D::CallState(Connected, CallVisibility::Default),
                D::CallInfo,
                D::KeySet(KeySet::Connected),
                D::Lamp(Lamp::On),
                D::Prompt("Connected".to_string()),
            ];
            if !input.receive_active {
                d.push(D::OpenReceive);
            }
            d
        }
        Busy => vec![
            D::Tone(Tone::Busy),
            D::CallState(Busy, CallVisibility::Default),
            D::Prompt("Busy".to_string()),
        ],
        Proceed if input.previous == Connected => Vec::new(),
        Proceed => vec![
            D::StopTone,
            D::CallState(Proceed, CallVisibility::Default),
            D::CallInfo,
            D::Prompt("Call Proceed".to_string()),
        ],
        Progress => vec![
            D::CallState(Proceed, CallVisibility::Default),
            D::Prompt("Call Progress".to_string()),
        ],
        Hold => vec![
            D::CloseMedia,
            D::CallState(Hold, CallVisibility::Default),
            D::CallInfo,
            D::KeySet(KeySet::OnHold),
            D::Lamp(Lamp::Wink),
            D::Prompt("Hold".to_string()),
            D::Speaker(SpeakerMode::Off),
        ],
        Congestion => vec![
            D::Tone(Tone::Reorder),
            D::CallState(Congestion, CallVisibility::Default),
            D::Prompt("Temp fail".to_string()),
        ],
        CallWaiting => vec![
            D::Tone(Tone::CallWaiting),
            D::CallState(Ringing, CallVisibility::Default),
            D::CallInfo,
            D::KeySet(KeySet::RingIn),
            D::Prompt(incoming_prompt(input)),
        ],
        CallTransfer => vec![
            D::CallState(CallTransfer, CallVisibility::Default),
            D::KeySet(KeySet::OnHold),
            D::Prompt("Transfer".to_string()),
        ],
        CallConference => vec![
            D::CallState(CallConference, CallVisibility::Default),
            D::Prompt("Conference".to_string()),
        ],
        ConnectedConference => {
            let mut d = vec![
                D::StopTone,
                D::Ringer(RingerMode::Off),
                D::CallState(Connected, CallVisibility::Default),
                D::KeySet(KeySet::ConnectedConference),
                D::Prompt("Conference".to_string()),
            ];
            if !input.receive_active {
                d.push(D::OpenReceive);
            }
            d
        }
        InvalidNumber => vec![
            D::CloseMedia,
            D::Tone(Tone::Reorder),
            D::CallState(InvalidNumber, CallVisibility::Default),
            D::Prompt("Unknown Number".to_string()),
        ],
        Dialing => vec![
            D::StopTone,
            D::CallState(Dialing, CallVisibility::Default),
            D::DialedNumber,
            D::KeySet(KeySet::DigitsFoll),
            D::Prompt("Dialing".to_string()),
        ],
        DigitsFoll => vec![
            D::StopTone,
            D::CallState(DigitsFoll, CallVisibility::Default),
            D::KeySet(KeySet::DigitsFoll),
        ],
        BlindTransfer => vec![D::Prompt("Blind Transfer".to_string())],
        CallPark | CallRemoteMultiline | Speeddial | Dnd | Zombie => Vec::new(),
    }
}

/// Reduced directives for the other devices sharing the line
pub fn remote_directives(state: ChannelState, input: &RemoteInput) -> Vec<Directive> {
    use ChannelState::*;
    use Directive as D;

    match state {
        Down | OnHook => {
            let mut d = Vec::new();
            if input.answered_elsewhere {
                d.push(D::CallState(Connected, CallVisibility::Hidden));
            }
            d.extend([
                D::ClearPrompt,
                D::Ringer(RingerMode::Off),
                D::CallState(OnHook, CallVisibility::Default),
                D::KeySet(KeySet::OnHook),
            ]);
            d
        }
        Connected | ConnectedConference => vec![
            D::Ringer(RingerMode::Off),
            D::CallState(CallRemoteMultiline, input.visibility),
            D::CallInfo,
            D::KeySet(KeySet::OnHookStealable),
        ],
        Hold if input.hold_reason == HoldReason::Normal => {
            vec![D::CallState(Hold, input.visibility), D::CallInfo]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Party;
    use pretty_assertions::assert_eq;

    fn input(previous: ChannelState) -> DirectiveInput {
        DirectiveInput {
            previous,
            call_type: CallType::Inbound,
            call_info: CallInfo {
                calling: Party::new("Alice", "200"),
                ..Default::default()
            },
            ringer: RingerMode::Outside,
            priority: CallPriority::Normal,
            answered_elsewhere: false,
            is_active: true,
            receive_active: false,
            early_rtp: false,
        }
    }

    #[test]
    fn test_offhook_dial_tone_only_for_new_call() {
        let fresh = local_directives(ChannelState::OffHook, &input(ChannelState::Down));
        assert_eq!(fresh.last(), Some(&Directive::Tone(Tone::InsideDial)));
        let again = local_directives(ChannelState::OffHook, &input(ChannelState::RingOut));
        assert!(!again.contains(&Directive::Tone(Tone::InsideDial)));
    }

    #[test]
    fn test_ringing_prompt_and_ringer() {
        let mut urgent = input(ChannelState::Down);
        urgent.priority = CallPriority::Urgent;
        urgent.ringer = RingerMode::Off;
        let d = local_directives(ChannelState::Ringing, &urgent);
        assert!(d.contains(&Directive::Ringer(RingerMode::Off)));
        assert!(d.contains(&Directive::Prompt("Urgent Call from: Alice".to_string())));

        let d = local_directives(ChannelState::Ringing, &input(ChannelState::Down));
        assert!(d.contains(&Directive::Prompt("Incoming Call from: Alice".to_string())));
        assert!(d.contains(&Directive::Ringer(RingerMode::Outside)));
    }

    #[test]
    fn test_connected_reuses_open_media() {
        let mut open = input(ChannelState::Hold);
        open.receive_active = true;
        assert!(!local_directives(ChannelState::Connected, &open).contains(&Directive::OpenReceive));
        let closed = input(ChannelState::Hold);
        assert!(local_directives(ChannelState::Connected, &closed).contains(&Directive::OpenReceive));
    }

    #[test]
    fn test_onhook_answered_elsewhere_hides_first() {
        let mut i = input(ChannelState::Ringing);
        i.answered_elsewhere = true;
        i.is_active = false;
        let d = local_directives(ChannelState::OnHook, &i);
        let hidden = d
            .iter()
            .position(|x| *x == Directive::CallState(ChannelState::Connected, CallVisibility::Hidden))
            .unwrap();
        let onhook = d
            .iter()
            .position(|x| *x == Directive::CallState(ChannelState::OnHook, CallVisibility::Default))
            .unwrap();
        assert!(hidden < onhook);
        assert!(!d.contains(&Directive::Speaker(SpeakerMode::Off)));
    }

    #[test]
    fn test_proceed_after_connected_is_ignored() {
        assert!(local_directives(ChannelState::Proceed, &input(ChannelState::Connected)).is_empty());
        assert!(!local_directives(ChannelState::Proceed, &input(ChannelState::RingOut)).is_empty());
    }

    #[test]
    fn test_ringout_tone_suppressed_by_early_media() {
        let mut i = input(ChannelState::OffHook);
        assert!(local_directives(ChannelState::RingOut, &i).contains(&Directive::Tone(Tone::Alerting)));
        i.early_rtp = true;
        assert!(!local_directives(ChannelState::RingOut, &i).contains(&Directive::Tone(Tone::Alerting)));
    }

    #[test]
    fn test_remote_tables() {
        let normal = RemoteInput {
            answered_elsewhere: false,
            visibility: CallVisibility::Hidden,
            hold_reason: HoldReason::Normal,
        };
        assert!(remote_directives(ChannelState::OffHook, &normal).is_empty());
        assert_eq!(
            remote_directives(ChannelState::Connected, &normal),
            vec![
                Directive::Ringer(RingerMode::Off),
                Directive::CallState(ChannelState::CallRemoteMultiline, CallVisibility::Hidden),
                Directive::CallInfo,
                Directive::KeySet(KeySet::OnHookStealable),
            ]
        );
        assert_eq!(remote_directives(ChannelState::Hold, &normal).len(), 2);
        let barge = RemoteInput {
            hold_reason: HoldReason::Barge,
            ..normal
        };
        assert!(remote_directives(ChannelState::Hold, &barge).is_empty());
    }
}
