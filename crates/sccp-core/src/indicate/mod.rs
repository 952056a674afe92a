//! The single entry point for channel state changes
//!
//! [`SccpContext::indicate`] records the new state on the channel before any
//! side effect, so re-entrant calls made while the directives execute already
//! observe the post-transition state. It then drives the phone through the
//! state's directive table, replicates the change to shared-line peers and
//! raises a line-status event for the hint distributor.

pub mod directives;
mod propagation;

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::collaborators::DeviceMessage;
use crate::context::SccpContext;
use crate::device::Device;
use crate::events::SccpEvent;
use crate::line_device::LineDevice;
use crate::types::{CallInfo, CallPriority, CallType, ChannelState, Codec, DndMode, MediaStreamState, RingerMode};

pub use directives::{local_directives, remote_directives, Directive, DirectiveInput, RemoteInput};

/// States replicated to the other devices of a shared line
const PROPAGATED_STATES: [ChannelState; 6] = [
    ChannelState::OffHook,
    ChannelState::Down,
    ChannelState::OnHook,
    ChannelState::Connected,
    ChannelState::Hold,
    ChannelState::ConnectedConference,
];

/// Where a directive list is executed
pub(crate) struct DirectiveTarget<'a> {
    pub device: &'a Device,
    pub line_instance: u16,
    pub channel: &'a Channel,
    pub call_type: CallType,
    pub call_info: CallInfo,
}

impl SccpContext {
    /// Move `channel` to `state`, updating the phone of `device` (or of the
    /// channel's claiming device when `None`).
    ///
    /// Returns `false` without touching the channel when no device or no
    /// line-device association can be resolved.
    pub fn indicate(&self, device: Option<&Arc<Device>>, channel: &Arc<Channel>, state: ChannelState) -> bool {
        let device = match device.cloned().or_else(|| self.claimed_device(channel)) {
            Some(device) => device,
            None => {
                debug!("{}: no device to indicate {} on", channel.call_id(), state);
                return false;
            }
        };
        let line = channel.line().clone();
        let Some(line_device) = device.line_device(line.name()) else {
            debug!("{}: not attached to line {}, skipping {}", device.id(), line.name(), state);
            return false;
        };

        // ONHOOK is shown to the phone but the channel rests in DOWN
        let stored = if state == ChannelState::OnHook {
            ChannelState::Down
        } else {
            state
        };
        let previous = channel.transition(stored);
        info!(
            "{}: Indicate {} -> {} on call {}-{}",
            device.id(),
            previous,
            state,
            line.name(),
            channel.call_id()
        );

        self.present(&device, &line_device, channel, previous, state);
        self.collaborators().routing.set_call_state(channel.call_id(), stored);

        if stored != previous {
            let in_conference = channel.conference().is_some() && state != ChannelState::ConnectedConference;
            if line.is_shared() && PROPAGATED_STATES.contains(&state) && !in_conference {
                self.propagate(&device, channel, &line, state);
            }
            self.fire_event(SccpEvent::LineStatusChanged {
                line: line.name().to_string(),
                device: Some(device.id().clone()),
                state: stored,
            });
        }
        debug!("{}: finished indicating {} on call {}", device.id(), state, channel.call_id());
        true
    }

    /// Drive one phone through the directive table of `state` without
    /// moving the channel. Used where a single channel is shown differently
    /// on several devices.
    pub(crate) fn present(
        &self,
        device: &Device,
        line_device: &LineDevice,
        channel: &Channel,
        previous: ChannelState,
        state: ChannelState,
    ) {
        let input = self.directive_input(device, line_device, channel, previous);
        let target = DirectiveTarget {
            device,
            line_instance: line_device.line_instance(),
            channel,
            call_type: input.call_type,
            call_info: input.call_info.clone(),
        };
        for directive in local_directives(state, &input) {
            self.execute_directive(&target, &directive);
        }
    }

    fn directive_input(
        &self,
        device: &Device,
        line_device: &LineDevice,
        channel: &Channel,
        previous: ChannelState,
    ) -> DirectiveInput {
        let data = channel.snapshot();
        let silenced = (device.dnd() == DndMode::Silent && data.priority != CallPriority::Urgent)
            || line_device.is_silent();
        let ringer = if silenced { RingerMode::Off } else { data.ringer_mode };
        let call_info = if data.private {
            data.call_info.hidden()
        } else {
            data.call_info.clone()
        };
        DirectiveInput {
            previous,
            call_type: data.call_type,
            call_info,
            ringer,
            priority: data.priority,
            answered_elsewhere: data.answered_elsewhere,
            is_active: self.claims().active_channel(device.id()) == Some(channel.handle()),
            receive_active: data.media.audio.receive.is_active(),
            early_rtp: self.config().early_rtp,
        }
    }

    pub(crate) fn execute_directive(&self, target: &DirectiveTarget<'_>, directive: &Directive) {
        let call_id = target.channel.call_id();
        let line_instance = target.line_instance;
        let message = match directive {
            Directive::Speaker(mode) => DeviceMessage::SetSpeaker(*mode),
            Directive::CallPlane => DeviceMessage::ActivateCallPlane { line_instance },
            Directive::CallState(state, visibility) => DeviceMessage::CallState {
                state: *state,
                line_instance,
                call_id,
                visibility: *visibility,
                priority: target.channel.snapshot().priority,
            },
            Directive::CallInfo => DeviceMessage::CallInfo {
                line_instance,
                call_id,
                call_type: target.call_type,
                info: target.call_info.clone(),
            },
            Directive::KeySet(keyset) => DeviceMessage::SelectSoftKeys {
                line_instance,
                call_id,
                keyset: *keyset,
            },
            Directive::Prompt(text) => DeviceMessage::DisplayPrompt {
                line_instance,
                call_id,
                text: text.clone(),
            },
            Directive::ClearPrompt => DeviceMessage::ClearPrompt { line_instance, call_id },
            Directive::Tone(tone) => DeviceMessage::StartTone {
                tone: *tone,
                line_instance,
                call_id,
            },
            Directive::StopTone => DeviceMessage::StopTone { line_instance, call_id },
            Directive::Ringer(mode) => DeviceMessage::SetRinger {
                mode: *mode,
                line_instance,
                call_id,
            },
            Directive::Lamp(lamp) => DeviceMessage::SetLamp {
                line_instance,
                lamp: *lamp,
            },
            Directive::DialedNumber => DeviceMessage::DialedNumber {
                line_instance,
                call_id,
                number: target.channel.dialed_number(),
            },
            Directive::OpenReceive => {
                self.open_receive_channel(target.device, target.channel);
                return;
            }
            Directive::CloseMedia => {
                self.close_media(Some(target.device), target.channel);
                return;
            }
        };
        self.send(target.device, message);
    }

    /// Ask the phone to open its receive side, unless it already is
    pub(crate) fn open_receive_channel(&self, device: &Device, channel: &Channel) {
        let data = channel.snapshot();
        if data.media.audio.receive.is_active() {
            debug!("{}: receive channel already active on {}", device.id(), channel.call_id());
            return;
        }
        let media = &self.collaborators().media;
        let codec = media
            .find_best_joint_codec(
                &data.codecs.preferences,
                &device.codecs().capabilities,
                &channel.line().codecs().capabilities,
            )
            .or_else(|| data.codecs.preferences.first().copied())
            .unwrap_or(Codec::G711Ulaw);

        if let Err(e) = media.open_receive_channel(channel.call_id(), codec) {
            warn!("{}: media engine refused receive channel for {}: {}", device.id(), channel.call_id(), e);
            return;
        }
        channel.with_data_mut(|d| {
            d.media.audio.receive = MediaStreamState::Opening;
            d.media.audio.codec = Some(codec);
        });
        self.send(
            device,
            DeviceMessage::OpenReceiveChannel {
                call_id: channel.call_id(),
                passthru_party_id: channel.passthru_party_id(),
                codec,
            },
        );
    }

    /// Phone acknowledged its receive channel; start transmitting towards it
    pub(crate) fn receive_channel_opened(&self, device: &Device, channel: &Channel) {
        let Some(codec) = channel.with_data_mut(|d| {
            if d.media.audio.receive == MediaStreamState::Closed {
                return None;
            }
            d.media.audio.receive = MediaStreamState::Open;
            d.media.audio.codec
        }) else {
            debug!("{}: late receive ack for {}", device.id(), channel.call_id());
            return;
        };
        if channel.media().audio.transmit.is_active() {
            return;
        }
        if let Err(e) = self.collaborators().media.start_transmission(channel.call_id(), codec) {
            warn!("{}: cannot start transmission on {}: {}", device.id(), channel.call_id(), e);
            return;
        }
        channel.with_data_mut(|d| d.media.audio.transmit = MediaStreamState::Open);
        self.send(
            device,
            DeviceMessage::StartMediaTransmission {
                call_id: channel.call_id(),
                passthru_party_id: channel.passthru_party_id(),
                codec,
            },
        );
    }

    /// Force-close both media directions of a channel
    pub(crate) fn close_media(&self, device: Option<&Device>, channel: &Channel) {
        let audio = channel.with_data_mut(|d| {
            let audio = d.media.audio;
            d.media.audio.receive = MediaStreamState::Closed;
            d.media.audio.transmit = MediaStreamState::Closed;
            audio
        });
        let media = &self.collaborators().media;
        if audio.receive.is_active() {
            media.close_receive_channel(channel.call_id());
            if let Some(device) = device {
                self.send(
                    device,
                    DeviceMessage::CloseReceiveChannel {
                        call_id: channel.call_id(),
                        passthru_party_id: channel.passthru_party_id(),
                    },
                );
            }
        }
        if audio.transmit.is_active() {
            media.stop_transmission(channel.call_id());
            if let Some(device) = device {
                self.send(
                    device,
                    DeviceMessage::StopMediaTransmission {
                        call_id: channel.call_id(),
                        passthru_party_id: channel.passthru_party_id(),
                    },
                );
            }
        }
    }

    /// Show a prompt on a device outside of any state change
    pub(crate) fn display_prompt(&self, device: &Device, channel: &Channel, text: &str) {
        let line_instance = device
            .line_device(channel.line().name())
            .map(|ld| ld.line_instance())
            .unwrap_or(0);
        self.send(
            device,
            DeviceMessage::DisplayPrompt {
                line_instance,
                call_id: channel.call_id(),
                text: text.to_string(),
            },
        );
    }

    pub(crate) fn play_tone(&self, device: &Device, channel: &Channel, tone: crate::types::Tone) {
        let line_instance = device
            .line_device(channel.line().name())
            .map(|ld| ld.line_instance())
            .unwrap_or(0);
        self.send(
            device,
            DeviceMessage::StartTone {
                tone,
                line_instance,
                call_id: channel.call_id(),
            },
        );
    }
}
