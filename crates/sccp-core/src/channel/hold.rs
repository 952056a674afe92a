//! Hold, resume and answer

use std::sync::Arc;
use tracing::{debug, info};

use super::Channel;
use crate::collaborators::ControlSignal;
use crate::context::SccpContext;
use crate::device::Device;
use crate::errors::{Result, SccpError};
use crate::types::{CallType, ChannelState, HoldReason};

pub(crate) const KEY_NOT_ACTIVE: &str = "Key is not active";
const NO_ACTIVE_CALL: &str = "No active call to put on hold";

impl SccpContext {
    /// Put a connected channel on hold.
    ///
    /// Media is closed and the device's claim released, so the device is free
    /// for another call. Illegal source states leave the channel untouched and
    /// show "Key is not active" on the device.
    pub fn hold(&self, channel: &Arc<Channel>, device: Option<&Arc<Device>>, reason: HoldReason) -> Result<()> {
        let device = device
            .cloned()
            .or_else(|| self.claimed_device(channel))
            .ok_or(SccpError::NotClaimed(channel.call_id()))?;
        let state = channel.state();
        if !state.is_holdable() {
            debug!("{}: cannot hold {} in state {}", device.id(), channel.call_id(), state);
            self.display_prompt(&device, channel, KEY_NOT_ACTIVE);
            return Err(SccpError::invalid_state("hold", channel.call_id(), state));
        }
        info!("{}: Hold channel {}", device.id(), channel.call_id());

        let line = channel.line().clone();
        let music_class = line
            .config()
            .music_class
            .clone()
            .unwrap_or_else(|| self.config().music_class.clone());
        channel.with_data_mut(|d| d.hold_reason = reason);
        self.collaborators()
            .routing
            .queue_control(channel.call_id(), ControlSignal::Hold { music_class });
        self.claim_device(channel, None);
        self.indicate(Some(&device), channel, ChannelState::Hold);

        line.statistics().held();
        device.statistics().held();
        Ok(())
    }

    /// Take a held channel back onto `device` (or the device that held it).
    ///
    /// With `swap` any other call active on the device is held first, or
    /// ended when it cannot be held. Without it an active call blocks the
    /// resume.
    pub fn resume(&self, channel: &Arc<Channel>, device: Option<&Arc<Device>>, swap: bool) -> Result<()> {
        let device = device
            .cloned()
            .or_else(|| self.device_of(channel))
            .ok_or(SccpError::NotClaimed(channel.call_id()))?;
        let state = channel.state();
        if !state.is_resumable() {
            debug!("{}: cannot resume {} in state {}", device.id(), channel.call_id(), state);
            self.display_prompt(&device, channel, NO_ACTIVE_CALL);
            return Err(SccpError::invalid_state("resume", channel.call_id(), state));
        }

        if let Some(active) = self.active_channel(&device) {
            if active.handle() != channel.handle() {
                if !swap {
                    self.display_prompt(&device, channel, KEY_NOT_ACTIVE);
                    return Err(SccpError::invalid_state("resume", channel.call_id(), state));
                }
                self.hold_or_end(&device, &active);
            }
        }
        info!("{}: Resume channel {}", device.id(), channel.call_id());

        if device.clear_transfer_if(channel.handle()).is_some() {
            debug!("{}: resuming {} cancels the transfer", device.id(), channel.call_id());
        }
        if state == ChannelState::CallConference {
            if let Some(conference) = channel.conference() {
                device.clear_conference_if(&conference);
            }
        }

        let line = channel.line().clone();
        let called = device
            .line_device(line.name())
            .map(|ld| ld.called_party())
            .unwrap_or_else(|| line.caller_id());
        self.collaborators()
            .routing
            .queue_control(channel.call_id(), ControlSignal::Unhold);
        self.claim_device(channel, Some(&device));
        channel.with_data_mut(|d| {
            d.hold_reason = HoldReason::Normal;
            match d.call_type {
                CallType::Outbound => d.call_info.calling = line.caller_id(),
                _ => d.call_info.called = called,
            }
        });
        self.indicate(Some(&device), channel, ChannelState::Connected);
        line.statistics().unheld();
        Ok(())
    }

    /// Pick up a ringing channel on `device`
    pub fn answer(&self, channel: &Arc<Channel>, device: &Arc<Device>) -> Result<()> {
        let state = channel.state();
        if !matches!(state, ChannelState::Ringing | ChannelState::CallWaiting) {
            return Err(SccpError::invalid_state("answer", channel.call_id(), state));
        }
        let Some(line_device) = device.line_device(channel.line().name()) else {
            return Err(SccpError::LineNotFound(channel.line().name().to_string()));
        };
        if let Some(active) = self.active_channel(device) {
            if active.handle() != channel.handle() {
                self.hold_or_end(device, &active);
            }
        }
        for child in channel.line().children_of(channel.handle()) {
            child.with_data_mut(|d| d.answered_elsewhere = true);
            self.end_call(&child);
        }
        info!("{}: Answer channel {}", device.id(), channel.call_id());

        let called = line_device.called_party();
        channel.with_data_mut(|d| {
            d.presented_on.clear();
            if d.call_type != CallType::Outbound {
                d.call_info.called = called;
            }
        });
        self.claim_device(channel, Some(device));
        self.indicate(Some(device), channel, ChannelState::OffHook);
        self.indicate(Some(device), channel, ChannelState::Connected);
        device.statistics().answered();
        self.collaborators()
            .routing
            .queue_control(channel.call_id(), ControlSignal::Answer);
        Ok(())
    }
}
