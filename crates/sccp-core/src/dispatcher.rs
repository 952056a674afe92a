//! Entry point for events decoded from a phone's transport session

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::context::SccpContext;
use crate::device::Device;
use crate::errors::{Result, SccpError};
use crate::line::Line;
use crate::types::{CallId, ChannelState, Codec, DeviceId, DndMode, HoldReason, SessionHandle};

/// Soft keys the core reacts to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Softkey {
    NewCall,
    Hold,
    Resume,
    Transfer,
    Conference,
    EndCall,
    Answer,
    Dnd,
    /// Group pickup
    Pickup,
    Barge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    Register {
        device: DeviceId,
    },
    Unregister,
    OffHook {
        line_instance: Option<u16>,
    },
    OnHook,
    KeypadDigit(char),
    Softkey {
        key: Softkey,
        line_instance: Option<u16>,
        call_id: Option<CallId>,
    },
    OpenReceiveChannelAck {
        passthru_party_id: u32,
    },
    CapabilitiesReport {
        codecs: Vec<Codec>,
    },
}

impl DeviceEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            DeviceEvent::Register { .. } => "RegisterMessage",
            DeviceEvent::Unregister => "UnregisterMessage",
            DeviceEvent::OffHook { .. } => "OffHookMessage",
            DeviceEvent::OnHook => "OnHookMessage",
            DeviceEvent::KeypadDigit(_) => "KeypadButtonMessage",
            DeviceEvent::Softkey { .. } => "SoftKeyEventMessage",
            DeviceEvent::OpenReceiveChannelAck { .. } => "OpenReceiveChannelAck",
            DeviceEvent::CapabilitiesReport { .. } => "CapabilitiesResMessage",
        }
    }
}

impl SccpContext {
    /// Dispatch one decoded event from `session`.
    ///
    /// Association misses caused by racing hangups come back as transient
    /// errors and are only logged at debug level.
    pub async fn handle(&self, event: DeviceEvent, session: &SessionHandle) -> Result<()> {
        debug!("{}: handling {}", session, event.type_name());
        let result = self.dispatch(event, session).await;
        if let Err(e) = &result {
            if e.is_transient() {
                debug!("{}: {}", session, e);
            } else {
                warn!("{}: {}", session, e);
            }
        }
        result
    }

    async fn dispatch(&self, event: DeviceEvent, session: &SessionHandle) -> Result<()> {
        if let DeviceEvent::Register { device } = &event {
            return self.register_device(device, session.clone()).map(|_| ());
        }
        let device = self
            .device_for_session(session)
            .ok_or_else(|| SccpError::DeviceNotFound(format!("session {}", session)))?;

        match event {
            DeviceEvent::Register { .. } => Ok(()),
            DeviceEvent::Unregister => {
                self.unregister_device(device.id());
                Ok(())
            }
            DeviceEvent::OffHook { line_instance } => self.off_hook(&device, line_instance).await,
            DeviceEvent::OnHook => {
                if let Some(active) = self.active_channel(&device) {
                    self.end_call(&active);
                }
                Ok(())
            }
            DeviceEvent::KeypadDigit(digit) => {
                let active = self
                    .active_channel(&device)
                    .ok_or_else(|| SccpError::ChannelNotFound(format!("active call of {}", device.id())))?;
                self.keypad_digit(&active, digit).await
            }
            DeviceEvent::Softkey {
                key,
                line_instance,
                call_id,
            } => self.softkey(&device, key, line_instance, call_id).await,
            DeviceEvent::OpenReceiveChannelAck { passthru_party_id } => {
                let channel = self
                    .channel_by_passthru(passthru_party_id)
                    .ok_or_else(|| SccpError::ChannelNotFound(format!("passthru {:08x}", passthru_party_id)))?;
                self.receive_channel_opened(&device, &channel);
                Ok(())
            }
            DeviceEvent::CapabilitiesReport { codecs } => {
                debug!("{}: reports {} codecs", device.id(), codecs.len());
                device.set_capabilities(codecs);
                for line_device in device.line_devices() {
                    line_device.line().recompute_codecs(&self.global_codecs());
                }
                Ok(())
            }
        }
    }

    /// Line for a button press: the given instance, else the device's first line
    fn line_for(&self, device: &Device, line_instance: Option<u16>) -> Result<Arc<Line>> {
        let line_device = match line_instance {
            Some(instance) => device.line_device_by_instance(instance),
            None => device.default_line_device(),
        };
        line_device
            .map(|ld| ld.line().clone())
            .ok_or_else(|| SccpError::LineNotFound(format!("{} instance {:?}", device.id(), line_instance)))
    }

    async fn off_hook(&self, device: &Arc<Device>, line_instance: Option<u16>) -> Result<()> {
        if self.active_channel(device).is_some() {
            debug!("{}: already off hook", device.id());
            return Ok(());
        }
        if let Some(ringing) = self.ringing_channel(device) {
            return self.answer(&ringing, device);
        }
        let line = self.line_for(device, line_instance)?;
        self.new_call(&line, device, None).await.map(|_| ())
    }

    /// First unclaimed call ringing or waiting on the device
    fn ringing_channel(&self, device: &Device) -> Option<Arc<Channel>> {
        device
            .line_devices()
            .iter()
            .flat_map(|ld| ld.line().channels())
            .find(|c| {
                matches!(c.state(), ChannelState::Ringing | ChannelState::CallWaiting)
                    && c.is_presented_to(device.id())
                    && self.claimed_device(c).is_none()
            })
    }

    /// First call another device has up on a line shared with this one
    fn remote_call(&self, device: &Device) -> Option<Arc<Channel>> {
        device
            .line_devices()
            .iter()
            .flat_map(|ld| ld.line().channels())
            .find(|c| {
                c.state() == ChannelState::Connected
                    && self.claimed_device(c).is_some_and(|owner| owner.id() != device.id())
            })
    }

    async fn softkey(
        &self,
        device: &Arc<Device>,
        key: Softkey,
        line_instance: Option<u16>,
        call_id: Option<CallId>,
    ) -> Result<()> {
        let target = || {
            call_id
                .and_then(|id| self.channel(id))
                .or_else(|| self.active_channel(device))
                .ok_or_else(|| SccpError::ChannelNotFound(format!("softkey {:?} on {}", key, device.id())))
        };
        match key {
            Softkey::NewCall => {
                let line = self.line_for(device, line_instance)?;
                self.new_call(&line, device, None).await.map(|_| ())
            }
            Softkey::Hold => self.hold(&target()?, Some(device), HoldReason::Normal),
            Softkey::Resume => self.resume(&target()?, Some(device), true),
            Softkey::Transfer => self.transfer(&target()?, device).await,
            Softkey::Conference => self.conference(&target()?, device).await,
            Softkey::EndCall => {
                self.end_call(&target()?);
                Ok(())
            }
            Softkey::Answer => {
                let channel = match call_id.and_then(|id| self.channel(id)) {
                    Some(channel) => channel,
                    None => self
                        .ringing_channel(device)
                        .ok_or_else(|| SccpError::ChannelNotFound(format!("ringing call on {}", device.id())))?,
                };
                self.answer(&channel, device)
            }
            Softkey::Pickup => {
                let line = self.line_for(device, line_instance)?;
                self.pickup(&line, device).await.map(|_| ())
            }
            Softkey::Barge => {
                let channel = match call_id.and_then(|id| self.channel(id)) {
                    Some(channel) => channel,
                    None => self
                        .remote_call(device)
                        .ok_or_else(|| SccpError::ChannelNotFound(format!("call to barge on {}", device.id())))?,
                };
                self.barge(&channel, device).await.map(|_| ())
            }
            Softkey::Dnd => {
                let next = match device.dnd() {
                    DndMode::Off => DndMode::Reject,
                    DndMode::Reject => DndMode::Silent,
                    DndMode::Silent => DndMode::Off,
                };
                self.set_dnd(device, next);
                Ok(())
            }
        }
    }
}
