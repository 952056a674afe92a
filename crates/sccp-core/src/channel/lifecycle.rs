//! Allocation, claiming and teardown of channels

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::Channel;
use crate::collaborators::ControlSignal;
use crate::context::SccpContext;
use crate::device::Device;
use crate::errors::{Result, SccpError};
use crate::events::SccpEvent;
use crate::line::Line;
use crate::line_device::{CallForwardType, LineDevice, SubscriptionId};
use crate::types::{CallType, ChannelState, DndMode, Party};

impl SccpContext {
    /// Create a channel on `line`, optionally claimed by `device`.
    ///
    /// Codec sets are taken from the device, then the line, then the global
    /// configuration, whichever is first non-empty.
    pub fn allocate_channel(&self, line: &Arc<Line>, device: Option<&Arc<Device>>) -> Result<Arc<Channel>> {
        if !self.is_running() {
            return Err(SccpError::ShuttingDown);
        }
        if !line.has_context() {
            warn!("{}: line has no dialplan context", line.name());
            return Err(SccpError::InvalidContext(line.name().to_string()));
        }
        if line.device_count() == 0 {
            debug!("{}: no devices attached, refusing channel", line.name());
            return Err(SccpError::NoDevices(line.name().to_string()));
        }
        if let Some(device) = device {
            if !device.is_registered() {
                return Err(SccpError::NoSession(device.id().clone()));
            }
        }

        let codecs = [device.map(|d| d.codecs()), Some(line.codecs())]
            .into_iter()
            .flatten()
            .find(|c| !c.is_empty())
            .unwrap_or_else(|| self.global_codecs());
        let ringer_mode = self.config().ringer_mode;
        let channel = self.register_channel(|handle, call_id| Channel::new(handle, call_id, line.clone(), ringer_mode, codecs));
        line.add_channel(channel.clone());
        info!("{}: allocated channel {}", line.name(), channel.call_id());

        if let Some(device) = device {
            self.claim_device(&channel, Some(device));
        }
        self.fire_event(SccpEvent::LineStatusChanged {
            line: line.name().to_string(),
            device: device.map(|d| d.id().clone()),
            state: ChannelState::Down,
        });
        Ok(channel)
    }

    /// Point the channel's claim at `device`, or clear it with `None`.
    ///
    /// Claiming displaces whatever the device had active and whatever device
    /// held the channel before; both sides change under one lock.
    pub fn claim_device(&self, channel: &Arc<Channel>, device: Option<&Arc<Device>>) -> bool {
        let Some(device) = device else {
            if let Some(previous) = self.claims().release_channel(channel.handle()) {
                debug!("{}: released claim on {}", previous, channel.call_id());
            }
            return true;
        };
        let Some(line_device) = device.line_device(channel.line().name()) else {
            debug!("{}: not attached to {}, cannot claim {}", device.id(), channel.line().name(), channel.call_id());
            return false;
        };

        let change = self.claims().claim(channel.handle(), device.id());
        if let Some(displaced) = change.displaced_channel {
            debug!("{}: claim of {} displaces {:?}", device.id(), channel.call_id(), displaced);
        }
        let device_codecs = device.codecs();
        channel.with_data_mut(|d| {
            d.line_instance = Some(line_device.line_instance());
            d.last_device = Some(device.id().clone());
            if !device_codecs.is_empty() {
                d.codecs = device_codecs;
            }
        });
        true
    }

    /// Hang up a channel and everything hanging off it. Idempotent.
    pub fn end_call(&self, channel: &Arc<Channel>) {
        if channel.is_destroyed() {
            return;
        }
        let first = channel.with_data_mut(|d| !std::mem::replace(&mut d.hangup_requested, true));
        if !first {
            debug!("{}: hangup already requested", channel.call_id());
            return;
        }
        info!("{}: end call {}", channel.line().name(), channel.call_id());

        for task in channel.take_scheduled_tasks() {
            task.cancel();
        }
        for child in channel.line().children_of(channel.handle()) {
            debug!("{}: ending forwarded child {}", channel.call_id(), child.call_id());
            self.end_call(&child);
        }
        self.release_transfer(channel);
        if channel.conference().is_some() {
            self.conference_remove(channel);
        }
        if channel.snapshot().leg.is_some() {
            self.collaborators().routing.request_hangup(channel.call_id());
        }
        self.destroy_channel(channel);
    }

    /// Drop any transfer pairing that involves the channel. A held transferee
    /// whose consultation call goes away is shown as plain hold again.
    fn release_transfer(&self, channel: &Arc<Channel>) {
        let Some(device) = self.device_of(channel) else {
            return;
        };
        let Some(pair) = device.clear_transfer_if(channel.handle()) else {
            return;
        };
        if pair.transferee == channel.handle() {
            return;
        }
        if let Some(transferee) = self.retain_channel(pair.transferee) {
            if transferee.state() == ChannelState::CallTransfer {
                debug!("{}: transfer abandoned, {} back on hold", device.id(), transferee.call_id());
                self.indicate(Some(&device), &transferee, ChannelState::Hold);
            }
        }
    }

    fn destroy_channel(&self, channel: &Arc<Channel>) {
        if !channel.begin_destroy() {
            return;
        }
        let line = channel.line().clone();
        let state = channel.state();
        let device = self.device_of(channel);

        if let Some(device) = device.as_ref() {
            if state != ChannelState::Down {
                self.indicate(Some(device), channel, ChannelState::OnHook);
            }
            if let Some(conference) = channel.conference() {
                device.clear_conference_if(&conference);
            }
        } else if state != ChannelState::Down {
            self.withdraw_presentation(channel);
        }
        self.close_media(device.as_deref(), channel);
        self.claims().release_channel(channel.handle());
        if line.remove_channel(channel.call_id()).is_some() && state.is_resumable() {
            line.statistics().unheld();
        }
        self.unregister_channel(channel);
        debug!("{}: channel {} destroyed", line.name(), channel.call_id());

        self.fire_event(SccpEvent::LineStatusChanged {
            line: line.name().to_string(),
            device: device.map(|d| d.id().clone()),
            state: ChannelState::Down,
        });
    }

    /// Stop an unanswered call ringing on every device it was offered to
    fn withdraw_presentation(&self, channel: &Arc<Channel>) {
        let presented = channel.with_data_mut(|d| std::mem::take(&mut d.presented_on));
        let previous = channel.transition(ChannelState::Down);
        self.collaborators()
            .routing
            .set_call_state(channel.call_id(), ChannelState::Down);
        for id in presented {
            let Some(device) = self.device(&id).filter(|d| d.is_registered()) else {
                continue;
            };
            let Some(line_device) = device.line_device(channel.line().name()) else {
                continue;
            };
            debug!("{}: withdrawing {} from {}", channel.line().name(), channel.call_id(), id);
            self.present(&device, &line_device, channel, previous, ChannelState::OnHook);
        }
    }

    /// Claiming device, or the one that last held the channel
    pub(crate) fn device_of(&self, channel: &Channel) -> Option<Arc<Device>> {
        self.claimed_device(channel)
            .or_else(|| channel.last_device().and_then(|id| self.device(&id)))
    }

    /// Off-hook on `device`: allocate an outbound channel, request a routing
    /// leg and, when `dial` is given, start dialing it right away.
    ///
    /// Any call already active on the device is put on hold first, or ended
    /// when it cannot be held.
    pub async fn new_call(&self, line: &Arc<Line>, device: &Arc<Device>, dial: Option<&str>) -> Result<Arc<Channel>> {
        if let Some(active) = self.active_channel(device) {
            self.hold_or_end(device, &active);
        }
        let channel = self.allocate_channel(line, Some(device))?;
        let privacy = device.privacy();
        channel.with_data_mut(|d| {
            d.call_type = CallType::Outbound;
            d.call_info.calling = line.caller_id();
            d.private = privacy;
        });

        let leg = match self
            .collaborators()
            .routing
            .allocate_call_leg(channel.call_id(), line.name(), &line.config().context)
            .await
        {
            Ok(leg) => leg,
            Err(e) => {
                warn!("{}: routing refused leg for {}: {}", device.id(), channel.call_id(), e);
                self.end_call(&channel);
                return Err(SccpError::collaborator("routing engine", e));
            }
        };
        channel.with_data_mut(|d| d.leg = Some(leg));
        device.statistics().placed();
        self.indicate(Some(device), &channel, ChannelState::OffHook);

        if let Some(number) = dial.filter(|n| !n.is_empty()) {
            channel.with_data_mut(|d| d.dialed_number = number.to_string());
            self.dial(&channel).await?;
        }
        Ok(channel)
    }

    /// Present a call arriving from the routing engine on every device of
    /// the line. Devices with an unconditional forward redirect it instead,
    /// and idle devices in reject-mode DND are skipped.
    pub async fn incoming_call(&self, line_name: &str, calling: Party) -> Result<Arc<Channel>> {
        self.incoming_call_for(line_name, calling, None).await
    }

    /// Like [`incoming_call`](Self::incoming_call) for a call addressed to
    /// one subscription of a shared line. Only devices whose subscription
    /// matches are offered the call.
    pub async fn incoming_call_for(
        &self,
        line_name: &str,
        calling: Party,
        subscription: Option<SubscriptionId>,
    ) -> Result<Arc<Channel>> {
        let line = self
            .line(line_name)
            .ok_or_else(|| SccpError::LineNotFound(line_name.to_string()))?;
        let channel = self.allocate_channel(&line, None)?;
        let subscription = subscription.filter(|s| !s.number.is_empty());
        channel.with_data_mut(|d| {
            d.call_type = CallType::Inbound;
            d.call_info.calling = calling;
            d.call_info.called = line.caller_id();
            d.subscription = subscription.clone();
        });

        let mut forwarded = 0;
        let mut targets = Vec::new();
        for line_device in line.line_devices() {
            let device = line_device.device();
            if !device.is_registered() {
                continue;
            }
            if !line_device.accepts(subscription.as_ref()) {
                debug!("{}: subscription does not match {}", device.id(), channel.call_id());
                continue;
            }
            let busy = self.active_channel(device).is_some();
            let forward = line_device
                .forward_target(CallForwardType::All)
                .or_else(|| busy.then(|| line_device.forward_target(CallForwardType::Busy)).flatten());
            if let Some(target) = forward {
                match self.forward(&channel, &line_device, &target).await {
                    Ok(_) => forwarded += 1,
                    Err(e) => warn!("{}: forward to {} failed: {}", device.id(), target, e),
                }
                continue;
            }
            if busy {
                targets.push((line_device, ChannelState::CallWaiting));
            } else if device.dnd() == DndMode::Reject {
                debug!("{}: DND reject, not presenting {}", device.id(), channel.call_id());
            } else {
                targets.push((line_device, ChannelState::Ringing));
            }
        }

        if targets.is_empty() && forwarded == 0 {
            info!("{}: nobody available for {}", line.name(), channel.call_id());
            self.collaborators().routing.queue_control(channel.call_id(), ControlSignal::Busy);
            self.end_call(&channel);
            return Err(SccpError::LineBusy(line.name().to_string()));
        }
        if !targets.is_empty() {
            self.ring(&channel, &targets);
        }
        self.collaborators().routing.queue_control(channel.call_id(), ControlSignal::Ringing);
        Ok(channel)
    }

    /// Move the channel to RINGING once, then show it on each target: as
    /// ringing on idle phones and as a waiting call on busy ones
    fn ring(&self, channel: &Arc<Channel>, targets: &[(Arc<LineDevice>, ChannelState)]) {
        let line = channel.line();
        channel.with_data_mut(|d| {
            d.presented_on = targets.iter().map(|(ld, _)| ld.device().id().clone()).collect();
        });
        let previous = channel.transition(ChannelState::Ringing);
        self.collaborators()
            .routing
            .set_call_state(channel.call_id(), ChannelState::Ringing);
        for (line_device, state) in targets {
            info!(
                "{}: Indicate {} -> {} on call {}-{}",
                line_device.device().id(),
                previous,
                state,
                line.name(),
                channel.call_id()
            );
            self.present(line_device.device(), line_device, channel, previous, *state);
        }
        self.fire_event(SccpEvent::LineStatusChanged {
            line: line.name().to_string(),
            device: None,
            state: ChannelState::Ringing,
        });
    }

    /// State change reported by the routing engine for the far end of a call
    pub fn remote_indication(&self, call_id: crate::types::CallId, state: ChannelState) {
        let Some(channel) = self.channel(call_id) else {
            debug!("{}: remote {} for unknown channel", call_id, state);
            return;
        };
        match state {
            ChannelState::Down | ChannelState::OnHook => self.end_call(&channel),
            ChannelState::Busy | ChannelState::Congestion | ChannelState::InvalidNumber => {
                self.indicate(None, &channel, state);
                self.schedule_hangup(&channel);
            }
            ChannelState::Connected => {
                if let Some(parent) = channel.parent().and_then(|h| self.retain_channel(h)) {
                    // forwarded leg picked up: the original stops ringing
                    channel.with_data_mut(|d| d.parent = None);
                    parent.with_data_mut(|d| d.answered_elsewhere = true);
                    self.end_call(&parent);
                }
                self.indicate(None, &channel, state);
            }
            _ => {
                self.indicate(None, &channel, state);
            }
        }
    }

    /// End the channel after the configured hangup delay
    pub fn schedule_hangup(&self, channel: &Arc<Channel>) {
        let Some(context) = self.strong_self() else {
            return;
        };
        let weak = Arc::downgrade(&context);
        let handle = channel.handle();
        let task = self
            .scheduler()
            .schedule_after("hangup", self.config().hangup_delay(), async move {
                let Some(context) = weak.upgrade() else {
                    return;
                };
                if let Some(channel) = context.retain_channel(handle) {
                    context.end_call(&channel);
                }
            });
        match task {
            Ok(task) => channel.with_data_mut(|d| {
                if let Some(old) = d.hangup_timeout.replace(task) {
                    old.cancel();
                }
            }),
            Err(e) => {
                warn!("{}: cannot schedule hangup ({}), ending now", channel.call_id(), e);
                self.end_call(channel);
            }
        }
    }

    /// Make room on `device` for another call
    pub(crate) fn hold_or_end(&self, device: &Arc<Device>, active: &Arc<Channel>) {
        if active.state().is_holdable() {
            if let Err(e) = self.hold(active, Some(device), crate::types::HoldReason::Normal) {
                debug!("{}: hold of {} failed ({}), ending it", device.id(), active.call_id(), e);
                self.end_call(active);
            }
        } else {
            self.end_call(active);
        }
    }
}
