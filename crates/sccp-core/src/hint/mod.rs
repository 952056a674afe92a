//! Line-state aggregation for BLF buttons and presence
//!
//! Every line with attached devices has one [`LineState`] record summarising
//! its channels. When the summary changes it is pushed to the speed-dial
//! buttons subscribed to the line and to the presence engine; a change of
//! caller information alone only refreshes the buttons.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::collaborators::{BlfStatus, DeviceMessage, PresenceState};
use crate::context::SccpContext;
use crate::device::Device;
use crate::line::Line;
use crate::types::{CallType, ChannelState, DeviceId, DndMode, StateGroup};

/// Caller shown next to a line's aggregate state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintCaller {
    pub name: String,
    pub number: String,
}

impl HintCaller {
    fn new(name: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            number: number.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineState {
    pub line: String,
    pub state: ChannelState,
    pub previous_state: ChannelState,
    pub caller: HintCaller,
}

/// A speed-dial button watching a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintSubscription {
    pub device: DeviceId,
    pub instance: u16,
    pub label: String,
    pub line: String,
}

/// What a recomputation has to publish
enum Publish {
    Nothing,
    ButtonsOnly(LineState),
    Everything(LineState),
}

#[derive(Default)]
pub struct HintDistributor {
    line_states: RwLock<HashMap<String, LineState>>,
    subscriptions: RwLock<Vec<HintSubscription>>,
}

/// BLF lamp shown for an aggregate line state
pub fn blf_status(state: ChannelState) -> BlfStatus {
    match state {
        ChannelState::OnHook => BlfStatus::Idle,
        ChannelState::Ringing => BlfStatus::Alerting,
        ChannelState::Dnd => BlfStatus::Dnd,
        ChannelState::Down | ChannelState::Congestion | ChannelState::Zombie => BlfStatus::Unknown,
        _ => BlfStatus::InUse,
    }
}

impl HintDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate state and caller of a line from its devices and channels
    pub fn compute(line: &Line) -> (ChannelState, HintCaller) {
        let line_devices = line.line_devices();
        if line_devices.is_empty() {
            return (ChannelState::Congestion, HintCaller::default());
        }
        // one device decides alone; on a shared line every device must reject
        if line_devices.iter().all(|ld| ld.device().dnd() == DndMode::Reject) {
            return (ChannelState::Dnd, HintCaller::new("DND", "DND"));
        }

        let channels = line.channels();
        match channels.as_slice() {
            [] => (ChannelState::OnHook, HintCaller::default()),
            [channel] => {
                let data = channel.snapshot();
                if data.state.group() == StateGroup::Idle {
                    return (ChannelState::OnHook, HintCaller::default());
                }
                let caller = if data.private {
                    HintCaller::default()
                } else if data.call_type == CallType::Forward {
                    HintCaller::new("cfwd", "cfwd")
                } else {
                    let party = match data.call_type {
                        CallType::Outbound => &data.call_info.called,
                        _ => &data.call_info.calling,
                    };
                    HintCaller::new(
                        party.name.clone().unwrap_or_default(),
                        party.number.clone().unwrap_or_default(),
                    )
                };
                (data.state, caller)
            }
            _ => (ChannelState::Connected, HintCaller::default()),
        }
    }

    /// Re-derive the record of `line` and publish what changed
    pub(crate) fn line_status_changed(&self, ctx: &SccpContext, line: &Line) {
        let (state, caller) = Self::compute(line);
        let devices = line.device_count();
        let channels = line.channel_count();

        let publish = {
            let mut states = self.line_states.write();
            let publish = match states.get_mut(line.name()) {
                None if devices == 0 => Publish::Nothing,
                None => {
                    let record = LineState {
                        line: line.name().to_string(),
                        state,
                        previous_state: ChannelState::OnHook,
                        caller,
                    };
                    states.insert(line.name().to_string(), record.clone());
                    Publish::Everything(record)
                }
                Some(record) if record.state != state => {
                    record.previous_state = record.state;
                    record.state = state;
                    record.caller = caller;
                    Publish::Everything(record.clone())
                }
                Some(record) if record.caller != caller => {
                    record.caller = caller;
                    Publish::ButtonsOnly(record.clone())
                }
                Some(_) => Publish::Nothing,
            };
            if devices == 0 && channels == 0 && states.remove(line.name()).is_some() {
                debug!("{}: hint record removed", line.name());
            }
            publish
        };

        match publish {
            Publish::Nothing => trace!("{}: hint unchanged", line.name()),
            Publish::ButtonsOnly(record) => self.notify_buttons(ctx, &record),
            Publish::Everything(record) => {
                debug!(
                    "{}: hint {} -> {}",
                    line.name(),
                    record.previous_state,
                    record.state
                );
                self.notify_buttons(ctx, &record);
                ctx.collaborators().presence.publish_device_state(
                    &format!("SCCP/{}", record.line),
                    PresenceState::from(record.state),
                    &record.caller.name,
                    &record.caller.number,
                );
            }
        }
    }

    /// Feature toggles change the derived state of every line of a device
    pub(crate) fn feature_changed(&self, ctx: &SccpContext, device: &Device) {
        for line_device in device.line_devices() {
            self.line_status_changed(ctx, line_device.line());
        }
    }

    fn notify_buttons(&self, ctx: &SccpContext, record: &LineState) {
        let subscribers: Vec<HintSubscription> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.line == record.line)
            .cloned()
            .collect();
        for subscription in subscribers {
            if let Some(device) = ctx.device(&subscription.device) {
                Self::send_status(ctx, &device, &subscription, record.state, &record.caller);
            }
        }
    }

    fn send_status(ctx: &SccpContext, device: &Device, subscription: &HintSubscription, state: ChannelState, caller: &HintCaller) {
        let label = if caller.name.is_empty() || state == ChannelState::OnHook {
            subscription.label.clone()
        } else {
            format!("{}: {}", subscription.label, caller.name)
        };
        ctx.send(
            device,
            DeviceMessage::FeatureStatus {
                instance: subscription.instance,
                status: blf_status(state),
                label,
            },
        );
    }

    /// Watch `line` from a speed-dial button; the current state is sent at once
    pub(crate) fn subscribe(&self, ctx: &SccpContext, device: &Device, instance: u16, label: &str, line: &str) {
        let subscription = HintSubscription {
            device: device.id().clone(),
            instance,
            label: label.to_string(),
            line: line.to_string(),
        };
        {
            let mut subscriptions = self.subscriptions.write();
            subscriptions.retain(|s| !(s.device == subscription.device && s.instance == instance));
            subscriptions.push(subscription.clone());
        }
        debug!("{}: button {} watches line {}", device.id(), instance, line);

        let current = self
            .line_state(line)
            .map(|r| (r.state, r.caller))
            .or_else(|| ctx.line(line).map(|l| Self::compute(&l)))
            .unwrap_or((ChannelState::Congestion, HintCaller::default()));
        Self::send_status(ctx, device, &subscription, current.0, &current.1);
    }

    pub(crate) fn unsubscribe_device(&self, device: &DeviceId) {
        self.subscriptions.write().retain(|s| &s.device != device);
    }

    pub fn line_state(&self, line: &str) -> Option<LineState> {
        self.line_states.read().get(line).cloned()
    }

    pub fn subscriptions(&self) -> Vec<HintSubscription> {
        self.subscriptions.read().clone()
    }

    pub(crate) fn clear(&self) {
        self.line_states.write().clear();
        self.subscriptions.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::config::{DeviceConfig, LineConfig};
    use crate::line_device::LineDevice;
    use crate::refcount::Handle;
    use crate::types::{CallId, CodecSets, Party, RingerMode};
    use std::sync::Arc;

    fn attach(line: &Arc<Line>, id: &str) -> Arc<Device> {
        let device = Arc::new(Device::new(DeviceConfig::new(id)));
        let line_device = Arc::new(LineDevice::new(line.clone(), device.clone(), 1, None));
        line.add_line_device(line_device.clone());
        device.add_line_device(line_device);
        device
    }

    #[test]
    fn test_line_without_devices_is_unavailable() {
        let line = Line::new(LineConfig::new("100"));
        let (state, caller) = HintDistributor::compute(&line);
        assert_eq!(state, ChannelState::Congestion);
        assert_eq!(PresenceState::from(state), PresenceState::Unavailable);
        assert_eq!(caller, HintCaller::default());
    }

    #[test]
    fn test_idle_line_is_onhook() {
        let line = Arc::new(Line::new(LineConfig::new("100")));
        let _device = attach(&line, "SEP0001");
        assert_eq!(HintDistributor::compute(&line).0, ChannelState::OnHook);
    }

    #[test]
    fn test_single_device_dnd_reject_overrides() {
        let line = Arc::new(Line::new(LineConfig::new("100")));
        let device = attach(&line, "SEP0001");
        device.set_dnd(DndMode::Reject);
        let (state, caller) = HintDistributor::compute(&line);
        assert_eq!(state, ChannelState::Dnd);
        assert_eq!(caller, HintCaller::new("DND", "DND"));
    }

    #[test]
    fn test_shared_line_dnd_needs_every_device() {
        let line = Arc::new(Line::new(LineConfig::new("100")));
        let first = attach(&line, "SEP0001");
        let second = attach(&line, "SEP0002");
        first.set_dnd(DndMode::Reject);
        assert_eq!(HintDistributor::compute(&line).0, ChannelState::OnHook);
        second.set_dnd(DndMode::Reject);
        assert_eq!(HintDistributor::compute(&line).0, ChannelState::Dnd);
    }

    #[test]
    fn test_silent_dnd_does_not_mark_line() {
        let line = Arc::new(Line::new(LineConfig::new("100")));
        let device = attach(&line, "SEP0001");
        device.set_dnd(DndMode::Silent);
        assert_eq!(HintDistributor::compute(&line).0, ChannelState::OnHook);
    }

    fn ringing_channel(line: &Arc<Line>, call_type: CallType, private: bool) -> Arc<Channel> {
        let channel = Arc::new(Channel::new(
            Handle::from_raw(1, 0),
            CallId(1),
            line.clone(),
            RingerMode::Outside,
            CodecSets::default(),
        ));
        channel.with_data_mut(|d| {
            d.state = ChannelState::RingOut;
            d.call_type = call_type;
            d.private = private;
            d.call_info.calling = Party::new("Bob", "555");
            d.call_info.called = Party::new("Carol", "8000");
        });
        line.add_channel(channel.clone());
        channel
    }

    #[test]
    fn test_single_call_caller_by_direction() {
        let line = Arc::new(Line::new(LineConfig::new("100")));
        let _device = attach(&line, "SEP0001");
        let _channel = ringing_channel(&line, CallType::Outbound, false);
        let (state, caller) = HintDistributor::compute(&line);
        assert_eq!(state, ChannelState::RingOut);
        assert_eq!(caller, HintCaller::new("Carol", "8000"));
    }

    #[test]
    fn test_forward_and_private_callers() {
        let line = Arc::new(Line::new(LineConfig::new("100")));
        let _device = attach(&line, "SEP0001");
        let forward = ringing_channel(&line, CallType::Forward, false);
        assert_eq!(HintDistributor::compute(&line).1, HintCaller::new("cfwd", "cfwd"));

        forward.with_data_mut(|d| d.private = true);
        assert_eq!(HintDistributor::compute(&line).1, HintCaller::default());
    }

    #[test]
    fn test_blf_mapping() {
        assert_eq!(blf_status(ChannelState::OnHook), BlfStatus::Idle);
        assert_eq!(blf_status(ChannelState::Ringing), BlfStatus::Alerting);
        assert_eq!(blf_status(ChannelState::Dnd), BlfStatus::Dnd);
        assert_eq!(blf_status(ChannelState::Congestion), BlfStatus::Unknown);
        assert_eq!(blf_status(ChannelState::Down), BlfStatus::Unknown);
        assert_eq!(blf_status(ChannelState::Connected), BlfStatus::InUse);
        assert_eq!(blf_status(ChannelState::Hold), BlfStatus::InUse);
    }
}
