//! Group pickup of calls ringing on other lines

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::Channel;
use crate::context::SccpContext;
use crate::device::Device;
use crate::errors::{Result, SccpError};
use crate::line::Line;
use crate::types::{CallType, ChannelState};

impl SccpContext {
    /// Answer on `device` a call ringing on any line of the pickup group of
    /// `line`.
    ///
    /// A call ringing on one of the device's own lines is simply answered.
    /// One on a foreign line is moved by the routing engine onto a new
    /// channel here, and the original stops ringing as answered elsewhere.
    pub async fn pickup(&self, line: &Arc<Line>, device: &Arc<Device>) -> Result<Arc<Channel>> {
        let Some(group) = line.config().pickup_group.clone() else {
            debug!("{}: no pickup group on {}", device.id(), line.name());
            return Err(SccpError::FeatureDisabled("pickup".to_string()));
        };
        let target = self
            .lines()
            .into_iter()
            .filter(|l| l.config().pickup_group.as_deref() == Some(group.as_str()))
            .flat_map(|l| l.channels())
            .find(|c| c.state() == ChannelState::Ringing && self.claimed_device(c).is_none())
            .ok_or_else(|| SccpError::ChannelNotFound(format!("ringing call in pickup group {}", group)))?;

        if device.line_device(target.line().name()).is_some() {
            self.answer(&target, device)?;
            return Ok(target);
        }
        info!(
            "{}: picking up {} from line {}",
            device.id(),
            target.call_id(),
            target.line().name()
        );
        if let Some(active) = self.active_channel(device) {
            self.hold_or_end(device, &active);
        }

        let channel = self.allocate_channel(line, Some(device))?;
        let target_info = target.call_info();
        let linked_id = target.linked_id();
        channel.with_data_mut(|d| {
            d.call_type = CallType::Inbound;
            d.call_info.calling = target_info.calling;
            d.call_info.original_called = target_info.called;
            d.call_info.called = line.caller_id();
            d.linked_id = linked_id;
        });

        let routing = &self.collaborators().routing;
        let picked = match routing
            .allocate_call_leg(channel.call_id(), line.name(), &line.config().context)
            .await
        {
            Ok(leg) => {
                channel.with_data_mut(|d| d.leg = Some(leg));
                routing.pickup(channel.call_id(), target.call_id()).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = picked {
            warn!("{}: pickup of {} failed: {}", device.id(), target.call_id(), e);
            self.indicate(Some(device), &channel, ChannelState::Congestion);
            self.schedule_hangup(&channel);
            return Err(SccpError::collaborator("routing engine", e));
        }

        target.with_data_mut(|d| d.answered_elsewhere = true);
        self.end_call(&target);
        self.indicate(Some(device), &channel, ChannelState::OffHook);
        self.indicate(Some(device), &channel, ChannelState::Connected);
        device.statistics().answered();
        Ok(channel)
    }
}
