//! Replication of state changes to the other devices of a shared line

use std::sync::Arc;
use tracing::debug;

use super::{remote_directives, DirectiveTarget, RemoteInput};
use crate::channel::Channel;
use crate::context::SccpContext;
use crate::device::Device;
use crate::line::Line;
use crate::types::{CallVisibility, ChannelState};

impl SccpContext {
    pub(crate) fn propagate(&self, origin: &Arc<Device>, channel: &Arc<Channel>, line: &Arc<Line>, state: ChannelState) {
        if self.is_hotline(line) {
            return;
        }
        let data = channel.snapshot();
        let visibility = if data.private {
            CallVisibility::Hidden
        } else {
            CallVisibility::Default
        };
        let input = RemoteInput {
            answered_elsewhere: data.answered_elsewhere,
            visibility,
            hold_reason: data.hold_reason,
        };
        let call_info = if data.private {
            data.call_info.hidden()
        } else {
            data.call_info.clone()
        };
        let directives = remote_directives(state, &input);
        if directives.is_empty() {
            return;
        }

        for line_device in line.line_devices() {
            let remote = line_device.device();
            if remote.id() == origin.id() || !remote.is_registered() {
                continue;
            }
            if self.already_on_call(remote, channel) {
                debug!("{}: already part of call {}, skipping remote {}", remote.id(), channel.call_id(), state);
                continue;
            }
            debug!("{}: remote {} for call {}", remote.id(), state, channel.call_id());
            let target = DirectiveTarget {
                device: remote,
                line_instance: line_device.line_instance(),
                channel,
                call_type: data.call_type,
                call_info: call_info.clone(),
            };
            for directive in &directives {
                self.execute_directive(&target, directive);
            }
        }
    }

    /// The remote's active channel belongs to the same logical call: the same
    /// channel, the same conference, or the same routing correlation id
    fn already_on_call(&self, remote: &Device, channel: &Channel) -> bool {
        let Some(active) = self.active_channel(remote) else {
            return false;
        };
        if active.handle() == channel.handle() {
            return true;
        }
        let same_conference = matches!(
            (active.conference(), channel.conference()),
            (Some(a), Some(b)) if a == b
        );
        let same_linked_id = matches!(
            (active.linked_id(), channel.linked_id()),
            (Some(a), Some(b)) if a == b
        );
        same_conference || same_linked_id
    }
}
