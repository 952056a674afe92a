//! Call forwarding

use std::sync::Arc;
use tracing::{info, warn};

use super::Channel;
use crate::context::SccpContext;
use crate::errors::{Result, SccpError};
use crate::line_device::LineDevice;
use crate::types::CallType;

impl SccpContext {
    /// Redirect `parent` to `target` through a new child channel on the same
    /// line. The child carries the caller's identity with the line as the
    /// redirecting party and is ended together with its parent.
    pub async fn forward(&self, parent: &Arc<Channel>, line_device: &LineDevice, target: &str) -> Result<Arc<Channel>> {
        let line = parent.line().clone();
        let child = self.allocate_channel(&line, None)?;
        let parent_data = parent.snapshot();
        let redirecting = line.caller_id();
        child.with_data_mut(|d| {
            d.parent = Some(parent.handle());
            d.call_type = CallType::Forward;
            d.dialed_number = target.to_string();
            d.codecs = parent_data.codecs.clone();
            d.linked_id = parent_data.linked_id.clone();
            d.call_info.calling = parent_data.call_info.calling.clone();
            d.call_info.original_called = parent_data.call_info.called.clone();
            d.call_info.last_redirecting = redirecting;
            d.call_info.called.number = Some(target.to_string());
        });
        info!(
            "{}: forwarding {} to {} via {}",
            line_device.device().id(),
            parent.call_id(),
            target,
            child.call_id()
        );

        let routing = &self.collaborators().routing;
        let dialed = match routing
            .allocate_call_leg(child.call_id(), line.name(), &line.config().context)
            .await
        {
            Ok(leg) => {
                child.with_data_mut(|d| d.leg = Some(leg));
                routing.begin_dial(child.call_id(), target).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = dialed {
            warn!("{}: forward of {} failed: {}", line.name(), parent.call_id(), e);
            child.with_data_mut(|d| d.parent = None);
            self.end_call(&child);
            return Err(SccpError::collaborator("routing engine", e));
        }
        Ok(child)
    }
}
