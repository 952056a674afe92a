//! Call-routing engine seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{CallId, ChannelState, LegId};

/// Control frames queued towards the routing engine side of a leg
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlSignal {
    Hold { music_class: String },
    Unhold,
    Ringing,
    Answer,
    Progress,
    Busy,
    Congestion,
    Digit(char),
}

/// The back-end that owns dialplans, trunks and bridging.
///
/// Queue-style calls (`queue_control`, `set_call_state`, `request_hangup`)
/// must not block; the async ones may wait on the engine.
#[async_trait]
pub trait RoutingEngine: Send + Sync {
    /// Create the engine-side leg for a new channel
    async fn allocate_call_leg(&self, call_id: CallId, line: &str, context: &str) -> anyhow::Result<LegId>;

    /// Start routing the digits collected on a channel
    async fn begin_dial(&self, call_id: CallId, number: &str) -> anyhow::Result<()>;

    /// Bridge the remote peers of `transferee` and `destination`
    async fn attended_transfer(&self, transferee: CallId, destination: CallId) -> anyhow::Result<()>;

    /// Move the caller of the ringing `target` onto `picker`
    async fn pickup(&self, picker: CallId, target: CallId) -> anyhow::Result<()>;

    fn queue_control(&self, call_id: CallId, signal: ControlSignal);

    fn set_call_state(&self, call_id: CallId, state: ChannelState);

    /// Leg the channel is currently bridged to, if any
    fn bridged_peer(&self, call_id: CallId) -> Option<LegId>;

    fn request_hangup(&self, call_id: CallId);
}
