//! Interfaces to the systems around the call-control core
//!
//! The core never encodes wire messages, routes calls, moves RTP or mixes
//! audio itself. It talks to those systems through the traits below; one
//! implementation of each is injected into the [`SccpContext`](crate::SccpContext).

pub mod conference;
pub mod media;
pub mod presence;
pub mod routing;
pub mod transport;

use std::sync::Arc;

pub use conference::ConferenceMixer;
pub use media::{best_joint_codec, MediaEngine};
pub use presence::{PresenceEngine, PresenceState};
pub use routing::{ControlSignal, RoutingEngine};
pub use transport::{BlfStatus, DeviceMessage, DeviceTransport, SpeakerMode};

/// Bundle of every external collaborator
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn DeviceTransport>,
    pub routing: Arc<dyn RoutingEngine>,
    pub media: Arc<dyn MediaEngine>,
    pub mixer: Arc<dyn ConferenceMixer>,
    pub presence: Arc<dyn PresenceEngine>,
}
