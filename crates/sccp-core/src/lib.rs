//! Skinny (SCCP) call-control core for the rvoip stack
//!
//! This crate keeps the live model of registered phones, the lines they share
//! and the calls in progress. Every channel state change goes through
//! [`SccpContext::indicate`], which updates the phone, mirrors the change on
//! the other phones of a shared line and refreshes the line's BLF/presence
//! hint. Wire encoding, call routing, media and conference mixing are
//! collaborators reached through the traits in [`collaborators`].

// Error handling, configuration and logging
pub mod errors;
pub mod config;
pub mod logging;

// Value types and ownership primitives
pub mod types;
pub mod refcount;

// Entities
pub mod line;
pub mod device;
pub mod line_device;
pub mod channel;
pub mod claim;

// Call control
pub mod indicate;
pub mod hint;
pub mod conference;
pub mod dispatcher;

// Runtime services
pub mod scheduler;
pub mod threadpool;
pub mod events;

// External interfaces
pub mod collaborators;

pub mod context;
pub mod testing;

// Re-export commonly used types
pub use channel::{CallIdGenerator, Channel, ChannelData};
pub use collaborators::{
    BlfStatus, Collaborators, ConferenceMixer, ControlSignal, DeviceMessage, DeviceTransport, MediaEngine,
    PresenceEngine, PresenceState, RoutingEngine, SpeakerMode,
};
pub use config::{DeviceConfig, LineConfig, SccpConfig, SubscriptionConfig, ThreadPoolConfig};
pub use context::SccpContext;
pub use device::{Device, TransferPair};
pub use dispatcher::{DeviceEvent, Softkey};
pub use errors::{Result, SccpError};
pub use events::{Feature, SccpEvent, SccpEventHandler};
pub use hint::{HintCaller, HintDistributor, LineState};
pub use line::Line;
pub use line_device::{subscription_matches, CallForwardType, LineDevice, SubscriptionId};
pub use logging::{setup_logging, LoggingConfig};
pub use types::{CallId, CallInfo, ChannelState, DeviceId, DndMode, HoldReason, Party, SessionHandle};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        CallId, Channel, ChannelState, Collaborators, Device, DeviceEvent, DeviceId, Line, Result, SccpConfig,
        SccpContext, SccpError, SessionHandle,
    };
}
