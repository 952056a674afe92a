//! Internal notifications between the state machine, hints and embedders

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::types::{ChannelState, DeviceId};

/// Which device feature changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Dnd,
    Privacy,
    CallForward,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SccpEvent {
    DeviceRegistered {
        device: DeviceId,
    },
    DeviceUnregistered {
        device: DeviceId,
    },
    DeviceAttached {
        line: String,
        device: DeviceId,
    },
    DeviceDetached {
        line: String,
        device: DeviceId,
    },
    /// A channel on `line` changed state, or the line's channel set changed
    LineStatusChanged {
        line: String,
        device: Option<DeviceId>,
        state: ChannelState,
    },
    FeatureChanged {
        device: DeviceId,
        feature: Feature,
    },
}

impl SccpEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            SccpEvent::DeviceRegistered { .. } => "DeviceRegistered",
            SccpEvent::DeviceUnregistered { .. } => "DeviceUnregistered",
            SccpEvent::DeviceAttached { .. } => "DeviceAttached",
            SccpEvent::DeviceDetached { .. } => "DeviceDetached",
            SccpEvent::LineStatusChanged { .. } => "LineStatusChanged",
            SccpEvent::FeatureChanged { .. } => "FeatureChanged",
        }
    }
}

/// Observer of [`SccpEvent`]s. Called synchronously; must not block.
pub trait SccpEventHandler: Send + Sync {
    fn handle_event(&self, event: &SccpEvent);
}

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<(String, Arc<dyn SccpEventHandler>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, name: &str, handler: Arc<dyn SccpEventHandler>) {
        self.handlers.write().push((name.to_string(), handler));
    }

    pub fn remove_handler(&self, name: &str) -> bool {
        let mut handlers = self.handlers.write();
        if let Some(pos) = handlers.iter().position(|(n, _)| n == name) {
            handlers.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn publish(&self, event: &SccpEvent) {
        // Snapshot so handlers may (un)register while being called
        let handlers: Vec<Arc<dyn SccpEventHandler>> =
            self.handlers.read().iter().map(|(_, h)| h.clone()).collect();
        debug!("Publishing {} to {} handlers", event.type_name(), handlers.len());
        for handler in handlers {
            handler.handle_event(event);
        }
    }
}
