//! Error types for the SCCP call-control core

use thiserror::Error;

use crate::types::{CallId, ChannelState, DeviceId};

/// Errors raised by line, device and channel operations.
///
/// Association errors (`LineNotFound`, `DeviceNotFound`, `NotClaimed`) are
/// expected under concurrent hangups and are logged at debug level by the
/// callers that swallow them.
#[derive(Debug, Error)]
pub enum SccpError {
    #[error("Line not found: {0}")]
    LineNotFound(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Line {0} has no attached devices")]
    NoDevices(String),

    #[error("Line {0} has no valid dialplan context")]
    InvalidContext(String),

    #[error("Line {0} is busy")]
    LineBusy(String),

    #[error("Device {0} has no active session")]
    NoSession(DeviceId),

    #[error("Channel {0} is not claimed by any device")]
    NotClaimed(CallId),

    #[error("Cannot {operation} channel {call_id} in state {state}")]
    InvalidState {
        operation: &'static str,
        call_id: CallId,
        state: ChannelState,
    },

    #[error("Feature disabled: {0}")]
    FeatureDisabled(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("{collaborator} failed: {source}")]
    Collaborator {
        collaborator: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shutting down")]
    ShuttingDown,
}

impl SccpError {
    pub fn invalid_state(operation: &'static str, call_id: CallId, state: ChannelState) -> Self {
        Self::InvalidState { operation, call_id, state }
    }

    pub fn collaborator(collaborator: &'static str, source: anyhow::Error) -> Self {
        Self::Collaborator { collaborator, source }
    }

    pub fn device_not_found(id: &DeviceId) -> Self {
        Self::DeviceNotFound(id.to_string())
    }

    /// True for the transient association errors that races produce
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LineNotFound(_) | Self::DeviceNotFound(_) | Self::ChannelNotFound(_) | Self::NotClaimed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SccpError>;
