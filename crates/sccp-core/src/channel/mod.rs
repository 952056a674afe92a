//! Channel: one call leg, owned by a line and optionally claimed by a device
//!
//! The entity lives here; the operations that create, move and end channels
//! are implemented on [`SccpContext`](crate::SccpContext) in the submodules.

mod dial;
mod forward;
mod hold;
mod lifecycle;
mod pickup;
mod transfer;

pub(crate) use hold::KEY_NOT_ACTIVE;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::line::Line;
use crate::line_device::SubscriptionId;
use crate::refcount::{DestroyOnce, Handle};
use crate::scheduler::TaskHandle;
use crate::types::{
    CallId, CallInfo, CallPriority, CallType, ChannelMedia, ChannelState, CodecSets, ConferenceId, DeviceId,
    HoldReason, LegId, RingerMode,
};

/// Mutable state of a channel.
///
/// Written only through the context operations; `state` and
/// `previous_state` only through `indicate`.
#[derive(Debug, Clone)]
pub struct ChannelData {
    pub state: ChannelState,
    pub previous_state: ChannelState,
    pub call_type: CallType,
    pub dialed_number: String,
    pub call_info: CallInfo,
    pub ringer_mode: RingerMode,
    pub priority: CallPriority,
    pub hold_reason: HoldReason,
    /// Picked up on another device or by a forwarded sibling
    pub answered_elsewhere: bool,
    pub private: bool,
    pub hangup_requested: bool,
    /// Channel this one was forwarded from
    pub parent: Option<Handle<Channel>>,
    pub conference: Option<ConferenceId>,
    /// Routing-engine correlation id shared by every leg of one logical call
    pub linked_id: Option<String>,
    pub leg: Option<LegId>,
    pub codecs: CodecSets,
    pub media: ChannelMedia,
    pub line_instance: Option<u16>,
    /// Device that last claimed the channel; survives hold so resume knows where to go
    pub last_device: Option<DeviceId>,
    /// Subscription an inbound call is addressed to on a shared line
    pub subscription: Option<SubscriptionId>,
    /// Devices an unanswered inbound call is ringing on
    pub presented_on: Vec<DeviceId>,
    pub digit_timeout: Option<TaskHandle>,
    pub hangup_timeout: Option<TaskHandle>,
}

pub struct Channel {
    handle: Handle<Channel>,
    call_id: CallId,
    line: Arc<Line>,
    created_at: DateTime<Utc>,
    destroyed: DestroyOnce,
    data: RwLock<ChannelData>,
}

impl Channel {
    pub(crate) fn new(
        handle: Handle<Channel>,
        call_id: CallId,
        line: Arc<Line>,
        ringer_mode: RingerMode,
        codecs: CodecSets,
    ) -> Self {
        Self {
            handle,
            call_id,
            line,
            created_at: Utc::now(),
            destroyed: DestroyOnce::new(),
            data: RwLock::new(ChannelData {
                state: ChannelState::Down,
                previous_state: ChannelState::Down,
                call_type: CallType::Inbound,
                dialed_number: String::new(),
                call_info: CallInfo::default(),
                ringer_mode,
                priority: CallPriority::Normal,
                hold_reason: HoldReason::Normal,
                answered_elsewhere: false,
                private: false,
                hangup_requested: false,
                parent: None,
                conference: None,
                linked_id: None,
                leg: None,
                codecs,
                media: ChannelMedia::default(),
                line_instance: None,
                last_device: None,
                subscription: None,
                presented_on: Vec::new(),
                digit_timeout: None,
                hangup_timeout: None,
            }),
        }
    }

    pub fn handle(&self) -> Handle<Channel> {
        self.handle
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn passthru_party_id(&self) -> u32 {
        self.call_id.passthru_party_id()
    }

    pub fn line(&self) -> &Arc<Line> {
        &self.line
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Consistent copy of all mutable fields
    pub fn snapshot(&self) -> ChannelData {
        self.data.read().clone()
    }

    pub fn state(&self) -> ChannelState {
        self.data.read().state
    }

    pub fn previous_state(&self) -> ChannelState {
        self.data.read().previous_state
    }

    pub fn call_type(&self) -> CallType {
        self.data.read().call_type
    }

    pub fn call_info(&self) -> CallInfo {
        self.data.read().call_info.clone()
    }

    pub fn dialed_number(&self) -> String {
        self.data.read().dialed_number.clone()
    }

    pub fn is_private(&self) -> bool {
        self.data.read().private
    }

    pub fn parent(&self) -> Option<Handle<Channel>> {
        self.data.read().parent
    }

    pub fn conference(&self) -> Option<ConferenceId> {
        self.data.read().conference.clone()
    }

    pub fn linked_id(&self) -> Option<String> {
        self.data.read().linked_id.clone()
    }

    pub fn media(&self) -> ChannelMedia {
        self.data.read().media
    }

    pub fn codecs(&self) -> CodecSets {
        self.data.read().codecs.clone()
    }

    pub fn last_device(&self) -> Option<DeviceId> {
        self.data.read().last_device.clone()
    }

    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.data.read().subscription.clone()
    }

    /// The call is ringing on `device` without being claimed by it
    pub fn is_presented_to(&self, device: &DeviceId) -> bool {
        self.data.read().presented_on.contains(device)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.is_destroyed()
    }

    /// Caller-information updates coming from the routing engine
    pub fn update_call_info<F>(&self, update: F)
    where
        F: FnOnce(&mut CallInfo),
    {
        update(&mut self.data.write().call_info);
    }

    pub fn set_linked_id(&self, linked_id: impl Into<String>) {
        self.data.write().linked_id = Some(linked_id.into());
    }

    pub fn set_priority(&self, priority: CallPriority) {
        self.data.write().priority = priority;
    }

    pub(crate) fn with_data_mut<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut ChannelData) -> R,
    {
        f(&mut self.data.write())
    }

    /// Record `new` as the current state, returning the one it replaces
    pub(crate) fn transition(&self, new: ChannelState) -> ChannelState {
        let mut data = self.data.write();
        let previous = data.state;
        data.previous_state = previous;
        data.state = new;
        previous
    }

    pub(crate) fn begin_destroy(&self) -> bool {
        self.destroyed.begin()
    }

    pub(crate) fn take_scheduled_tasks(&self) -> Vec<TaskHandle> {
        let mut data = self.data.write();
        data.digit_timeout.take().into_iter().chain(data.hangup_timeout.take()).collect()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.read();
        f.debug_struct("Channel")
            .field("call_id", &self.call_id)
            .field("line", &self.line.name())
            .field("state", &data.state)
            .field("call_type", &data.call_type)
            .finish()
    }
}

/// Process-wide call id counter: starts at 1, wraps from `u32::MAX` back to 1
/// and skips ids still in use.
pub struct CallIdGenerator {
    next: Mutex<u32>,
}

impl CallIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u32) -> Self {
        Self {
            next: Mutex::new(first.max(1)),
        }
    }

    pub fn next<F>(&self, in_use: F) -> CallId
    where
        F: Fn(CallId) -> bool,
    {
        let mut next = self.next.lock();
        loop {
            let id = CallId(*next);
            *next = if *next == u32::MAX { 1 } else { *next + 1 };
            if !in_use(id) {
                return id;
            }
        }
    }
}

impl Default for CallIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_call_ids_wrap_to_one() {
        let ids = CallIdGenerator::starting_at(u32::MAX - 1);
        assert_eq!(ids.next(|_| false), CallId(u32::MAX - 1));
        assert_eq!(ids.next(|_| false), CallId(u32::MAX));
        assert_eq!(ids.next(|_| false), CallId(1));
    }

    #[test]
    fn test_call_ids_skip_live_channels() {
        let ids = CallIdGenerator::new();
        assert_eq!(ids.next(|id| id.0 <= 3), CallId(4));
        assert_eq!(ids.next(|_| false), CallId(5));
    }

    proptest! {
        #[test]
        fn call_id_is_never_zero(start in any::<u32>(), draws in 1usize..8) {
            let ids = CallIdGenerator::starting_at(start);
            for _ in 0..draws {
                prop_assert_ne!(ids.next(|_| false), CallId(0));
            }
        }
    }
}
