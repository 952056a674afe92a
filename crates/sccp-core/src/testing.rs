//! Recording collaborators for tests and embedders' test suites
//!
//! Each recorder keeps every call it receives so tests can assert on the
//! exact directives the core issued. Failure switches make the matching
//! operation return an error.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::collaborators::{
    Collaborators, ConferenceMixer, ControlSignal, DeviceMessage, DeviceTransport, MediaEngine, PresenceEngine,
    PresenceState, RoutingEngine,
};
use crate::config::SccpConfig;
use crate::context::SccpContext;
use crate::device::Device;
use crate::errors::Result;
use crate::types::{CallId, ChannelState, Codec, ConferenceId, DeviceId, LegId, SessionHandle};

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(SessionHandle, DeviceMessage)>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn messages_for(&self, session: &SessionHandle) -> Vec<DeviceMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|(s, _)| s == session)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<(SessionHandle, DeviceMessage)> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }
}

impl DeviceTransport for RecordingTransport {
    fn send(&self, session: &SessionHandle, message: DeviceMessage) -> anyhow::Result<()> {
        if self.failing.load(Ordering::Acquire) {
            anyhow::bail!("session {} closed", session);
        }
        self.sent.lock().push((session.clone(), message));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingCall {
    AllocateLeg { call_id: CallId, line: String, context: String },
    BeginDial { call_id: CallId, number: String },
    AttendedTransfer { transferee: CallId, destination: CallId },
    Pickup { picker: CallId, target: CallId },
    QueueControl { call_id: CallId, signal: ControlSignal },
    SetCallState { call_id: CallId, state: ChannelState },
    RequestHangup { call_id: CallId },
}

#[derive(Default)]
pub struct RecordingRouting {
    calls: Mutex<Vec<RoutingCall>>,
    next_leg: AtomicU64,
    fail_allocate: AtomicBool,
    fail_dial: AtomicBool,
    fail_transfer: AtomicBool,
    fail_pickup: AtomicBool,
    /// Calls whose far end has gone away
    unbridged: Mutex<Vec<CallId>>,
}

impl RecordingRouting {
    pub fn calls(&self) -> Vec<RoutingCall> {
        self.calls.lock().clone()
    }

    /// Control signals queued for one call, in order
    pub fn controls_for(&self, call_id: CallId) -> Vec<ControlSignal> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RoutingCall::QueueControl { call_id: id, signal } if *id == call_id => Some(signal.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn set_fail_allocate(&self, fail: bool) {
        self.fail_allocate.store(fail, Ordering::Release);
    }

    pub fn set_fail_dial(&self, fail: bool) {
        self.fail_dial.store(fail, Ordering::Release);
    }

    pub fn set_fail_transfer(&self, fail: bool) {
        self.fail_transfer.store(fail, Ordering::Release);
    }

    pub fn set_fail_pickup(&self, fail: bool) {
        self.fail_pickup.store(fail, Ordering::Release);
    }

    /// Report no bridged peer for `call_id` from now on
    pub fn drop_peer(&self, call_id: CallId) {
        self.unbridged.lock().push(call_id);
    }

    fn record(&self, call: RoutingCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl RoutingEngine for RecordingRouting {
    async fn allocate_call_leg(&self, call_id: CallId, line: &str, context: &str) -> anyhow::Result<LegId> {
        self.record(RoutingCall::AllocateLeg {
            call_id,
            line: line.to_string(),
            context: context.to_string(),
        });
        if self.fail_allocate.load(Ordering::Acquire) {
            anyhow::bail!("no leg for {}", call_id);
        }
        let leg = self.next_leg.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(LegId(format!("leg-{}", leg)))
    }

    async fn begin_dial(&self, call_id: CallId, number: &str) -> anyhow::Result<()> {
        self.record(RoutingCall::BeginDial {
            call_id,
            number: number.to_string(),
        });
        if self.fail_dial.load(Ordering::Acquire) {
            anyhow::bail!("cannot route {}", number);
        }
        Ok(())
    }

    async fn attended_transfer(&self, transferee: CallId, destination: CallId) -> anyhow::Result<()> {
        self.record(RoutingCall::AttendedTransfer { transferee, destination });
        if self.fail_transfer.load(Ordering::Acquire) {
            anyhow::bail!("masquerade of {} failed", transferee);
        }
        Ok(())
    }

    async fn pickup(&self, picker: CallId, target: CallId) -> anyhow::Result<()> {
        self.record(RoutingCall::Pickup { picker, target });
        if self.fail_pickup.load(Ordering::Acquire) {
            anyhow::bail!("{} is no longer ringing", target);
        }
        Ok(())
    }

    fn queue_control(&self, call_id: CallId, signal: ControlSignal) {
        self.record(RoutingCall::QueueControl { call_id, signal });
    }

    fn set_call_state(&self, call_id: CallId, state: ChannelState) {
        self.record(RoutingCall::SetCallState { call_id, state });
    }

    fn bridged_peer(&self, call_id: CallId) -> Option<LegId> {
        if self.unbridged.lock().contains(&call_id) {
            return None;
        }
        Some(LegId(format!("peer-of-{}", call_id)))
    }

    fn request_hangup(&self, call_id: CallId) {
        self.record(RoutingCall::RequestHangup { call_id });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCall {
    OpenReceive(CallId, Codec),
    CloseReceive(CallId),
    StartTransmission(CallId, Codec),
    StopTransmission(CallId),
}

#[derive(Default)]
pub struct RecordingMedia {
    calls: Mutex<Vec<MediaCall>>,
    fail_open: AtomicBool,
}

impl RecordingMedia {
    pub fn calls(&self) -> Vec<MediaCall> {
        self.calls.lock().clone()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::Release);
    }
}

impl MediaEngine for RecordingMedia {
    fn open_receive_channel(&self, call_id: CallId, codec: Codec) -> anyhow::Result<()> {
        if self.fail_open.load(Ordering::Acquire) {
            anyhow::bail!("no port for {}", call_id);
        }
        self.calls.lock().push(MediaCall::OpenReceive(call_id, codec));
        Ok(())
    }

    fn close_receive_channel(&self, call_id: CallId) {
        self.calls.lock().push(MediaCall::CloseReceive(call_id));
    }

    fn start_transmission(&self, call_id: CallId, codec: Codec) -> anyhow::Result<()> {
        self.calls.lock().push(MediaCall::StartTransmission(call_id, codec));
        Ok(())
    }

    fn stop_transmission(&self, call_id: CallId) {
        self.calls.lock().push(MediaCall::StopTransmission(call_id));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerCall {
    Create(CallId, ConferenceId),
    Add(ConferenceId, CallId),
    Remove(ConferenceId, CallId),
    End(ConferenceId),
}

#[derive(Default)]
pub struct RecordingConference {
    calls: Mutex<Vec<MixerCall>>,
    fail_join: AtomicBool,
}

impl RecordingConference {
    pub fn calls(&self) -> Vec<MixerCall> {
        self.calls.lock().clone()
    }

    pub fn set_fail_join(&self, fail: bool) {
        self.fail_join.store(fail, Ordering::Release);
    }
}

#[async_trait]
impl ConferenceMixer for RecordingConference {
    async fn create_conference(&self, owner: CallId) -> anyhow::Result<ConferenceId> {
        let id = ConferenceId::new();
        self.calls.lock().push(MixerCall::Create(owner, id.clone()));
        Ok(id)
    }

    async fn add_participant(&self, conference: &ConferenceId, call_id: CallId) -> anyhow::Result<()> {
        if self.fail_join.load(Ordering::Acquire) {
            anyhow::bail!("bridge {} refused {}", conference, call_id);
        }
        self.calls.lock().push(MixerCall::Add(conference.clone(), call_id));
        Ok(())
    }

    async fn remove_participant(&self, conference: &ConferenceId, call_id: CallId) -> anyhow::Result<()> {
        self.calls.lock().push(MixerCall::Remove(conference.clone(), call_id));
        Ok(())
    }

    async fn end_conference(&self, conference: &ConferenceId) -> anyhow::Result<()> {
        self.calls.lock().push(MixerCall::End(conference.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub line_key: String,
    pub state: PresenceState,
    pub caller_name: String,
    pub caller_number: String,
}

#[derive(Default)]
pub struct RecordingPresence {
    published: Mutex<Vec<PresenceUpdate>>,
}

impl RecordingPresence {
    pub fn published(&self) -> Vec<PresenceUpdate> {
        self.published.lock().clone()
    }

    pub fn last_for(&self, line_key: &str) -> Option<PresenceUpdate> {
        self.published.lock().iter().rev().find(|u| u.line_key == line_key).cloned()
    }
}

impl PresenceEngine for RecordingPresence {
    fn publish_device_state(&self, line_key: &str, state: PresenceState, caller_name: &str, caller_number: &str) {
        self.published.lock().push(PresenceUpdate {
            line_key: line_key.to_string(),
            state,
            caller_name: caller_name.to_string(),
            caller_number: caller_number.to_string(),
        });
    }
}

/// A context wired to recording collaborators
pub struct TestHarness {
    pub context: Arc<SccpContext>,
    pub transport: Arc<RecordingTransport>,
    pub routing: Arc<RecordingRouting>,
    pub media: Arc<RecordingMedia>,
    pub mixer: Arc<RecordingConference>,
    pub presence: Arc<RecordingPresence>,
}

impl TestHarness {
    /// Must be called inside a tokio runtime
    pub fn new(config: SccpConfig) -> Result<Self> {
        let transport = Arc::new(RecordingTransport::default());
        let routing = Arc::new(RecordingRouting::default());
        let media = Arc::new(RecordingMedia::default());
        let mixer = Arc::new(RecordingConference::default());
        let presence = Arc::new(RecordingPresence::default());
        let collaborators = Collaborators {
            transport: transport.clone(),
            routing: routing.clone(),
            media: media.clone(),
            mixer: mixer.clone(),
            presence: presence.clone(),
        };
        let context = SccpContext::init(config, collaborators)?;
        Ok(Self {
            context,
            transport,
            routing,
            media,
            mixer,
            presence,
        })
    }

    /// Register a configured device on a fresh session
    pub fn register(&self, id: &str) -> Result<(Arc<Device>, SessionHandle)> {
        let session = SessionHandle::new();
        let device = self.context.register_device(&DeviceId::new(id), session.clone())?;
        Ok((device, session))
    }

    pub fn messages(&self, session: &SessionHandle) -> Vec<DeviceMessage> {
        self.transport.messages_for(session)
    }
}
