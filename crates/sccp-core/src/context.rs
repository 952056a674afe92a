//! Process-wide state of the driver
//!
//! Owns every line, device and channel plus the claim table, the hint
//! distributor, the timer service and the background pool. Created once with
//! [`SccpContext::init`] and torn down with [`SccpContext::shutdown`].

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::channel::{CallIdGenerator, Channel};
use crate::claim::ClaimTable;
use crate::collaborators::{Collaborators, DeviceMessage, PresenceState};
use crate::conference::ConferenceRegistry;
use crate::config::{DeviceConfig, LineConfig, SccpConfig};
use crate::device::Device;
use crate::errors::{Result, SccpError};
use crate::events::{EventBus, Feature, SccpEvent, SccpEventHandler};
use crate::hint::{HintDistributor, LineState};
use crate::line::Line;
use crate::line_device::{CallForwardType, LineDevice, SubscriptionId};
use crate::refcount::{Handle, ObjectRegistry};
use crate::scheduler::Scheduler;
use crate::threadpool::ThreadPool;
use crate::types::{CallId, CodecSets, DeviceId, DndMode, SessionHandle};

pub struct SccpContext {
    config: SccpConfig,
    lines: DashMap<String, Arc<Line>>,
    devices: DashMap<DeviceId, Arc<Device>>,
    sessions: DashMap<SessionHandle, DeviceId>,
    channels: ObjectRegistry<Channel>,
    call_ids: DashMap<CallId, Handle<Channel>>,
    call_id_generator: CallIdGenerator,
    claims: ClaimTable,
    hints: HintDistributor,
    conferences: ConferenceRegistry,
    events: EventBus,
    scheduler: Scheduler,
    threadpool: ThreadPool,
    collaborators: Collaborators,
    running: AtomicBool,
    weak_self: Weak<SccpContext>,
}

impl SccpContext {
    /// Build the context, start the worker pool and create the configured
    /// lines and devices. Must run inside a tokio runtime.
    pub fn init(config: SccpConfig, collaborators: Collaborators) -> Result<Arc<Self>> {
        config.validate()?;
        let threadpool = ThreadPool::start(config.threadpool.clone())?;

        let context = Arc::new_cyclic(|weak_self| Self {
            config,
            lines: DashMap::new(),
            devices: DashMap::new(),
            sessions: DashMap::new(),
            channels: ObjectRegistry::new("channel"),
            call_ids: DashMap::new(),
            call_id_generator: CallIdGenerator::new(),
            claims: ClaimTable::new(),
            hints: HintDistributor::new(),
            conferences: ConferenceRegistry::new(),
            events: EventBus::new(),
            scheduler: Scheduler::new(),
            threadpool,
            collaborators,
            running: AtomicBool::new(true),
            weak_self: weak_self.clone(),
        });

        for line in context.config.lines.clone() {
            context.add_line(line)?;
        }
        for device in context.config.devices.clone() {
            context.add_device(device)?;
        }
        info!(
            "SCCP context initialised with {} lines and {} devices",
            context.lines.len(),
            context.devices.len()
        );
        Ok(context)
    }

    /// End every call, unregister every device and stop background work
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("SCCP context shutting down");
        for channel in self.channels.live_objects() {
            self.end_call(&channel);
        }
        let devices: Vec<Arc<Device>> = self.devices.iter().map(|d| d.value().clone()).collect();
        for device in devices {
            if device.is_registered() {
                self.unregister_device(device.id());
            }
        }
        self.scheduler.shutdown();
        self.threadpool.shutdown().await;
        self.hints.clear();
        info!("SCCP context stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &SccpConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn add_event_handler(&self, name: &str, handler: Arc<dyn SccpEventHandler>) {
        self.events.add_handler(name, handler);
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn threadpool(&self) -> &ThreadPool {
        &self.threadpool
    }

    pub(crate) fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub(crate) fn hints(&self) -> &HintDistributor {
        &self.hints
    }

    pub(crate) fn conferences(&self) -> &ConferenceRegistry {
        &self.conferences
    }

    pub(crate) fn strong_self(&self) -> Option<Arc<SccpContext>> {
        self.weak_self.upgrade()
    }

    pub(crate) fn global_codecs(&self) -> CodecSets {
        CodecSets::new(self.config.codec_preferences.clone(), self.config.codec_capabilities.clone())
    }

    // Lines

    pub fn add_line(&self, config: LineConfig) -> Result<Arc<Line>> {
        if config.name.is_empty() {
            return Err(SccpError::Config("Line without a name".to_string()));
        }
        if self.lines.contains_key(&config.name) {
            return Err(SccpError::Config(format!("Line {} already exists", config.name)));
        }
        let line = Arc::new(Line::new(config));
        line.recompute_codecs(&self.global_codecs());
        self.lines.insert(line.name().to_string(), line.clone());
        debug!("{}: line created", line.name());
        Ok(line)
    }

    pub fn line(&self, name: &str) -> Option<Arc<Line>> {
        self.lines.get(name).map(|l| l.value().clone())
    }

    pub fn lines(&self) -> Vec<Arc<Line>> {
        self.lines.iter().map(|l| l.value().clone()).collect()
    }

    /// End the line's calls, detach it from every device and drop it
    pub fn remove_line(&self, name: &str) -> Result<()> {
        let line = self.line(name).ok_or_else(|| SccpError::LineNotFound(name.to_string()))?;
        for channel in line.channels() {
            self.end_call(&channel);
        }
        for line_device in line.line_devices() {
            self.detach(line_device.device(), name);
        }
        self.lines.remove(name);
        info!("{}: line removed", name);
        Ok(())
    }

    pub fn is_hotline(&self, line: &Line) -> bool {
        self.config.hotline.as_deref() == Some(line.name())
    }

    // Devices

    pub fn add_device(&self, config: DeviceConfig) -> Result<Arc<Device>> {
        let device = Arc::new(Device::new(config));
        if self.devices.contains_key(device.id()) {
            return Err(SccpError::Config(format!("Device {} already exists", device.id())));
        }
        self.devices.insert(device.id().clone(), device.clone());
        debug!("{}: device created", device.id());
        Ok(device)
    }

    pub fn device(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.devices.get(id).map(|d| d.value().clone())
    }

    pub fn device_for_session(&self, session: &SessionHandle) -> Option<Arc<Device>> {
        let id = self.sessions.get(session).map(|d| d.value().clone())?;
        self.device(&id)
    }

    /// Bind a device to a transport session and attach its configured lines
    pub fn register_device(&self, id: &DeviceId, session: SessionHandle) -> Result<Arc<Device>> {
        if !self.is_running() {
            return Err(SccpError::ShuttingDown);
        }
        let device = self.device(id).ok_or_else(|| SccpError::device_not_found(id))?;
        if let Some(old) = device.session() {
            warn!("{}: re-registering, dropping session {}", id, old);
            self.sessions.remove(&old);
        }
        device.set_session(Some(session.clone()));
        self.sessions.insert(session, id.clone());

        for button in device.config().lines.clone() {
            let subscription = button.subscription.map(SubscriptionId::from);
            if let Err(e) = self.attach(&device, &button.line, button.instance, subscription) {
                warn!("{}: cannot attach line {}: {}", id, button.line, e);
            }
        }
        self.fire_event(SccpEvent::DeviceRegistered { device: id.clone() });
        for speeddial in device.config().speeddials.clone() {
            if let Some(hint_line) = speeddial.hint_line {
                self.hints.subscribe(self, &device, speeddial.instance, &speeddial.name, &hint_line);
            }
        }
        info!("{}: registered", id);
        Ok(device)
    }

    /// Hang up the device's calls, detach its lines and drop the session
    pub fn unregister_device(&self, id: &DeviceId) {
        let Some(device) = self.device(id) else {
            debug!("{}: unregister for unknown device", id);
            return;
        };
        if let Some(active) = self.active_channel(&device) {
            self.end_call(&active);
        }
        for line_device in device.line_devices() {
            let line = line_device.line().clone();
            for channel in line.channels() {
                if channel.last_device().as_ref() == Some(id) {
                    self.end_call(&channel);
                }
            }
            self.detach(&device, line.name());
        }
        self.hints.unsubscribe_device(id);
        if let Some(session) = device.session() {
            self.sessions.remove(&session);
        }
        device.set_session(None);
        device.set_transfer_pair(None);
        device.set_conference(None);
        self.fire_event(SccpEvent::DeviceUnregistered { device: id.clone() });
        info!("{}: unregistered", id);
    }

    // Attach / detach

    /// Create the LineDevice for (device, line). At most one per pair.
    pub fn attach(
        &self,
        device: &Arc<Device>,
        line_name: &str,
        instance: u16,
        subscription: Option<SubscriptionId>,
    ) -> Result<Arc<LineDevice>> {
        let line = self
            .line(line_name)
            .ok_or_else(|| SccpError::LineNotFound(line_name.to_string()))?;
        if let Some(existing) = device.line_device(line_name) {
            debug!("{}: already attached to {}", device.id(), line_name);
            return Ok(existing);
        }
        let line_device = Arc::new(LineDevice::new(line.clone(), device.clone(), instance, subscription));
        if !line.add_line_device(line_device.clone()) {
            return line
                .line_device_for(device.id())
                .ok_or_else(|| SccpError::LineNotFound(line_name.to_string()));
        }
        device.add_line_device(line_device.clone());
        line.recompute_codecs(&self.global_codecs());
        info!("{}: attached line {} on instance {}", device.id(), line_name, instance);
        self.fire_event(SccpEvent::DeviceAttached {
            line: line_name.to_string(),
            device: device.id().clone(),
        });
        Ok(line_device)
    }

    /// Remove the (device, line) pair; inverse of [`attach`](Self::attach)
    pub fn detach(&self, device: &Arc<Device>, line_name: &str) -> Option<Arc<LineDevice>> {
        let removed = device.remove_line_device(line_name);
        let line = self.line(line_name)?;
        let from_line = line.remove_line_device(device.id());
        let removed = removed.or(from_line)?;
        line.recompute_codecs(&self.global_codecs());
        info!("{}: detached line {}", device.id(), line_name);
        self.fire_event(SccpEvent::DeviceDetached {
            line: line_name.to_string(),
            device: device.id().clone(),
        });
        Some(removed)
    }

    // Channels

    pub fn channel(&self, call_id: CallId) -> Option<Arc<Channel>> {
        let handle = *self.call_ids.get(&call_id)?.value();
        self.channels.retain(handle)
    }

    pub fn channel_by_passthru(&self, passthru_party_id: u32) -> Option<Arc<Channel>> {
        self.channel(CallId(passthru_party_id ^ 0xFFFF_FFFF))
    }

    pub fn retain_channel(&self, handle: Handle<Channel>) -> Option<Arc<Channel>> {
        self.channels.retain(handle)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.live_objects()
    }

    pub(crate) fn register_channel<F>(&self, build: F) -> Arc<Channel>
    where
        F: FnOnce(Handle<Channel>, CallId) -> Channel,
    {
        let call_id = self
            .call_id_generator
            .next(|id| self.call_ids.contains_key(&id));
        let channel = self.channels.register_with(|handle| build(handle, call_id));
        self.call_ids.insert(call_id, channel.handle());
        channel
    }

    pub(crate) fn unregister_channel(&self, channel: &Channel) {
        self.call_ids.remove(&channel.call_id());
        self.channels.release(channel.handle());
    }

    // Claims

    pub fn claimed_device(&self, channel: &Channel) -> Option<Arc<Device>> {
        let id = self.claims.claimed_device(channel.handle())?;
        self.device(&id)
    }

    pub fn active_channel(&self, device: &Device) -> Option<Arc<Channel>> {
        let handle = self.claims.active_channel(device.id())?;
        self.channels.retain(handle)
    }

    pub(crate) fn claims(&self) -> &ClaimTable {
        &self.claims
    }

    /// Claim/active-channel pairs mirror each other and point at live objects
    pub fn claims_consistent(&self) -> bool {
        self.claims.is_consistent()
            && self.channels.live_objects().iter().all(|c| match self.claims.claimed_device(c.handle()) {
                Some(id) => self.claims.active_channel(&id) == Some(c.handle()),
                None => true,
            })
    }

    // Features

    /// Change DND on a device and re-derive the hints of its lines
    pub fn set_dnd(&self, device: &Arc<Device>, dnd: DndMode) {
        if device.set_dnd(dnd) {
            info!("{}: DND set to {:?}", device.id(), dnd);
            self.fire_event(SccpEvent::FeatureChanged {
                device: device.id().clone(),
                feature: Feature::Dnd,
            });
        }
    }

    pub fn set_privacy(&self, device: &Arc<Device>, privacy: bool) {
        device.set_privacy(privacy);
        self.fire_event(SccpEvent::FeatureChanged {
            device: device.id().clone(),
            feature: Feature::Privacy,
        });
    }

    pub fn set_call_forward(
        &self,
        device: &Arc<Device>,
        line: &str,
        kind: CallForwardType,
        target: Option<String>,
    ) -> Result<()> {
        let line_device = device
            .line_device(line)
            .ok_or_else(|| SccpError::LineNotFound(line.to_string()))?;
        line_device.set_call_forward(kind, target);
        self.fire_event(SccpEvent::FeatureChanged {
            device: device.id().clone(),
            feature: Feature::CallForward,
        });
        Ok(())
    }

    // Hints

    /// Current hint record of a line, if it has one
    pub fn line_state(&self, line: &str) -> Option<LineState> {
        self.hints.line_state(line)
    }

    /// Re-derive a line's hint after caller information changed outside a
    /// state transition
    pub fn refresh_line_status(&self, line: &str) {
        if let Some(line) = self.line(line) {
            self.hints.line_status_changed(self, &line);
        }
    }

    /// Presence of a line derived from its current devices and channels
    pub fn line_presence(&self, line: &str) -> PresenceState {
        match self.line(line) {
            Some(line) => PresenceState::from(HintDistributor::compute(&line).0),
            None => PresenceState::Unavailable,
        }
    }

    // Outbound

    /// Queue a message to a device; dropped with a log when it has no session
    pub(crate) fn send(&self, device: &Device, message: DeviceMessage) {
        let Some(session) = device.session() else {
            debug!("{}: no session, dropping {}", device.id(), message.type_name());
            return;
        };
        if let Err(e) = self.collaborators.transport.send(&session, message) {
            warn!("{}: transport refused message: {}", device.id(), e);
        }
    }

    pub(crate) fn fire_event(&self, event: SccpEvent) {
        match &event {
            SccpEvent::LineStatusChanged { line, .. }
            | SccpEvent::DeviceAttached { line, .. }
            | SccpEvent::DeviceDetached { line, .. } => {
                if let Some(line) = self.line(line) {
                    self.hints.line_status_changed(self, &line);
                }
            }
            SccpEvent::FeatureChanged { device, .. } => {
                if let Some(device) = self.device(device) {
                    self.hints.feature_changed(self, &device);
                }
            }
            _ => {}
        }
        self.events.publish(&event);
    }
}
