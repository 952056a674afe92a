//! Device: a registered phone endpoint

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::channel::Channel;
use crate::config::DeviceConfig;
use crate::line_device::LineDevice;
use crate::refcount::Handle;
use crate::types::{Codec, CodecSets, ConferenceId, DeviceId, DndMode, SessionHandle};

/// Feature toggles a user can change at runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFeatures {
    pub dnd: DndMode,
    pub privacy: bool,
}

/// Attended transfer in progress on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPair {
    /// Held call being transferred
    pub transferee: Handle<Channel>,
    /// Consultation call placed to the destination
    pub transferer: Option<Handle<Channel>>,
}

impl TransferPair {
    pub fn involves(&self, channel: Handle<Channel>) -> bool {
        self.transferee == channel || self.transferer == Some(channel)
    }
}

#[derive(Debug, Default)]
pub struct DeviceStatistics {
    calls_placed: AtomicU64,
    calls_answered: AtomicU64,
    calls_held: AtomicU64,
}

impl DeviceStatistics {
    pub fn calls_placed(&self) -> u64 {
        self.calls_placed.load(Ordering::Acquire)
    }

    pub fn calls_answered(&self) -> u64 {
        self.calls_answered.load(Ordering::Acquire)
    }

    pub fn calls_held(&self) -> u64 {
        self.calls_held.load(Ordering::Acquire)
    }

    pub(crate) fn placed(&self) {
        self.calls_placed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn answered(&self) {
        self.calls_answered.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn held(&self) {
        self.calls_held.fetch_add(1, Ordering::AcqRel);
    }
}

pub struct Device {
    id: DeviceId,
    config: DeviceConfig,
    session: RwLock<Option<SessionHandle>>,
    registered_at: RwLock<Option<DateTime<Utc>>>,
    lines: RwLock<Vec<Arc<LineDevice>>>,
    features: RwLock<DeviceFeatures>,
    transfer: Mutex<Option<TransferPair>>,
    conference: Mutex<Option<ConferenceId>>,
    codecs: RwLock<CodecSets>,
    statistics: DeviceStatistics,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Self {
        let features = DeviceFeatures {
            dnd: config.dnd,
            privacy: config.privacy,
        };
        let codecs = CodecSets::new(config.codec_preferences.clone(), config.codec_capabilities.clone());
        Self {
            id: DeviceId::new(config.id.clone()),
            config,
            session: RwLock::new(None),
            registered_at: RwLock::new(None),
            lines: RwLock::new(Vec::new()),
            features: RwLock::new(features),
            transfer: Mutex::new(None),
            conference: Mutex::new(None),
            codecs: RwLock::new(codecs),
            statistics: DeviceStatistics::default(),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn statistics(&self) -> &DeviceStatistics {
        &self.statistics
    }

    // Session

    pub fn session(&self) -> Option<SessionHandle> {
        self.session.read().clone()
    }

    pub fn is_registered(&self) -> bool {
        self.session.read().is_some()
    }

    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        *self.registered_at.read()
    }

    pub(crate) fn set_session(&self, session: Option<SessionHandle>) {
        *self.registered_at.write() = session.as_ref().map(|_| Utc::now());
        *self.session.write() = session;
    }

    // Lines

    pub fn line_devices(&self) -> Vec<Arc<LineDevice>> {
        self.lines.read().clone()
    }

    pub fn line_device(&self, line: &str) -> Option<Arc<LineDevice>> {
        self.lines.read().iter().find(|ld| ld.line().name() == line).cloned()
    }

    pub fn line_device_by_instance(&self, instance: u16) -> Option<Arc<LineDevice>> {
        self.lines
            .read()
            .iter()
            .find(|ld| ld.line_instance() == instance)
            .cloned()
    }

    /// Line on the lowest button instance
    pub fn default_line_device(&self) -> Option<Arc<LineDevice>> {
        self.lines.read().iter().min_by_key(|ld| ld.line_instance()).cloned()
    }

    pub(crate) fn add_line_device(&self, line_device: Arc<LineDevice>) -> bool {
        let mut lines = self.lines.write();
        if lines.iter().any(|ld| ld.line().name() == line_device.line().name()) {
            return false;
        }
        lines.push(line_device);
        true
    }

    pub(crate) fn remove_line_device(&self, line: &str) -> Option<Arc<LineDevice>> {
        let mut lines = self.lines.write();
        let pos = lines.iter().position(|ld| ld.line().name() == line)?;
        Some(lines.remove(pos))
    }

    // Features

    pub fn features(&self) -> DeviceFeatures {
        *self.features.read()
    }

    pub fn dnd(&self) -> DndMode {
        self.features.read().dnd
    }

    pub(crate) fn set_dnd(&self, dnd: DndMode) -> bool {
        let mut features = self.features.write();
        let changed = features.dnd != dnd;
        features.dnd = dnd;
        changed
    }

    pub fn privacy(&self) -> bool {
        self.features.read().privacy
    }

    pub(crate) fn set_privacy(&self, privacy: bool) {
        self.features.write().privacy = privacy;
    }

    pub fn transfer_enabled(&self) -> bool {
        self.config.transfer
    }

    // Transfer and conference slots

    pub fn transfer_pair(&self) -> Option<TransferPair> {
        *self.transfer.lock()
    }

    pub(crate) fn set_transfer_pair(&self, pair: Option<TransferPair>) {
        *self.transfer.lock() = pair;
    }

    pub(crate) fn set_transferer(&self, transferer: Handle<Channel>) -> bool {
        match self.transfer.lock().as_mut() {
            Some(pair) => {
                pair.transferer = Some(transferer);
                true
            }
            None => false,
        }
    }

    /// Clear the transfer slot if it involves `channel`, returning the old pair
    pub(crate) fn clear_transfer_if(&self, channel: Handle<Channel>) -> Option<TransferPair> {
        let mut transfer = self.transfer.lock();
        match *transfer {
            Some(pair) if pair.involves(channel) => transfer.take(),
            _ => None,
        }
    }

    pub fn conference(&self) -> Option<ConferenceId> {
        self.conference.lock().clone()
    }

    pub(crate) fn set_conference(&self, conference: Option<ConferenceId>) {
        *self.conference.lock() = conference;
    }

    pub(crate) fn clear_conference_if(&self, conference: &ConferenceId) -> bool {
        let mut slot = self.conference.lock();
        if slot.as_ref() == Some(conference) {
            *slot = None;
            true
        } else {
            false
        }
    }

    // Codecs

    pub fn codecs(&self) -> CodecSets {
        self.codecs.read().clone()
    }

    pub(crate) fn set_capabilities(&self, capabilities: Vec<Codec>) {
        self.codecs.write().capabilities = capabilities;
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("registered", &self.is_registered())
            .field("lines", &self.lines.read().len())
            .finish()
    }
}
