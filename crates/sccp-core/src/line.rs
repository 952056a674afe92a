//! Line: a dialable identity that may appear on several devices

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::channel::Channel;
use crate::config::LineConfig;
use crate::line_device::LineDevice;
use crate::refcount::Handle;
use crate::types::{CallId, Codec, CodecSets, DeviceId, Party};

/// Call counters kept per line
#[derive(Debug, Default)]
pub struct LineStatistics {
    active_channels: AtomicU32,
    held_channels: AtomicU32,
    total_calls: AtomicU64,
}

impl LineStatistics {
    pub fn active_channels(&self) -> u32 {
        self.active_channels.load(Ordering::Acquire)
    }

    pub fn held_channels(&self) -> u32 {
        self.held_channels.load(Ordering::Acquire)
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Acquire)
    }

    pub(crate) fn channel_added(&self) {
        self.active_channels.fetch_add(1, Ordering::AcqRel);
        self.total_calls.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn channel_removed(&self) {
        saturating_decrement(&self.active_channels);
    }

    pub(crate) fn held(&self) {
        self.held_channels.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unheld(&self) {
        saturating_decrement(&self.held_channels);
    }
}

fn saturating_decrement(counter: &AtomicU32) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
}

pub struct Line {
    config: LineConfig,
    /// Attached devices, one entry per (device, line) pair
    devices: RwLock<Vec<Arc<LineDevice>>>,
    channels: RwLock<Vec<Arc<Channel>>>,
    codecs: RwLock<CodecSets>,
    statistics: LineStatistics,
}

impl Line {
    pub fn new(config: LineConfig) -> Self {
        let codecs = CodecSets::new(config.codec_preferences.clone(), config.codec_capabilities.clone());
        Self {
            config,
            devices: RwLock::new(Vec::new()),
            channels: RwLock::new(Vec::new()),
            codecs: RwLock::new(codecs),
            statistics: LineStatistics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &LineConfig {
        &self.config
    }

    pub fn caller_id(&self) -> Party {
        Party::new(self.config.cid_name.clone(), self.config.cid_num.clone())
    }

    /// A line without a dialplan context cannot originate or receive calls
    pub fn has_context(&self) -> bool {
        !self.config.context.trim().is_empty()
    }

    pub fn transfer_enabled(&self) -> bool {
        self.config.transfer
    }

    pub fn statistics(&self) -> &LineStatistics {
        &self.statistics
    }

    // Devices

    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_shared(&self) -> bool {
        self.device_count() > 1
    }

    pub fn line_devices(&self) -> Vec<Arc<LineDevice>> {
        self.devices.read().clone()
    }

    pub fn line_device_for(&self, device: &DeviceId) -> Option<Arc<LineDevice>> {
        self.devices
            .read()
            .iter()
            .find(|ld| ld.device().id() == device)
            .cloned()
    }

    /// `false` when the device is already attached
    pub(crate) fn add_line_device(&self, line_device: Arc<LineDevice>) -> bool {
        let mut devices = self.devices.write();
        if devices.iter().any(|ld| ld.device().id() == line_device.device().id()) {
            return false;
        }
        devices.push(line_device);
        true
    }

    pub(crate) fn remove_line_device(&self, device: &DeviceId) -> Option<Arc<LineDevice>> {
        let mut devices = self.devices.write();
        let pos = devices.iter().position(|ld| ld.device().id() == device)?;
        Some(devices.remove(pos))
    }

    // Channels

    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.read().clone()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    pub fn find_channel(&self, call_id: CallId) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .iter()
            .find(|c| c.call_id() == call_id)
            .cloned()
    }

    /// Forwarded children of `parent` on this line
    pub fn children_of(&self, parent: Handle<Channel>) -> Vec<Arc<Channel>> {
        self.channels
            .read()
            .iter()
            .filter(|c| c.parent() == Some(parent))
            .cloned()
            .collect()
    }

    pub(crate) fn add_channel(&self, channel: Arc<Channel>) {
        debug!("{}: add channel {}", self.name(), channel.call_id());
        self.channels.write().push(channel);
        self.statistics.channel_added();
    }

    pub(crate) fn remove_channel(&self, call_id: CallId) -> Option<Arc<Channel>> {
        let removed = {
            let mut channels = self.channels.write();
            let pos = channels.iter().position(|c| c.call_id() == call_id)?;
            channels.remove(pos)
        };
        self.statistics.channel_removed();
        debug!("{}: removed channel {}", self.name(), call_id);
        Some(removed)
    }

    // Codecs

    pub fn codecs(&self) -> CodecSets {
        self.codecs.read().clone()
    }

    /// Preferences become the ordered union over attached devices and
    /// capabilities the intersection. Configured line codecs win over both.
    pub(crate) fn recompute_codecs(&self, fallback: &CodecSets) {
        let device_sets: Vec<CodecSets> = self
            .devices
            .read()
            .iter()
            .map(|ld| ld.device().codecs())
            .collect();

        let mut preferences: Vec<Codec> = self.config.codec_preferences.clone();
        if preferences.is_empty() {
            for set in &device_sets {
                for codec in &set.preferences {
                    if !preferences.contains(codec) {
                        preferences.push(*codec);
                    }
                }
            }
        }

        let mut capabilities: Vec<Codec> = self.config.codec_capabilities.clone();
        if capabilities.is_empty() {
            let mut sets = device_sets.iter().filter(|s| !s.capabilities.is_empty());
            if let Some(first) = sets.next() {
                capabilities = first.capabilities.clone();
                for set in sets {
                    capabilities.retain(|c| set.capabilities.contains(c));
                }
            }
        }

        if preferences.is_empty() {
            preferences = fallback.preferences.clone();
        }
        if capabilities.is_empty() {
            capabilities = fallback.capabilities.clone();
        }
        debug!("{}: codecs now {:?} / {:?}", self.name(), preferences, capabilities);
        *self.codecs.write() = CodecSets::new(preferences, capabilities);
    }
}

impl std::fmt::Debug for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Line")
            .field("name", &self.config.name)
            .field("devices", &self.device_count())
            .field("channels", &self.channel_count())
            .finish()
    }
}
