//! Paired claim / active-channel slots
//!
//! A channel's claimed device and a device's active channel are two views of
//! the same fact. Both maps live behind one lock and are only written through
//! [`ClaimTable::claim`] and the release methods, so no reader observes one
//! side updated without the other.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use crate::channel::Channel;
use crate::refcount::Handle;
use crate::types::DeviceId;

/// Outcome of a claim that displaced earlier pairings
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ClaimChange {
    /// Channel that was active on the claiming device before
    pub displaced_channel: Option<Handle<Channel>>,
    /// Device that had claimed the channel before
    pub previous_device: Option<DeviceId>,
}

#[derive(Default)]
struct ClaimInner {
    by_channel: HashMap<Handle<Channel>, DeviceId>,
    by_device: HashMap<DeviceId, Handle<Channel>>,
}

#[derive(Default)]
pub struct ClaimTable {
    inner: Mutex<ClaimInner>,
}

impl ClaimTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `device` the claimer of `channel` and `channel` the device's active one
    pub fn claim(&self, channel: Handle<Channel>, device: &DeviceId) -> ClaimChange {
        let mut inner = self.inner.lock();
        let mut change = ClaimChange::default();

        if let Some(previous) = inner.by_channel.remove(&channel) {
            if &previous != device {
                inner.by_device.remove(&previous);
                change.previous_device = Some(previous);
            }
        }
        if let Some(displaced) = inner.by_device.remove(device) {
            if displaced != channel {
                inner.by_channel.remove(&displaced);
                change.displaced_channel = Some(displaced);
            }
        }
        inner.by_channel.insert(channel, device.clone());
        inner.by_device.insert(device.clone(), channel);
        debug!("{}: claimed channel {:?}", device, channel);
        change
    }

    /// Clear the claim of `channel`, returning the device that held it
    pub fn release_channel(&self, channel: Handle<Channel>) -> Option<DeviceId> {
        let mut inner = self.inner.lock();
        let device = inner.by_channel.remove(&channel)?;
        if inner.by_device.get(&device) == Some(&channel) {
            inner.by_device.remove(&device);
        }
        Some(device)
    }

    /// Clear the active-channel slot of `device`, returning the channel it held
    pub fn release_device(&self, device: &DeviceId) -> Option<Handle<Channel>> {
        let mut inner = self.inner.lock();
        let channel = inner.by_device.remove(device)?;
        inner.by_channel.remove(&channel);
        Some(channel)
    }

    pub fn claimed_device(&self, channel: Handle<Channel>) -> Option<DeviceId> {
        self.inner.lock().by_channel.get(&channel).cloned()
    }

    pub fn active_channel(&self, device: &DeviceId) -> Option<Handle<Channel>> {
        self.inner.lock().by_device.get(device).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every pairing is mirrored in both directions
    pub fn is_consistent(&self) -> bool {
        let inner = self.inner.lock();
        inner.by_channel.len() == inner.by_device.len()
            && inner
                .by_channel
                .iter()
                .all(|(channel, device)| inner.by_device.get(device) == Some(channel))
    }
}
