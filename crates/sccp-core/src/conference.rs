//! Conference membership bookkeeping
//!
//! Audio mixing belongs to the external mixer; the core only remembers which
//! channels take part in which conference and which device moderates it.
//! Joining and leaving the mixer can block, so those calls run on the
//! background pool and never on the signalling path.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::channel::{Channel, KEY_NOT_ACTIVE};
use crate::context::SccpContext;
use crate::device::Device;
use crate::errors::{Result, SccpError};
use crate::refcount::Handle;
use crate::types::{ChannelState, ConferenceId, DeviceId, HoldReason, Tone};

#[derive(Debug, Clone)]
pub struct ConferenceRecord {
    pub id: ConferenceId,
    pub moderator: DeviceId,
    pub participants: Vec<Handle<Channel>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ConferenceRegistry {
    conferences: DashMap<ConferenceId, ConferenceRecord>,
}

impl ConferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, id: ConferenceId, moderator: DeviceId) {
        self.conferences.insert(
            id.clone(),
            ConferenceRecord {
                id,
                moderator,
                participants: Vec::new(),
                created_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, id: &ConferenceId) -> Option<ConferenceRecord> {
        self.conferences.get(id).map(|c| c.value().clone())
    }

    pub(crate) fn add_participant(&self, id: &ConferenceId, channel: Handle<Channel>) -> bool {
        match self.conferences.get_mut(id) {
            Some(mut record) => {
                if !record.participants.contains(&channel) {
                    record.participants.push(channel);
                }
                true
            }
            None => false,
        }
    }

    /// Participants left after removing `channel`, `None` for an unknown conference
    pub(crate) fn remove_participant(&self, id: &ConferenceId, channel: Handle<Channel>) -> Option<usize> {
        let mut record = self.conferences.get_mut(id)?;
        record.participants.retain(|p| *p != channel);
        Some(record.participants.len())
    }

    pub(crate) fn remove(&self, id: &ConferenceId) -> Option<ConferenceRecord> {
        self.conferences.remove(id).map(|(_, record)| record)
    }

    pub fn ids(&self) -> Vec<ConferenceId> {
        self.conferences.iter().map(|c| c.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.conferences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conferences.is_empty()
    }
}

impl SccpContext {
    /// Conference key pressed on `channel`.
    ///
    /// Without a conference on the device the channel is held, a conference
    /// is created around it and a consultation call opened. With one, the
    /// channel and the device's held conference legs are joined.
    pub async fn conference(&self, channel: &Arc<Channel>, device: &Arc<Device>) -> Result<()> {
        match device.conference() {
            Some(id) if channel.conference().as_ref() != Some(&id) => self.join_conference(&id, channel, device),
            Some(_) => {
                self.display_prompt(device, channel, KEY_NOT_ACTIVE);
                Err(SccpError::invalid_state("conference", channel.call_id(), channel.state()))
            }
            None => self.start_conference(channel, device).await,
        }
    }

    async fn start_conference(&self, channel: &Arc<Channel>, device: &Arc<Device>) -> Result<()> {
        let state = channel.state();
        if !state.is_holdable() {
            self.display_prompt(device, channel, KEY_NOT_ACTIVE);
            return Err(SccpError::invalid_state("conference", channel.call_id(), state));
        }
        let id = self
            .collaborators()
            .mixer
            .create_conference(channel.call_id())
            .await
            .map_err(|e| SccpError::collaborator("conference mixer", e))?;
        info!("{}: conference {} created around {}", device.id(), id, channel.call_id());

        self.conferences().insert(id.clone(), device.id().clone());
        device.set_conference(Some(id.clone()));
        self.hold(channel, Some(device), HoldReason::Feature)?;
        self.add_to_conference(&id, channel);
        self.indicate(Some(device), channel, ChannelState::CallConference);

        if let Err(e) = self.new_call(channel.line(), device, None).await {
            warn!("{}: no consultation call for conference: {}", device.id(), e);
            self.conference_remove(channel);
            self.resume(channel, Some(device), true)?;
            return Err(e);
        }
        Ok(())
    }

    /// Join `device` into a call another device of the same line has up.
    ///
    /// The call is held for the moment it takes to build a conference around
    /// it; that hold is never shown on shared-line peers. The barging device
    /// gets its own leg in the conference, and the original device is taken
    /// off hold into the conference as well.
    pub async fn barge(&self, target: &Arc<Channel>, device: &Arc<Device>) -> Result<Arc<Channel>> {
        let line = target.line().clone();
        let owner = self.claimed_device(target).filter(|owner| owner.id() != device.id());
        let (Some(owner), ChannelState::Connected) = (owner, target.state()) else {
            debug!("{}: nothing to barge into on {}", device.id(), target.call_id());
            self.display_prompt(device, target, KEY_NOT_ACTIVE);
            return Err(SccpError::invalid_state("barge", target.call_id(), target.state()));
        };
        if device.line_device(line.name()).is_none() || target.conference().is_some() {
            self.display_prompt(device, target, KEY_NOT_ACTIVE);
            return Err(SccpError::invalid_state("barge", target.call_id(), target.state()));
        }
        if let Some(active) = self.active_channel(device) {
            self.hold_or_end(device, &active);
        }

        let id = self
            .collaborators()
            .mixer
            .create_conference(target.call_id())
            .await
            .map_err(|e| SccpError::collaborator("conference mixer", e))?;
        info!("{}: barging into {} through conference {}", device.id(), target.call_id(), id);
        self.conferences().insert(id.clone(), owner.id().clone());
        owner.set_conference(Some(id.clone()));
        self.hold(target, Some(&owner), HoldReason::Barge)?;
        self.add_to_conference(&id, target);

        let leg = match self.barge_leg(target, device).await {
            Ok(leg) => leg,
            Err(e) => {
                warn!("{}: barge into {} failed: {}", device.id(), target.call_id(), e);
                self.conference_remove(target);
                self.resume(target, Some(&owner), true)?;
                return Err(e);
            }
        };
        self.add_to_conference(&id, &leg);

        self.collaborators()
            .routing
            .queue_control(target.call_id(), crate::collaborators::ControlSignal::Unhold);
        self.claim_device(target, Some(&owner));
        target.with_data_mut(|d| d.hold_reason = HoldReason::Normal);
        self.indicate(Some(&owner), target, ChannelState::ConnectedConference);
        line.statistics().unheld();
        self.indicate(Some(device), &leg, ChannelState::ConnectedConference);
        Ok(leg)
    }

    /// Channel carrying the barging device's audio into the conference
    async fn barge_leg(&self, target: &Arc<Channel>, device: &Arc<Device>) -> Result<Arc<Channel>> {
        let line = target.line().clone();
        let leg = self.allocate_channel(&line, Some(device))?;
        let info = target.call_info();
        let linked_id = target.linked_id();
        leg.with_data_mut(|d| {
            d.call_type = crate::types::CallType::Outbound;
            d.call_info = info;
            d.linked_id = linked_id;
        });
        match self
            .collaborators()
            .routing
            .allocate_call_leg(leg.call_id(), line.name(), &line.config().context)
            .await
        {
            Ok(routing_leg) => {
                leg.with_data_mut(|d| d.leg = Some(routing_leg));
                Ok(leg)
            }
            Err(e) => {
                self.end_call(&leg);
                Err(SccpError::collaborator("routing engine", e))
            }
        }
    }

    fn join_conference(&self, id: &ConferenceId, channel: &Arc<Channel>, device: &Arc<Device>) -> Result<()> {
        let record = self
            .conferences()
            .get(id)
            .ok_or_else(|| SccpError::ChannelNotFound(format!("conference {}", id)))?;
        info!("{}: joining {} to conference {}", device.id(), channel.call_id(), id);

        self.add_to_conference(id, channel);
        self.indicate(Some(device), channel, ChannelState::ConnectedConference);

        for handle in record.participants {
            let Some(held) = self.retain_channel(handle) else {
                continue;
            };
            if held.state() == ChannelState::CallConference {
                self.collaborators()
                    .routing
                    .queue_control(held.call_id(), crate::collaborators::ControlSignal::Unhold);
                self.indicate(Some(device), &held, ChannelState::ConnectedConference);
                held.line().statistics().unheld();
            }
        }
        Ok(())
    }

    /// Record membership and ask the mixer, on the background pool, to bridge
    /// the channel in. A refused join ends the channel with a failure tone.
    fn add_to_conference(&self, id: &ConferenceId, channel: &Arc<Channel>) {
        self.conferences().add_participant(id, channel.handle());
        channel.with_data_mut(|d| d.conference = Some(id.clone()));

        let Some(context) = self.strong_self() else {
            return;
        };
        let weak = Arc::downgrade(&context);
        let mixer = self.collaborators().mixer.clone();
        let id = id.clone();
        let handle = channel.handle();
        let call_id = channel.call_id();
        let queued = self.threadpool().add_work(async move {
            let Err(e) = mixer.add_participant(&id, call_id).await else {
                debug!("{}: joined conference {}", call_id, id);
                return;
            };
            warn!("{}: mixer refused join to {}: {}", call_id, id, e);
            let Some(context) = weak.upgrade() else {
                return;
            };
            if let Some(channel) = context.retain_channel(handle) {
                if let Some(device) = context.device_of(&channel) {
                    context.play_tone(&device, &channel, Tone::BeepBonk);
                }
                context.end_call(&channel);
            }
        });
        if let Err(e) = queued {
            warn!("{}: cannot queue conference join: {}", channel.call_id(), e);
        }
    }

    /// Drop a channel from its conference; the last one out ends it
    pub(crate) fn conference_remove(&self, channel: &Channel) {
        let Some(id) = channel.with_data_mut(|d| d.conference.take()) else {
            return;
        };
        let remaining = self.conferences().remove_participant(&id, channel.handle());
        let mixer = self.collaborators().mixer.clone();
        let call_id = channel.call_id();
        let finished = remaining == Some(0);
        let record = if finished { self.conferences().remove(&id) } else { None };
        if let Some(record) = record.as_ref() {
            if let Some(moderator) = self.device(&record.moderator) {
                moderator.clear_conference_if(&id);
            }
            info!("{}: conference {} finished", record.moderator, id);
        }

        let queued = self.threadpool().add_work(async move {
            if let Err(e) = mixer.remove_participant(&id, call_id).await {
                debug!("{}: mixer remove from {} failed: {}", call_id, id, e);
            }
            if finished {
                if let Err(e) = mixer.end_conference(&id).await {
                    warn!("conference {}: mixer end failed: {}", id, e);
                }
            }
        });
        if let Err(e) = queued {
            debug!("{}: conference cleanup not queued: {}", call_id, e);
        }
    }

    /// End every channel of a conference
    pub fn end_conference(&self, id: &ConferenceId) {
        let Some(record) = self.conferences().get(id) else {
            return;
        };
        for handle in record.participants {
            if let Some(channel) = self.retain_channel(handle) {
                self.end_call(&channel);
            }
        }
    }

    pub fn conference_participants(&self, id: &ConferenceId) -> Vec<Arc<Channel>> {
        self.conferences()
            .get(id)
            .map(|record| {
                record
                    .participants
                    .into_iter()
                    .filter_map(|h| self.retain_channel(h))
                    .collect()
            })
            .unwrap_or_default()
    }
}
