//! Attended transfer
//!
//! The first transfer press on a connected call holds it, records it as the
//! transferee in the device's transfer slot and opens a consultation call on
//! the same line. Pressing transfer again on the consultation call hands both
//! far ends to the routing engine and ends the two local legs.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Channel, KEY_NOT_ACTIVE};
use crate::collaborators::ControlSignal;
use crate::context::SccpContext;
use crate::device::{Device, TransferPair};
use crate::errors::{Result, SccpError};
use crate::types::{ChannelState, HoldReason, Tone};

const TRANSFER_DISABLED: &str = "Transfer disabled";
const TRANSFER_FAILED: &str = "Can not complete transfer";

impl SccpContext {
    pub async fn transfer(&self, channel: &Arc<Channel>, device: &Arc<Device>) -> Result<()> {
        let line = channel.line().clone();
        if !device.transfer_enabled() || !line.transfer_enabled() {
            debug!("{}: transfer disabled on {}", device.id(), line.name());
            self.display_prompt(device, channel, TRANSFER_DISABLED);
            return Err(SccpError::FeatureDisabled("transfer".to_string()));
        }

        match device.transfer_pair() {
            Some(pair) if pair.transferer == Some(channel.handle()) => self.complete_transfer(device, channel, pair).await,
            Some(pair) if pair.transferee == channel.handle() => {
                self.display_prompt(device, channel, KEY_NOT_ACTIVE);
                Err(SccpError::invalid_state("transfer", channel.call_id(), channel.state()))
            }
            _ => self.start_transfer(channel, device).await,
        }
    }

    async fn start_transfer(&self, channel: &Arc<Channel>, device: &Arc<Device>) -> Result<()> {
        let state = channel.state();
        if state.is_holdable() {
            self.hold(channel, Some(device), HoldReason::Normal)?;
        } else if state != ChannelState::Hold {
            self.display_prompt(device, channel, TRANSFER_FAILED);
            return Err(SccpError::invalid_state("transfer", channel.call_id(), state));
        }
        info!("{}: Transfer channel {}", device.id(), channel.call_id());

        device.set_transfer_pair(Some(TransferPair {
            transferee: channel.handle(),
            transferer: None,
        }));
        self.indicate(Some(device), channel, ChannelState::CallTransfer);

        let transferer = match self.new_call(channel.line(), device, None).await {
            Ok(transferer) => transferer,
            Err(e) => {
                warn!("{}: no consultation call for transfer: {}", device.id(), e);
                device.clear_transfer_if(channel.handle());
                self.indicate(Some(device), channel, ChannelState::Hold);
                return Err(e);
            }
        };
        transferer.set_priority(channel.snapshot().priority);
        device.set_transferer(transferer.handle());
        debug!(
            "{}: transfer pair {} -> {}",
            device.id(),
            channel.call_id(),
            transferer.call_id()
        );
        Ok(())
    }

    async fn complete_transfer(&self, device: &Arc<Device>, destination: &Arc<Channel>, pair: TransferPair) -> Result<()> {
        let Some(transferee) = self.retain_channel(pair.transferee) else {
            device.clear_transfer_if(destination.handle());
            self.transfer_failed(device, destination);
            return Err(SccpError::ChannelNotFound(format!("transferee of {}", destination.call_id())));
        };
        let destination_state = destination.state();
        if !matches!(destination_state, ChannelState::RingOut | ChannelState::Connected) {
            self.transfer_failed(device, destination);
            return Err(SccpError::invalid_state("complete transfer", destination.call_id(), destination_state));
        }
        info!(
            "{}: completing transfer of {} to {}",
            device.id(),
            transferee.call_id(),
            destination.call_id()
        );

        let routing = &self.collaborators().routing;
        if routing.bridged_peer(transferee.call_id()).is_none() {
            warn!("{}: {} has no far end left to transfer", device.id(), transferee.call_id());
            self.transfer_failed(device, destination);
            device.clear_transfer_if(transferee.handle());
            self.indicate(Some(device), &transferee, ChannelState::Hold);
            return Err(SccpError::ChannelNotFound(format!("bridged peer of {}", transferee.call_id())));
        }
        if let Err(e) = routing.attended_transfer(transferee.call_id(), destination.call_id()).await {
            warn!("{}: routing engine refused transfer: {}", device.id(), e);
            self.transfer_failed(device, destination);
            device.clear_transfer_if(transferee.handle());
            self.indicate(Some(device), &transferee, ChannelState::Hold);
            return Err(SccpError::collaborator("routing engine", e));
        }
        device.clear_transfer_if(transferee.handle());

        let transferee_info = transferee.call_info();
        let destination_info = destination.call_info();
        let redirecting = destination.line().caller_id();
        destination.update_call_info(|info| {
            info.original_calling = transferee_info.calling.clone();
            info.last_redirecting = redirecting.clone();
        });
        transferee.update_call_info(|info| {
            info.original_called = info.called.clone();
            info.called = destination_info.called.clone();
            info.last_redirecting = redirecting;
        });

        let signal = if destination_state == ChannelState::RingOut {
            ControlSignal::Ringing
        } else {
            ControlSignal::Unhold
        };
        routing.queue_control(transferee.call_id(), signal);

        self.end_call(destination);
        self.end_call(&transferee);
        Ok(())
    }

    fn transfer_failed(&self, device: &Device, channel: &Channel) {
        self.play_tone(device, channel, Tone::BeepBonk);
        self.display_prompt(device, channel, TRANSFER_FAILED);
    }
}
