//! Digit collection and dialing

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::Channel;
use crate::collaborators::ControlSignal;
use crate::context::SccpContext;
use crate::errors::{Result, SccpError};
use crate::types::{ChannelState, Party};

impl SccpContext {
    /// Keypad digit pressed while `channel` is the device's active call.
    ///
    /// Before the call is dialed the digit extends the number and restarts
    /// the inter-digit timer; `#` dials immediately. Once the call is up the
    /// digit is passed to the routing engine as DTMF.
    pub async fn keypad_digit(&self, channel: &Arc<Channel>, digit: char) -> Result<()> {
        match channel.state() {
            ChannelState::OffHook | ChannelState::DigitsFoll => {
                if digit == '#' {
                    return self.dial(channel).await;
                }
                channel.with_data_mut(|d| d.dialed_number.push(digit));
                if channel.state() == ChannelState::OffHook {
                    self.indicate(None, channel, ChannelState::DigitsFoll);
                }
                self.schedule_digit_timeout(channel);
                Ok(())
            }
            ChannelState::Connected | ChannelState::Proceed | ChannelState::Progress | ChannelState::RingOut => {
                self.collaborators()
                    .routing
                    .queue_control(channel.call_id(), ControlSignal::Digit(digit));
                Ok(())
            }
            state => {
                debug!("{}: ignoring digit {} in state {}", channel.call_id(), digit, state);
                Ok(())
            }
        }
    }

    /// Hand the collected number to the routing engine
    pub async fn dial(&self, channel: &Arc<Channel>) -> Result<()> {
        let number = channel.dialed_number();
        if let Some(task) = channel.with_data_mut(|d| d.digit_timeout.take()) {
            task.cancel();
        }
        if number.is_empty() {
            debug!("{}: nothing to dial", channel.call_id());
            return Ok(());
        }
        channel.update_call_info(|info| info.called = Party::new("", number.clone()));
        self.indicate(None, channel, ChannelState::Dialing);
        info!("{}: dialing {}", channel.call_id(), number);

        if let Err(e) = self.collaborators().routing.begin_dial(channel.call_id(), &number).await {
            warn!("{}: routing could not dial {}: {}", channel.call_id(), number, e);
            self.indicate(None, channel, ChannelState::Congestion);
            self.schedule_hangup(channel);
            return Err(SccpError::collaborator("routing engine", e));
        }
        Ok(())
    }

    fn schedule_digit_timeout(&self, channel: &Arc<Channel>) {
        let Some(context) = self.strong_self() else {
            return;
        };
        let weak = Arc::downgrade(&context);
        let handle = channel.handle();
        let task = self
            .scheduler()
            .schedule_after("digit-timeout", self.config().digit_timeout(), async move {
                let Some(context) = weak.upgrade() else {
                    return;
                };
                let Some(channel) = context.retain_channel(handle) else {
                    return;
                };
                if let Err(e) = context.dial(&channel).await {
                    debug!("{}: dial after digit timeout failed: {}", channel.call_id(), e);
                }
            });
        match task {
            Ok(task) => channel.with_data_mut(|d| {
                if let Some(old) = d.digit_timeout.replace(task) {
                    old.cancel();
                }
            }),
            Err(e) => warn!("{}: cannot start digit timer: {}", channel.call_id(), e),
        }
    }
}
