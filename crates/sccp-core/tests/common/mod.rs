//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use rvoip_sccp_core::testing::TestHarness;
use rvoip_sccp_core::types::RingerMode;
use rvoip_sccp_core::{
    Channel, ChannelState, Device, DeviceConfig, DeviceMessage, LineConfig, SccpConfig, SessionHandle, SubscriptionConfig,
};

/// Line "100" shared by SEP0001 and SEP0002, line "200" on SEP0003 alone,
/// line "300" configured without devices. Lines 100 and 200 form the
/// "office" pickup group.
pub fn office_config() -> SccpConfig {
    SccpConfig::default()
        .with_line(
            LineConfig::new("100")
                .with_caller_id("Reception", "100")
                .with_pickup_group("office"),
        )
        .with_line(
            LineConfig::new("200")
                .with_caller_id("Alice", "200")
                .with_pickup_group("office"),
        )
        .with_line(LineConfig::new("300"))
        .with_device(DeviceConfig::new("SEP0001").with_line("100", 1))
        .with_device(DeviceConfig::new("SEP0002").with_line("100", 1))
        .with_device(DeviceConfig::new("SEP0003").with_line("200", 1))
}

pub fn harness() -> TestHarness {
    TestHarness::new(office_config()).expect("harness")
}

pub struct Phone {
    pub device: Arc<Device>,
    pub session: SessionHandle,
}

pub fn register(harness: &TestHarness, id: &str) -> Phone {
    let (device, session) = harness.register(id).expect("register");
    Phone { device, session }
}

/// Outbound call from `phone` on `line` taken to CONNECTED by the far end
pub async fn connected_call(harness: &TestHarness, phone: &Phone, line: &str, number: &str) -> Arc<Channel> {
    let ctx = &harness.context;
    let line = ctx.line(line).expect("line");
    let channel = ctx.new_call(&line, &phone.device, Some(number)).await.expect("new call");
    ctx.remote_indication(channel.call_id(), ChannelState::RingOut);
    ctx.remote_indication(channel.call_id(), ChannelState::Connected);
    assert_eq!(channel.state(), ChannelState::Connected);
    channel
}

/// Line "500" shared by SEP0011 and SEP0012 under subscriptions "11" and "12"
pub fn subscription_config() -> SccpConfig {
    SccpConfig::default()
        .with_line(LineConfig::new("500").with_caller_id("Support", "500"))
        .with_device(DeviceConfig::new("SEP0011").with_subscribed_line(
            "500",
            1,
            SubscriptionConfig::new("11", " desk"),
        ))
        .with_device(DeviceConfig::new("SEP0012").with_subscribed_line(
            "500",
            1,
            SubscriptionConfig::new("12", " lab"),
        ))
}

pub fn ringers(messages: &[DeviceMessage]) -> Vec<RingerMode> {
    messages
        .iter()
        .filter_map(|m| match m {
            DeviceMessage::SetRinger { mode, .. } => Some(*mode),
            _ => None,
        })
        .collect()
}

pub fn prompts(messages: &[DeviceMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            DeviceMessage::DisplayPrompt { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

pub fn call_states(messages: &[DeviceMessage]) -> Vec<ChannelState> {
    messages
        .iter()
        .filter_map(|m| match m {
            DeviceMessage::CallState { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}
