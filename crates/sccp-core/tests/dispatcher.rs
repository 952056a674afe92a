//! Phone events driven through `SccpContext::handle`

mod common;

use common::*;
use rvoip_sccp_core::collaborators::ControlSignal;
use rvoip_sccp_core::testing::RoutingCall;
use rvoip_sccp_core::types::Codec;
use rvoip_sccp_core::{ChannelState, DeviceEvent, DeviceId, DndMode, Party, SccpError, SessionHandle, Softkey};

fn softkey(key: Softkey) -> DeviceEvent {
    DeviceEvent::Softkey {
        key,
        line_instance: None,
        call_id: None,
    }
}

#[tokio::test]
async fn test_register_through_handle() {
    let harness = harness();
    let ctx = &harness.context;
    let session = SessionHandle::new();

    ctx.handle(
        DeviceEvent::Register {
            device: DeviceId::new("SEP0003"),
        },
        &session,
    )
    .await
    .unwrap();

    let device = ctx.device_for_session(&session).unwrap();
    assert_eq!(device.id(), &DeviceId::new("SEP0003"));
    assert!(device.is_registered());
    assert_eq!(ctx.line_state("200").unwrap().state, ChannelState::OnHook);
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let harness = harness();
    let result = harness.context.handle(DeviceEvent::OnHook, &SessionHandle::new()).await;
    assert!(matches!(result, Err(SccpError::DeviceNotFound(_))));
}

#[tokio::test]
async fn test_offhook_digits_and_pound_dial() {
    let harness = harness();
    let ctx = &harness.context;
    let phone = register(&harness, "SEP0003");

    ctx.handle(DeviceEvent::OffHook { line_instance: None }, &phone.session)
        .await
        .unwrap();
    let channel = ctx.active_channel(&phone.device).unwrap();
    assert_eq!(channel.state(), ChannelState::OffHook);

    for digit in ['5', '5', '5'] {
        ctx.handle(DeviceEvent::KeypadDigit(digit), &phone.session).await.unwrap();
    }
    assert_eq!(channel.state(), ChannelState::DigitsFoll);
    assert_eq!(channel.dialed_number(), "555");

    ctx.handle(DeviceEvent::KeypadDigit('#'), &phone.session).await.unwrap();

    assert_eq!(channel.state(), ChannelState::Dialing);
    assert!(harness.routing.calls().contains(&RoutingCall::BeginDial {
        call_id: channel.call_id(),
        number: "555".to_string(),
    }));
}

#[tokio::test]
async fn test_digit_on_connected_call_is_dtmf() {
    let harness = harness();
    let ctx = &harness.context;
    let phone = register(&harness, "SEP0003");
    let channel = connected_call(&harness, &phone, "200", "555").await;

    ctx.handle(DeviceEvent::KeypadDigit('7'), &phone.session).await.unwrap();

    assert_eq!(
        harness.routing.controls_for(channel.call_id()),
        vec![ControlSignal::Digit('7')]
    );
    assert_eq!(channel.dialed_number(), "555");
}

#[tokio::test]
async fn test_offhook_answers_ringing_call() {
    let harness = harness();
    let ctx = &harness.context;
    let phone = register(&harness, "SEP0003");
    let ringing = ctx.incoming_call("200", Party::new("Bob", "555")).await.unwrap();

    ctx.handle(DeviceEvent::OffHook { line_instance: None }, &phone.session)
        .await
        .unwrap();

    assert_eq!(ringing.state(), ChannelState::Connected);
    assert_eq!(
        ctx.active_channel(&phone.device).map(|c| c.call_id()),
        Some(ringing.call_id())
    );
    assert_eq!(ctx.channel_count(), 1);
}

#[tokio::test]
async fn test_onhook_ends_active_call() {
    let harness = harness();
    let ctx = &harness.context;
    let phone = register(&harness, "SEP0003");
    let channel = connected_call(&harness, &phone, "200", "555").await;

    ctx.handle(DeviceEvent::OnHook, &phone.session).await.unwrap();

    assert!(channel.is_destroyed());
    assert!(ctx.active_channel(&phone.device).is_none());
    assert_eq!(ctx.channel_count(), 0);
    // hanging up an idle phone is harmless
    ctx.handle(DeviceEvent::OnHook, &phone.session).await.unwrap();
}

#[tokio::test]
async fn test_hold_and_resume_softkeys() {
    let harness = harness();
    let ctx = &harness.context;
    let phone = register(&harness, "SEP0003");
    let channel = connected_call(&harness, &phone, "200", "555").await;

    ctx.handle(softkey(Softkey::Hold), &phone.session).await.unwrap();
    assert_eq!(channel.state(), ChannelState::Hold);
    assert!(ctx.active_channel(&phone.device).is_none());

    ctx.handle(
        DeviceEvent::Softkey {
            key: Softkey::Resume,
            line_instance: None,
            call_id: Some(channel.call_id()),
        },
        &phone.session,
    )
    .await
    .unwrap();
    assert_eq!(channel.state(), ChannelState::Connected);
    assert!(ctx.claims_consistent());
}

#[tokio::test]
async fn test_softkey_without_call_is_not_found() {
    let harness = harness();
    let phone = register(&harness, "SEP0003");

    let result = harness.context.handle(softkey(Softkey::Hold), &phone.session).await;

    assert!(matches!(result, Err(SccpError::ChannelNotFound(_))));
}

#[tokio::test]
async fn test_answer_softkey_picks_ringing_call() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    let ringing = ctx.incoming_call("100", Party::new("Bob", "555")).await.unwrap();

    ctx.handle(softkey(Softkey::Answer), &second.session).await.unwrap();

    assert_eq!(ringing.state(), ChannelState::Connected);
    assert_eq!(
        ctx.claimed_device(&ringing).map(|d| d.id().clone()),
        Some(second.device.id().clone())
    );
    assert!(ctx.active_channel(&first.device).is_none());
}

#[tokio::test]
async fn test_dnd_softkey_cycles_modes() {
    let harness = harness();
    let ctx = &harness.context;
    let phone = register(&harness, "SEP0003");

    ctx.handle(softkey(Softkey::Dnd), &phone.session).await.unwrap();
    assert_eq!(phone.device.dnd(), DndMode::Reject);
    assert_eq!(ctx.line_state("200").unwrap().state, ChannelState::Dnd);

    ctx.handle(softkey(Softkey::Dnd), &phone.session).await.unwrap();
    assert_eq!(phone.device.dnd(), DndMode::Silent);
    assert_eq!(ctx.line_state("200").unwrap().state, ChannelState::OnHook);

    ctx.handle(softkey(Softkey::Dnd), &phone.session).await.unwrap();
    assert_eq!(phone.device.dnd(), DndMode::Off);
}

#[tokio::test]
async fn test_capabilities_report_updates_codecs() {
    let harness = harness();
    let ctx = &harness.context;
    let phone = register(&harness, "SEP0003");

    ctx.handle(
        DeviceEvent::CapabilitiesReport {
            codecs: vec![Codec::G722, Codec::G711Alaw],
        },
        &phone.session,
    )
    .await
    .unwrap();

    let codecs = phone.device.codecs();
    assert!(codecs.capabilities.contains(&Codec::G722));
    assert!(codecs.capabilities.contains(&Codec::G711Alaw));
}

#[tokio::test]
async fn test_unregister_event_releases_device() {
    let harness = harness();
    let ctx = &harness.context;
    let phone = register(&harness, "SEP0003");
    let _channel = connected_call(&harness, &phone, "200", "555").await;

    ctx.handle(DeviceEvent::Unregister, &phone.session).await.unwrap();

    assert!(!phone.device.is_registered());
    assert!(ctx.device_for_session(&phone.session).is_none());
    assert!(ctx.claims_consistent());
}

#[tokio::test]
async fn test_conference_softkeys_join_calls() {
    let harness = harness();
    let ctx = &harness.context;
    let phone = register(&harness, "SEP0003");
    let first = connected_call(&harness, &phone, "200", "555").await;

    ctx.handle(softkey(Softkey::Conference), &phone.session).await.unwrap();

    let conference = phone.device.conference().unwrap();
    assert_eq!(first.state(), ChannelState::CallConference);
    assert_eq!(first.conference(), Some(conference.clone()));
    let consult = ctx.active_channel(&phone.device).unwrap();
    assert_ne!(consult.call_id(), first.call_id());
    assert_eq!(consult.state(), ChannelState::OffHook);

    for digit in ['6', '0', '0', '#'] {
        ctx.handle(DeviceEvent::KeypadDigit(digit), &phone.session).await.unwrap();
    }
    ctx.remote_indication(consult.call_id(), ChannelState::Connected);
    ctx.handle(softkey(Softkey::Conference), &phone.session).await.unwrap();

    assert_eq!(consult.state(), ChannelState::ConnectedConference);
    assert_eq!(first.state(), ChannelState::ConnectedConference);
    assert_eq!(ctx.conference_participants(&conference).len(), 2);
    assert!(harness
        .routing
        .controls_for(first.call_id())
        .contains(&ControlSignal::Unhold));
}

#[tokio::test]
async fn test_pickup_softkey_takes_group_call() {
    let harness = harness();
    let ctx = &harness.context;
    let _reception = register(&harness, "SEP0001");
    let phone = register(&harness, "SEP0003");
    let ringing = ctx.incoming_call("100", Party::new("Bob", "5551234")).await.unwrap();

    ctx.handle(softkey(Softkey::Pickup), &phone.session).await.unwrap();

    assert!(ringing.is_destroyed());
    let picked = ctx.active_channel(&phone.device).unwrap();
    assert_eq!(picked.state(), ChannelState::Connected);
    assert!(harness.routing.calls().contains(&RoutingCall::Pickup {
        picker: picked.call_id(),
        target: ringing.call_id(),
    }));
}

#[tokio::test]
async fn test_barge_softkey_finds_peer_call() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    let target = connected_call(&harness, &first, "100", "555").await;

    ctx.handle(softkey(Softkey::Barge), &second.session).await.unwrap();

    assert_eq!(target.state(), ChannelState::ConnectedConference);
    let leg = ctx.active_channel(&second.device).unwrap();
    assert_eq!(leg.conference(), target.conference());

    let idle = register(&harness, "SEP0003");
    let result = ctx.handle(softkey(Softkey::Barge), &idle.session).await;
    assert!(matches!(result, Err(SccpError::ChannelNotFound(_))));
}
