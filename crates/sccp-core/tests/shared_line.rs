//! Shared-line propagation between the phones of one line

mod common;

use common::*;
use rvoip_sccp_core::collaborators::ControlSignal;
use rvoip_sccp_core::testing::TestHarness;
use rvoip_sccp_core::types::{CallVisibility, KeySet, RingerMode, Tone};
use rvoip_sccp_core::{
    ChannelState, DeviceEvent, DeviceMessage, DndMode, HoldReason, Party, SccpError, Softkey, SubscriptionId,
};

#[tokio::test]
async fn test_inbound_call_rings_every_phone() {
    let harness = harness();
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");

    let channel = harness
        .context
        .incoming_call("100", Party::new("Bob", "5551234"))
        .await
        .unwrap();

    assert_eq!(channel.state(), ChannelState::Ringing);
    for phone in [&first, &second] {
        let states = call_states(&harness.messages(&phone.session));
        assert!(states.contains(&ChannelState::Ringing), "{} did not ring", phone.device.id());
        assert!(prompts(&harness.messages(&phone.session)).contains(&"Incoming Call from: Bob".to_string()));
    }
}

#[tokio::test]
async fn test_answer_shows_remote_connected_on_peer() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    let channel = ctx.incoming_call("100", Party::new("Bob", "5551234")).await.unwrap();
    harness.transport.clear();

    ctx.answer(&channel, &first.device).unwrap();

    assert_eq!(channel.state(), ChannelState::Connected);
    assert_eq!(ctx.claimed_device(&channel).map(|d| d.id().clone()), Some(first.device.id().clone()));

    let peer = harness.messages(&second.session);
    assert!(peer.iter().any(|m| matches!(
        m,
        DeviceMessage::CallState {
            state: ChannelState::CallRemoteMultiline,
            visibility: CallVisibility::Default,
            ..
        }
    )));
    let info = peer.iter().find_map(|m| match m {
        DeviceMessage::CallInfo { info, .. } => Some(info.clone()),
        _ => None,
    });
    assert_eq!(info.map(|i| i.calling), Some(Party::new("Bob", "5551234")));
    assert!(peer.iter().any(|m| matches!(
        m,
        DeviceMessage::SelectSoftKeys {
            keyset: KeySet::OnHookStealable,
            ..
        }
    )));
    assert!(ctx.active_channel(&second.device).is_none());
    assert!(ctx.claims_consistent());
}

#[tokio::test]
async fn test_private_call_is_hidden_on_peer() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    ctx.set_privacy(&first.device, true);
    harness.transport.clear();

    let channel = connected_call(&harness, &first, "100", "555").await;
    assert!(channel.is_private());

    let peer = harness.messages(&second.session);
    assert!(peer.iter().any(|m| matches!(
        m,
        DeviceMessage::CallState {
            state: ChannelState::CallRemoteMultiline,
            visibility: CallVisibility::Hidden,
            ..
        }
    )));
    for message in &peer {
        if let DeviceMessage::CallInfo { info, .. } = message {
            assert!(info.calling.is_empty());
            assert!(info.called.is_empty());
        }
    }
}

#[tokio::test]
async fn test_hangup_clears_peer() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    let channel = connected_call(&harness, &first, "100", "555").await;
    harness.transport.clear();

    ctx.end_call(&channel);

    let states = call_states(&harness.messages(&second.session));
    assert_eq!(states.last(), Some(&ChannelState::OnHook));
}

#[tokio::test]
async fn test_feature_hold_not_shown_on_peer() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    let normal = connected_call(&harness, &first, "100", "555").await;
    harness.transport.clear();

    ctx.hold(&normal, None, HoldReason::Normal).unwrap();
    assert!(call_states(&harness.messages(&second.session)).contains(&ChannelState::Hold));

    let barge = connected_call(&harness, &first, "100", "556").await;
    harness.transport.clear();
    ctx.hold(&barge, None, HoldReason::Barge).unwrap();
    assert!(!call_states(&harness.messages(&second.session)).contains(&ChannelState::Hold));
}

#[tokio::test]
async fn test_peer_on_same_logical_call_is_skipped() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    let theirs = ctx
        .new_call(&ctx.line("100").unwrap(), &second.device, Some("700"))
        .await
        .unwrap();
    theirs.set_linked_id("bridge-1");
    let ours = ctx
        .new_call(&ctx.line("100").unwrap(), &first.device, Some("701"))
        .await
        .unwrap();
    ours.set_linked_id("bridge-1");
    harness.transport.clear();

    ctx.remote_indication(ours.call_id(), ChannelState::Connected);

    let states = call_states(&harness.messages(&second.session));
    assert!(!states.contains(&ChannelState::CallRemoteMultiline));
}

#[tokio::test]
async fn test_unregistered_peer_gets_nothing() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    ctx.unregister_device(second.device.id());
    harness.transport.clear();

    let _channel = connected_call(&harness, &first, "100", "555").await;

    assert!(harness.messages(&second.session).is_empty());
}

#[tokio::test]
async fn test_dnd_reject_skips_device() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    ctx.set_dnd(&second.device, DndMode::Reject);
    harness.transport.clear();

    let _channel = ctx.incoming_call("100", Party::new("Bob", "555")).await.unwrap();

    assert!(call_states(&harness.messages(&first.session)).contains(&ChannelState::Ringing));
    assert!(!call_states(&harness.messages(&second.session)).contains(&ChannelState::Ringing));
}

#[tokio::test]
async fn test_line_busy_when_everyone_rejects() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    ctx.set_dnd(&first.device, DndMode::Reject);
    ctx.set_dnd(&second.device, DndMode::Reject);

    let result = ctx.incoming_call("100", Party::new("Bob", "555")).await;

    assert!(matches!(result, Err(SccpError::LineBusy(_))));
    assert_eq!(ctx.channel_count(), 0);
}

#[tokio::test]
async fn test_silent_dnd_rings_without_ringer() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    ctx.set_dnd(&first.device, DndMode::Silent);
    harness.transport.clear();

    let _channel = ctx.incoming_call("100", Party::new("Bob", "555")).await.unwrap();

    let ringers: Vec<_> = harness
        .messages(&first.session)
        .into_iter()
        .filter_map(|m| match m {
            DeviceMessage::SetRinger { mode, .. } => Some(mode),
            _ => None,
        })
        .collect();
    assert_eq!(ringers, vec![rvoip_sccp_core::types::RingerMode::Off]);
}

#[tokio::test]
async fn test_caller_hangup_stops_ringing_everywhere() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    let channel = ctx.incoming_call("100", Party::new("Bob", "5551234")).await.unwrap();
    harness.transport.clear();

    ctx.remote_indication(channel.call_id(), ChannelState::Down);

    assert!(channel.is_destroyed());
    for phone in [&first, &second] {
        let messages = harness.messages(&phone.session);
        assert!(
            call_states(&messages).contains(&ChannelState::OnHook),
            "{} kept ringing",
            phone.device.id()
        );
        assert!(ringers(&messages).contains(&RingerMode::Off));
    }
    assert_eq!(ctx.channel_count(), 0);
    assert!(ctx.claims_consistent());
}

#[tokio::test]
async fn test_busy_peer_sees_call_waiting() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    let busy = connected_call(&harness, &second, "100", "555").await;
    harness.transport.clear();

    let channel = ctx.incoming_call("100", Party::new("Bob", "5551234")).await.unwrap();

    assert_eq!(channel.state(), ChannelState::Ringing);
    assert_eq!(busy.state(), ChannelState::Connected);
    let waiting = harness.messages(&second.session);
    assert!(waiting.iter().any(|m| matches!(
        m,
        DeviceMessage::StartTone { tone: Tone::CallWaiting, call_id, .. } if *call_id == channel.call_id()
    )));
    assert!(waiting.iter().any(|m| matches!(
        m,
        DeviceMessage::CallState { state: ChannelState::Ringing, call_id, .. } if *call_id == channel.call_id()
    )));
    let idle = harness.messages(&first.session);
    assert!(call_states(&idle).contains(&ChannelState::Ringing));
    assert!(!idle
        .iter()
        .any(|m| matches!(m, DeviceMessage::StartTone { tone: Tone::CallWaiting, .. })));

    ctx.handle(DeviceEvent::OffHook { line_instance: None }, &first.session)
        .await
        .unwrap();

    assert_eq!(channel.state(), ChannelState::Connected);
    assert_eq!(ctx.claimed_device(&channel).map(|d| d.id().clone()), Some(first.device.id().clone()));
    assert_eq!(busy.state(), ChannelState::Connected);
    assert!(ctx.claims_consistent());
}

#[tokio::test]
async fn test_answer_waiting_call_holds_active_one() {
    let harness = harness();
    let ctx = &harness.context;
    let _first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    let busy = connected_call(&harness, &second, "100", "555").await;
    let channel = ctx.incoming_call("100", Party::new("Bob", "5551234")).await.unwrap();

    ctx.handle(
        DeviceEvent::Softkey {
            key: Softkey::Answer,
            line_instance: None,
            call_id: None,
        },
        &second.session,
    )
    .await
    .unwrap();

    assert_eq!(channel.state(), ChannelState::Connected);
    assert_eq!(busy.state(), ChannelState::Hold);
    assert_eq!(ctx.active_channel(&second.device).map(|c| c.call_id()), Some(channel.call_id()));
    assert!(ctx.claims_consistent());
}

#[tokio::test]
async fn test_subscription_rings_matching_device_only() {
    let harness = TestHarness::new(subscription_config()).unwrap();
    let ctx = &harness.context;
    let desk = register(&harness, "SEP0011");
    let lab = register(&harness, "SEP0012");

    let channel = ctx
        .incoming_call_for("500", Party::new("Bob", "5551234"), Some(SubscriptionId::new("11")))
        .await
        .unwrap();

    assert_eq!(channel.subscription(), Some(SubscriptionId::new("11")));
    assert!(call_states(&harness.messages(&desk.session)).contains(&ChannelState::Ringing));
    assert!(harness.messages(&lab.session).iter().all(|m| !matches!(
        m,
        DeviceMessage::CallState { call_id, .. } if *call_id == channel.call_id()
    )));
    assert!(channel.is_presented_to(desk.device.id()));
    assert!(!channel.is_presented_to(lab.device.id()));

    ctx.answer(&channel, &desk.device).unwrap();

    assert_eq!(channel.call_info().called, Party::new("Support desk", "50011"));
}

#[tokio::test]
async fn test_unaddressed_call_rings_every_subscription() {
    let harness = TestHarness::new(subscription_config()).unwrap();
    let ctx = &harness.context;
    let desk = register(&harness, "SEP0011");
    let lab = register(&harness, "SEP0012");

    let channel = ctx.incoming_call("500", Party::new("Bob", "5551234")).await.unwrap();

    assert!(channel.is_presented_to(desk.device.id()));
    assert!(channel.is_presented_to(lab.device.id()));
    ctx.answer(&channel, &lab.device).unwrap();
    assert_eq!(channel.call_info().called, Party::new("Support lab", "50012"));
}

#[tokio::test]
async fn test_barge_joins_peer_call() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let second = register(&harness, "SEP0002");
    let target = connected_call(&harness, &first, "100", "555").await;
    harness.transport.clear();

    let leg = ctx.barge(&target, &second.device).await.unwrap();

    assert_eq!(target.state(), ChannelState::ConnectedConference);
    assert_eq!(leg.state(), ChannelState::ConnectedConference);
    let conference = first.device.conference().expect("conference on owner");
    assert_eq!(target.conference(), Some(conference.clone()));
    assert_eq!(leg.conference(), Some(conference.clone()));
    assert_eq!(ctx.conference_participants(&conference).len(), 2);
    assert!(!call_states(&harness.messages(&second.session)).contains(&ChannelState::Hold));
    assert!(harness
        .routing
        .controls_for(target.call_id())
        .contains(&ControlSignal::Unhold));
    assert_eq!(ctx.active_channel(&first.device).map(|c| c.call_id()), Some(target.call_id()));
    assert_eq!(ctx.active_channel(&second.device).map(|c| c.call_id()), Some(leg.call_id()));
    assert!(ctx.claims_consistent());
}

#[tokio::test]
async fn test_barge_needs_a_peer_call() {
    let harness = harness();
    let ctx = &harness.context;
    let first = register(&harness, "SEP0001");
    let _second = register(&harness, "SEP0002");
    let own = connected_call(&harness, &first, "100", "555").await;

    let result = ctx.barge(&own, &first.device).await;

    assert!(matches!(result, Err(SccpError::InvalidState { operation: "barge", .. })));
    assert_eq!(own.state(), ChannelState::Connected);
    assert!(harness.mixer.calls().is_empty());
}
