mod common;

use callin_lib::call::{CallOptions, CallState};
use callin_lib::error::CallError;
use callin_lib::peer::{ConnectionState, IceCandidate, SdpKind, SessionDescription, TransportEvent};
use callin_lib::relay::types::{EndCallPayload, BUSY_REASON};
use callin_lib::relay::{LocalRelayHub, RelayMessage};
use common::{eventually, phone, phone_with, registered, settle, Op};
use std::time::Duration;

fn offer_from(from: &str, to: &str) -> RelayMessage {
    RelayMessage::offer(SessionDescription::offer("v=0 remote-offer"), from, to)
}

fn answer_from(from: &str, to: &str) -> RelayMessage {
    RelayMessage::answer(SessionDescription::answer("v=0 remote-answer"), from, to)
}

fn candidate_from(from: &str, to: &str, text: &str) -> RelayMessage {
    RelayMessage::candidate(IceCandidate::new(text), from, to)
}

fn end_calls(messages: &[RelayMessage]) -> Vec<EndCallPayload> {
    messages
        .iter()
        .filter_map(|m| match m {
            RelayMessage::EndCall(p) => Some(p.clone()),
            _ => None,
        })
        .collect()
}

fn connected() -> TransportEvent {
    TransportEvent::ConnectionStateChanged(ConnectionState::Connected)
}

#[tokio::test(start_paused = true)]
async fn two_phones_call_talk_and_hang_up() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    let bob = phone(&hub, "bob");
    registered(&hub, "alice").await;
    registered(&hub, "bob").await;

    alice.handle.start_call("bob").await.unwrap();
    assert_eq!(alice.handle.state(), CallState::Connecting);

    let incoming = bob
        .handle
        .wait_for(|s| s.state == CallState::Incoming)
        .await
        .unwrap();
    assert_eq!(incoming.remote.as_deref(), Some("alice"));

    bob.handle.accept_call().await.unwrap();
    assert_eq!(bob.handle.state(), CallState::Connecting);
    eventually(|| alice.transports.last().count(&Op::SetRemote(SdpKind::Answer)) == 1).await;

    // кандидат alice доходит до bob и применяется сразу
    alice
        .transports
        .emit(TransportEvent::CandidateDiscovered(IceCandidate::new("candidate:alice-1")));
    eventually(|| bob.transports.last().applied_candidates() == vec!["candidate:alice-1".to_owned()]).await;

    alice.transports.emit(connected());
    bob.transports.emit(connected());
    alice.handle.wait_for(|s| s.state == CallState::Connected).await.unwrap();
    bob.handle.wait_for(|s| s.state == CallState::Connected).await.unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(alice.handle.duration_secs(), 3);
    assert!(alice.handle.snapshot().connected_at.is_some());

    alice.handle.end_call().await.unwrap();
    assert_eq!(alice.handle.state(), CallState::Ended);
    bob.handle.wait_for(|s| s.state == CallState::Ended).await.unwrap();

    assert_eq!(alice.transports.last().close_count(), 1);
    assert_eq!(bob.transports.last().close_count(), 1);
    assert_eq!(alice.mic.live_tracks(), 0);
    assert_eq!(bob.mic.live_tracks(), 0);

    // таймер остановлен
    let duration = alice.handle.duration_secs();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(alice.handle.duration_secs(), duration);

    alice.handle.dismiss().await.unwrap();
    assert_eq!(alice.handle.state(), CallState::Idle);
}

#[tokio::test(start_paused = true)]
async fn callee_rejects_incoming_call() {
    let hub = LocalRelayHub::new();
    let bob = phone(&hub, "bob");
    registered(&hub, "bob").await;

    hub.deliver("bob", &offer_from("A", "bob"));
    let incoming = bob
        .handle
        .wait_for(|s| s.state == CallState::Incoming)
        .await
        .unwrap();
    assert!(incoming.created_at.is_some());

    bob.handle.reject_call().await.unwrap();
    assert_eq!(bob.handle.state(), CallState::Ended);

    let to_a = end_calls(&hub.published_to("A"));
    assert_eq!(to_a.len(), 1);
    assert_eq!(to_a[0].from.as_deref(), Some("bob"));
    assert_eq!(bob.transports.created(), 0);
    assert_eq!(bob.mic.acquisitions(), 0);

    bob.handle.dismiss().await.unwrap();
    let idle = bob.handle.snapshot();
    assert_eq!(idle.state, CallState::Idle);
    assert_eq!(idle.created_at, None);
}

#[tokio::test(start_paused = true)]
async fn transport_failure_ends_call_and_stops_candidates() {
    let hub = LocalRelayHub::new();
    let bob = phone(&hub, "bob");
    registered(&hub, "bob").await;

    hub.deliver("bob", &offer_from("alice", "bob"));
    bob.handle.wait_for(|s| s.state == CallState::Incoming).await.unwrap();
    bob.handle.accept_call().await.unwrap();
    bob.transports.emit(connected());
    bob.handle.wait_for(|s| s.state == CallState::Connected).await.unwrap();

    bob.transports
        .emit(TransportEvent::ConnectionStateChanged(ConnectionState::Failed));
    let ended = bob
        .handle
        .wait_for(|s| s.state == CallState::Ended)
        .await
        .unwrap();
    assert!(ended.last_error.unwrap().contains("failed"));
    assert_eq!(bob.transports.last().close_count(), 1);
    assert_eq!(bob.mic.live_tracks(), 0);

    hub.deliver("bob", &candidate_from("alice", "bob", "candidate:late"));
    settle().await;
    assert!(bob.transports.last().applied_candidates().is_empty());
    assert_eq!(bob.handle.state(), CallState::Ended);
}

#[tokio::test(start_paused = true)]
async fn offer_while_busy_is_dropped_silently_by_default() {
    let hub = LocalRelayHub::new();
    let bob = phone(&hub, "bob");
    registered(&hub, "bob").await;

    hub.deliver("bob", &offer_from("alice", "bob"));
    bob.handle.wait_for(|s| s.state == CallState::Incoming).await.unwrap();

    hub.deliver("bob", &offer_from("carol", "bob"));
    settle().await;
    let snapshot = bob.handle.snapshot();
    assert_eq!(snapshot.state, CallState::Incoming);
    assert_eq!(snapshot.remote.as_deref(), Some("alice"));
    assert!(hub.published_to("carol").is_empty());
}

#[tokio::test(start_paused = true)]
async fn offer_while_busy_gets_busy_reply_when_enabled() {
    let hub = LocalRelayHub::new();
    let bob = phone_with(
        &hub,
        "bob",
        CallOptions {
            reply_busy: true,
            ..common::options()
        },
    );
    registered(&hub, "bob").await;

    hub.deliver("bob", &offer_from("alice", "bob"));
    bob.handle.wait_for(|s| s.state == CallState::Incoming).await.unwrap();

    // повтор того же offer занятостью не считается
    hub.deliver("bob", &offer_from("alice", "bob"));
    hub.deliver("bob", &offer_from("carol", "bob"));
    settle().await;

    let to_carol = end_calls(&hub.published_to("carol"));
    assert_eq!(to_carol.len(), 1);
    assert_eq!(to_carol[0].reason.as_deref(), Some(BUSY_REASON));
    assert!(hub.published_to("alice").is_empty());
    assert_eq!(bob.handle.state(), CallState::Incoming);
}

#[tokio::test(start_paused = true)]
async fn own_offer_echo_is_ignored() {
    let hub = LocalRelayHub::with_echo();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    alice.handle.start_call("bob").await.unwrap();
    settle().await;
    assert_eq!(alice.handle.state(), CallState::Connecting);

    hub.deliver("alice", &offer_from("alice", "alice"));
    settle().await;
    assert_eq!(alice.handle.state(), CallState::Connecting);
    assert_eq!(alice.transports.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_answer_is_ignored() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    alice.handle.start_call("bob").await.unwrap();
    hub.deliver("alice", &answer_from("bob", "alice"));
    hub.deliver("alice", &answer_from("bob", "alice"));
    settle().await;

    let transport = alice.transports.last();
    assert_eq!(transport.count(&Op::SetRemote(SdpKind::Answer)), 1);
    assert_eq!(alice.handle.state(), CallState::Connecting);
    assert_eq!(alice.handle.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn answer_from_stranger_is_ignored() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    alice.handle.start_call("bob").await.unwrap();
    hub.deliver("alice", &answer_from("mallory", "alice"));
    settle().await;
    assert_eq!(alice.transports.last().count(&Op::SetRemote(SdpKind::Answer)), 0);
}

#[tokio::test(start_paused = true)]
async fn early_candidates_are_applied_once_in_order() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    alice.handle.start_call("bob").await.unwrap();
    hub.deliver("alice", &candidate_from("bob", "alice", "candidate:1"));
    hub.deliver("alice", &candidate_from("bob", "alice", "candidate:2"));
    settle().await;
    assert!(alice.transports.last().applied_candidates().is_empty());

    hub.deliver("alice", &answer_from("bob", "alice"));
    hub.deliver("alice", &candidate_from("bob", "alice", "candidate:3"));
    settle().await;

    let transport = alice.transports.last();
    assert_eq!(
        transport.applied_candidates(),
        vec!["candidate:1", "candidate:2", "candidate:3"]
    );
    // кандидаты применяются только после remote description
    let ops = transport.ops();
    let remote_at = ops
        .iter()
        .position(|op| *op == Op::SetRemote(SdpKind::Answer))
        .unwrap();
    let first_candidate = ops
        .iter()
        .position(|op| matches!(op, Op::AddCandidate(_)))
        .unwrap();
    assert!(remote_at < first_candidate);
}

#[tokio::test(start_paused = true)]
async fn callee_buffers_candidates_until_accept() {
    let hub = LocalRelayHub::new();
    let bob = phone(&hub, "bob");
    registered(&hub, "bob").await;

    hub.deliver("bob", &offer_from("alice", "bob"));
    hub.deliver("bob", &candidate_from("alice", "bob", "candidate:a"));
    bob.handle.wait_for(|s| s.state == CallState::Incoming).await.unwrap();
    settle().await;
    assert_eq!(bob.transports.created(), 0);

    bob.handle.accept_call().await.unwrap();
    let transport = bob.transports.last();
    assert_eq!(transport.applied_candidates(), vec!["candidate:a"]);

    let answers: Vec<_> = hub
        .published_to("alice")
        .into_iter()
        .filter(|m| matches!(m, RelayMessage::Answer(_)))
        .collect();
    assert_eq!(answers.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn release_is_idempotent() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    alice.handle.start_call("bob").await.unwrap();
    alice.handle.end_call().await.unwrap();
    assert_eq!(alice.mic.live_tracks(), 0);
    assert_eq!(alice.transports.last().close_count(), 1);

    let err = alice.handle.end_call().await.unwrap_err();
    assert!(matches!(err, CallError::NoActiveSession(_)));
    assert_eq!(alice.handle.state(), CallState::Error);
    assert_eq!(alice.transports.last().close_count(), 1);
    assert_eq!(alice.mic.live_tracks(), 0);
    assert_eq!(end_calls(&hub.published_to("bob")).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn denied_microphone_fails_the_call() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;
    alice
        .mic
        .deny
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let err = alice.handle.start_call("bob").await.unwrap_err();
    assert!(matches!(err, CallError::ResourceUnavailable(_)));
    let snapshot = alice.handle.snapshot();
    assert_eq!(snapshot.state, CallState::Error);
    assert!(snapshot.last_error.unwrap().contains("microphone"));
    assert_eq!(alice.transports.last().close_count(), 1);

    alice.handle.dismiss().await.unwrap();
    assert_eq!(alice.handle.snapshot(), Default::default());
}

#[tokio::test(start_paused = true)]
async fn microphone_timeout_is_resource_unavailable() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;
    alice
        .mic
        .never_answer
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let err = alice.handle.start_call("bob").await.unwrap_err();
    assert!(matches!(err, CallError::ResourceUnavailable(_)));
    assert_eq!(alice.handle.state(), CallState::Error);
}

#[tokio::test(start_paused = true)]
async fn offer_creation_failure_is_negotiation_failure() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;
    alice
        .transports
        .fail_offer
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let err = alice.handle.start_call("bob").await.unwrap_err();
    assert!(matches!(err, CallError::NegotiationFailure(_)));
    assert_eq!(alice.handle.state(), CallState::Error);
    assert_eq!(alice.mic.live_tracks(), 0);
}

#[tokio::test(start_paused = true)]
async fn accept_without_offer_is_an_error() {
    let hub = LocalRelayHub::new();
    let bob = phone(&hub, "bob");
    registered(&hub, "bob").await;

    let err = bob.handle.accept_call().await.unwrap_err();
    assert!(matches!(err, CallError::NoActiveSession(_)));
    assert_eq!(bob.handle.state(), CallState::Error);
    assert_eq!(bob.transports.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn commands_out_of_turn_leave_the_call_alone() {
    let hub = LocalRelayHub::new();
    let bob = phone(&hub, "bob");
    registered(&hub, "bob").await;

    hub.deliver("bob", &offer_from("alice", "bob"));
    bob.handle.wait_for(|s| s.state == CallState::Incoming).await.unwrap();

    assert_eq!(
        bob.handle.start_call("carol").await,
        Err(CallError::InvalidState(CallState::Incoming))
    );
    assert_eq!(
        bob.handle.dismiss().await,
        Err(CallError::InvalidState(CallState::Incoming))
    );
    assert_eq!(bob.handle.state(), CallState::Incoming);

    assert_eq!(
        bob.handle.start_call("bob").await,
        Err(CallError::InvalidState(CallState::Incoming))
    );
}

#[tokio::test(start_paused = true)]
async fn calling_yourself_is_refused() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    assert_eq!(
        alice.handle.start_call("alice").await,
        Err(CallError::InvalidTarget("alice".into()))
    );
    assert_eq!(alice.handle.state(), CallState::Idle);
}

#[tokio::test(start_paused = true)]
async fn remote_hang_up_while_ringing() {
    let hub = LocalRelayHub::new();
    let bob = phone(&hub, "bob");
    registered(&hub, "bob").await;

    hub.deliver("bob", &offer_from("alice", "bob"));
    bob.handle.wait_for(|s| s.state == CallState::Incoming).await.unwrap();

    hub.deliver("bob", &RelayMessage::end_call("alice", "bob", None));
    bob.handle.wait_for(|s| s.state == CallState::Ended).await.unwrap();
    assert!(hub.published_to("alice").is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_end_call_still_ends_the_call() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    alice.handle.start_call("bob").await.unwrap();
    hub.deliver_raw("alice", r#"{"event":"end-call","data":{}}"#);
    alice.handle.wait_for(|s| s.state == CallState::Ended).await.unwrap();
    assert_eq!(alice.mic.live_tracks(), 0);
}

#[tokio::test(start_paused = true)]
async fn busy_reply_from_callee_ends_outgoing_call() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    alice.handle.start_call("bob").await.unwrap();
    hub.deliver("alice", &RelayMessage::end_call("bob", "alice", Some(BUSY_REASON)));
    let ended = alice
        .handle
        .wait_for(|s| s.state == CallState::Ended)
        .await
        .unwrap();
    assert_eq!(ended.last_error.as_deref(), Some("bob is busy"));
}

#[tokio::test(start_paused = true)]
async fn events_from_a_previous_session_are_ignored() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    alice.handle.start_call("bob").await.unwrap();
    alice.handle.end_call().await.unwrap();
    alice.handle.dismiss().await.unwrap();

    alice.handle.start_call("bob").await.unwrap();
    assert_eq!(alice.transports.created(), 2);

    alice.transports.emit_on(0, connected());
    settle().await;
    assert_eq!(alice.handle.state(), CallState::Connecting);

    alice.transports.emit_on(1, connected());
    alice.handle.wait_for(|s| s.state == CallState::Connected).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn remote_track_is_reported() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    alice.handle.start_call("bob").await.unwrap();
    alice.transports.emit(TransportEvent::RemoteTrack {
        track_id: "remote-audio".into(),
    });
    let snapshot = alice
        .handle
        .wait_for(|s| s.remote_track.is_some())
        .await
        .unwrap();
    assert_eq!(snapshot.remote_track.as_deref(), Some("remote-audio"));
}

#[tokio::test(start_paused = true)]
async fn registration_is_restored_after_relay_bounce() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    hub.bounce("alice");
    registered(&hub, "alice").await;
    assert_eq!(alice.handle.state(), CallState::Idle);
}

#[tokio::test(start_paused = true)]
async fn shutdown_hangs_up_and_stops_controller() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    alice.handle.start_call("bob").await.unwrap();
    alice.transports.emit(connected());
    alice.handle.wait_for(|s| s.state == CallState::Connected).await.unwrap();

    alice.handle.shutdown().await;
    assert_eq!(end_calls(&hub.published_to("bob")).len(), 1);
    assert_eq!(alice.transports.last().close_count(), 1);
    assert_eq!(alice.mic.live_tracks(), 0);
    assert_eq!(alice.handle.state(), CallState::Idle);

    assert_eq!(
        alice.handle.start_call("bob").await,
        Err(CallError::ControllerStopped)
    );
    alice.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn answer_after_connect_changes_nothing() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    alice.handle.start_call("bob").await.unwrap();
    hub.deliver("alice", &answer_from("bob", "alice"));
    alice.transports.emit(connected());
    alice.handle.wait_for(|s| s.state == CallState::Connected).await.unwrap();

    hub.deliver("alice", &answer_from("bob", "alice"));
    settle().await;
    let transport = alice.transports.last();
    assert_eq!(transport.count(&Op::SetRemote(SdpKind::Answer)), 1);
    assert_eq!(alice.handle.state(), CallState::Connected);
    assert_eq!(alice.handle.last_error(), None);
}

async fn lost_while_connecting(lost: ConnectionState) {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    alice.handle.start_call("bob").await.unwrap();
    assert_eq!(alice.mic.live_tracks(), 1);

    alice
        .transports
        .emit(TransportEvent::ConnectionStateChanged(lost));
    let ended = alice
        .handle
        .wait_for(|s| s.state == CallState::Ended)
        .await
        .unwrap();
    assert!(ended.last_error.is_some());
    assert_eq!(alice.transports.last().close_count(), 1);
    assert_eq!(alice.mic.live_tracks(), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnected_during_connecting_ends_call() {
    lost_while_connecting(ConnectionState::Disconnected).await;
}

#[tokio::test(start_paused = true)]
async fn closed_during_connecting_ends_call() {
    lost_while_connecting(ConnectionState::Closed).await;
}

// реальные потоки: ответ на команду не должен обгонять публикацию снимка
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn command_reply_sees_published_state() {
    let hub = LocalRelayHub::new();
    let alice = phone(&hub, "alice");
    registered(&hub, "alice").await;

    for _ in 0..200 {
        alice.handle.start_call("bob").await.unwrap();
        assert_eq!(alice.handle.state(), CallState::Connecting);
        alice.handle.end_call().await.unwrap();
        assert_eq!(alice.handle.state(), CallState::Ended);
        alice.handle.dismiss().await.unwrap();
        assert_eq!(alice.handle.state(), CallState::Idle);
    }
}
