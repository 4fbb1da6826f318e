//! Integration tests for the realtime dispatcher
//!
//! Each test runs a real socket against an in-process server that the test
//! drives frame by frame.

mod common;

use common::{cid, MockServer};
use nakama_realtime::realtime::protocol::MatchData;
use nakama_realtime::realtime::{ClientState, EventHandlers, MatchTarget, RealtimeClient};
use nakama_realtime::{ClientError, Socket};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

/// Connect a started client with the given handlers.
async fn connect(server: &MockServer, handlers: EventHandlers) -> Arc<RealtimeClient> {
    let socket = Socket::dial(&server.endpoint, "test-token", false).await.unwrap();
    let client = RealtimeClient::new(socket, handlers).with_request_timeout(Duration::from_secs(2));
    client.start();
    Arc::new(client)
}

/// Handlers that report the exit notification on a channel.
fn exit_reporting() -> (EventHandlers, mpsc::UnboundedReceiver<Option<ClientError>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handlers = EventHandlers::new().on_exit(move |err| {
        let _ = tx.send(err);
    });
    (handlers, rx)
}

#[tokio::test]
async fn test_out_of_order_replies_reach_their_callers() {
    let mut server = MockServer::start().await;
    let client = connect(&server, EventHandlers::new()).await;

    let a = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.create_match("a").await }
    });
    let frame_a = server.next_frame().await;
    assert_eq!(cid(&frame_a), "1");
    assert_eq!(frame_a["match_create"]["name"], "a");

    let b = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.create_match("b").await }
    });
    let frame_b = server.next_frame().await;
    assert_eq!(cid(&frame_b), "2");

    // B first, then A
    server.send(json!({ "cid": "2", "match": { "match_id": "match-b", "size": 1 } }));
    server.send(json!({ "cid": "1", "match": { "match_id": "match-a", "size": 1 } }));

    assert_eq!(a.await.unwrap().unwrap().match_id, "match-a");
    assert_eq!(b.await.unwrap().unwrap().match_id, "match-b");
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_many_concurrent_requests_are_correlated() {
    let mut server = MockServer::start().await;
    let client = connect(&server, EventHandlers::new()).await;

    let mut calls = Vec::new();
    for i in 0..8 {
        let client = Arc::clone(&client);
        calls.push(tokio::spawn(async move {
            client.rpc("echo", &format!("payload-{}", i), "").await
        }));
    }

    let mut frames = Vec::new();
    for _ in 0..8 {
        frames.push(server.next_frame().await);
    }
    // Answer in reverse order, echoing each payload
    for frame in frames.iter().rev() {
        server.send(json!({
            "cid": cid(frame),
            "rpc": { "id": "echo", "payload": frame["rpc"]["payload"] }
        }));
    }

    for (i, call) in calls.into_iter().enumerate() {
        let result = call.await.unwrap().unwrap();
        assert_eq!(result.payload, format!("payload-{}", i));
    }
}

#[tokio::test]
async fn test_unknown_cid_stops_with_correlation_mismatch() {
    let server = MockServer::start().await;
    let (handlers, mut exits) = exit_reporting();
    let client = connect(&server, handlers).await;

    server.send(json!({ "cid": "99", "match": { "match_id": "stray" } }));

    let exit = tokio::time::timeout(WAIT, exits.recv()).await.unwrap().unwrap();
    match exit {
        Some(ClientError::CorrelationMismatch { cid }) => assert_eq!(cid, "99"),
        other => panic!("expected correlation mismatch, got {:?}", other),
    }

    tokio::time::timeout(WAIT, client.closed()).await.unwrap();
    assert_eq!(client.state(), ClientState::Stopped);
    assert!(matches!(
        client.create_match("late").await,
        Err(ClientError::TransportClosed)
    ));
}

#[tokio::test]
async fn test_error_for_unknown_cid_stops_with_correlation_mismatch() {
    let server = MockServer::start().await;
    let (handlers, mut exits) = exit_reporting();
    let client = connect(&server, handlers).await;

    server.send(json!({
        "cid": "77",
        "error": { "code": 3, "message": "bad input" }
    }));

    let exit = tokio::time::timeout(WAIT, exits.recv()).await.unwrap().unwrap();
    match exit {
        Some(ClientError::CorrelationMismatch { cid }) => assert_eq!(cid, "77"),
        other => panic!("expected correlation mismatch, got {:?}", other),
    }
    tokio::time::timeout(WAIT, client.closed()).await.unwrap();
    assert_eq!(client.state(), ClientState::Stopped);
}

#[tokio::test]
async fn test_server_close_is_answered() {
    let server = MockServer::start().await;
    let (handlers, mut exits) = exit_reporting();
    let client = connect(&server, handlers).await;

    // The client stays alive throughout; the reply must not wait for drop
    assert!(server.close_and_await_reply().await);

    let exit = tokio::time::timeout(WAIT, exits.recv()).await.unwrap().unwrap();
    assert!(matches!(exit, Some(ClientError::TransportClosed)));
    assert_eq!(client.state(), ClientState::Stopped);
}

#[tokio::test]
async fn test_push_without_handler_is_skipped() {
    let mut server = MockServer::start().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<MatchData>();
    let handlers = EventHandlers::new().on_match_data(move |data| {
        let _ = tx.send(data);
    });
    let client = connect(&server, handlers).await;

    server.send(json!({ "notifications": { "notifications": [{ "id": "n1", "code": 1 }] } }));
    server.send(json!({
        "match_data": { "match_id": "m1", "op_code": "7", "data": "AQID", "reliable": true }
    }));

    let data = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(data.match_id, "m1");
    assert_eq!(data.op_code, 7);
    assert_eq!(data.data, vec![1, 2, 3]);

    // Still serving requests afterwards
    let leave = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.leave_match("m1").await }
    });
    let frame = server.next_frame().await;
    server.send(json!({ "cid": cid(&frame) }));
    leave.await.unwrap().unwrap();
    assert_eq!(client.state(), ClientState::Watching);
}

#[tokio::test]
async fn test_notifications_fan_out_one_by_one() {
    let server = MockServer::start().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handlers = EventHandlers::new().on_notification(move |n| {
        let _ = tx.send(n.id);
    });
    let _client = connect(&server, handlers).await;

    server.send(json!({
        "notifications": { "notifications": [{ "id": "n1" }, { "id": "n2" }] }
    }));

    assert_eq!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap(), "n1");
    assert_eq!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap(), "n2");
}

#[tokio::test]
async fn test_error_envelope_surfaces_realtime_error() {
    let mut server = MockServer::start().await;
    let client = connect(&server, EventHandlers::new()).await;

    let call = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.join_match(MatchTarget::Id("x".into()), HashMap::new()).await }
    });
    let frame = server.next_frame().await;
    assert_eq!(frame["match_join"]["match_id"], "x");
    server.send(json!({
        "cid": cid(&frame),
        "error": { "code": 5, "message": "not found", "context": { "id": "x" } }
    }));

    let err = call.await.unwrap().unwrap_err();
    let realtime = err.as_realtime().expect("realtime error");
    assert_eq!(realtime.code(), 5);
    assert_eq!(realtime.message(), "not found");
    assert_eq!(
        realtime.context(),
        &HashMap::from([("id".to_string(), "x".to_string())])
    );
    assert_eq!(client.state(), ClientState::Watching);
}

#[tokio::test]
async fn test_close_while_pending_resolves_by_timeout() {
    let mut server = MockServer::start().await;
    let (handlers, mut exits) = exit_reporting();
    let socket = Socket::dial(&server.endpoint, "test-token", false).await.unwrap();
    let client = Arc::new(
        RealtimeClient::new(socket, handlers).with_request_timeout(Duration::from_millis(300)),
    );
    client.start();

    let call = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.create_party(true, 4).await }
    });
    server.next_frame().await;
    server.close();

    let exit = tokio::time::timeout(WAIT, exits.recv()).await.unwrap().unwrap();
    assert!(exit.is_some());

    let result = tokio::time::timeout(WAIT, call).await.unwrap().unwrap();
    assert!(matches!(result, Err(ClientError::Timeout(_))));
}

#[tokio::test]
async fn test_pong_never_reaches_dispatch() {
    let server = MockServer::start().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handlers = EventHandlers::new().on_party_close(move |close| {
        let _ = tx.send(close.party_id);
    });
    let client = connect(&server, handlers).await;

    // A pong carries a cid nobody registered; it must not trip the mismatch check
    server.send(json!({ "cid": "41", "pong": {} }));
    server.send(json!({ "party_close": { "party_id": "p1" } }));

    assert_eq!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap(), "p1");
    assert_eq!(client.state(), ClientState::Watching);
}

#[tokio::test]
async fn test_heartbeat_writes_pings() {
    let mut server = MockServer::start().await;
    let client = connect(&server, EventHandlers::new()).await;
    client.start_heartbeat(Duration::from_millis(50));

    let frame = server.next_frame().await;
    assert!(frame.get("ping").is_some());
    assert!(frame["cid"].is_string());
    server.send(json!({ "cid": cid(&frame), "pong": {} }));

    let frame = server.next_frame().await;
    assert!(frame.get("ping").is_some());
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_zero_heartbeat_interval_is_refused() {
    let mut server = MockServer::start().await;
    let client = connect(&server, EventHandlers::new()).await;

    assert!(!client.start_heartbeat(Duration::ZERO));
    assert!(client.start_heartbeat(Duration::from_millis(50)));

    let frame = server.next_frame().await;
    assert!(frame.get("ping").is_some());
    assert_eq!(client.state(), ClientState::Watching);
}

#[tokio::test]
async fn test_stop_reports_clean_exit_once() {
    let server = MockServer::start().await;
    let (handlers, mut exits) = exit_reporting();
    let client = connect(&server, handlers).await;

    client.stop().await;
    client.stop().await;

    let exit = tokio::time::timeout(WAIT, exits.recv()).await.unwrap().unwrap();
    assert!(exit.is_none());
    // The sender was consumed with the handler
    assert!(exits.recv().await.is_none());

    assert_eq!(client.state(), ClientState::Stopped);
    assert!(matches!(
        client.send_match_state("m1", 1, vec![], vec![], true).await,
        Err(ClientError::TransportClosed)
    ));
}

#[tokio::test]
async fn test_start_twice_is_a_no_op() {
    let server = MockServer::start().await;
    let client = connect(&server, EventHandlers::new()).await;
    client.start();
    assert_eq!(client.state(), ClientState::Watching);
}

#[tokio::test]
async fn test_fire_and_forget_registers_nothing() {
    let mut server = MockServer::start().await;
    let client = connect(&server, EventHandlers::new()).await;

    client
        .send_match_state("m1", 3, b"hello".to_vec(), vec![], true)
        .await
        .unwrap();

    let frame = server.next_frame().await;
    assert_eq!(frame["match_data_send"]["op_code"], "3");
    assert_eq!(frame["match_data_send"]["data"], "aGVsbG8=");
    assert!(frame["cid"].is_string());
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_push_shaped_reply_goes_to_its_caller() {
    let mut server = MockServer::start().await;
    let (tx, mut pushes) = mpsc::unbounded_channel::<String>();
    let handlers = EventHandlers::new().on_party(move |party| {
        let _ = tx.send(party.party_id);
    });
    let client = connect(&server, handlers).await;

    let call = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.create_party(false, 2).await }
    });
    let frame = server.next_frame().await;
    assert_eq!(frame["party_create"]["max_size"], 2);
    server.send(json!({ "cid": cid(&frame), "party": { "party_id": "p9", "max_size": 2 } }));

    let party = call.await.unwrap().unwrap();
    assert_eq!(party.party_id, "p9");
    assert_eq!(party.max_size, 2);
    assert!(pushes.try_recv().is_err());
}

#[tokio::test]
async fn test_wrong_reply_variant() {
    let mut server = MockServer::start().await;
    let client = connect(&server, EventHandlers::new()).await;

    let call = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.follow_users(vec!["u2".into()], vec![]).await }
    });
    let frame = server.next_frame().await;
    server.send(json!({ "cid": cid(&frame) }));

    assert!(matches!(
        call.await.unwrap(),
        Err(ClientError::UnexpectedReply { expected: "status" })
    ));
}
