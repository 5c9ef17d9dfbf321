//! Gateway session integration tests
//!
//! Each test runs a session against an in-process WebSocket gateway.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_gateway_client::protocol::StatusUpdatePayload;
use chat_gateway_client::{
    ConnectionState, DispatchEvent, DispatchPayload, GatewayError, GatewayResult,
    GatewaySession, GatewayUrlResolver, OutboundFrame,
};
use integration_tests::*;
use serde_json::json;

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_end_to_end_ready_via_rest_lookup() {
    let mut gateway = MockGateway::start().await.unwrap();
    let mut api = MockRestApi::start(&gateway.url()).await.unwrap();

    let mut config = test_config(&gateway.url());
    config.api.gateway_url = None;
    config.api.base_url = api.base_url();

    let (session, mut dispatches) = session_with_dispatches(config).unwrap();
    let mut states = session.subscribe_state();
    session.open(TEST_TOKEN).unwrap();

    assert_eq!(api.next_authorization().await.unwrap(), TEST_TOKEN);
    let mut conn = gateway.accept().await.unwrap();

    let identify = conn.expect_op(2).await.unwrap();
    assert_eq!(identify["d"]["token"], TEST_TOKEN);
    assert_eq!(identify["d"]["v"], 6);
    assert_eq!(identify["d"]["properties"]["browser"], "chat-gateway-client");
    wait_for_state(&mut states, ConnectionState::Loading).await.unwrap();

    conn.send_json(&hello(HEARTBEAT_INTERVAL_MS)).await.unwrap();
    assert_eq!(conn.recv_json().await.unwrap(), json!({"op": 1, "d": -1}));
    conn.send_json(&heartbeat_ack()).await.unwrap();

    conn.send_json(&ready("abc123", 1)).await.unwrap();
    wait_for_state(&mut states, ConnectionState::Ready).await.unwrap();

    assert!(session.is_ready());
    assert_eq!(session.session_id().unwrap(), "abc123");
    assert_eq!(session.last_sequence().unwrap(), 1);
    assert_eq!(session.current_user().unwrap().username, "nelly");

    let event = next_dispatch(&mut dispatches).await.unwrap();
    assert_eq!(event.event_type, "READY");
    assert!(matches!(event.payload, DispatchPayload::Ready(_)));

    session.close();
    wait_for_state(&mut states, ConnectionState::Disconnected).await.unwrap();
}

#[tokio::test]
async fn test_stored_session_sends_resume() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (session, _dispatches) = session_with_dispatches(test_config(&gateway.url())).unwrap();
    let mut states = session.subscribe_state();

    session.restore("abc", 42);
    session.open(TEST_TOKEN).unwrap();

    let mut conn = gateway.accept().await.unwrap();
    assert_eq!(
        conn.recv_json().await.unwrap(),
        json!({"op": 6, "d": {"token": TEST_TOKEN, "session_id": "abc", "seq": 42}})
    );

    conn.send_json(&hello(HEARTBEAT_INTERVAL_MS)).await.unwrap();
    conn.send_json(&resumed(43)).await.unwrap();
    wait_for_state(&mut states, ConnectionState::Ready).await.unwrap();
    assert_eq!(session.session_id().unwrap(), "abc");
    assert_eq!(session.last_sequence().unwrap(), 43);
}

#[tokio::test]
async fn test_unauthorized_lookup_is_fatal() {
    let mut gateway = MockGateway::start().await.unwrap();
    let api = MockRestApi::start_with("401 Unauthorized", r#"{"message":"401: Unauthorized"}"#.into())
        .await
        .unwrap();

    let mut config = test_config(&gateway.url());
    config.api.gateway_url = None;
    config.api.base_url = api.base_url();

    let (session, _dispatches) = session_with_dispatches(config).unwrap();
    let mut states = session.subscribe_state();
    session.open(TEST_TOKEN).unwrap();

    wait_for_state(&mut states, ConnectionState::Disconnected).await.unwrap();
    assert!(matches!(session.last_error(), Some(GatewayError::Authentication(_))));
    gateway.expect_no_connection(Duration::from_millis(200)).await.unwrap();
}

// ============================================================================
// Server-driven reconnects
// ============================================================================

async fn ready_session(
    gateway: &mut MockGateway,
) -> (GatewaySession, integration_tests::GatewayConnection) {
    let (session, _dispatches) = session_with_dispatches(test_config(&gateway.url())).unwrap();
    let mut states = session.subscribe_state();
    session.open(TEST_TOKEN).unwrap();

    let mut conn = gateway.accept().await.unwrap();
    conn.expect_op(2).await.unwrap();
    conn.send_json(&hello(HEARTBEAT_INTERVAL_MS)).await.unwrap();
    conn.send_json(&ready("abc123", 1)).await.unwrap();
    wait_for_state(&mut states, ConnectionState::Ready).await.unwrap();
    (session, conn)
}

#[tokio::test]
async fn test_reconnect_request_resumes() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (session, mut conn) = ready_session(&mut gateway).await;

    conn.send_json(&message_create(2, "hello")).await.unwrap();
    conn.send_json(&reconnect()).await.unwrap();

    let mut second = gateway.accept().await.unwrap();
    assert_eq!(
        second.expect_op(6).await.unwrap(),
        json!({"op": 6, "d": {"token": TEST_TOKEN, "session_id": "abc123", "seq": 2}})
    );

    let mut states = session.subscribe_state();
    second.send_json(&hello(HEARTBEAT_INTERVAL_MS)).await.unwrap();
    second.send_json(&resumed(3)).await.unwrap();
    wait_for_state(&mut states, ConnectionState::Ready).await.unwrap();
    assert_eq!(session.session_id().unwrap(), "abc123");
}

#[tokio::test]
async fn test_invalid_session_reidentifies() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (session, mut conn) = ready_session(&mut gateway).await;

    conn.send_json(&invalid_session(false)).await.unwrap();

    let mut second = gateway.accept().await.unwrap();
    let identify = second.expect_op(2).await.unwrap();
    assert_eq!(identify["d"]["token"], TEST_TOKEN);

    let mut states = session.subscribe_state();
    second.send_json(&hello(HEARTBEAT_INTERVAL_MS)).await.unwrap();
    second.send_json(&ready("fresh", 1)).await.unwrap();
    wait_for_state(&mut states, ConnectionState::Ready).await.unwrap();
    assert_eq!(session.session_id().unwrap(), "fresh");
}

#[tokio::test]
async fn test_authentication_close_surfaces_error() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (session, _dispatches) = session_with_dispatches(test_config(&gateway.url())).unwrap();
    let mut states = session.subscribe_state();
    session.open("bad-token").unwrap();

    let mut conn = gateway.accept().await.unwrap();
    conn.expect_op(2).await.unwrap();
    conn.close_with(4004, "Authentication failed").await.unwrap();

    wait_for_state(&mut states, ConnectionState::Disconnected).await.unwrap();
    let err = session.last_error().unwrap();
    assert!(matches!(err, GatewayError::Authentication(_)));
    assert!(err.is_fatal());
    gateway.expect_no_connection(Duration::from_millis(200)).await.unwrap();
}

// ============================================================================
// Client-driven lifecycle
// ============================================================================

struct HangingResolver;

#[async_trait]
impl GatewayUrlResolver for HangingResolver {
    async fn resolve(&self, _token: &str) -> GatewayResult<String> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_close_during_connecting_aborts_open() {
    let session = GatewaySession::builder(test_config("ws://127.0.0.1:1"))
        .resolver(Arc::new(HangingResolver))
        .build()
        .unwrap();

    session.open(TEST_TOKEN).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.state(), ConnectionState::Connecting);

    session.close();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.last_error().is_none());

    // A fresh open starts over
    session.open(TEST_TOKEN).unwrap();
    assert_eq!(session.state(), ConnectionState::Connecting);
}

#[tokio::test]
async fn test_send_reaches_gateway() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (session, mut conn) = ready_session(&mut gateway).await;

    session
        .send(OutboundFrame::StatusUpdate(StatusUpdatePayload::playing("chess")))
        .await
        .unwrap();
    assert_eq!(
        conn.expect_op(3).await.unwrap(),
        json!({"op": 3, "d": {"idle_since": null, "game": {"name": "chess"}}})
    );

    // A server heartbeat request is answered right away
    conn.send_json(&heartbeat_request()).await.unwrap();
    assert_eq!(conn.recv_json().await.unwrap(), json!({"op": 1, "d": 1}));
}

#[tokio::test]
async fn test_error_notice_is_not_fatal() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (session, mut conn) = ready_session(&mut gateway).await;

    conn.send_json(&error_notice("rate limited")).await.unwrap();
    conn.send_json(&message_create(2, "still here")).await.unwrap();

    let mut states = session.subscribe_state();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(session.is_ready());
    assert!(!states.has_changed().unwrap());
    assert_eq!(session.last_sequence().unwrap(), 2);
}

// ============================================================================
// Event delivery
// ============================================================================

#[tokio::test]
async fn test_sink_failures_do_not_stop_delivery() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (session, mut dispatches) = session_with_dispatches(test_config(&gateway.url())).unwrap();
    session.subscribe(|_: &DispatchEvent| -> anyhow::Result<()> {
        anyhow::bail!("sink is broken")
    });
    session.subscribe(|event: &DispatchEvent| -> anyhow::Result<()> {
        if event.sequence == 2 {
            panic!("sink exploded");
        }
        Ok(())
    });

    let mut states = session.subscribe_state();
    session.open(TEST_TOKEN).unwrap();
    let mut conn = gateway.accept().await.unwrap();
    conn.expect_op(2).await.unwrap();
    conn.send_json(&hello(HEARTBEAT_INTERVAL_MS)).await.unwrap();
    conn.send_json(&ready("abc123", 1)).await.unwrap();
    wait_for_state(&mut states, ConnectionState::Ready).await.unwrap();

    conn.send_json(&message_create(2, "one")).await.unwrap();
    conn.send_json(&dispatch("SOME_FUTURE_EVENT", 3, json!({"x": 1})))
        .await
        .unwrap();

    let sequences = [
        next_dispatch(&mut dispatches).await.unwrap(),
        next_dispatch(&mut dispatches).await.unwrap(),
        next_dispatch(&mut dispatches).await.unwrap(),
    ]
    .map(|event| event.sequence);
    assert_eq!(sequences, [1, 2, 3]);
}

#[tokio::test]
async fn test_unknown_event_is_forwarded_untyped() {
    let mut gateway = MockGateway::start().await.unwrap();
    let (session, mut conn) = ready_session(&mut gateway).await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    session.subscribe(move |event: &DispatchEvent| {
        tx.send(event.clone())?;
        Ok(())
    });

    conn.send_json(&dispatch("SOME_FUTURE_EVENT", 2, json!({"x": 1})))
        .await
        .unwrap();
    let event = next_dispatch(&mut rx).await.unwrap();
    assert!(event.kind.is_none());
    let DispatchPayload::Unknown(body) = event.payload else {
        panic!("expected an untyped payload");
    };
    assert_eq!(body["x"], 1);
}
