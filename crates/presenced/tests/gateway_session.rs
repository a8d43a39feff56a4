//! Gateway session integration tests.
//!
//! Runs the real session driver against a mock gateway built on
//! `tokio-tungstenite` and checks the frames it writes.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use presence_proto::{Envelope, Status};
use presenced::gateway::{GatewaySession, Phase, PublishOutcome, SessionHandle};
use presenced::{PresenceConfig, PresenceError, Token, resolver_for};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers - Mock Gateway
// ============================================================================

struct MockGateway {
    listener: TcpListener,
    addr: SocketAddr,
}

impl MockGateway {
    async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock gateway");
        let addr = listener.local_addr().expect("no local addr");
        Self { listener, addr }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn accept(&self) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("timed out waiting for a connection")
            .expect("accept failed");
        accept_async(stream).await.expect("websocket handshake failed")
    }

    /// Accept, send Hello, read the handshake frame, answer with READY.
    async fn accept_ready(
        &self,
        heartbeat_ms: u64,
        session_id: &str,
    ) -> (WebSocketStream<TcpStream>, Value) {
        let mut ws = self.accept().await;
        send(&mut ws, &Envelope::hello(heartbeat_ms)).await;
        let handshake = recv(&mut ws).await;
        send(
            &mut ws,
            &Envelope::dispatch(
                1,
                "READY",
                json!({
                    "session_id": session_id,
                    "resume_gateway_url": self.url(),
                    "user": { "username": "tester" }
                }),
            ),
        )
        .await;
        (ws, handshake)
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, envelope: &Envelope) {
    let json = envelope.to_json().expect("failed to encode");
    ws.send(Message::Text(json.into()))
        .await
        .expect("failed to send");
}

async fn recv(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("client sent invalid json");
        }
    }
}

/// Read until a frame with `op` arrives, acknowledging heartbeats on the way.
async fn recv_op(ws: &mut WebSocketStream<TcpStream>, op: u64) -> Value {
    loop {
        let frame = recv(ws).await;
        if frame["op"] == op {
            return frame;
        }
        if frame["op"] == 1 {
            send(ws, &Envelope::heartbeat_ack()).await;
        }
    }
}

/// Read until the client closes; returns the close code.
async fn expect_close(ws: &mut WebSocketStream<TcpStream>) -> Option<u16> {
    loop {
        match timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return None,
        }
    }
}

// ============================================================================
// Test Helpers - Session
// ============================================================================

fn test_config(url: &str) -> PresenceConfig {
    let mut config = PresenceConfig::new(Token::new("t".repeat(60)));
    config.gateway.gateway_url = Some(url.to_string());
    config.gateway.initial_backoff_ms = 50;
    config.gateway.max_backoff_ms = 200;
    config.gateway.invalid_session_delay_ms = 100;
    config.gateway.connect_timeout_secs = 2;
    config
}

fn start(config: &PresenceConfig) -> (JoinHandle<Result<(), PresenceError>>, SessionHandle) {
    let resolver = resolver_for(config).expect("invalid resolver config");
    let (session, handle) = GatewaySession::from_config(config, resolver);
    (tokio::spawn(session.run()), handle)
}

async fn wait_phase(handle: &SessionHandle, phase: Phase) {
    timeout(WAIT, handle.wait_for_phase(|p| p == phase))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {phase}"))
        .expect("session ended");
}

async fn stop(task: JoinHandle<Result<(), PresenceError>>, handle: &SessionHandle) {
    handle.shutdown().await;
    let result = timeout(WAIT, task)
        .await
        .expect("session did not stop")
        .expect("session task panicked");
    assert!(result.is_ok(), "session ended with {result:?}");
}

// ============================================================================
// Handshake and Presence
// ============================================================================

#[tokio::test]
async fn test_identify_heartbeat_and_presence_flow() {
    let gateway = MockGateway::new().await;
    let (task, handle) = start(&test_config(&gateway.url()));

    let mut ws = gateway.accept().await;
    send(&mut ws, &Envelope::hello(200)).await;

    let identify = recv(&mut ws).await;
    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["token"], "t".repeat(60));
    assert_eq!(identify["d"]["properties"]["os"], "linux");
    assert_eq!(identify["d"]["presence"]["status"], "online");
    assert_eq!(identify["d"]["presence"]["afk"], false);
    let activity = &identify["d"]["presence"]["activities"][0];
    assert_eq!(activity["type"], 4);
    assert_eq!(activity["name"], "Custom Status");
    assert_eq!(activity["state"], "24/7 Online");

    send(
        &mut ws,
        &Envelope::dispatch(1, "READY", json!({ "session_id": "abc" })),
    )
    .await;
    wait_phase(&handle, Phase::Ready).await;

    let heartbeat = recv(&mut ws).await;
    assert_eq!(heartbeat, json!({ "op": 1, "d": 1 }));
    send(&mut ws, &Envelope::heartbeat_ack()).await;

    let outcome = handle.set_presence(Status::Dnd).await.unwrap();
    assert_eq!(outcome, PublishOutcome::Sent);
    let update = recv_op(&mut ws, 3).await;
    assert_eq!(update["d"]["status"], "dnd");
    assert_eq!(update["d"]["activities"][0]["state"], "24/7 Online");

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, Phase::Ready);
    assert_eq!(snapshot.session_id.as_deref(), Some("abc"));
    assert_eq!(snapshot.sequence, Some(1));
    assert_eq!(snapshot.status, Status::Dnd);
    assert_eq!(snapshot.heartbeat_interval, Some(Duration::from_millis(200)));

    stop(task, &handle).await;
    assert_eq!(expect_close(&mut ws).await, Some(1000));
    assert_eq!(handle.phase(), Phase::Terminated);
}

#[tokio::test]
async fn test_server_heartbeat_request_is_answered() {
    let gateway = MockGateway::new().await;
    let (task, handle) = start(&test_config(&gateway.url()));

    let (mut ws, _) = gateway.accept_ready(60_000, "abc").await;
    wait_phase(&handle, Phase::Ready).await;

    send(&mut ws, &Envelope::heartbeat_request()).await;
    let heartbeat = recv(&mut ws).await;
    assert_eq!(heartbeat, json!({ "op": 1, "d": 1 }));

    stop(task, &handle).await;
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test]
async fn test_reconnects_after_server_close() {
    let gateway = MockGateway::new().await;
    let (task, handle) = start(&test_config(&gateway.url()));

    let (mut first, _) = gateway.accept_ready(60_000, "first").await;
    wait_phase(&handle, Phase::Ready).await;

    first
        .close(Some(CloseFrame {
            code: CloseCode::from(4004),
            reason: "".into(),
        }))
        .await
        .expect("failed to close");
    drop(first);

    let (_second, handshake) = gateway.accept_ready(60_000, "second").await;
    assert_eq!(handshake["op"], 2, "reconnect must identify again");

    timeout(WAIT, async {
        loop {
            let snapshot = handle.snapshot().await.unwrap();
            if snapshot.session_id.as_deref() == Some("second") {
                assert_eq!(snapshot.phase, Phase::Ready);
                assert_eq!(snapshot.reconnect_attempts, 0);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("never reached READY on the second connection");

    stop(task, &handle).await;
}

#[tokio::test]
async fn test_connection_dropped_before_identify_backs_off() {
    let gateway = MockGateway::new().await;
    let (task, handle) = start(&test_config(&gateway.url()));

    let mut first = gateway.accept().await;
    send(&mut first, &Envelope::hello(60_000)).await;
    drop(first);

    let mut second = gateway.accept().await;
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.reconnect_attempts, 1);
    assert_eq!(snapshot.sequence, None);

    send(&mut second, &Envelope::hello(60_000)).await;
    let handshake = recv(&mut second).await;
    assert_eq!(handshake["op"], 2);

    send(
        &mut second,
        &Envelope::dispatch(1, "READY", json!({ "session_id": "abc" })),
    )
    .await;
    wait_phase(&handle, Phase::Ready).await;
    assert_eq!(handle.snapshot().await.unwrap().reconnect_attempts, 0);

    stop(task, &handle).await;
}

#[tokio::test]
async fn test_reconnect_opcode_reconnects_immediately() {
    let gateway = MockGateway::new().await;
    let mut config = test_config(&gateway.url());
    config.gateway.initial_backoff_ms = 10_000;
    config.gateway.max_backoff_ms = 10_000;
    let (task, handle) = start(&config);

    let (mut first, _) = gateway.accept_ready(60_000, "abc").await;
    wait_phase(&handle, Phase::Ready).await;

    send(&mut first, &Envelope::reconnect()).await;
    assert_eq!(expect_close(&mut first).await, Some(1000));

    // a backoff delay would blow the accept timeout
    let (_second, handshake) = gateway.accept_ready(60_000, "def").await;
    assert_eq!(handshake["op"], 2);

    stop(task, &handle).await;
}

#[tokio::test]
async fn test_invalid_session_reidentifies() {
    let gateway = MockGateway::new().await;
    let (task, handle) = start(&test_config(&gateway.url()));

    let (mut first, _) = gateway.accept_ready(60_000, "abc").await;
    wait_phase(&handle, Phase::Ready).await;

    send(&mut first, &Envelope::invalid_session(false)).await;
    assert_eq!(expect_close(&mut first).await, Some(1000));

    let (_second, handshake) = gateway.accept_ready(60_000, "def").await;
    assert_eq!(handshake["op"], 2);

    stop(task, &handle).await;
}

#[tokio::test]
async fn test_unacknowledged_heartbeat_forces_reconnect() {
    let gateway = MockGateway::new().await;
    let (task, handle) = start(&test_config(&gateway.url()));

    let (mut first, _) = gateway.accept_ready(100, "abc").await;
    wait_phase(&handle, Phase::Ready).await;

    let heartbeat = recv(&mut first).await;
    assert_eq!(heartbeat["op"], 1);
    assert_eq!(expect_close(&mut first).await, Some(1000));

    let (_second, handshake) = gateway.accept_ready(60_000, "def").await;
    assert_eq!(handshake["op"], 2);

    stop(task, &handle).await;
}

#[tokio::test]
async fn test_resume_after_reconnect_request() {
    let gateway = MockGateway::new().await;
    let mut config = test_config(&gateway.url());
    config.gateway.resume = true;
    let (task, handle) = start(&config);

    let (mut first, identify) = gateway.accept_ready(60_000, "abc").await;
    assert_eq!(identify["op"], 2);
    wait_phase(&handle, Phase::Ready).await;

    send(
        &mut first,
        &Envelope::dispatch(5, "MESSAGE_CREATE", json!({})),
    )
    .await;
    send(&mut first, &Envelope::reconnect()).await;
    assert_eq!(expect_close(&mut first).await, Some(4000));

    let mut second = gateway.accept().await;
    send(&mut second, &Envelope::hello(60_000)).await;
    let resume = recv(&mut second).await;
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["session_id"], "abc");
    assert_eq!(resume["d"]["seq"], 5);

    send(
        &mut second,
        &Envelope::dispatch(6, "RESUMED", Value::Null),
    )
    .await;
    wait_phase(&handle, Phase::Ready).await;
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.session_id.as_deref(), Some("abc"));
    assert_eq!(snapshot.sequence, Some(6));

    stop(task, &handle).await;
}

#[tokio::test]
async fn test_presence_change_while_disconnected_applies_on_next_identify() {
    let gateway = MockGateway::new().await;
    let mut config = test_config(&gateway.url());
    config.gateway.initial_backoff_ms = 500;
    config.gateway.max_backoff_ms = 500;
    let (task, handle) = start(&config);

    let (first, _) = gateway.accept_ready(60_000, "abc").await;
    wait_phase(&handle, Phase::Ready).await;
    drop(first);
    wait_phase(&handle, Phase::ReconnectBackoff).await;

    let outcome = handle.set_custom_status("brb").await.unwrap();
    assert_eq!(outcome, PublishOutcome::Skipped);

    let (_second, identify) = gateway.accept_ready(60_000, "def").await;
    assert_eq!(identify["op"], 2);
    assert_eq!(
        identify["d"]["presence"]["activities"][0]["state"],
        "brb"
    );

    stop(task, &handle).await;
}

// ============================================================================
// Termination
// ============================================================================

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = test_config(&format!("ws://{addr}"));
    config.gateway.max_reconnect_attempts = 2;
    let (task, handle) = start(&config);

    let result = timeout(WAIT, task)
        .await
        .expect("session did not give up")
        .expect("session task panicked");

    assert!(matches!(
        result,
        Err(PresenceError::ExhaustedRetries { attempts: 2 })
    ));
    assert_eq!(handle.phase(), Phase::Terminated);
}

#[tokio::test]
async fn test_shutdown_during_backoff() {
    let gateway = MockGateway::new().await;
    let mut config = test_config(&gateway.url());
    config.gateway.initial_backoff_ms = 10_000;
    config.gateway.max_backoff_ms = 10_000;
    let (task, handle) = start(&config);

    let (first, _) = gateway.accept_ready(60_000, "abc").await;
    wait_phase(&handle, Phase::Ready).await;
    drop(first);
    wait_phase(&handle, Phase::ReconnectBackoff).await;

    stop(task, &handle).await;
    assert_eq!(handle.phase(), Phase::Terminated);

    // nothing connects after termination
    assert!(
        timeout(Duration::from_millis(200), gateway.listener.accept())
            .await
            .is_err()
    );
}
