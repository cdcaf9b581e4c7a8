//! End-to-end tests against a real listener using raw WebSocket frames.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use wsreq_server::{HandlerError, RequestContext, RequestHandler, RequestServer, ServerConfig};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Echoes by default; `{"ask": q}` calls back with `q` and returns
/// `{"answer": a}`; `{"confirm": p}` calls back with `p` and returns
/// `{"confirmed": a}`; `{"fail": m}` fails.
///
/// Every callback failure the handler sees is reported on `observed`.
struct ScriptedHandler {
    observed: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl RequestHandler for ScriptedHandler {
    async fn handle(&self, request: RequestContext) -> Result<Value, HandlerError> {
        if let Some(question) = request.data.get("ask") {
            return match request.callback.call(question.clone()).await {
                Ok(answer) => Ok(json!({ "answer": answer })),
                Err(e) => {
                    let _ = self.observed.send(e.to_string());
                    Err(e.into())
                }
            };
        }
        if let Some(payload) = request.data.get("confirm") {
            let answer = request.callback.call(payload.clone()).await?;
            return Ok(json!({ "confirmed": answer }));
        }
        if let Some(message) = request.data.get("fail").and_then(Value::as_str) {
            return Err(HandlerError::msg(message));
        }
        Ok(request.data)
    }
}

async fn boot(config: ServerConfig) -> (RequestServer, SocketAddr, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let server = RequestServer::new(config, ScriptedHandler { observed: tx });
    let (addr, _handle) = server.listen().await.unwrap();
    (server, addr, rx)
}

async fn boot_default() -> (RequestServer, SocketAddr, mpsc::UnboundedReceiver<String>) {
    boot(ServerConfig::default()).await
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(format!("ws://{addr}/ws")))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    ws
}

async fn send(ws: &mut WsStream, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Next protocol frame; panics on close.
async fn next_frame(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("read timed out")
            .expect("stream ended")
            .expect("read failed");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// Read until the close frame and return its code and reason.
async fn expect_close(ws: &mut WsStream) -> (u16, String) {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("read timed out")
            .expect("stream ended before close")
            .expect("read failed");
        match msg {
            Message::Close(Some(frame)) => {
                return (u16::from(frame.code), frame.reason.as_str().to_owned());
            }
            Message::Close(None) => return (1005, String::new()),
            Message::Text(text) => panic!("unexpected frame before close: {}", text.as_str()),
            _ => {}
        }
    }
}

async fn observed(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(TIMEOUT, rx.recv())
        .await
        .expect("handler did not report")
        .expect("handler channel closed")
}

#[tokio::test]
async fn echo_returns_payload_and_closes_normally() {
    let (_server, addr, _rx) = boot_default().await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"_": "start", "data": {"status": "ok"}})).await;

    assert_eq!(
        next_frame(&mut ws).await,
        json!({"_": "return", "data": {"status": "ok"}})
    );
    assert_eq!(expect_close(&mut ws).await.0, 1000);
}

#[tokio::test]
async fn callback_round_trip() {
    let (_server, addr, _rx) = boot_default().await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"_": "start", "data": {"ask": "confirm"}})).await;
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"_": "callback", "data": "confirm"})
    );

    send(&mut ws, json!({"_": "callback", "data": true})).await;
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"_": "return", "data": {"answer": true}})
    );
    assert_eq!(expect_close(&mut ws).await.0, 1000);
}

#[tokio::test]
async fn confirm_scenario() {
    let (_server, addr, _rx) = boot_default().await;
    let mut ws = connect(addr).await;

    send(
        &mut ws,
        json!({"_": "start", "data": {"confirm": {"ask": "confirm"}}}),
    )
    .await;
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"_": "callback", "data": {"ask": "confirm"}})
    );

    send(&mut ws, json!({"_": "callback", "data": true})).await;
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"_": "return", "data": {"confirmed": true}})
    );
    assert_eq!(expect_close(&mut ws).await.0, 1000);
}

#[tokio::test]
async fn rejected_callback_fails_the_handler() {
    let (_server, addr, mut rx) = boot_default().await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"_": "start", "data": {"ask": 1}})).await;
    let _ = next_frame(&mut ws).await;
    send(&mut ws, json!({"_": "callback", "error": "No callback defined."})).await;

    assert_eq!(observed(&mut rx).await, "No callback defined.");
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"_": "return", "error": "No callback defined."})
    );
    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 4000);
    assert_eq!(reason, "Unhandled exception in RPC handler.");
}

#[tokio::test]
async fn handler_failure_closes_with_4000() {
    let (_server, addr, _rx) = boot_default().await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"_": "start", "data": {"fail": "boom"}})).await;

    assert_eq!(
        next_frame(&mut ws).await,
        json!({"_": "return", "error": "boom"})
    );
    assert_eq!(
        expect_close(&mut ws).await,
        (4000, "Unhandled exception in RPC handler.".to_string())
    );
}

#[tokio::test]
async fn duplicate_start_is_a_protocol_violation() {
    let (_server, addr, mut rx) = boot_default().await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"_": "start", "data": {"ask": "first"}})).await;
    let _ = next_frame(&mut ws).await;
    send(&mut ws, json!({"_": "start", "data": null})).await;

    assert_eq!(
        expect_close(&mut ws).await,
        (1002, "RPC has been already started.".to_string())
    );
    assert_eq!(observed(&mut rx).await, "RPC has been already started.");
}

#[tokio::test]
async fn unsolicited_callback_response_is_a_protocol_violation() {
    let (_server, addr, _rx) = boot_default().await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"_": "callback", "data": 1})).await;

    assert_eq!(
        expect_close(&mut ws).await,
        (1002, "There is no callback running.".to_string())
    );
}

#[tokio::test]
async fn malformed_json_is_a_protocol_violation() {
    let (_server, addr, _rx) = boot_default().await;
    let mut ws = connect(addr).await;

    ws.send(Message::Text("{not json".into())).await.unwrap();

    assert_eq!(expect_close(&mut ws).await.0, 1002);
}

#[tokio::test]
async fn unknown_frames_are_ignored() {
    let (_server, addr, _rx) = boot_default().await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"_": "heartbeat"})).await;
    send(&mut ws, json!({"_": "start", "data": [1, 2]})).await;

    assert_eq!(
        next_frame(&mut ws).await,
        json!({"_": "return", "data": [1, 2]})
    );
}

#[tokio::test]
async fn binary_frames_carry_text() {
    let (_server, addr, _rx) = boot_default().await;
    let mut ws = connect(addr).await;

    let start = json!({"_": "start", "data": "bin"}).to_string();
    ws.send(Message::Binary(start.into_bytes().into()))
        .await
        .unwrap();

    assert_eq!(
        next_frame(&mut ws).await,
        json!({"_": "return", "data": "bin"})
    );
}

#[tokio::test]
async fn client_close_rejects_pending_callback() {
    let (server, addr, mut rx) = boot_default().await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"_": "start", "data": {"ask": "are you there?"}})).await;
    let _ = next_frame(&mut ws).await;
    assert_eq!(server.counters().connections(), 1);
    assert_eq!(server.counters().active_requests(), 1);

    ws.close(None).await.unwrap();

    assert_eq!(observed(&mut rx).await, "Connection closed.");
}

#[tokio::test]
async fn shutdown_closes_with_1001() {
    let (server, addr, mut rx) = boot_default().await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"_": "start", "data": {"ask": "still there?"}})).await;
    let _ = next_frame(&mut ws).await;

    server.shutdown().shutdown();

    assert_eq!(
        expect_close(&mut ws).await,
        (1001, "Server shutting down.".to_string())
    );
    assert_eq!(observed(&mut rx).await, "Connection closed.");
}

#[tokio::test]
async fn upgrades_beyond_the_limit_get_503() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let (_server, addr, _rx) = boot(config).await;

    let mut first = connect(addr).await;
    send(&mut first, json!({"_": "start", "data": {"ask": "hold"}})).await;
    let _ = next_frame(&mut first).await;

    let err = connect_async(format!("ws://{addr}/ws")).await.unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 503),
        other => panic!("expected HTTP 503, got {other:?}"),
    }
}

#[tokio::test]
async fn silent_peer_is_dropped_after_close_timeout() {
    let config = ServerConfig {
        max_connections: 1,
        close_timeout_ms: 200,
        ..ServerConfig::default()
    };
    let (server, addr, _rx) = boot(config).await;

    let mut silent = connect(addr).await;
    send(&mut silent, json!({"_": "start", "data": "bye"})).await;
    assert_eq!(
        next_frame(&mut silent).await,
        json!({"_": "return", "data": "bye"})
    );
    assert_eq!(expect_close(&mut silent).await.0, 1000);

    // `silent` stays open but is never polled again.
    timeout(TIMEOUT, async {
        while server.counters().connections() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connection slot was never released");

    let mut next = connect(addr).await;
    send(&mut next, json!({"_": "start", "data": "hello"})).await;
    assert_eq!(
        next_frame(&mut next).await,
        json!({"_": "return", "data": "hello"})
    );
    drop(silent);
}

#[tokio::test]
async fn concurrent_upgrades_respect_the_limit() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let (server, addr, _rx) = boot(config).await;

    let url = format!("ws://{addr}/ws");
    let attempts = futures::future::join_all((0..8).map(|_| connect_async(url.clone()))).await;
    let (accepted, refused): (Vec<_>, Vec<_>) = attempts.into_iter().partition(Result::is_ok);

    assert_eq!(accepted.len(), 1);
    assert_eq!(refused.len(), 7);
    for err in refused {
        match err {
            Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 503),
            other => panic!("expected HTTP 503, got {other:?}"),
        }
    }
    assert_eq!(server.counters().connections(), 1);
}

#[tokio::test]
async fn graceful_shutdown_waits_for_live_sessions() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let server = RequestServer::new(ServerConfig::default(), ScriptedHandler { observed: tx });
    let (addr, handle) = server.listen().await.unwrap();

    let mut ws = connect(addr).await;
    send(&mut ws, json!({"_": "start", "data": {"ask": "pending"}})).await;
    let _ = next_frame(&mut ws).await;
    assert_eq!(server.counters().connections(), 1);

    timeout(
        TIMEOUT,
        server.shutdown().graceful_shutdown(vec![handle], Some(TIMEOUT)),
    )
    .await
    .expect("graceful shutdown hung");

    assert_eq!(server.counters().connections(), 0);
    assert!(server.shutdown().sessions().is_empty());
    assert_eq!(
        expect_close(&mut ws).await,
        (1001, "Server shutting down.".to_string())
    );
}
