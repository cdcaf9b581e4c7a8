//! Initiator state machine: one request over one connection.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, instrument, warn};
use wsreq_core::error::NO_CALLBACK_DEFINED;
use wsreq_core::{ClientFrame, ProtocolError, ServerFrame};
use wsreq_settings::ClientSettings;

use crate::callback::RequestCallback;
use crate::error::{CallbackError, RequestError};

/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported when a close frame carries no status.
const NO_STATUS: u16 = 1005;

/// Builder for a single request.
///
/// ```ignore
/// let answer = WsRequest::new("ws://127.0.0.1:8080/ws")
///     .data(json!({"confirm": "Deploy?"}))
///     .callback(NamedCallbacks::new().on_sync("confirm", |_| Ok(json!(true))))
///     .send()
///     .await?;
/// ```
#[derive(Clone)]
pub struct WsRequest {
    target: String,
    data: Value,
    callback: Option<Arc<dyn RequestCallback>>,
    origin: Option<String>,
}

impl WsRequest {
    /// A request to `target`: a `ws://`/`wss://` URL, or a path starting with
    /// `/` resolved against [`origin`](Self::origin).
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            data: Value::Null,
            callback: None,
            origin: None,
        }
    }

    /// Payload of the `start` frame (defaults to `null`).
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Answer the server's callbacks with `callback`.
    #[must_use]
    pub fn callback(mut self, callback: impl RequestCallback + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Answer the server's callbacks with an already shared callback.
    #[must_use]
    pub fn shared_callback(mut self, callback: Arc<dyn RequestCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// HTTP origin for `/`-prefixed targets, e.g. `https://example.com`.
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Take the origin from client settings, if one is configured.
    #[must_use]
    pub fn with_settings(mut self, settings: &ClientSettings) -> Self {
        if let Some(origin) = &settings.origin {
            self.origin = Some(origin.clone());
        }
        self
    }

    /// Connect, send `start`, service callbacks and wait for `return`.
    #[instrument(skip_all, fields(request_target = %self.target))]
    pub async fn send(self) -> Result<Value, RequestError> {
        let url = resolve_url(&self.target, self.origin.as_deref())?;
        debug!(%url, "connecting");
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| RequestError::Connect(Box::new(e)))?;
        info!(%url, "connected");

        let (sink, stream) = ws.split();
        run(sink, stream, self.data, self.callback.as_deref()).await
    }
}

/// Send one request and wait for its result.
pub async fn websocket_request(
    url: &str,
    data: Value,
    callback: Option<Arc<dyn RequestCallback>>,
) -> Result<Value, RequestError> {
    let mut request = WsRequest::new(url).data(data);
    if let Some(callback) = callback {
        request = request.shared_callback(callback);
    }
    request.send().await
}

/// Turn a request target into a WebSocket URL.
///
/// `ws://` and `wss://` URLs are used as-is. Paths starting with `/` are
/// appended to `origin` with `http` mapped to `ws` and `https` to `wss`.
pub fn resolve_url(target: &str, origin: Option<&str>) -> Result<String, RequestError> {
    if target.starts_with("ws://") || target.starts_with("wss://") {
        return Ok(target.to_string());
    }
    if !target.starts_with('/') {
        return Err(RequestError::InvalidUrl(format!(
            "expected a ws:// or wss:// URL or an absolute path, got {target:?}"
        )));
    }
    let Some(origin) = origin else {
        return Err(RequestError::InvalidUrl(format!(
            "relative target {target:?} needs an origin"
        )));
    };
    let origin = origin.trim_end_matches('/');
    let ws_origin = if let Some(rest) = origin.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = origin.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(RequestError::InvalidUrl(format!(
            "origin must be an http(s) URL, got {origin:?}"
        )));
    };
    Ok(format!("{ws_origin}{target}"))
}

/// Drive the protocol over an open connection until it settles.
async fn run<S, R>(
    mut sink: S,
    mut stream: R,
    data: Value,
    callback: Option<&dyn RequestCallback>,
) -> Result<Value, RequestError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    send_frame(&mut sink, &ClientFrame::start(data)).await?;

    while let Some(msg) = stream.next().await {
        let msg = msg.map_err(|e| RequestError::Transport(Box::new(e)))?;
        let text = match msg {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Binary(bytes) => {
                String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)?
            }
            Message::Close(frame) => {
                let (code, reason) = frame.map_or((NO_STATUS, String::new()), |f| {
                    (u16::from(f.code), f.reason.as_str().to_owned())
                });
                warn!(code, %reason, "connection closed before return");
                return Err(RequestError::Closed { code, reason });
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        match ServerFrame::decode(&text)? {
            ServerFrame::Callback { data } => {
                let reply = answer(callback, data).await;
                send_frame(&mut sink, &reply).await?;
            }
            ServerFrame::Return(settlement) => {
                debug!("return frame received");
                let _ = sink.close().await;
                return settlement.into_result().map_err(RequestError::Remote);
            }
            ServerFrame::Unknown => debug!("ignoring frame with unknown tag"),
        }
    }

    Err(RequestError::Closed {
        code: ABNORMAL_CLOSURE,
        reason: String::new(),
    })
}

/// Build the response to one `callback` frame.
async fn answer(callback: Option<&dyn RequestCallback>, data: Value) -> ClientFrame {
    let Some(callback) = callback else {
        debug!("callback requested but none configured");
        return ClientFrame::callback_err(NO_CALLBACK_DEFINED);
    };
    match AssertUnwindSafe(callback.call(data)).catch_unwind().await {
        Ok(Ok(value)) => ClientFrame::callback_ok(value),
        Ok(Err(e)) => {
            debug!(error = %e, "callback failed");
            ClientFrame::callback_err(e.to_remote())
        }
        Err(panic) => {
            let err = CallbackError::Panicked(panic_message(panic.as_ref()));
            warn!(error = %err, "callback panicked");
            ClientFrame::callback_err(err.to_remote())
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &ClientFrame) -> Result<(), RequestError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = frame.encode()?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| RequestError::Transport(Box::new(e)))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{FixedAnswer, callback_fn};
    use assert_matches::assert_matches;
    use futures::channel::mpsc;
    use serde_json::json;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use wsreq_core::RemoteError;

    type Incoming = mpsc::UnboundedSender<Result<Message, tungstenite::Error>>;

    /// A scripted connection: frames pushed on `incoming` are what the server
    /// "sends"; everything the client writes lands on the returned receiver.
    fn pipe() -> (
        impl Sink<Message, Error = tungstenite::Error> + Unpin,
        mpsc::UnboundedReceiver<Message>,
        Incoming,
        mpsc::UnboundedReceiver<Result<Message, tungstenite::Error>>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded();
        let sink = out_tx.sink_map_err(|_| tungstenite::Error::ConnectionClosed);
        (sink, out_rx, in_tx, in_rx)
    }

    fn server(frame: &ServerFrame) -> Result<Message, tungstenite::Error> {
        Ok(Message::Text(frame.encode().unwrap().into()))
    }

    /// Everything the client wrote; the sink is dropped once `run` returns.
    async fn sent_frames(out: &mut mpsc::UnboundedReceiver<Message>) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Some(msg) = out.next().await {
            if let Message::Text(text) = msg {
                frames.push(ClientFrame::decode(text.as_str()).unwrap());
            }
        }
        frames
    }

    #[allow(clippy::unused_async)]
    async fn explode(_data: Value) -> Result<Value, CallbackError> {
        panic!("kaboom")
    }

    #[test]
    fn absolute_urls_pass_through() {
        assert_eq!(
            resolve_url("ws://localhost:8080/ws", None).unwrap(),
            "ws://localhost:8080/ws"
        );
        assert_eq!(
            resolve_url("wss://example.com/rpc", Some("http://ignored")).unwrap(),
            "wss://example.com/rpc"
        );
    }

    #[test]
    fn paths_resolve_against_origin() {
        assert_eq!(
            resolve_url("/ws", Some("http://localhost:3000")).unwrap(),
            "ws://localhost:3000/ws"
        );
        assert_eq!(
            resolve_url("/api/rpc", Some("https://example.com/")).unwrap(),
            "wss://example.com/api/rpc"
        );
    }

    #[test]
    fn bad_targets_are_rejected() {
        assert_matches!(resolve_url("/ws", None), Err(RequestError::InvalidUrl(_)));
        assert_matches!(
            resolve_url("http://example.com/ws", None),
            Err(RequestError::InvalidUrl(_))
        );
        assert_matches!(
            resolve_url("/ws", Some("ftp://example.com")),
            Err(RequestError::InvalidUrl(_))
        );
    }

    #[test]
    fn settings_supply_the_origin() {
        let settings = ClientSettings {
            origin: Some("http://localhost:9000".into()),
        };
        let request = WsRequest::new("/ws").with_settings(&settings);
        assert_eq!(request.origin.as_deref(), Some("http://localhost:9000"));
    }

    #[tokio::test]
    async fn return_data_resolves() {
        let (sink, mut out, incoming, stream) = pipe();
        incoming
            .unbounded_send(server(&ServerFrame::return_ok(json!({"status": "ok"}))))
            .unwrap();

        let result = run(sink, stream, json!({"status": "ok"}), None).await;
        assert_eq!(result.unwrap(), json!({"status": "ok"}));
        assert_eq!(
            sent_frames(&mut out).await,
            vec![ClientFrame::start(json!({"status": "ok"}))]
        );
    }

    #[tokio::test]
    async fn return_error_rejects() {
        let (sink, _out, incoming, stream) = pipe();
        incoming
            .unbounded_send(server(&ServerFrame::return_err("boom")))
            .unwrap();

        let err = run(sink, stream, Value::Null, None).await.unwrap_err();
        assert_eq!(err.remote(), Some(&RemoteError::new("boom")));
    }

    #[tokio::test]
    async fn callbacks_are_answered_in_order() {
        let (sink, mut out, incoming, stream) = pipe();
        for i in 0..3 {
            incoming
                .unbounded_send(server(&ServerFrame::callback(json!(i))))
                .unwrap();
        }
        incoming
            .unbounded_send(server(&ServerFrame::return_ok(json!("done"))))
            .unwrap();

        let double = callback_fn(|v: Value| async move {
            Ok::<_, CallbackError>(json!(v.as_i64().unwrap_or(0) * 2))
        });
        let result = run(sink, stream, Value::Null, Some(&double)).await;
        assert_eq!(result.unwrap(), json!("done"));

        let frames = sent_frames(&mut out).await;
        assert_eq!(
            frames,
            vec![
                ClientFrame::start(Value::Null),
                ClientFrame::callback_ok(json!(0)),
                ClientFrame::callback_ok(json!(2)),
                ClientFrame::callback_ok(json!(4)),
            ]
        );
    }

    #[tokio::test]
    async fn missing_callback_answers_with_error() {
        let (sink, mut out, incoming, stream) = pipe();
        incoming
            .unbounded_send(server(&ServerFrame::callback(json!("q"))))
            .unwrap();
        incoming
            .unbounded_send(server(&ServerFrame::return_ok(Value::Null)))
            .unwrap();

        run(sink, stream, Value::Null, None).await.unwrap();
        assert_eq!(
            sent_frames(&mut out).await[1],
            ClientFrame::callback_err("No callback defined.")
        );
    }

    #[tokio::test]
    async fn panicking_callback_is_reported() {
        let (sink, mut out, incoming, stream) = pipe();
        incoming
            .unbounded_send(server(&ServerFrame::callback(json!("q"))))
            .unwrap();
        incoming
            .unbounded_send(server(&ServerFrame::return_ok(Value::Null)))
            .unwrap();

        run(sink, stream, Value::Null, Some(&callback_fn(explode)))
            .await
            .unwrap();

        match &sent_frames(&mut out).await[1] {
            ClientFrame::Callback(settlement) => {
                let err = settlement.error.as_ref().unwrap();
                assert_eq!(err.message, "Callback panicked: kaboom");
            }
            other => panic!("expected callback response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_before_return_rejects_with_reason() {
        let (sink, _out, incoming, stream) = pipe();
        incoming
            .unbounded_send(Ok(Message::Close(Some(CloseFrame {
                code: CloseCode::from(4000),
                reason: "Unhandled exception in RPC handler.".into(),
            }))))
            .unwrap();

        let err = run(sink, stream, Value::Null, Some(&FixedAnswer(Value::Null)))
            .await
            .unwrap_err();
        assert_matches!(err, RequestError::Closed { code: 4000, .. });
        assert_eq!(err.to_string(), "Unhandled exception in RPC handler.");
    }

    #[tokio::test]
    async fn stream_end_is_abnormal_closure() {
        let (sink, _out, incoming, stream) = pipe();
        drop(incoming);

        let err = run(sink, stream, Value::Null, None).await.unwrap_err();
        assert_eq!(err.to_string(), "WebSocket closed (code 1006).");
    }

    #[tokio::test]
    async fn unknown_frames_are_skipped() {
        let (sink, _out, incoming, stream) = pipe();
        incoming
            .unbounded_send(Ok(Message::Text(r#"{"_":"progress","pct":50}"#.into())))
            .unwrap();
        incoming
            .unbounded_send(server(&ServerFrame::return_ok(json!(1))))
            .unwrap();

        assert_eq!(run(sink, stream, Value::Null, None).await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn malformed_server_frame_is_protocol_error() {
        let (sink, _out, incoming, stream) = pipe();
        incoming
            .unbounded_send(Ok(Message::Text("not json".into())))
            .unwrap();

        assert_matches!(
            run(sink, stream, Value::Null, None).await,
            Err(RequestError::Protocol(ProtocolError::MalformedFrame(_)))
        );
    }
}
