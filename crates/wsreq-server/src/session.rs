//! WebSocket session lifecycle: one connected client from upgrade through
//! close.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};
use wsreq_core::ProtocolError;
use wsreq_core::close::{GOING_AWAY, GOING_AWAY_REASON, PROTOCOL_VIOLATION};

use crate::config::ServerConfig;
use crate::connection::{ConnectionContext, Outbound};
use crate::handler::{Peer, RequestHandler};
use crate::health::{ConnectionSlot, ServerCounters};

/// Close reasons are limited to 123 bytes by RFC 6455.
const MAX_CLOSE_REASON: usize = 123;

/// Why the read loop stopped.
enum SessionEnd {
    PeerClosed,
    Transport(String),
    Violation(ProtocolError),
    ShuttingDown,
    /// The handler settled and its close frame is on the wire.
    CloseSent,
}

/// Run the protocol for one upgraded socket.
///
/// 1. Spawns a writer task draining the connection's outbound queue
/// 2. Feeds inbound frames to the [`ConnectionContext`] in order
/// 3. Closes with 1002 on a protocol violation and 1001 on shutdown
/// 4. After the handler's close frame goes out, waits at most
///    `config.close_timeout()` for the peer's reply, then drops the socket
/// 5. Rejects any pending callback and records metrics on the way out
///
/// `slot` is the connection reserved at upgrade time; it is released when the
/// session ends.
#[instrument(skip_all, fields(connection_id = %peer.id))]
pub async fn run_ws_session(
    ws: WebSocket,
    peer: Peer,
    handler: Arc<dyn RequestHandler>,
    counters: Arc<ServerCounters>,
    slot: ConnectionSlot,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(config.send_queue_capacity.max(1));
    let close_sent = CancellationToken::new();

    let connection_start = Instant::now();
    info!(remote_addr = ?peer.remote_addr, "client connected");
    counter!("wsreq_connections_total").increment(1);
    gauge!("wsreq_connections_active").increment(1.0);

    let mut ctx = ConnectionContext::open(peer, handler, out_tx.clone(), Arc::clone(&counters));

    let writer_close_sent = close_sent.clone();
    let writer = tokio::spawn(
        async move {
            while let Some(item) = out_rx.recv().await {
                match item {
                    Outbound::Frame(frame) => {
                        let text = match frame.encode() {
                            Ok(text) => text,
                            Err(e) => {
                                error!(error = %e, "failed to encode frame");
                                continue;
                            }
                        };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        debug!(code, %reason, "closing connection");
                        let frame = CloseFrame {
                            code,
                            reason: reason.into(),
                        };
                        let _ = ws_tx.send(Message::Close(Some(frame))).await;
                        writer_close_sent.cancel();
                        break;
                    }
                }
            }
        }
        .in_current_span(),
    );

    let end = loop {
        tokio::select! {
            () = close_sent.cancelled() => break SessionEnd::CloseSent,
            () = shutdown.cancelled() => break SessionEnd::ShuttingDown,
            msg = ws_rx.next() => {
                let text = match msg {
                    None | Some(Ok(Message::Close(_))) => break SessionEnd::PeerClosed,
                    Some(Err(e)) => break SessionEnd::Transport(e.to_string()),
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => break SessionEnd::Violation(ProtocolError::InvalidUtf8),
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                };
                debug!(len = text.len(), "frame received");
                if let Err(e) = ctx.on_message(&text) {
                    break SessionEnd::Violation(e);
                }
            }
        }
    };

    match end {
        SessionEnd::PeerClosed => {
            info!("client disconnected");
            ctx.on_close();
            writer.abort();
        }
        SessionEnd::Transport(message) => {
            warn!(error = %message, "transport error");
            ctx.on_error(message);
            writer.abort();
        }
        // The close frame is queued before the pending callback is rejected,
        // so a handler resuming with the error cannot get a return frame out.
        SessionEnd::Violation(e) => {
            let queued = queue_close(&out_tx, PROTOCOL_VIOLATION, &e.to_string()).await;
            ctx.on_protocol_error(&e);
            if queued {
                finish_writer(writer, config.close_timeout()).await;
            }
        }
        SessionEnd::CloseSent => {
            if timeout(config.close_timeout(), await_peer_close(&mut ws_rx))
                .await
                .is_err()
            {
                warn!(
                    timeout_ms = config.close_timeout_ms,
                    "peer did not answer close, dropping connection"
                );
            }
            ctx.on_close();
            finish_writer(writer, config.close_timeout()).await;
        }
        SessionEnd::ShuttingDown => {
            info!("closing connection for shutdown");
            let queued = queue_close(&out_tx, GOING_AWAY, GOING_AWAY_REASON).await;
            ctx.on_close();
            if queued {
                finish_writer(writer, config.close_timeout()).await;
            }
        }
    }

    drop(slot);
    gauge!("wsreq_connections_active").decrement(1.0);
    histogram!("wsreq_connection_duration_seconds").record(connection_start.elapsed().as_secs_f64());
}

/// Wait for the writer to flush, aborting it after `limit`.
async fn finish_writer(writer: JoinHandle<()>, limit: Duration) {
    let abort = writer.abort_handle();
    if timeout(limit, writer).await.is_err() {
        warn!("writer did not finish in time, aborting");
        abort.abort();
    }
}

/// Read until the peer's close reply or the end of the stream.
async fn await_peer_close(ws_rx: &mut SplitStream<WebSocket>) {
    while let Some(Ok(msg)) = ws_rx.next().await {
        if matches!(msg, Message::Close(_)) {
            debug!("peer answered close");
            return;
        }
    }
}

/// Queue a close frame behind everything already sent.
///
/// Returns `false` when the writer has already stopped.
async fn queue_close(out_tx: &mpsc::Sender<Outbound>, code: u16, reason: &str) -> bool {
    let close = Outbound::Close {
        code,
        reason: truncate_reason(reason),
    };
    out_tx.send(close).await.is_ok()
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
