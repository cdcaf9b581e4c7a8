//! Per-connection protocol state machine.
//!
//! The session task owns one [`ConnectionContext`] and feeds it every inbound
//! text frame plus the close/error events of the socket. The context spawns
//! the business handler on `start`, routes `callback` responses to the parked
//! waiter and emits frames through the connection's outbound queue.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};
use wsreq_core::close::{HANDLER_FAILURE, HANDLER_FAILURE_REASON, NORMAL_CLOSURE};
use wsreq_core::{ClientFrame, ProtocolError, ServerFrame};

use crate::callback::{CallbackError, ClientCallback, PendingCallback};
use crate::handler::{HandlerError, Peer, RequestContext, RequestHandler};
use crate::health::ServerCounters;

/// Items written to the socket by the session's writer task, in order.
#[derive(Debug, PartialEq)]
pub enum Outbound {
    /// A protocol frame.
    Frame(ServerFrame),
    /// Close the socket with this code and reason; nothing follows it.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Responder-side state of one connection.
pub struct ConnectionContext {
    peer: Peer,
    handler: Arc<dyn RequestHandler>,
    outbound: mpsc::Sender<Outbound>,
    counters: Arc<ServerCounters>,
    active: Option<JoinHandle<()>>,
    pending: PendingCallback,
}

impl ConnectionContext {
    /// Fresh state for a newly opened connection.
    pub fn open(
        peer: Peer,
        handler: Arc<dyn RequestHandler>,
        outbound: mpsc::Sender<Outbound>,
        counters: Arc<ServerCounters>,
    ) -> Self {
        Self {
            peer,
            handler,
            outbound,
            counters,
            active: None,
            pending: PendingCallback::default(),
        }
    }

    /// The connected client.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Whether a `start` frame has been accepted.
    pub fn is_started(&self) -> bool {
        self.active.is_some()
    }

    /// Whether the handler is waiting on a callback response.
    pub fn has_pending_callback(&self) -> bool {
        self.pending.is_pending()
    }

    /// Apply one inbound text frame.
    ///
    /// An error is a protocol violation; the caller must close the connection.
    pub fn on_message(&mut self, text: &str) -> Result<(), ProtocolError> {
        match ClientFrame::decode(text)? {
            ClientFrame::Start { data } => {
                if self.active.is_some() {
                    return Err(ProtocolError::AlreadyStarted);
                }
                debug!("start frame received");
                self.active = Some(self.spawn_handler(data));
            }
            ClientFrame::Callback(settlement) => {
                self.pending.settle(settlement.into_result())?;
                debug!("callback response delivered");
            }
            ClientFrame::Unknown => debug!("ignoring frame with unknown tag"),
        }
        Ok(())
    }

    /// The socket closed; a pending callback fails with `ConnectionClosed`.
    pub fn on_close(&mut self) {
        if self.pending.close(CallbackError::ConnectionClosed) {
            debug!("pending callback rejected on close");
        }
    }

    /// The transport failed; a pending callback fails with the error message.
    pub fn on_error(&mut self, message: String) {
        if self.pending.close(CallbackError::Transport(message)) {
            debug!("pending callback rejected on transport error");
        }
    }

    /// Record a protocol violation and reject a pending callback.
    pub fn on_protocol_error(&mut self, error: &ProtocolError) {
        warn!(error = %error, started = self.is_started(), "protocol violation");
        counter!("wsreq_protocol_errors_total").increment(1);
        let _ = self
            .pending
            .close(CallbackError::Transport(error.to_string()));
    }

    fn spawn_handler(&self, data: serde_json::Value) -> JoinHandle<()> {
        let request = RequestContext {
            peer: self.peer.clone(),
            data,
            callback: ClientCallback::new(self.pending.clone(), self.outbound.clone()),
        };
        let handler = Arc::clone(&self.handler);
        let outbound = self.outbound.clone();
        let counters = Arc::clone(&self.counters);
        let span = info_span!("request", connection_id = %self.peer.id);

        counters.request_started();
        counter!("wsreq_requests_total").increment(1);

        tokio::spawn(
            async move {
                let started = Instant::now();
                let result = match AssertUnwindSafe(handler.handle(request))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => Err(HandlerError::msg(panic_message(panic.as_ref()))),
                };
                counters.request_finished();
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

                let (frame, close) = match result {
                    Ok(data) => {
                        debug!(elapsed_ms, "handler completed");
                        (
                            ServerFrame::return_ok(data),
                            Outbound::Close {
                                code: NORMAL_CLOSURE,
                                reason: String::new(),
                            },
                        )
                    }
                    Err(err) => {
                        warn!(error = %err, elapsed_ms, "handler failed");
                        counter!("wsreq_requests_failed_total").increment(1);
                        (
                            ServerFrame::return_err(err.to_remote()),
                            Outbound::Close {
                                code: HANDLER_FAILURE,
                                reason: HANDLER_FAILURE_REASON.to_string(),
                            },
                        )
                    }
                };

                if outbound.send(Outbound::Frame(frame)).await.is_err() {
                    debug!("connection gone before return frame");
                    return;
                }
                let _ = outbound.send(close).await;
            }
            .instrument(span),
        )
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
