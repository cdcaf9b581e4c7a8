//! Server-to-client callbacks.
//!
//! Each connection owns one [`PendingCallback`] slot. [`ClientCallback::call`]
//! parks a one-shot sender in it, queues a `callback` frame and suspends until
//! the session task settles the slot with the client's response, or rejects it
//! when the connection goes away.

use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument};
use wsreq_core::error::{CALLBACK_IN_PROGRESS, CONNECTION_CLOSED};
use wsreq_core::{ProtocolError, RemoteError, ServerFrame};

use crate::connection::Outbound;

/// Why a server-to-client callback did not produce a value.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// Another callback on this connection is still awaiting its response.
    #[error("There is an unfinished callback running.")]
    InProgress,
    /// The client answered with an error.
    #[error("{0}")]
    Rejected(RemoteError),
    /// The connection closed before the client answered.
    #[error("Connection closed.")]
    ConnectionClosed,
    /// The transport failed before the client answered.
    #[error("{0}")]
    Transport(String),
}

impl CallbackError {
    /// Machine-readable code carried when this error is forwarded to the client.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::InProgress => Some(CALLBACK_IN_PROGRESS),
            Self::Rejected(remote) => remote.code(),
            Self::ConnectionClosed | Self::Transport(_) => Some(CONNECTION_CLOSED),
        }
    }

    /// Convert into the error representation used on the wire.
    pub fn to_remote(&self) -> RemoteError {
        match self {
            Self::Rejected(remote) => remote.clone(),
            other => RemoteError {
                code: other.code().map(str::to_owned),
                message: other.to_string(),
            },
        }
    }
}

type Waiter = oneshot::Sender<Result<Value, CallbackError>>;

#[derive(Debug, Default)]
struct Slot {
    waiter: Option<Waiter>,
    closed: Option<CallbackError>,
}

/// Single-slot rendezvous between a suspended handler and the session task.
#[derive(Clone, Debug, Default)]
pub(crate) struct PendingCallback {
    slot: Arc<Mutex<Slot>>,
}

impl PendingCallback {
    /// Claim the slot for a new callback.
    fn park(&self) -> Result<oneshot::Receiver<Result<Value, CallbackError>>, CallbackError> {
        let mut slot = self.slot.lock();
        if let Some(reason) = &slot.closed {
            return Err(reason.clone());
        }
        if slot.waiter.is_some() {
            return Err(CallbackError::InProgress);
        }
        let (tx, rx) = oneshot::channel();
        slot.waiter = Some(tx);
        Ok(rx)
    }

    /// Release a claimed slot whose frame could not be sent.
    fn release(&self) {
        let _ = self.slot.lock().waiter.take();
    }

    /// Deliver the client's response to the parked waiter.
    pub(crate) fn settle(&self, outcome: Result<Value, RemoteError>) -> Result<(), ProtocolError> {
        let waiter = self
            .slot
            .lock()
            .waiter
            .take()
            .ok_or(ProtocolError::NoCallbackRunning)?;
        // The handler may have stopped waiting; the slot is free either way.
        let _ = waiter.send(outcome.map_err(CallbackError::Rejected));
        Ok(())
    }

    /// Mark the connection gone and reject the parked waiter, if any.
    ///
    /// Returns whether a callback was pending. Later calls fail immediately
    /// with the first recorded reason.
    pub(crate) fn close(&self, reason: CallbackError) -> bool {
        let mut slot = self.slot.lock();
        if slot.closed.is_none() {
            slot.closed = Some(reason.clone());
        }
        match slot.waiter.take() {
            Some(waiter) => {
                let _ = waiter.send(Err(reason));
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.slot.lock().waiter.is_some()
    }
}

/// Handle a request handler uses to call back into its client.
///
/// Cloning is cheap; every clone shares the connection's single slot, so at
/// most one call is outstanding per connection.
#[derive(Clone, Debug)]
pub struct ClientCallback {
    pending: PendingCallback,
    outbound: mpsc::Sender<Outbound>,
}

impl ClientCallback {
    pub(crate) fn new(pending: PendingCallback, outbound: mpsc::Sender<Outbound>) -> Self {
        Self { pending, outbound }
    }

    /// Send `data` to the client's callback and wait for its answer.
    ///
    /// Fails with [`CallbackError::InProgress`] without sending anything when
    /// another call is outstanding, and with [`CallbackError::ConnectionClosed`]
    /// once the connection is gone.
    #[instrument(skip_all)]
    pub async fn call(&self, data: Value) -> Result<Value, CallbackError> {
        let response = self.pending.park()?;
        counter!("wsreq_callbacks_total").increment(1);
        debug!("sending callback frame");

        let frame = Outbound::Frame(ServerFrame::callback(data));
        if self.outbound.send(frame).await.is_err() {
            self.pending.release();
            return Err(CallbackError::ConnectionClosed);
        }

        response.await.unwrap_or(Err(CallbackError::ConnectionClosed))
    }

    /// Whether a call is waiting for the client.
    pub fn is_pending(&self) -> bool {
        self.pending.is_pending()
    }
}
