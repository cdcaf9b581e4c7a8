//! The business-handler contract.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;
use wsreq_core::RemoteError;

use crate::callback::{CallbackError, ClientCallback};

/// Identity of the connected client.
#[derive(Clone, Debug)]
pub struct Peer {
    /// Unique connection ID (`conn_{uuid_v7}`).
    pub id: String,
    /// Remote socket address, when the listener exposes it.
    pub remote_addr: Option<SocketAddr>,
    /// When the WebSocket upgrade completed.
    pub connected_at: Instant,
}

impl Peer {
    /// Describe a freshly accepted connection.
    pub fn new(remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id: format!("conn_{}", Uuid::now_v7()),
            remote_addr,
            connected_at: Instant::now(),
        }
    }
}

/// Everything a handler receives for one request.
#[derive(Debug)]
pub struct RequestContext {
    /// The client that sent the request.
    pub peer: Peer,
    /// Payload of the `start` frame.
    pub data: Value,
    /// Calls back into the client's callback.
    pub callback: ClientCallback,
}

/// Why a handler failed. Sent to the client as `return{error}`.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Application failure with an optional machine-readable code.
    #[error("{message}")]
    Failed {
        /// Optional error code.
        code: Option<String>,
        /// Human-readable message.
        message: String,
    },
    /// A callback into the client failed and the handler gave up.
    #[error(transparent)]
    Callback(#[from] CallbackError),
    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Failure carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed {
            code: None,
            message: message.into(),
        }
    }

    /// Failure carrying a code and a message.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Convert into the error representation used on the wire.
    pub fn to_remote(&self) -> RemoteError {
        match self {
            Self::Failed { code, message } => RemoteError {
                code: code.clone(),
                message: message.clone(),
            },
            Self::Callback(err) => err.to_remote(),
            Self::Other(err) => RemoteError::new(format!("{err:#}")),
        }
    }
}

/// Serves one request per connection, possibly calling back into the client.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produce the result for `request`.
    async fn handle(&self, request: RequestContext) -> Result<Value, HandlerError>;
}

/// Adapter returned by [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Wrap an async function as a [`RequestHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> RequestHandler for HandlerFn<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, request: RequestContext) -> Result<Value, HandlerError> {
        (self.0)(request).await
    }
}
