//! Client error types.

use tokio_tungstenite::tungstenite;
use wsreq_core::close::describe_close;
use wsreq_core::error::{CALLBACK_PANICKED, INVALID_CALLBACK_PAYLOAD, UNKNOWN_CALLBACK};
use wsreq_core::{ProtocolError, RemoteError};

/// Why a client callback could not answer the server.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// A named callback that was never registered.
    #[error("Unknown callback: {0}")]
    UnknownCallback(String),
    /// The payload does not have the shape the callback expects.
    #[error("Invalid callback payload: {0}")]
    InvalidPayload(String),
    /// The callback ran and failed.
    #[error("{0}")]
    Failed(RemoteError),
    /// The callback panicked.
    #[error("Callback panicked: {0}")]
    Panicked(String),
}

impl CallbackError {
    /// Failure carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(RemoteError::new(message))
    }

    /// Convert into the error representation sent in `callback{error}`.
    pub fn to_remote(&self) -> RemoteError {
        match self {
            Self::Failed(remote) => remote.clone(),
            Self::UnknownCallback(_) => RemoteError::with_code(UNKNOWN_CALLBACK, self.to_string()),
            Self::InvalidPayload(_) => {
                RemoteError::with_code(INVALID_CALLBACK_PAYLOAD, self.to_string())
            }
            Self::Panicked(_) => RemoteError::with_code(CALLBACK_PANICKED, self.to_string()),
        }
    }
}

impl From<RemoteError> for CallbackError {
    fn from(remote: RemoteError) -> Self {
        Self::Failed(remote)
    }
}

/// Why a request did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The target could not be turned into a `ws://` or `wss://` URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// The connection could not be opened.
    #[error("failed to connect: {0}")]
    Connect(#[source] Box<tungstenite::Error>),
    /// The transport failed after the connection opened.
    #[error("transport error: {0}")]
    Transport(#[source] Box<tungstenite::Error>),
    /// The connection closed before a `return` frame arrived.
    #[error("{}", close_message(.code, .reason))]
    Closed {
        /// WebSocket close code (1005 when the frame carried none, 1006 when
        /// the stream ended without one).
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// The server returned an error.
    #[error("{0}")]
    Remote(RemoteError),
    /// The server broke the protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// A frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn close_message(code: &u16, reason: &str) -> String {
    describe_close(*code, reason)
}

impl RequestError {
    /// The server's error, when the request failed with one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(remote) => Some(remote),
            _ => None,
        }
    }
}
