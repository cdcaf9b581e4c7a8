//! Protocol error type and the structured error carried across the wire.

use std::fmt;

use serde::de::Deserializer;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Error code constants ────────────────────────────────────────────

/// A named client callback does not exist.
pub const UNKNOWN_CALLBACK: &str = "UNKNOWN_CALLBACK";
/// A callback payload could not be dispatched.
pub const INVALID_CALLBACK_PAYLOAD: &str = "INVALID_CALLBACK_PAYLOAD";
/// A client callback panicked.
pub const CALLBACK_PANICKED: &str = "CALLBACK_PANICKED";
/// The server handler issued a callback while one was pending.
pub const CALLBACK_IN_PROGRESS: &str = "CALLBACK_IN_PROGRESS";
/// The connection closed while a callback was pending.
pub const CONNECTION_CLOSED: &str = "CONNECTION_CLOSED";

/// Message sent back when a callback frame arrives at a client that has no
/// callback configured.
pub const NO_CALLBACK_DEFINED: &str = "No callback defined.";

/// A frame arrived in a state that violates the exchange's ordering rules.
///
/// Never sent as a frame. The responder closes the connection abnormally.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A second `start` frame arrived on a connection that already started.
    #[error("RPC has been already started.")]
    AlreadyStarted,

    /// A `callback` response arrived while no callback was pending.
    #[error("There is no callback running.")]
    NoCallbackRunning,

    /// The text could not be decoded as a frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    /// A binary message did not contain UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Application-level failure carried in an `error` field.
///
/// Encoded as a bare string when `code` is absent (compatible with peers that
/// stringify errors) and as `{"code", "message"}` otherwise. Decoding accepts
/// either shape; any other JSON value becomes its textual form.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    /// Optional machine-readable code.
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
}

impl RemoteError {
    /// Error with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Error with a machine-readable code.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Machine-readable code, if any.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl From<String> for RemoteError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for RemoteError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl Serialize for RemoteError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.code {
            None => serializer.serialize_str(&self.message),
            Some(code) => {
                let mut s = serializer.serialize_struct("RemoteError", 2)?;
                s.serialize_field("code", code)?;
                s.serialize_field("message", &self.message)?;
                s.end()
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RemoteErrorRepr {
    Text(String),
    Structured {
        #[serde(default)]
        code: Option<String>,
        message: String,
    },
    Other(Value),
}

impl<'de> Deserialize<'de> for RemoteError {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RemoteErrorRepr::deserialize(deserializer)? {
            RemoteErrorRepr::Text(message) => Self::new(message),
            RemoteErrorRepr::Structured { code, message } => Self { code, message },
            RemoteErrorRepr::Other(value) => Self::new(ValueText(&value).to_string()),
        })
    }
}

/// Textual form of an arbitrary JSON value (strings without quotes).
struct ValueText<'a>(&'a Value);

impl fmt::Display for ValueText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}
