//! Wire frames.
//!
//! Every frame is one JSON text message tagged on the `_` field:
//!
//! ```text
//! Client→Server: {"_":"start","data":<any>}
//!                {"_":"callback","data":<any>} | {"_":"callback","error":<error>}
//! Server→Client: {"_":"callback","data":<any>}
//!                {"_":"return","data":<any>}   | {"_":"return","error":<error>}
//! ```
//!
//! Frames with an unrecognized tag decode to an `Unknown` variant so peers
//! can ignore them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, RemoteError};

/// Frame sent by the initiator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Opens the exchange with the request payload.
    Start {
        /// Request payload (`null` when omitted).
        #[serde(default)]
        data: Value,
    },
    /// Answer to the pending server callback.
    Callback(Settlement),
    /// Any tag this version does not know.
    #[serde(other)]
    #[serde(skip_serializing)]
    Unknown,
}

/// Frame sent by the responder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Asks the initiator to run its callback with `data`.
    Callback {
        /// Callback argument payload.
        #[serde(default)]
        data: Value,
    },
    /// Final outcome of the exchange.
    Return(Settlement),
    /// Any tag this version does not know.
    #[serde(other)]
    #[serde(skip_serializing)]
    Unknown,
}

/// Body shared by callback responses and `return` frames.
///
/// `data` and `error` are mutually exclusive on the wire. If a peer sends
/// both, `error` wins; if it sends neither, the outcome is `Ok(null)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl Settlement {
    /// Successful settlement.
    pub fn ok(data: Value) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    /// Failed settlement.
    pub fn err(error: impl Into<RemoteError>) -> Self {
        Self {
            data: None,
            error: Some(error.into()),
        }
    }

    /// Build from a `Result`.
    pub fn from_result(result: Result<Value, RemoteError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(error) => Self::err(error),
        }
    }

    /// Collapse into a `Result`.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data.unwrap_or(Value::Null)),
        }
    }
}

impl ClientFrame {
    /// `start` frame.
    pub fn start(data: Value) -> Self {
        Self::Start { data }
    }

    /// Successful callback response.
    pub fn callback_ok(data: Value) -> Self {
        Self::Callback(Settlement::ok(data))
    }

    /// Failed callback response.
    pub fn callback_err(error: impl Into<RemoteError>) -> Self {
        Self::Callback(Settlement::err(error))
    }

    /// Decode a text message.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a text message.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerFrame {
    /// Callback request.
    pub fn callback(data: Value) -> Self {
        Self::Callback { data }
    }

    /// Final success.
    pub fn return_ok(data: Value) -> Self {
        Self::Return(Settlement::ok(data))
    }

    /// Final failure.
    pub fn return_err(error: impl Into<RemoteError>) -> Self {
        Self::Return(Settlement::err(error))
    }

    /// Decode a text message.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a text message.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
