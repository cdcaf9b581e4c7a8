//! # wsreq-client
//!
//! Initiator side of the wsreq protocol. A request opens one WebSocket, sends
//! its payload, answers every callback the server makes along the way and
//! settles on the server's `return` frame.
//!
//! - [`WsRequest`] / [`websocket_request`] send a request.
//! - [`RequestCallback`] answers callbacks; [`callback_fn`] adapts an async
//!   function and [`NamedCallbacks`] dispatches `[name, ...args]` payloads.

#![deny(unsafe_code)]

pub mod callback;
pub mod error;
pub mod named;
pub mod request;

pub use callback::{CallbackFn, FixedAnswer, RequestCallback, callback_fn};
pub use error::{CallbackError, RequestError};
pub use named::NamedCallbacks;
pub use request::{WsRequest, resolve_url, websocket_request};
