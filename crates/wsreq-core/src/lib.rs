//! # wsreq-core
//!
//! Shared pieces of the wsreq protocol: a single request/response exchange
//! over one WebSocket connection, during which the server may call back into
//! the client and wait for the answer.
//!
//! - [`frame`]: wire frames (`start`, `callback`, `return`) tagged on `_`
//! - [`error`]: protocol violations and the structured error carried in
//!   `error` fields
//! - [`close`]: close codes used by the responder
//! - [`logging`]: `tracing` subscriber setup and test capture helpers

#![deny(unsafe_code)]

pub mod close;
pub mod error;
pub mod frame;
pub mod logging;

pub use error::{ProtocolError, RemoteError};
pub use frame::{ClientFrame, ServerFrame, Settlement};
