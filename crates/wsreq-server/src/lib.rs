//! # wsreq-server
//!
//! Responder side of the wsreq protocol: a single request per WebSocket
//! connection, during which the handler may call back into the client and
//! wait for the answer before returning.
//!
//! - [`RequestServer`] owns the axum router, the listener and shutdown.
//! - [`RequestHandler`] is the business-logic seam; [`handler_fn`] adapts an
//!   async function.
//! - [`ClientCallback`] is the handler's line back to the client.
//! - [`ConnectionContext`] is the per-connection protocol state machine.

#![deny(unsafe_code)]

pub mod callback;
pub mod config;
pub mod connection;
pub mod handler;
pub mod health;
pub mod server;
pub mod session;
pub mod shutdown;

pub use callback::{CallbackError, ClientCallback};
pub use config::ServerConfig;
pub use connection::{ConnectionContext, Outbound};
pub use handler::{HandlerError, HandlerFn, Peer, RequestContext, RequestHandler, handler_fn};
pub use health::{ConnectionSlot, HealthResponse, ServerCounters};
pub use server::RequestServer;
pub use shutdown::ShutdownCoordinator;
