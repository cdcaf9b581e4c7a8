//! WebSocket close codes used by the responder.

/// The exchange completed and the handler succeeded.
pub const NORMAL_CLOSURE: u16 = 1000;
/// The server is shutting down.
pub const GOING_AWAY: u16 = 1001;
/// The peer violated the frame ordering rules or sent an undecodable frame.
pub const PROTOCOL_VIOLATION: u16 = 1002;
/// The handler failed. Private-use range (4000–4999).
pub const HANDLER_FAILURE: u16 = 4000;

/// Close reason sent with [`HANDLER_FAILURE`].
pub const HANDLER_FAILURE_REASON: &str = "Unhandled exception in RPC handler.";
/// Close reason sent with [`GOING_AWAY`].
pub const GOING_AWAY_REASON: &str = "Server shutting down.";

/// Human-readable description of a close received before the final frame.
///
/// Uses the close reason when the peer sent one, otherwise the code.
pub fn describe_close(code: u16, reason: &str) -> String {
    if reason.is_empty() {
        format!("WebSocket closed (code {code}).")
    } else {
        reason.to_owned()
    }
}
