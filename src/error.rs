use std::time::Duration;
use thiserror::Error;

use crate::session::SessionState;

/// Errors returned by session operations and the run loop.
#[derive(Error, Debug)]
pub enum StompError {
    /// A protocol-mandated header is missing or empty, or the operation is
    /// not available under the negotiated protocol version.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Malformed frame, unknown command, bad content-length or escape
    /// sequence violation on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// I/O failure reported by the transport.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// No inbound traffic within the negotiated incoming timeout. Always
    /// fatal to the run loop.
    #[error("heartbeat timeout after {0:?}")]
    HeartbeatTimeout(Duration),
    /// The operation requires an established connection.
    #[error("not connected (session state: {0:?})")]
    NotConnected(SessionState),
}
