//! Error types for controller operations

use crate::session::SessionId;
use std::time::Duration;
use thiserror::Error;

/// Main error type for controller operations.
///
/// Transport and protocol failures are always scoped to one session; a
/// failed RPC never says anything about the registry or other sessions.
/// Command-level failures are not represented here at all; they arrive as
/// a well-formed `CommandResult::Err` from a successful RPC.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Transport-level failure on a session
    #[error("transport error: {0}")]
    Transport(String),

    /// Wire protocol failure on a session
    #[error("protocol error: {0}")]
    Protocol(#[from] tether_proto::ProtocolError),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A new connection failed to identify itself
    #[error("handshake error: {0}")]
    Handshake(String),

    /// The bounded wait for a command response elapsed
    #[error("request timed out after {duration:?}")]
    Timeout {
        /// Configured bound that was exceeded
        duration: Duration,
    },

    /// No live session has this ID
    #[error("no session with ID {0}")]
    SessionNotFound(SessionId),

    /// The session's transport closed before the exchange finished
    #[error("session {0} closed")]
    SessionClosed(SessionId),

    /// The registry has been stopped
    #[error("registry stopped")]
    Stopped,
}
