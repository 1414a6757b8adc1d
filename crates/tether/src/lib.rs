//! # Tether
//!
//! Controller side of the Tether command channel: accepts agent
//! connections, tracks each one as a session in a registry, and issues
//! command requests against a chosen session.
//!
//! The registry is the only owner of session transports. Callers (an
//! operator console, typically) hold [`SessionId`]s and talk to sessions
//! exclusively through [`SessionRegistry::send_command`], which queues one
//! request at a time onto the session's connection task and waits, bounded,
//! for the matching response frame.

#![warn(missing_docs)]

pub use tether_proto as proto;

/// Error types for controller operations
pub mod error;

/// Session registry and accept loop
pub mod registry;

/// Session records and per-session connection tasks
pub mod session;

pub use error::ControllerError;
pub use registry::{RegistryConfig, SessionRegistry};
pub use session::{SessionId, SessionInfo, SessionState};

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;
