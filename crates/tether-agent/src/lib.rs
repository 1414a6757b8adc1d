//! # Tether Agent
//!
//! Agent side of the Tether command channel: a fixed command table, the
//! built-in command handlers, and the connect/listen/dispatch/reconnect
//! session loop.

#![warn(missing_docs)]

/// Built-in command handlers
pub mod commands;

/// Agent configuration
pub mod config;

/// Error types for agent operations
pub mod error;

/// Connection lifecycle state machine
pub mod session;

/// Command table construction and dispatch
pub mod table;

pub use config::{AgentConfig, BackoffConfig};
pub use error::{AgentError, TableError};
pub use session::{AgentSession, AgentState};
pub use table::{CommandSpec, CommandTable, CommandTableBuilder, Handler};
