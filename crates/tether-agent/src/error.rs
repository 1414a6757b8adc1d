//! Error types for agent operations

use thiserror::Error;

/// Errors raised while building a command table.
///
/// These are construction-time failures: a table that builds successfully
/// can never fail dispatch with anything but a `CommandResult::Err`.
#[derive(Debug, Error)]
pub enum TableError {
    /// A command name was registered twice
    #[error("duplicate command: {0}")]
    DuplicateCommand(String),

    /// Argument names and prompts are not parallel sequences
    #[error("command {name}: {args} argument(s) but {prompts} prompt(s)")]
    PromptMismatch {
        /// Command being registered
        name: String,
        /// Number of declared argument names
        args: usize,
        /// Number of declared prompts
        prompts: usize,
    },
}

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration file was present but unusable
    #[error("configuration error: {0}")]
    Config(String),

    /// Command table construction failed
    #[error("command table error: {0}")]
    Table(#[from] TableError),

    /// Protocol-level failure
    #[error("protocol error: {0}")]
    Protocol(#[from] tether_proto::ProtocolError),

    /// Transport I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session loop was started twice
    #[error("session loop already started")]
    AlreadyStarted,
}
