//! # Tether Protocol
//!
//! Wire format and message types for the Tether command channel.
//!
//! Every exchange between agent and controller is one length-prefixed frame
//! carrying a MessagePack-serialized [`Message`]. The framing is symmetric in
//! both directions and there is exactly one canonical encoding; peers that
//! speak anything else fail frame decoding and are dropped.

#![warn(missing_docs)]

/// Length-prefixed frame codec for async streams
pub mod codec;

/// Message types exchanged between agent and controller
pub mod message;

/// Error types for protocol operations
pub mod error;

pub use codec::{FrameCodec, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use message::{CommandRequest, CommandResult, Hello, Message, Value};
