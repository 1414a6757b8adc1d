//! Message types exchanged between agent and controller

use crate::ProtocolError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identification sent by the agent exactly once, immediately after
/// connecting. Early agent revisions report nothing beyond their presence,
/// so both fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    /// Hostname reported by the agent
    pub hostname: Option<String>,
    /// Operating system label reported by the agent
    pub os: Option<String>,
}

/// One command invocation issued by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command name; must match an entry in the agent's command table
    pub name: String,
    /// Positional string arguments
    pub args: Vec<String>,
}

impl CommandRequest {
    /// Create a request
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Payload carried by a successful command result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// UTF-8 text
    Text(String),
    /// Signed integer
    Int(i64),
    /// Raw bytes, e.g. downloaded file content
    Binary(Bytes),
    /// Ordered list
    List(Vec<Value>),
    /// String-keyed mapping
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Borrow the text content, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Outcome of one command dispatch.
///
/// Handler failures travel as `Err` with operator-facing text; they are never
/// a transport fault and never drop the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandResult {
    /// Command completed and produced a payload
    Ok(Value),
    /// Command failed
    Err(String),
}

impl CommandResult {
    /// Create a successful text result
    pub fn ok_text(text: impl Into<String>) -> Self {
        Self::Ok(Value::Text(text.into()))
    }

    /// Create a failed result
    pub fn err(message: impl Into<String>) -> Self {
        Self::Err(message.into())
    }

    /// Whether this result is `Ok`
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Whether this result is `Err`
    pub fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }
}

/// Top-level wire message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Agent identification, the first frame of every session
    Hello(Hello),
    /// Controller-to-agent command request
    Request(CommandRequest),
    /// Agent-to-controller command result
    Response(CommandResult),
}

impl Message {
    /// Serialize to MessagePack bytes
    pub fn to_msgpack(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Deserialize from MessagePack bytes
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_roundtrip() {
        let hello = Message::Hello(Hello {
            hostname: Some("worker-3".to_string()),
            os: Some("linux/x86_64".to_string()),
        });

        let bytes = hello.to_msgpack().unwrap();
        assert_eq!(Message::from_msgpack(&bytes).unwrap(), hello);
    }

    #[test]
    fn test_bare_hello_roundtrip() {
        let hello = Message::Hello(Hello::default());
        let bytes = hello.to_msgpack().unwrap();
        assert_eq!(Message::from_msgpack(&bytes).unwrap(), hello);
    }

    #[test]
    fn test_request_roundtrip() {
        let request = Message::Request(CommandRequest::new("kill", vec!["4242".to_string()]));
        let bytes = request.to_msgpack().unwrap();
        assert_eq!(Message::from_msgpack(&bytes).unwrap(), request);
    }

    #[test]
    fn test_structured_response_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert("os".to_string(), Value::Text("linux".to_string()));
        map.insert("pid".to_string(), Value::Int(1));
        map.insert(
            "disks".to_string(),
            Value::List(vec![Value::Text("/dev/sda1".to_string())]),
        );

        let response = Message::Response(CommandResult::Ok(Value::Map(map)));
        let bytes = response.to_msgpack().unwrap();
        assert_eq!(Message::from_msgpack(&bytes).unwrap(), response);
    }

    #[test]
    fn test_binary_response_roundtrip() {
        let content = Bytes::from_static(&[0x7f, 0x45, 0x4c, 0x46, 0x00]);
        let response = Message::Response(CommandResult::Ok(Value::Binary(content)));
        let bytes = response.to_msgpack().unwrap();
        assert_eq!(Message::from_msgpack(&bytes).unwrap(), response);
    }

    #[test]
    fn test_error_result() {
        let result = CommandResult::err("unknown command: nope");
        assert!(result.is_err());
        assert!(!result.is_ok());

        let bytes = Message::Response(result.clone()).to_msgpack().unwrap();
        assert_eq!(
            Message::from_msgpack(&bytes).unwrap(),
            Message::Response(result)
        );
    }

    #[test]
    fn test_undecodable_payload() {
        assert!(Message::from_msgpack(&[0xc1, 0xc1, 0xc1]).is_err());
    }
}
