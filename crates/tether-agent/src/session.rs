//! Connection lifecycle state machine
//!
//! The agent owns one outbound connection. It connects, identifies itself
//! with a single framed [`Hello`], then serves the strictly
//! request-then-response listen loop until the transport drops, and retries
//! the connection with capped exponential backoff until told to shut down.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::table::CommandTable;
use tether_proto::{FrameCodec, Hello, Message, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// No transport and no attempt in progress
    Disconnected,
    /// Transport handshake in progress
    Connecting,
    /// Transport established, identification not yet sent
    Connected,
    /// Serving the receive loop
    Listening,
    /// Transport closed
    Closed,
    /// Waiting out the backoff delay before the next attempt
    Reconnecting,
}

/// The agent's connection driver.
///
/// Owns the command table and the shutdown signal; `run` drives the
/// connect/listen/reconnect cycle until shutdown.
pub struct AgentSession {
    config: AgentConfig,
    table: CommandTable,
    hello: Hello,
    state: AgentState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_rx: Option<oneshot::Receiver<()>>,
}

impl AgentSession {
    /// Create a session driver
    pub fn new(config: AgentConfig, table: CommandTable, hello: Hello) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        Self {
            config,
            table,
            hello,
            state: AgentState::Disconnected,
            shutdown_tx: Some(shutdown_tx),
            shutdown_rx: Some(shutdown_rx),
        }
    }

    /// Take the shutdown sender.
    ///
    /// Firing it (or dropping it) stops the driver loop, including during a
    /// connect attempt or a backoff wait.
    pub fn shutdown_sender(&mut self) -> Option<oneshot::Sender<()>> {
        self.shutdown_tx.take()
    }

    /// Current lifecycle state
    pub fn state(&self) -> AgentState {
        self.state
    }

    fn transition(&mut self, next: AgentState) {
        debug!("agent state: {:?} -> {next:?}", self.state);
        self.state = next;
    }

    /// Drive the connect/listen/reconnect cycle until shutdown.
    ///
    /// Transport and protocol failures never propagate out of this loop;
    /// they close the current connection and schedule the next attempt.
    pub async fn run(&mut self) -> Result<(), AgentError> {
        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or(AgentError::AlreadyStarted)?;

        let addr = self.config.server_addr();
        let mut delay = self.config.backoff.initial();

        loop {
            self.transition(AgentState::Connecting);
            let connected = tokio::select! {
                _ = &mut shutdown_rx => break,
                result = TcpStream::connect(&addr) => result,
            };

            match connected {
                Ok(mut stream) => {
                    self.transition(AgentState::Connected);
                    info!("connected to {addr}");
                    delay = self.config.backoff.initial();

                    let mut codec = FrameCodec::with_max_frame_size(self.config.max_frame_size);
                    let hello = self.hello.clone();
                    self.transition(AgentState::Listening);

                    let stopped = tokio::select! {
                        _ = &mut shutdown_rx => true,
                        result = serve(&mut stream, &mut codec, hello, &self.table) => {
                            match result {
                                Ok(()) => info!("controller closed the connection"),
                                Err(e) => warn!("session ended: {e}"),
                            }
                            false
                        }
                    };

                    self.transition(AgentState::Closed);
                    if stopped {
                        break;
                    }
                }
                Err(e) => {
                    warn!("connect to {addr} failed: {e}");
                }
            }

            self.transition(AgentState::Reconnecting);
            debug!("retrying in {delay:?}");
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = sleep(delay) => {}
            }
            delay = self.config.backoff.next(delay);
        }

        self.transition(AgentState::Closed);
        info!("agent session stopped");
        Ok(())
    }
}

/// Serve one established connection: identify, then answer one request per
/// frame until the peer closes or the stream turns undecodable.
async fn serve<S>(
    stream: &mut S,
    codec: &mut FrameCodec,
    hello: Hello,
    table: &CommandTable,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let identification = Message::Hello(hello).to_msgpack()?;
    codec.write_frame(stream, &identification).await?;

    loop {
        let Some(payload) = codec.read_frame(stream).await? else {
            // Peer closed at a frame boundary
            return Ok(());
        };

        let request = match Message::from_msgpack(&payload)? {
            Message::Request(request) => request,
            other => {
                warn!("ignoring unexpected message: {other:?}");
                continue;
            }
        };

        debug!("dispatching {}", request.name);
        let result = table.dispatch(&request.name, &request.args).await;
        let response = Message::Response(result).to_msgpack()?;
        codec.write_frame(stream, &response).await?;
    }
}
