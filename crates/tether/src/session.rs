//! Session records and per-session connection tasks
//!
//! Each accepted agent gets one connection task that exclusively owns the
//! socket. The task sits between the registry's RPC callers and the wire:
//! it writes one request frame at a time, holds the caller's reply slot
//! until the matching response frame arrives, and treats any unsolicited or
//! undecodable traffic as a dead transport. When the transport goes, the
//! task removes its own record from the arena.

use crate::error::ControllerError;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tether_proto::{CommandResult, FrameCodec, Message};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

/// Stable identifier for one connected agent session.
///
/// IDs are handed out in accept order and never reused, so they double as
/// the registry's registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Build an ID from its raw numeric value
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session activity states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no request in flight
    Idle,
    /// One request is in flight
    Busy,
}

/// Controller-side record of one connected agent
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Stable registry key
    pub id: SessionId,
    /// Peer address of the agent's transport
    pub addr: SocketAddr,
    /// Hostname from the identification frame
    pub hostname: Option<String>,
    /// Operating system label from the identification frame
    pub os: Option<String>,
    /// When the session was accepted
    pub connected_at: SystemTime,
    /// Completion time of the most recent exchange
    pub last_seen: SystemTime,
    /// Current activity state
    pub state: SessionState,
}

/// One queued RPC: the request and the slot awaiting its result
pub(crate) struct RpcRequest {
    pub(crate) request: tether_proto::CommandRequest,
    pub(crate) reply: oneshot::Sender<Result<CommandResult, ControllerError>>,
}

/// Arena entry: the session record plus the channel into its task
pub(crate) struct SessionEntry {
    pub(crate) info: SessionInfo,
    pub(crate) rpc_tx: mpsc::Sender<RpcRequest>,
    pub(crate) task: tokio::task::JoinHandle<()>,
}

/// The shared session arena, keyed by ID (= registration order)
pub(crate) type SessionMap = Arc<RwLock<BTreeMap<SessionId, SessionEntry>>>;

/// Run one session's connection task.
///
/// `read_codec` is the codec that already consumed the identification frame
/// so any bytes it buffered stay with the connection. The task ends when
/// the agent disconnects, the stream turns undecodable, or the registry
/// drops the request channel; in every case the session removes itself
/// from the arena.
pub(crate) async fn run_session(
    id: SessionId,
    stream: TcpStream,
    mut read_codec: FrameCodec,
    mut rpc_rx: mpsc::Receiver<RpcRequest>,
    sessions: SessionMap,
    max_frame_size: usize,
) {
    let (mut reader, mut writer) = stream.into_split();
    let write_codec = FrameCodec::with_max_frame_size(max_frame_size);
    let mut pending: Option<oneshot::Sender<Result<CommandResult, ControllerError>>> = None;

    loop {
        tokio::select! {
            // Only take the next request once the previous one is answered:
            // both directions of the stream belong to the in-flight exchange.
            queued = rpc_rx.recv(), if pending.is_none() => {
                let Some(RpcRequest { request, reply }) = queued else {
                    debug!("session {id}: request channel closed");
                    break;
                };

                set_state(&sessions, id, SessionState::Busy).await;

                let name = request.name.clone();
                let payload = match Message::Request(request).to_msgpack() {
                    Ok(payload) => payload,
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                        set_state(&sessions, id, SessionState::Idle).await;
                        continue;
                    }
                };

                debug!("session {id}: sending {name}");
                if let Err(e) = write_codec.write_frame(&mut writer, &payload).await {
                    warn!("session {id}: write failed: {e}");
                    let _ = reply.send(Err(e.into()));
                    break;
                }

                pending = Some(reply);
            }

            frame = read_codec.read_frame(&mut reader) => {
                match frame {
                    Ok(Some(payload)) => {
                        let Some(reply) = pending.take() else {
                            // The agent only ever answers; anything else is
                            // a peer we no longer understand.
                            warn!("session {id}: unsolicited frame, dropping connection");
                            break;
                        };

                        match Message::from_msgpack(&payload) {
                            Ok(Message::Response(result)) => {
                                touch(&sessions, id).await;
                                let _ = reply.send(Ok(result));
                            }
                            Ok(other) => {
                                warn!("session {id}: expected response, got {other:?}");
                                let _ = reply.send(Err(ControllerError::Transport(
                                    "unexpected message from agent".to_string(),
                                )));
                                break;
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e.into()));
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        info!("session {id}: agent disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!("session {id}: transport error: {e}");
                        break;
                    }
                }
            }
        }
    }

    if let Some(reply) = pending.take() {
        let _ = reply.send(Err(ControllerError::SessionClosed(id)));
    }

    if sessions.write().await.remove(&id).is_some() {
        info!("session {id} removed");
    }
}

async fn set_state(sessions: &SessionMap, id: SessionId, state: SessionState) {
    if let Some(entry) = sessions.write().await.get_mut(&id) {
        entry.info.state = state;
    }
}

/// Record a completed exchange on the session
async fn touch(sessions: &SessionMap, id: SessionId) {
    if let Some(entry) = sessions.write().await.get_mut(&id) {
        entry.info.last_seen = SystemTime::now();
        entry.info.state = SessionState::Idle;
    }
}
