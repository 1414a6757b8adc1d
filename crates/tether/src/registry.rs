//! Session registry and accept loop

use crate::error::ControllerError;
use crate::session::{
    run_session, RpcRequest, SessionEntry, SessionId, SessionInfo, SessionMap, SessionState,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tether_proto::{CommandRequest, CommandResult, FrameCodec, Message};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Address to bind the listener on
    pub bind_addr: String,
    /// Bounded wait for one command round trip
    pub request_timeout: Duration,
    /// Bounded wait for a new connection's identification frame
    pub handshake_timeout: Duration,
    /// Maximum accepted frame payload size in bytes
    pub max_frame_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            request_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            max_frame_size: tether_proto::MAX_FRAME_SIZE,
        }
    }
}

/// Registry of connected agent sessions.
///
/// Accepts connections on its own task and keeps one record per live
/// session in an arena keyed by [`SessionId`]. Records leave the arena the
/// moment their transport closes; a listed session is a live session.
pub struct SessionRegistry {
    config: RegistryConfig,
    local_addr: SocketAddr,
    sessions: SessionMap,
    running: Arc<AtomicBool>,
    accept_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionRegistry {
    /// Bind the listener and start the accept loop
    pub async fn start(config: RegistryConfig) -> Result<Self, ControllerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let sessions: SessionMap = Arc::new(RwLock::new(BTreeMap::new()));
        let running = Arc::new(AtomicBool::new(true));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            sessions.clone(),
            running.clone(),
            config.clone(),
        ));

        info!("registry listening on {local_addr}");
        Ok(Self {
            config,
            local_addr,
            sessions,
            running,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of the live sessions, in registration order
    pub async fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .await
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Send one command to a session and wait for its result.
    ///
    /// At most one request is in flight per session; concurrent callers
    /// queue behind it. The wait is bounded by the configured request
    /// timeout. A `CommandResult::Err` is a successful RPC: the command
    /// failed, the channel did not.
    pub async fn send_command(
        &self,
        id: SessionId,
        name: &str,
        args: Vec<String>,
    ) -> Result<CommandResult, ControllerError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ControllerError::Stopped);
        }

        let rpc_tx = {
            let sessions = self.sessions.read().await;
            let entry = sessions
                .get(&id)
                .ok_or(ControllerError::SessionNotFound(id))?;
            entry.rpc_tx.clone()
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        rpc_tx
            .send(RpcRequest {
                request: CommandRequest::new(name, args),
                reply: reply_tx,
            })
            .await
            .map_err(|_| ControllerError::SessionClosed(id))?;

        match timeout(self.config.request_timeout, reply_rx).await {
            Err(_) => Err(ControllerError::Timeout {
                duration: self.config.request_timeout,
            }),
            Ok(Err(_)) => Err(ControllerError::SessionClosed(id)),
            Ok(Ok(result)) => result,
        }
    }

    /// Remove a session, closing its transport
    pub async fn remove(&self, id: SessionId) -> Result<(), ControllerError> {
        let entry = self
            .sessions
            .write()
            .await
            .remove(&id)
            .ok_or(ControllerError::SessionNotFound(id))?;
        entry.task.abort();
        info!("session {id} removed");
        Ok(())
    }

    /// Stop the registry: stop accepting, close every session. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }

        let mut sessions = self.sessions.write().await;
        for (id, entry) in std::mem::take(&mut *sessions) {
            entry.task.abort();
            debug!("session {id} closed");
        }

        info!("registry stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    sessions: SessionMap,
    running: Arc<AtomicBool>,
    config: RegistryConfig,
) {
    let next_id = AtomicU64::new(1);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // One bad connection never stops the loop
                warn!("accept failed: {e}");
                continue;
            }
        };

        if !running.load(Ordering::SeqCst) {
            break;
        }

        let id = SessionId::from_raw(next_id.fetch_add(1, Ordering::SeqCst));
        if let Err(e) = admit(id, stream, peer, &sessions, &config).await {
            warn!("rejected connection from {peer}: {e}");
        }
    }
}

/// Read the identification frame, then install the session and its
/// connection task.
async fn admit(
    id: SessionId,
    mut stream: TcpStream,
    peer: SocketAddr,
    sessions: &SessionMap,
    config: &RegistryConfig,
) -> Result<(), ControllerError> {
    let mut codec = FrameCodec::with_max_frame_size(config.max_frame_size);

    let payload = timeout(config.handshake_timeout, codec.read_frame(&mut stream))
        .await
        .map_err(|_| ControllerError::Handshake("identification timed out".to_string()))??;
    let Some(payload) = payload else {
        return Err(ControllerError::Handshake(
            "closed before identification".to_string(),
        ));
    };

    let hello = match Message::from_msgpack(&payload)? {
        Message::Hello(hello) => hello,
        other => {
            return Err(ControllerError::Handshake(format!(
                "expected identification, got {other:?}"
            )))
        }
    };

    let now = SystemTime::now();
    let info = SessionInfo {
        id,
        addr: peer,
        hostname: hello.hostname,
        os: hello.os,
        connected_at: now,
        last_seen: now,
        state: SessionState::Idle,
    };

    let (rpc_tx, rpc_rx) = mpsc::channel(1);
    let hostname = info.hostname.clone();

    // Hold the lock across spawn and insert: the task's self-removal on a
    // dead transport must always find its own record.
    let mut guard = sessions.write().await;
    let task = tokio::spawn(run_session(
        id,
        stream,
        codec,
        rpc_rx,
        sessions.clone(),
        config.max_frame_size,
    ));
    guard.insert(id, SessionEntry { info, rpc_tx, task });
    drop(guard);

    info!(
        "session {id} connected from {peer} ({})",
        hostname.as_deref().unwrap_or("unidentified")
    );
    Ok(())
}
