//! Reconnect behavior against a listener that comes and goes.

use std::time::Duration;
use tether_agent::{AgentConfig, AgentSession, BackoffConfig, CommandTable};
use tether_proto::{FrameCodec, Hello, Message};
use tokio::net::TcpListener;
use tokio::time::timeout;

fn fast_config(port: u16) -> AgentConfig {
    AgentConfig {
        host: "127.0.0.1".to_string(),
        port,
        backoff: BackoffConfig {
            initial_ms: 30,
            max_ms: 120,
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_agent_retries_until_listener_appears() {
    // Reserve a port, then free it so the first attempts fail
    let placeholder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = placeholder.local_addr().unwrap().port();
    drop(placeholder);

    let mut session = AgentSession::new(
        fast_config(port),
        CommandTable::builder().build(),
        Hello::default(),
    );
    let shutdown = session.shutdown_sender().unwrap();
    let driver = tokio::spawn(async move { session.run().await });

    // Several attempts fail; the driver keeps going
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!driver.is_finished());

    // Once a listener exists, the next attempt lands and identifies itself
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let (mut stream, _peer) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("agent never reconnected")
        .unwrap();

    let mut codec = FrameCodec::new();
    let payload = timeout(Duration::from_secs(5), codec.read_frame(&mut stream))
        .await
        .expect("no identification frame")
        .unwrap()
        .unwrap();
    assert!(matches!(
        Message::from_msgpack(&payload).unwrap(),
        Message::Hello(_)
    ));

    shutdown.send(()).unwrap();
    driver.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_agent_reconnects_after_controller_drops_it() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut session = AgentSession::new(
        fast_config(port),
        CommandTable::builder().build(),
        Hello::default(),
    );
    let shutdown = session.shutdown_sender().unwrap();
    let driver = tokio::spawn(async move { session.run().await });

    // First connection: read the identification, then hang up
    let (mut stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut codec = FrameCodec::new();
    codec.read_frame(&mut stream).await.unwrap().unwrap();
    drop(stream);

    // The agent comes back on its own and identifies again
    let (mut stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("agent did not reconnect")
        .unwrap();
    let mut codec = FrameCodec::new();
    let payload = codec.read_frame(&mut stream).await.unwrap().unwrap();
    assert!(matches!(
        Message::from_msgpack(&payload).unwrap(),
        Message::Hello(_)
    ));

    shutdown.send(()).unwrap();
    driver.await.unwrap().unwrap();
}
