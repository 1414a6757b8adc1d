//! Tether agent binary
//!
//! Connects out to the configured controller and serves its command table
//! until ctrl-c.

use anyhow::Result;
use std::path::Path;
use tracing::{error, info};

use tether_agent::commands;
use tether_agent::config::AgentConfig;
use tether_agent::session::AgentSession;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tether.json".to_string());
    let config = AgentConfig::load(Path::new(&config_path))?;
    info!("starting tether agent against {}", config.server_addr());

    let table = commands::builtin_table()?;
    let hello = commands::identify().await;

    let mut session = AgentSession::new(config, table, hello);
    let shutdown = session.shutdown_sender();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            if let Some(tx) = shutdown {
                let _ = tx.send(());
            }
        }
    });

    if let Err(e) = session.run().await {
        error!("agent error: {e}");
        std::process::exit(1);
    }

    Ok(())
}
