//! Riposte Duel Server
//!
//! Loads the store, recovers in-flight duels and serves WebSocket clients
//! until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use riposte::{
    network::{GameServer, ServerConfig},
    DuelEngine, EngineConfig, JsonFileStore, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server_config = ServerConfig::from_env();
    let engine_config = EngineConfig::from_env();

    info!("Riposte Server v{}", VERSION);
    info!(
        "Turn timeout {:?}, queue timeout {:?}, {} turns max",
        engine_config.turn_timeout, engine_config.queue_timeout, engine_config.max_turns
    );

    let store = JsonFileStore::open(server_config.data_dir.clone())
        .with_context(|| format!("opening data directory {}", server_config.data_dir.display()))?;
    let engine = DuelEngine::recover(engine_config, Arc::new(store))
        .await
        .context("recovering stored duels")?;

    let server = Arc::new(GameServer::new(server_config, engine));
    let runner = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for Ctrl-C")?;
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
        result = runner => {
            result.context("server task panicked")??;
            return Ok(());
        }
    }

    let stats = server.engine().stats().await;
    info!(
        "Stopped with {} live duels and {} queued callers; both resume on restart",
        stats.live_sessions, stats.queued
    );
    Ok(())
}
