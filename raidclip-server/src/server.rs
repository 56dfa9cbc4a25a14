//! raidclip-server/src/server.rs
//!
//! `serve` mode: builds the engine and runs it until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time;
use tracing::{debug, error, info};

use raidclip_core::config_store::FileConfigStore;
use raidclip_core::provider::{ClipProvider, HelixClipProvider};
use raidclip_core::engine::EngineBuilder;
use raidclip_obs::ObwsConnector;

use crate::Args;

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run_server(args: &Args) -> anyhow::Result<()> {
    let store = Arc::new(FileConfigStore::new(&args.config));

    let provider: Option<Arc<dyn ClipProvider>> = match HelixClipProvider::from_env() {
        Some(Ok(p)) => Some(Arc::new(p)),
        Some(Err(e)) => {
            error!("Clip provider unavailable: {}", e);
            None
        }
        None => None,
    };

    let mut builder = EngineBuilder::new(store, Arc::new(ObwsConnector)).provider(provider);
    if let Some(port) = args.port {
        builder = builder.port_override(port);
    }
    let engine = builder.start().await.context("engine failed to start")?;

    // Ctrl-C => event bus shutdown
    let bus = engine.event_bus().clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {:?}", e);
        }
        info!("Ctrl-C detected; shutting down...");
        bus.shutdown();
    });

    let mut shutdown_rx = engine.event_bus().shutdown_rx.clone();
    loop {
        tokio::select! {
            _ = time::sleep(STATUS_LOG_INTERVAL) => {
                match engine.status().await {
                    Ok(st) => debug!(
                        "Status: link {:?} (epoch {}), raid {:?}, {} renderer(s)",
                        st.link_state, st.link_epoch, st.raid.phase, st.renderers
                    ),
                    Err(e) => error!("Status unavailable: {}", e),
                }
            }
            Ok(_) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Shutdown signaled; exiting server loop.");
                    break;
                }
            }
        }
    }

    engine.shutdown().await;
    info!("Server shutdown complete.");
    Ok(())
}
