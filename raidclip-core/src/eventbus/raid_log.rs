//! src/eventbus/raid_log.rs
//!
//! Subscribes to the EventBus and appends every handled raid to
//! `<LOG_DEST>/raids.txt` in a human-readable block.

use std::fmt::Write as _;
use std::path::PathBuf;

use raidclip_common::models::{Clip, EngineConfig};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config_store::ConfigHandle;
use crate::eventbus::{EngineEvent, EventBus};

pub const RAID_LOG_FILE: &str = "raids.txt";

/// Spawns the journal writer. Paths and prefixes are read from the current
/// config snapshot for every entry.
pub async fn spawn_raid_journal(event_bus: &EventBus, config: ConfigHandle) -> JoinHandle<()> {
    let mut rx = event_bus.subscribe(None).await;
    let mut shutdown_rx = event_bus.shutdown_rx.clone();

    tokio::spawn(async move {
        info!("[RaidJournal] started");
        loop {
            tokio::select! {
                biased;
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(EngineEvent::Raided { from, clips, .. }) => {
                            append_entry(&config.current(), &from, &clips).await;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                Ok(_) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::Raided { from, clips, .. } = event {
                append_entry(&config.current(), &from, &clips).await;
            }
        }
        info!("[RaidJournal] exited");
    })
}

pub fn journal_path(cfg: &EngineConfig) -> PathBuf {
    PathBuf::from(&cfg.log_dest).join(RAID_LOG_FILE)
}

pub fn format_entry(cfg: &EngineConfig, from: &str, clips: &[Clip]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}-- {}{} clips --",
        cfg.log_top_indent, cfg.log_user_name_prefix, from
    );
    for c in clips {
        let _ = writeln!(
            out,
            "   views[{}] / title[{}] / URL[{}] / Id[{}]",
            c.view_count, c.title, c.url, c.id
        );
    }
    out
}

async fn append_entry(cfg: &EngineConfig, from: &str, clips: &[Clip]) {
    let path = journal_path(cfg);
    let entry = format_entry(cfg, from, clips);

    let res = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await
    }
    .await;

    match res {
        Ok(()) => debug!("[RaidJournal] wrote raid from {} to {}", from, path.display()),
        Err(e) => error!("[RaidJournal] could not write {}: {}", path.display(), e),
    }
}
