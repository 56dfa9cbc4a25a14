//! Clip watch scheduler: asks the provider for clips each configured channel
//! created since the previous poll and forwards the ones it has not seen.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use raidclip_common::models::EngineConfig;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config_store::ConfigHandle;
use crate::eventbus::{EngineEvent, EventBus};
use crate::orchestrator::RaidOrchestrator;
use crate::provider::ClipProvider;

/// Floor for `NEW_CLIP_INTERVAL`.
pub const MIN_WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// What one channel has been polled for so far.
#[derive(Debug, Clone)]
struct Window {
    /// Start of the last successful poll. The next one asks for clips created since.
    since: DateTime<Utc>,
    /// Ids from the last response; a clip at the window edge can come back once more.
    seen: HashSet<String>,
}

pub struct ClipWatcher {
    provider: Arc<dyn ClipProvider>,
    config: ConfigHandle,
    orchestrator: RaidOrchestrator,
    bus: EventBus,
    /// A channel is absent until the first poll that sees it opens its window.
    windows: HashMap<String, Window>,
}

impl ClipWatcher {
    pub fn new(
        provider: Arc<dyn ClipProvider>,
        config: ConfigHandle,
        orchestrator: RaidOrchestrator,
        bus: EventBus,
    ) -> Self {
        Self {
            provider,
            config,
            orchestrator,
            bus,
            windows: HashMap::new(),
        }
    }

    pub fn interval(cfg: &EngineConfig) -> Duration {
        Duration::from_secs(cfg.new_clip_watch_interval_second).max(MIN_WATCH_INTERVAL)
    }

    /// One pass over the configured channels. Returns how many new clips were
    /// forwarded.
    ///
    /// A newly configured channel only gets its window opened, so clips made
    /// before it was watched are never announced. A failed request leaves the
    /// window where it was and the next poll covers the gap.
    pub async fn poll_once(&mut self) -> usize {
        let cfg = self.config.current();
        self.windows.retain(|channel, _| cfg.chat_targets.contains(channel));

        let mut forwarded = 0;
        for channel in &cfg.chat_targets {
            let started = Utc::now();
            let Some(window) = self.windows.get_mut(channel) else {
                info!("[ClipWatch] Watching {} for clips from {}", channel, started);
                self.windows.insert(
                    channel.clone(),
                    Window {
                        since: started,
                        seen: HashSet::new(),
                    },
                );
                continue;
            };

            let clips = match self.provider.recent_clips(channel, window.since).await {
                Ok(clips) => clips,
                Err(e) => {
                    warn!("[ClipWatch] {} poll failed: {}", channel, e);
                    continue;
                }
            };

            let previous = std::mem::replace(
                window,
                Window {
                    since: started,
                    seen: clips.iter().map(|c| c.id.clone()).collect(),
                },
            );

            for clip in clips {
                if previous.seen.contains(&clip.id) {
                    continue;
                }
                info!("[ClipWatch] New clip on {}: '{}' {}", channel, clip.title, clip.url);
                self.bus
                    .publish(EngineEvent::NewClip {
                        channel: channel.clone(),
                        clip: clip.clone(),
                    })
                    .await;
                if let Err(e) = self.orchestrator.handle_new_clip(clip).await {
                    warn!("[ClipWatch] Could not forward clip: {}", e);
                }
                forwarded += 1;
            }
        }
        debug!("[ClipWatch] Poll done, {} new", forwarded);
        forwarded
    }

    /// Polls right away, then once per interval. The interval is re-read from
    /// the config snapshot on every tick.
    pub fn spawn(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("[ClipWatch] started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.poll_once() => {}
                }
                let wait = Self::interval(&self.config.current());
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(wait) => {}
                }
            }
            info!("[ClipWatch] stopped");
        })
    }
}
