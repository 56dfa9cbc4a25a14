//! Raid orchestrator.
//!
//! A single task owns the raid lifecycle (`Idle -> ClipSelected -> Playing ->
//! StopTimerArmed -> Idle`), the recent-clips registry and the post-raid stop
//! timer. Callers talk to it through [`RaidOrchestrator`], a cheap handle over
//! its inbox, so raids are handled strictly in arrival order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use raidclip_common::models::{Clip, RaidEvent, StopReason};
use raidclip_common::{OrchestrationError, PlaybackError};
use raidclip_obs::{LinkError, ObsLink};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config_store::ConfigHandle;
use crate::eventbus::{EngineEvent, EventBus};
use crate::overlay::{OverlayServer, PlaybackEvent};

const INBOX_SIZE: usize = 64;
/// Most recent clips kept in the registry.
pub const RECENT_CLIPS_CAP: usize = 256;

/// Where the orchestrator sends playback commands.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClipPlayer: Send + Sync {
    async fn start_clip(&self, url: &str, duration_cap: Option<f64>) -> Result<(), PlaybackError>;
}

/// Where the orchestrator sends stream-control commands.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamController: Send + Sync {
    async fn stop_stream(&self) -> Result<(), LinkError>;
    async fn switch_scene(&self, scene_name: &str) -> Result<(), LinkError>;
}

#[async_trait]
impl ClipPlayer for OverlayServer {
    async fn start_clip(&self, url: &str, duration_cap: Option<f64>) -> Result<(), PlaybackError> {
        OverlayServer::start_clip(self, url, duration_cap)
    }
}

#[async_trait]
impl StreamController for ObsLink {
    async fn stop_stream(&self) -> Result<(), LinkError> {
        ObsLink::stop_stream(self).await
    }

    async fn switch_scene(&self, scene_name: &str) -> Result<(), LinkError> {
        ObsLink::switch_scene(self, scene_name).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaidPhase {
    Idle,
    ClipSelected,
    Playing,
    StopTimerArmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub phase: RaidPhase,
    pub playing: Option<String>,
    pub stop_timer_armed: bool,
    pub raids_handled: u64,
    pub recent_clips: usize,
}

/// Sample entry appended by `inject_debug_entry`.
pub fn debug_sample_clip() -> Clip {
    Clip {
        id: "debug-entry".to_string(),
        url: "https://example2.com".to_string(),
        title: "Example Video 3".to_string(),
        thumbnail: "https://example2.com/thumbnail.jpg".to_string(),
        view_count: 300,
        duration: 0.0,
        mp4: String::new(),
    }
}

enum Request {
    Raid {
        event: RaidEvent,
        reply: oneshot::Sender<Result<(), OrchestrationError>>,
    },
    NewClip(Clip),
    Status(oneshot::Sender<OrchestratorStatus>),
    RecentClips(oneshot::Sender<Vec<Clip>>),
    StopTimerFired(u64),
}

#[derive(Clone)]
pub struct RaidOrchestrator {
    tx: mpsc::Sender<Request>,
}

impl RaidOrchestrator {
    /// Starts the orchestrator task. `playback` lets it follow the overlay
    /// back to `Idle` when a clip ends on its own.
    pub fn spawn(
        player: Arc<dyn ClipPlayer>,
        stream: Arc<dyn StreamController>,
        config: ConfigHandle,
        bus: EventBus,
        playback: Option<broadcast::Receiver<PlaybackEvent>>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(INBOX_SIZE);
        let actor = Actor {
            player,
            stream,
            config,
            bus,
            self_tx: tx.downgrade(),
            phase: RaidPhase::Idle,
            playing: None,
            stop_timer: None,
            timer_generation: 0,
            raids_handled: 0,
            recent: HashMap::new(),
            recent_order: VecDeque::new(),
        };
        let handle = tokio::spawn(actor.run(rx, playback, cancel));
        (Self { tx }, handle)
    }

    /// Selects and plays a clip for `event` and arms the stop timer. Returns
    /// once the start command was issued, not when playback ends.
    pub async fn handle_raid(&self, event: RaidEvent) -> Result<(), OrchestrationError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Raid { event, reply })
            .await
            .map_err(|_| OrchestrationError::Stopped)?;
        rx.await.map_err(|_| OrchestrationError::Stopped)?
    }

    pub async fn handle_new_clip(&self, clip: Clip) -> Result<(), OrchestrationError> {
        self.tx
            .send(Request::NewClip(clip))
            .await
            .map_err(|_| OrchestrationError::Stopped)
    }

    /// Synthetic raid through the production path.
    pub async fn inject_debug_raid(&self, event: RaidEvent) -> Result<(), OrchestrationError> {
        info!("[RaidOrchestrator] Debug raid from {}", event.from);
        self.handle_raid(event).await
    }

    /// Appends the sample clip through the production path.
    pub async fn inject_debug_entry(&self) -> Result<(), OrchestrationError> {
        info!("[RaidOrchestrator] Debug entry");
        self.handle_new_clip(debug_sample_clip()).await
    }

    pub async fn status(&self) -> Result<OrchestratorStatus, OrchestrationError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Status(reply))
            .await
            .map_err(|_| OrchestrationError::Stopped)?;
        rx.await.map_err(|_| OrchestrationError::Stopped)
    }

    /// Registry contents, oldest first.
    pub async fn recent_clips(&self) -> Result<Vec<Clip>, OrchestrationError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::RecentClips(reply))
            .await
            .map_err(|_| OrchestrationError::Stopped)?;
        rx.await.map_err(|_| OrchestrationError::Stopped)
    }
}

struct Actor {
    player: Arc<dyn ClipPlayer>,
    stream: Arc<dyn StreamController>,
    config: ConfigHandle,
    bus: EventBus,
    self_tx: mpsc::WeakSender<Request>,

    phase: RaidPhase,
    playing: Option<String>,
    stop_timer: Option<JoinHandle<()>>,
    timer_generation: u64,
    raids_handled: u64,

    recent: HashMap<String, Clip>,
    recent_order: VecDeque<String>,
}

impl Actor {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Request>,
        mut playback: Option<broadcast::Receiver<PlaybackEvent>>,
        cancel: CancellationToken,
    ) {
        info!("[RaidOrchestrator] started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                req = rx.recv() => match req {
                    Some(req) => self.on_request(req).await,
                    None => break,
                },
                ev = next_playback(&mut playback) => self.on_playback(ev),
            }
        }
        if let Some(timer) = self.stop_timer.take() {
            timer.abort();
        }
        info!("[RaidOrchestrator] exited");
    }

    async fn on_request(&mut self, req: Request) {
        match req {
            Request::Raid { event, reply } => {
                let res = self.handle_raid(event).await;
                let _ = reply.send(res);
            }
            Request::NewClip(clip) => self.handle_new_clip(clip),
            Request::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Request::RecentClips(reply) => {
                let clips = self
                    .recent_order
                    .iter()
                    .filter_map(|id| self.recent.get(id).cloned())
                    .collect();
                let _ = reply.send(clips);
            }
            Request::StopTimerFired(generation) => {
                if generation == self.timer_generation {
                    self.stop_timer = None;
                    self.settle_phase();
                }
            }
        }
    }

    async fn handle_raid(&mut self, event: RaidEvent) -> Result<(), OrchestrationError> {
        let cfg = self.config.current();
        self.raids_handled += 1;
        info!("[RaidOrchestrator] Raid from {} with {} clip(s)", event.from, event.clips.len());

        self.bus
            .publish(EngineEvent::Raided {
                from: event.from.clone(),
                clips: event.clips.clone(),
                at: Utc::now(),
            })
            .await;

        let Some(clip) = event.select_clip().cloned() else {
            warn!("[RaidOrchestrator] No playable clip from {}, nothing to show", event.from);
            return Err(OrchestrationError::NoCandidateClip);
        };

        self.set_phase(RaidPhase::ClipSelected);
        info!(
            "[RaidOrchestrator] Selected '{}' ({} views) {}",
            clip.title, clip.view_count, clip.mp4
        );

        if cfg.overlay_enabled {
            if let Err(e) = self.player.start_clip(&clip.mp4, None).await {
                error!("[RaidOrchestrator] Could not start clip: {}", e);
                self.settle_phase();
                return Err(e.into());
            }
            self.playing = Some(clip.mp4.clone());
            self.set_phase(RaidPhase::Playing);
        } else {
            debug!("[RaidOrchestrator] Overlay disabled, skipping playback");
        }

        if let Some(scene) = cfg.scene_on_raid.as_deref().filter(|s| !s.trim().is_empty()) {
            if let Err(e) = self.stream.switch_scene(scene).await {
                warn!("[RaidOrchestrator] Scene switch to '{}' failed: {}", scene, e);
            }
        }

        if cfg.stop_stream_after_raided {
            self.arm_stop_timer(Duration::from_secs(cfg.delay_seconds_from_raid_to_stop));
        } else {
            self.settle_phase();
        }
        Ok(())
    }

    /// Replaces any pending stop timer; the latest raid wins.
    fn arm_stop_timer(&mut self, delay: Duration) {
        if let Some(prev) = self.stop_timer.take() {
            prev.abort();
            info!("[RaidOrchestrator] Pending stop timer superseded");
        }
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let stream = self.stream.clone();
        let self_tx = self.self_tx.clone();

        self.stop_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("[RaidOrchestrator] Stop timer fired, stopping stream");
            if let Err(e) = stream.stop_stream().await {
                error!("[RaidOrchestrator] Stop stream failed: {}", e);
            }
            if let Some(tx) = self_tx.upgrade() {
                let _ = tx.send(Request::StopTimerFired(generation)).await;
            }
        }));
        info!("[RaidOrchestrator] Stream stops in {:?}", delay);
        self.set_phase(RaidPhase::StopTimerArmed);
    }

    fn handle_new_clip(&mut self, clip: Clip) {
        let id = clip.id.clone();
        if self.recent.insert(id.clone(), clip).is_none() {
            self.recent_order.push_back(id);
            while self.recent_order.len() > RECENT_CLIPS_CAP {
                if let Some(old) = self.recent_order.pop_front() {
                    self.recent.remove(&old);
                }
            }
        }
        debug!("[RaidOrchestrator] {} clip(s) in registry", self.recent.len());
    }

    fn on_playback(&mut self, ev: PlaybackEvent) {
        match ev {
            PlaybackEvent::Started { url } => self.playing = Some(url),
            PlaybackEvent::Stopped { reason: StopReason::Superseded, .. } => {}
            PlaybackEvent::Stopped { url, reason } => {
                if self.playing.as_deref() == Some(url.as_str()) {
                    debug!("[RaidOrchestrator] Playback of {} over ({:?})", url, reason);
                    self.playing = None;
                }
            }
        }
        self.settle_phase();
    }

    fn settle_phase(&mut self) {
        let phase = if self.stop_timer.is_some() {
            RaidPhase::StopTimerArmed
        } else if self.playing.is_some() {
            RaidPhase::Playing
        } else {
            RaidPhase::Idle
        };
        self.set_phase(phase);
    }

    fn set_phase(&mut self, phase: RaidPhase) {
        if self.phase != phase {
            debug!("[RaidOrchestrator] {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            phase: self.phase,
            playing: self.playing.clone(),
            stop_timer_armed: self.stop_timer.is_some(),
            raids_handled: self.raids_handled,
            recent_clips: self.recent.len(),
        }
    }
}

async fn next_playback(rx: &mut Option<broadcast::Receiver<PlaybackEvent>>) -> PlaybackEvent {
    loop {
        let closed = match rx.as_mut() {
            Some(r) => match r.recv().await {
                Ok(ev) => return ev,
                Err(RecvError::Lagged(n)) => {
                    warn!("[RaidOrchestrator] Missed {} playback events", n);
                    false
                }
                Err(RecvError::Closed) => true,
            },
            None => std::future::pending::<bool>().await,
        };
        if closed {
            *rx = None;
        }
    }
}
