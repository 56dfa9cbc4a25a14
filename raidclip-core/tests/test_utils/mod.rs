// File: raidclip-core/tests/test_utils/mod.rs
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use raidclip_common::models::{Clip, EngineConfig, RaidEvent};
use raidclip_common::PlaybackError;
use raidclip_core::config_store::ConfigHandle;
use raidclip_core::eventbus::EventBus;
use raidclip_core::orchestrator::{ClipPlayer, RaidOrchestrator, StreamController};
use raidclip_core::overlay::PlaybackEvent;
use raidclip_obs::{LinkError, ObsConnector, ObsInstance, ObsSession};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One `start_clip` the orchestrator issued.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerCall {
    pub url: String,
    pub cap: Option<f64>,
}

#[derive(Default)]
pub struct RecordingPlayer {
    calls: Mutex<Vec<PlayerCall>>,
}

impl RecordingPlayer {
    pub fn calls(&self) -> Vec<PlayerCall> {
        self.calls.lock().clone()
    }

    pub fn starts(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.url.clone()).collect()
    }
}

#[async_trait]
impl ClipPlayer for RecordingPlayer {
    async fn start_clip(&self, url: &str, duration_cap: Option<f64>) -> Result<(), PlaybackError> {
        if url.trim().is_empty() {
            return Err(PlaybackError::InvalidUrl);
        }
        self.calls.lock().push(PlayerCall {
            url: url.to_string(),
            cap: duration_cap,
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingStream {
    stops: Mutex<Vec<Instant>>,
    scenes: Mutex<Vec<String>>,
}

impl RecordingStream {
    pub fn stop_times(&self) -> Vec<Instant> {
        self.stops.lock().clone()
    }

    pub fn scenes(&self) -> Vec<String> {
        self.scenes.lock().clone()
    }
}

#[async_trait]
impl StreamController for RecordingStream {
    async fn stop_stream(&self) -> Result<(), LinkError> {
        self.stops.lock().push(Instant::now());
        Ok(())
    }

    async fn switch_scene(&self, scene_name: &str) -> Result<(), LinkError> {
        self.scenes.lock().push(scene_name.to_string());
        Ok(())
    }
}

/// OBS endpoint that never answers.
pub struct RefusingConnector;

#[async_trait]
impl ObsConnector for RefusingConnector {
    async fn handshake(&self, instance: &ObsInstance) -> raidclip_obs::Result<()> {
        Err(LinkError::Transport(format!("{}:{} refused", instance.host, instance.port)))
    }

    async fn login(&self, _instance: &ObsInstance) -> raidclip_obs::Result<Arc<dyn ObsSession>> {
        Err(LinkError::Transport("refused".into()))
    }
}

pub fn clip(id: &str, views: u64, mp4: &str) -> Clip {
    Clip {
        id: id.into(),
        title: format!("clip {}", id),
        url: format!("https://clips.example/{}", id),
        view_count: views,
        mp4: mp4.into(),
        ..Default::default()
    }
}

pub fn alice_raid() -> RaidEvent {
    RaidEvent::new("alice", vec![clip("c1", 5, "a.mp4"), clip("c2", 50, "b.mp4")])
}

pub fn stop_after(delay: u64) -> EngineConfig {
    EngineConfig {
        stop_stream_after_raided: true,
        delay_seconds_from_raid_to_stop: delay,
        ..Default::default()
    }
}

pub struct Harness {
    pub player: Arc<RecordingPlayer>,
    pub stream: Arc<RecordingStream>,
    pub config: ConfigHandle,
    pub orchestrator: RaidOrchestrator,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

pub fn harness(cfg: EngineConfig, playback: Option<broadcast::Receiver<PlaybackEvent>>) -> Harness {
    let player = Arc::new(RecordingPlayer::default());
    let stream = Arc::new(RecordingStream::default());
    let config = ConfigHandle::new(cfg);
    let cancel = CancellationToken::new();
    let (orchestrator, task) = RaidOrchestrator::spawn(
        player.clone(),
        stream.clone(),
        config.clone(),
        EventBus::new(),
        playback,
        cancel.clone(),
    );
    Harness {
        player,
        stream,
        config,
        orchestrator,
        cancel,
        task,
    }
}
