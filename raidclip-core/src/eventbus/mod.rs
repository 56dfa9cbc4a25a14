//! Engine notifications. Every observer owns a bounded queue and sees every
//! event published after it subscribed, in publish order.

pub mod raid_log;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use raidclip_common::models::{Clip, StopReason};
use raidclip_obs::LinkState;
use tokio::sync::{mpsc, watch, Mutex};

/// Everything the engine announces to its observers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A raid was handed to the orchestrator.
    Raided {
        from: String,
        clips: Vec<Clip>,
        at: DateTime<Utc>,
    },

    LinkConnected { epoch: u64 },
    LinkKeepAlive { epoch: u64 },
    LinkStateChanged(LinkState),

    /// The clip watcher found a clip it had not seen before.
    NewClip { channel: String, clip: Clip },

    PlaybackStarted { url: String },
    PlaybackStopped { url: String, reason: StopReason },
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::Raided { .. } => "raid",
            EngineEvent::LinkConnected { .. } => "link.connected",
            EngineEvent::LinkKeepAlive { .. } => "link.keepalive",
            EngineEvent::LinkStateChanged(_) => "link.state",
            EngineEvent::NewClip { .. } => "clip.new",
            EngineEvent::PlaybackStarted { .. } => "playback.started",
            EngineEvent::PlaybackStopped { .. } => "playback.stopped",
        }
    }
}

/// Fan-out of [`EngineEvent`]s plus the process-wide shutdown flag.
///
/// A slow observer slows `publish` down rather than losing events. Queues
/// whose receiver is gone are dropped the next time something is published.
#[derive(Clone)]
pub struct EventBus {
    queues: Arc<Mutex<Vec<mpsc::Sender<EngineEvent>>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    pub shutdown_rx: watch::Receiver<bool>,
}

const DEFAULT_BUFFER_SIZE: usize = 1024;

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            queues: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx: Arc::new(tx),
            shutdown_rx: rx,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// New queue of `capacity` events (1024 when `None`).
    pub async fn subscribe(&self, capacity: Option<usize>) -> mpsc::Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel(capacity.unwrap_or(DEFAULT_BUFFER_SIZE));
        self.queues.lock().await.push(tx);
        rx
    }

    pub async fn publish(&self, event: EngineEvent) {
        // Send outside the lock so a full queue doesn't block subscribe.
        let live: Vec<_> = {
            let mut queues = self.queues.lock().await;
            queues.retain(|q| !q.is_closed());
            queues.clone()
        };
        for queue in live {
            let _ = queue.send(event.clone()).await;
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
