//! Overlay command server.
//!
//! Holds the single live [`PlaybackSession`] and fans start/stop commands out
//! to every connected renderer (browser sources reading `/events`). All state
//! changes and the commands they produce happen under one lock, so renderers
//! always see `stop` between two different `start`s.

pub mod page;
pub mod routes;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use raidclip_common::models::{PlaybackSession, StopReason};
use raidclip_common::PlaybackError;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::commands::CommandHandler;
use crate::config_store::ConfigHandle;

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// What renderers are told to do. `id` identifies the session a command
/// belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayCommand {
    Start { id: u64, session: PlaybackSession },
    Stop { id: u64 },
}

/// Playback lifecycle as seen by the rest of the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started { url: String },
    Stopped { url: String, reason: StopReason },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReply {
    pub status: String,
    pub renderers: usize,
    pub playing: bool,
}

#[derive(Default)]
struct PlaybackState {
    session: Option<PlaybackSession>,
    id: u64,
    cap_timer: Option<JoinHandle<()>>,
}

struct Listener {
    handle: axum_server::Handle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    addr: SocketAddr,
}

pub(crate) struct Inner {
    state: Mutex<PlaybackState>,
    commands: broadcast::Sender<OverlayCommand>,
    events: broadcast::Sender<PlaybackEvent>,
    renderers: AtomicUsize,
    listener: tokio::sync::Mutex<Option<Listener>>,
    pub(crate) config: ConfigHandle,
}

#[derive(Clone)]
pub struct OverlayServer {
    inner: Arc<Inner>,
}

impl OverlayServer {
    pub fn new(config: ConfigHandle) -> Self {
        let (commands, _) = broadcast::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PlaybackState::default()),
                commands,
                events,
                renderers: AtomicUsize::new(0),
                listener: tokio::sync::Mutex::new(None),
                config,
            }),
        }
    }

    /// Replaces whatever is playing with `url`.
    ///
    /// `duration_cap` of `None` or `0` plays to the end; a positive value stops
    /// the session after that many seconds. Starting the same URL again
    /// restarts it.
    pub fn start_clip(&self, url: &str, duration_cap: Option<f64>) -> Result<(), PlaybackError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(PlaybackError::InvalidUrl);
        }
        let cap = match duration_cap {
            Some(c) if c.is_nan() || c < 0.0 => return Err(PlaybackError::InvalidDuration(c)),
            Some(c) if c > 0.0 => {
                let timer = Duration::try_from_secs_f64(c).map_err(|_| PlaybackError::InvalidDuration(c))?;
                Some((c, timer))
            }
            _ => None,
        };

        let mut st = self.inner.state.lock();
        self.inner.end_session(&mut st, StopReason::Superseded);

        st.id += 1;
        let id = st.id;
        let session = PlaybackSession {
            url: url.to_string(),
            started_at: Utc::now(),
            duration_cap: cap.map(|(secs, _)| secs),
        };
        st.session = Some(session.clone());
        let _ = self.inner.commands.send(OverlayCommand::Start { id, session });
        let _ = self.inner.events.send(PlaybackEvent::Started { url: url.to_string() });

        if let Some((_, timer)) = cap {
            let inner = self.inner.clone();
            st.cap_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(timer).await;
                inner.finish(id, StopReason::DurationCap);
            }));
        }

        info!("[Overlay] Start clip #{} {} (cap {:?})", id, url, cap.map(|(_, timer)| timer));
        Ok(())
    }

    /// Clears the live session. Succeeds without effect when idle.
    pub fn stop_clip(&self) -> Result<(), PlaybackError> {
        let mut st = self.inner.state.lock();
        if st.session.is_none() {
            debug!("[Overlay] Stop requested while idle");
            return Ok(());
        }
        self.inner.end_session(&mut st, StopReason::Requested);
        info!("[Overlay] Stop clip");
        Ok(())
    }

    /// A renderer reports the video played to the end. Ignored unless it
    /// refers to the live session.
    pub fn renderer_ended(&self, url: &str, id: Option<u64>) {
        let mut st = self.inner.state.lock();
        let matches = match (&st.session, id) {
            (Some(s), Some(id)) => s.url == url && st.id == id,
            (Some(s), None) => s.url == url,
            (None, _) => false,
        };
        if matches {
            self.inner.end_session(&mut st, StopReason::Ended);
            info!("[Overlay] Clip ended: {}", url);
        } else {
            debug!("[Overlay] Stale end report for {}", url);
        }
    }

    pub fn current(&self) -> Option<PlaybackSession> {
        self.inner.state.lock().session.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.state.lock().session.is_some()
    }

    /// Snapshot for a joining renderer plus the live command feed, taken
    /// atomically so nothing falls between them.
    pub fn subscribe(&self) -> (Option<OverlayCommand>, broadcast::Receiver<OverlayCommand>) {
        let st = self.inner.state.lock();
        let snapshot = st.session.clone().map(|session| OverlayCommand::Start { id: st.id, session });
        (snapshot, self.inner.commands.subscribe())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.inner.events.subscribe()
    }

    pub fn renderer_count(&self) -> usize {
        self.inner.renderers.load(Ordering::SeqCst)
    }

    pub fn ping(&self) -> PingReply {
        PingReply {
            status: "ok".to_string(),
            renderers: self.renderer_count(),
            playing: self.is_playing(),
        }
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.inner.config
    }

    pub(crate) fn register_renderer(&self) -> RendererGuard {
        let n = self.inner.renderers.fetch_add(1, Ordering::SeqCst) + 1;
        info!("[Overlay] Renderer connected ({} total)", n);
        RendererGuard { inner: self.inner.clone() }
    }

    /// Binds the HTTP listener on `0.0.0.0:port` (port 0 picks a free one) and
    /// returns the bound address.
    ///
    /// A running listener is only retired once the new one is bound; if the
    /// bind fails the old listener keeps serving. The old one drains in the
    /// background, so a request it is serving may trigger the swap.
    pub async fn serve(
        &self,
        port: u16,
        commands: Option<Arc<dyn CommandHandler>>,
    ) -> std::io::Result<SocketAddr> {
        let mut slot = self.inner.listener.lock().await;

        let cancel = CancellationToken::new();
        let app = routes::router(self.clone(), commands, cancel.clone());
        let handle = axum_server::Handle::new();
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        let server = axum_server::bind(addr)
            .handle(handle.clone())
            .serve(app.into_make_service());
        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::error!("[Overlay] Server error: {}", e);
            }
            info!("[Overlay] Server shut down.");
        });

        match handle.listening().await {
            Some(bound) => {
                info!("[Overlay] Listening on http://{}", bound);
                if let Some(old) = slot.replace(Listener { handle, cancel, task, addr: bound }) {
                    info!("[Overlay] Retiring listener on {}", old.addr);
                    tokio::spawn(old.stop());
                }
                Ok(bound)
            }
            None => {
                let _ = task.await;
                Err(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("overlay server could not bind port {}", port),
                ))
            }
        }
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.listener.lock().await.as_ref().map(|l| l.addr)
    }

    /// Closes renderer streams and stops the listener, if any.
    pub async fn shutdown(&self) {
        let listener = self.inner.listener.lock().await.take();
        if let Some(l) = listener {
            l.stop().await;
        }
    }
}

impl Listener {
    async fn stop(self) {
        self.cancel.cancel();
        self.handle.graceful_shutdown(Some(Duration::from_secs(2)));
        let _ = self.task.await;
    }
}

impl Inner {
    fn end_session(&self, st: &mut PlaybackState, reason: StopReason) {
        if let Some(timer) = st.cap_timer.take() {
            if reason != StopReason::DurationCap {
                timer.abort();
            }
        }
        if let Some(prev) = st.session.take() {
            let _ = self.commands.send(OverlayCommand::Stop { id: st.id });
            let _ = self.events.send(PlaybackEvent::Stopped { url: prev.url, reason });
        }
    }

    fn finish(&self, id: u64, reason: StopReason) {
        let mut st = self.state.lock();
        if st.id == id && st.session.is_some() {
            self.end_session(&mut st, reason);
            info!("[Overlay] Clip #{} stopped: {:?}", id, reason);
        }
    }
}

/// Counts a connected renderer for as long as it lives.
pub(crate) struct RendererGuard {
    inner: Arc<Inner>,
}

impl Drop for RendererGuard {
    fn drop(&mut self) {
        let left = self.inner.renderers.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        info!("[Overlay] Renderer disconnected ({} left)", left);
    }
}

/// Liveness check of a local overlay server.
pub async fn probe_overlay(port: u16) -> Result<PingReply, reqwest::Error> {
    let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
    client
        .get(format!("http://127.0.0.1:{}/api/ping", port))
        .send()
        .await?
        .error_for_status()?
        .json::<PingReply>()
        .await
}
