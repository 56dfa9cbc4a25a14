//! Long-lived control link to one OBS instance.
//!
//! A supervisor task owns the connection: it walks
//! `Connecting -> Authenticating -> Ready`, runs the keepalive loop while
//! ready, falls back to `Degraded` on failure and retries with [`Backoff`]
//! until [`ObsLink::disconnect`] is called. Everything else reads the
//! published [`LinkStatus`] or the current session.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backoff::Backoff;
use crate::error::{LinkError, Result};
use crate::models::*;
use crate::session::{ObsConnector, ObsSession};

const NOTIFICATION_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct LinkTimings {
    /// Upper bound for each of the handshake and login phases, and for commands.
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_missed_heartbeats: u32,
    pub backoff_initial: Duration,
    pub backoff_cap: Duration,
}

impl Default for LinkTimings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(3),
            max_missed_heartbeats: 3,
            backoff_initial: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

struct Shared {
    connector: Arc<dyn ObsConnector>,
    timings: LinkTimings,
    status_tx: watch::Sender<LinkStatus>,
    session: RwLock<Option<Arc<dyn ObsSession>>>,
    notify_tx: broadcast::Sender<LinkNotification>,
    retry_now: Notify,
    shutdown: CancellationToken,
}

struct Supervisor {
    instance: ObsInstance,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ObsLink {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl ObsLink {
    pub fn new(connector: Arc<dyn ObsConnector>) -> Self {
        Self::with_timings(connector, LinkTimings::default())
    }

    pub fn with_timings(connector: Arc<dyn ObsConnector>, timings: LinkTimings) -> Self {
        let (status_tx, _) = watch::channel(LinkStatus::default());
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            shared: Arc::new(Shared {
                connector,
                timings,
                status_tx,
                session: RwLock::new(None),
                notify_tx,
                retry_now: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
            supervisor: Mutex::new(None),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.shared.status_tx.borrow().clone()
    }

    pub fn state(&self) -> LinkState {
        self.shared.status_tx.borrow().state
    }

    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Observer registration. Sends never wait for slow receivers; a receiver
    /// that falls behind sees `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkNotification> {
        self.shared.notify_tx.subscribe()
    }

    /// Starts (or joins) the connection to `instance` and returns once the
    /// current attempt has resolved.
    ///
    /// While an attempt is in flight or the link is ready this only waits.
    /// While degraded it cuts the backoff short. A different `instance`
    /// replaces the running supervisor. On failure the supervisor keeps
    /// retrying in the background.
    pub async fn connect(&self, instance: ObsInstance) -> Result<()> {
        let mut guard = self.supervisor.lock().await;

        let reuse = matches!(
            guard.as_ref(),
            Some(sup) if sup.instance == instance && !sup.task.is_finished()
        );

        let baseline = if reuse {
            let status = self.status();
            match status.state {
                LinkState::Ready => return Ok(()),
                LinkState::Connecting | LinkState::Authenticating => status.attempts.saturating_sub(1),
                LinkState::Degraded | LinkState::Disconnected => {
                    self.shared.retry_now.notify_one();
                    status.attempts
                }
            }
        } else {
            if let Some(old) = guard.take() {
                info!("[ObsLink] Re-targeting link to {}:{}", instance.host, instance.port);
                old.cancel.cancel();
                let _ = old.task.await;
            }
            let baseline = self.status().attempts;
            let cancel = self.shared.shutdown.child_token();
            let task = tokio::spawn(run_supervisor(
                self.shared.clone(),
                instance.clone(),
                cancel.clone(),
            ));
            *guard = Some(Supervisor { instance, cancel, task });
            baseline
        };
        drop(guard);

        let mut rx = self.shared.status_tx.subscribe();
        let settled = rx
            .wait_for(|s| s.attempts > baseline && s.state.is_settled())
            .await
            .map_err(|_| LinkError::NotReady)?
            .clone();

        match settled.state {
            LinkState::Ready => Ok(()),
            LinkState::Degraded => Err(settled
                .last_error
                .unwrap_or_else(|| LinkError::Transport("connection attempt failed".into()))),
            _ => Err(LinkError::NotReady),
        }
    }

    /// Stops retrying, closes the session and parks the link in `Disconnected`.
    pub async fn disconnect(&self) {
        if let Some(sup) = self.supervisor.lock().await.take() {
            sup.cancel.cancel();
            let _ = sup.task.await;
        }
        self.shared.drop_session().await;
        self.shared.set_state(LinkState::Disconnected);
    }

    /// Probes `instance` and reports its version. Reuses the live session when
    /// it points at the same instance; otherwise opens a throwaway one. Never
    /// touches the link status.
    pub async fn test_connection(&self, instance: &ObsInstance) -> Result<String> {
        let same_target = self
            .supervisor
            .lock()
            .await
            .as_ref()
            .map(|sup| &sup.instance == instance)
            .unwrap_or(false);

        if same_target {
            if let Ok(session) = self.ready_session().await {
                let version = self.bounded("version probe", session.version()).await?;
                return Ok(version.to_string());
            }
        }

        let connector = &self.shared.connector;
        self.bounded("probe handshake", connector.handshake(instance)).await?;
        let session = self.bounded("probe login", connector.login(instance)).await?;
        let version = self.bounded("version probe", session.version()).await;
        session.close().await;

        let version = version?;
        info!("[ObsLink] Probe of {}:{} => {}", instance.host, instance.port, version);
        Ok(version.to_string())
    }

    /// Sends the stop-stream command. Does not change the link state.
    pub async fn stop_stream(&self) -> Result<()> {
        let session = self.ready_session().await?;
        self.bounded("stop stream", session.stop_stream()).await?;
        info!("[ObsLink] Stop stream requested");
        Ok(())
    }

    pub async fn switch_scene(&self, scene_name: &str) -> Result<()> {
        let session = self.ready_session().await?;
        self.bounded("switch scene", session.set_current_scene(scene_name)).await?;
        info!("[ObsLink] Switched program scene to '{}'", scene_name);
        Ok(())
    }

    pub async fn stream_status(&self) -> Result<ObsStreamStatus> {
        let session = self.ready_session().await?;
        self.bounded("stream status", session.stream_status()).await
    }

    async fn ready_session(&self) -> Result<Arc<dyn ObsSession>> {
        if self.state() != LinkState::Ready {
            return Err(LinkError::NotReady);
        }
        self.shared.session.read().await.clone().ok_or(LinkError::NotReady)
    }

    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        bounded(self.shared.timings.connect_timeout, what, fut).await
    }
}

impl Drop for ObsLink {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn bounded<T>(limit: Duration, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(LinkError::Timeout(format!("{} exceeded {:?}", what, limit))),
    }
}

async fn run_supervisor(shared: Arc<Shared>, instance: ObsInstance, cancel: CancellationToken) {
    let timings = shared.timings.clone();
    let mut backoff = Backoff::new(timings.backoff_initial, timings.backoff_cap);

    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            res = shared.attempt(&instance) => res,
        };

        match outcome {
            Ok(session) => {
                backoff.reset();
                let epoch = shared.become_ready(session.clone()).await;
                let err = tokio::select! {
                    _ = cancel.cancelled() => break,
                    err = shared.keepalive(session, epoch) => err,
                };
                shared.drop_session().await;
                shared.degrade(err);
            }
            Err(err) => shared.degrade(err),
        }

        let delay = backoff.next_delay();
        debug!("[ObsLink] Next attempt in {:?}", delay);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(delay) => {}
            _ = shared.retry_now.notified() => debug!("[ObsLink] Retry requested"),
        }
    }

    shared.drop_session().await;
    shared.set_state(LinkState::Disconnected);
    info!("[ObsLink] Supervisor for {}:{} stopped", instance.host, instance.port);
}

impl Shared {
    fn notify(&self, n: LinkNotification) {
        let _ = self.notify_tx.send(n);
    }

    fn set_state(&self, state: LinkState) {
        let changed = self.status_tx.send_if_modified(|s| {
            if s.state == state {
                return false;
            }
            s.state = state;
            true
        });
        if changed {
            self.notify(LinkNotification::StateChanged(state));
        }
    }

    async fn attempt(&self, instance: &ObsInstance) -> Result<Arc<dyn ObsSession>> {
        self.status_tx.send_modify(|s| {
            s.state = LinkState::Connecting;
            s.attempts += 1;
        });
        self.notify(LinkNotification::StateChanged(LinkState::Connecting));

        let limit = self.timings.connect_timeout;
        bounded(limit, "handshake", self.connector.handshake(instance)).await?;

        self.set_state(LinkState::Authenticating);
        bounded(limit, "login", self.connector.login(instance)).await
    }

    async fn become_ready(&self, session: Arc<dyn ObsSession>) -> u64 {
        *self.session.write().await = Some(session);

        let mut epoch = 0;
        self.status_tx.send_modify(|s| {
            s.state = LinkState::Ready;
            s.epoch += 1;
            s.last_error = None;
            epoch = s.epoch;
        });
        info!("[ObsLink] Ready (epoch {})", epoch);
        self.notify(LinkNotification::StateChanged(LinkState::Ready));
        self.notify(LinkNotification::Connected { epoch });
        epoch
    }

    fn degrade(&self, err: LinkError) {
        match &err {
            LinkError::AuthFailed(msg) => error!("[ObsLink] Authentication rejected: {}", msg),
            other => warn!("[ObsLink] Link degraded: {}", other),
        }
        self.status_tx.send_modify(|s| {
            s.state = LinkState::Degraded;
            s.last_error = Some(err);
        });
        self.notify(LinkNotification::StateChanged(LinkState::Degraded));
    }

    async fn drop_session(&self) {
        let session = self.session.write().await.take();
        if let Some(session) = session {
            session.close().await;
        }
    }

    /// Runs until the configured number of consecutive heartbeats go
    /// unanswered and returns the last failure.
    async fn keepalive(&self, session: Arc<dyn ObsSession>, epoch: u64) -> LinkError {
        let period = self.timings.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut missed = 0u32;

        loop {
            ticker.tick().await;
            let failure = match timeout(self.timings.heartbeat_timeout, session.version()).await {
                Ok(Ok(_)) => {
                    missed = 0;
                    trace!("[ObsLink] keepalive ok (epoch {})", epoch);
                    self.notify(LinkNotification::KeepAlive { epoch });
                    continue;
                }
                Ok(Err(e)) => e,
                Err(_) => LinkError::Timeout("heartbeat unanswered".into()),
            };

            missed += 1;
            debug!("[ObsLink] Missed heartbeat {}/{}: {}", missed, self.timings.max_missed_heartbeats, failure);
            if missed >= self.timings.max_missed_heartbeats {
                return failure;
            }
        }
    }
}
