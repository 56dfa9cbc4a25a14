//! Wires the components together and answers process-facing commands.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use raidclip_common::models::{Clip, EngineConfig, PlaybackSession, RaidEvent};
use raidclip_obs::{LinkNotification, LinkState, LinkTimings, ObsConnector, ObsInstance, ObsLink};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commands::{CommandHandler, CommandReply, DesktopShell, EngineCommand, HeadlessShell};
use crate::config_store::{ConfigHandle, ConfigStore};
use crate::error::CommandError;
use crate::eventbus::raid_log::spawn_raid_journal;
use crate::eventbus::{EngineEvent, EventBus};
use crate::orchestrator::{OrchestratorStatus, RaidOrchestrator, StreamController};
use crate::overlay::{probe_overlay, OverlayServer, PlaybackEvent};
use crate::provider::ClipProvider;
use crate::watcher::ClipWatcher;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub started_at: DateTime<Utc>,
    pub link_state: LinkState,
    pub link_epoch: u64,
    pub link_attempts: u64,
    pub link_error: Option<String>,
    pub raid: OrchestratorStatus,
    pub playing: Option<PlaybackSession>,
    pub renderers: usize,
    pub listening_port: Option<u16>,
    pub watching: Vec<String>,
    pub clip_provider: bool,
}

pub fn obs_instance(cfg: &EngineConfig) -> ObsInstance {
    ObsInstance {
        host: cfg.obs_host().to_string(),
        port: cfg.obs_port(),
        password: cfg.obs_password().map(str::to_string),
    }
}

pub struct EngineBuilder {
    store: Arc<dyn ConfigStore>,
    connector: Arc<dyn ObsConnector>,
    provider: Option<Arc<dyn ClipProvider>>,
    shell: Arc<dyn DesktopShell>,
    link_timings: LinkTimings,
    port_override: Option<u16>,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn ConfigStore>, connector: Arc<dyn ObsConnector>) -> Self {
        Self {
            store,
            connector,
            provider: None,
            shell: Arc::new(HeadlessShell),
            link_timings: LinkTimings::default(),
            port_override: None,
        }
    }

    pub fn provider(mut self, provider: Option<Arc<dyn ClipProvider>>) -> Self {
        self.provider = provider;
        self
    }

    pub fn shell(mut self, shell: Arc<dyn DesktopShell>) -> Self {
        self.shell = shell;
        self
    }

    pub fn link_timings(mut self, timings: LinkTimings) -> Self {
        self.link_timings = timings;
        self
    }

    /// Listen on this port instead of `SERVER_PORT` (0 picks a free one).
    pub fn port_override(mut self, port: u16) -> Self {
        self.port_override = Some(port);
        self
    }

    pub async fn start(self) -> Result<Arc<Engine>, CommandError> {
        let cfg = self.store.load().await?;
        info!(
            "[Engine] Starting: OBS {}:{}, server port {}, overlay {}",
            cfg.obs_host(),
            cfg.obs_port(),
            cfg.local_server_port_number,
            if cfg.overlay_enabled { "on" } else { "off" }
        );

        let config = ConfigHandle::new(cfg.clone());
        let bus = EventBus::new();
        let cancel = CancellationToken::new();
        let link = Arc::new(ObsLink::with_timings(self.connector, self.link_timings));
        let overlay = OverlayServer::new(config.clone());

        let (orchestrator, orch_task) = RaidOrchestrator::spawn(
            Arc::new(overlay.clone()),
            link.clone() as Arc<dyn StreamController>,
            config.clone(),
            bus.clone(),
            Some(overlay.subscribe_events()),
            cancel.child_token(),
        );

        let mut tasks = vec![
            orch_task,
            spawn_raid_journal(&bus, config.clone()).await,
            spawn_link_forwarder(&link, bus.clone(), cancel.child_token()),
            spawn_playback_forwarder(&overlay, bus.clone(), cancel.child_token()),
        ];

        match &self.provider {
            Some(provider) => {
                let watcher = ClipWatcher::new(provider.clone(), config.clone(), orchestrator.clone(), bus.clone());
                tasks.push(watcher.spawn(cancel.child_token()));
            }
            None => warn!("[Engine] No clip provider credentials, clip watching disabled"),
        }

        let engine = Arc::new_cyclic(|me| Engine {
            me: me.clone(),
            config,
            store: self.store,
            shell: self.shell,
            provider: self.provider,
            bus,
            link,
            overlay,
            orchestrator,
            cancel,
            port_override: self.port_override,
            tasks: Mutex::new(tasks),
            started_at: Utc::now(),
        });

        let port = engine.listen_port(&cfg);
        if let Err(e) = engine.overlay.serve(port, Some(engine.command_handler())).await {
            engine.shutdown().await;
            return Err(CommandError::Engine(format!("could not start local server: {}", e)));
        }

        engine.connect_link(obs_instance(&cfg));
        Ok(engine)
    }
}

pub struct Engine {
    me: Weak<Engine>,
    config: ConfigHandle,
    store: Arc<dyn ConfigStore>,
    shell: Arc<dyn DesktopShell>,
    provider: Option<Arc<dyn ClipProvider>>,
    bus: EventBus,
    link: Arc<ObsLink>,
    overlay: OverlayServer,
    orchestrator: RaidOrchestrator,
    cancel: CancellationToken,
    port_override: Option<u16>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started_at: DateTime<Utc>,
}

impl Engine {
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn link(&self) -> &Arc<ObsLink> {
        &self.link
    }

    pub fn overlay(&self) -> &OverlayServer {
        &self.overlay
    }

    pub fn orchestrator(&self) -> &RaidOrchestrator {
        &self.orchestrator
    }

    /// Entry point for the event source.
    pub async fn handle_raid(&self, event: RaidEvent) -> Result<(), CommandError> {
        Ok(self.orchestrator.handle_raid(event).await?)
    }

    pub async fn dispatch(&self, command: EngineCommand) -> Result<CommandReply, CommandError> {
        debug!("[Engine] dispatch {}", command.name());
        match command {
            EngineCommand::LoadConfig => Ok(CommandReply::Config(self.store.load().await?)),
            EngineCommand::SaveConfig { config } => {
                self.save_config(config).await?;
                Ok(CommandReply::Done)
            }
            EngineCommand::OpenFileDialog { previous, filter } => {
                Ok(CommandReply::Path(self.shell.open_file_dialog(&previous, &filter).await?))
            }
            EngineCommand::OpenDirectoryDialog { previous } => {
                Ok(CommandReply::Path(self.shell.open_directory_dialog(&previous).await?))
            }
            EngineCommand::OpenExternalUrl { url } => {
                self.shell.open_external_url(&url).await?;
                Ok(CommandReply::Done)
            }
            EngineCommand::StartClip { url, duration } => {
                self.overlay.start_clip(&url, duration)?;
                Ok(CommandReply::Done)
            }
            EngineCommand::StopClip => {
                self.overlay.stop_clip()?;
                Ok(CommandReply::Done)
            }
            EngineCommand::StopStream => {
                self.link.stop_stream().await?;
                Ok(CommandReply::Done)
            }
            EngineCommand::TestConnection => {
                let instance = obs_instance(&self.config.current());
                Ok(CommandReply::Status(self.link.test_connection(&instance).await?))
            }
            EngineCommand::TestOverlay => self.test_overlay().await,
            EngineCommand::InjectDebugRaid { from, clips } => {
                self.inject_debug_raid(from, clips).await?;
                Ok(CommandReply::Done)
            }
            EngineCommand::InjectDebugEntry => {
                self.orchestrator.inject_debug_entry().await?;
                Ok(CommandReply::Done)
            }
            EngineCommand::Status => Ok(CommandReply::Engine(self.status().await?)),
        }
    }

    /// Persists `new`, swaps the snapshot and re-targets whatever depends on
    /// the changed fields.
    pub async fn save_config(&self, new: EngineConfig) -> Result<(), CommandError> {
        let old = self.config.current();
        self.store.save(&new).await?;

        if old.listener_changed(&new) && self.port_override.is_none() {
            let port = new.local_server_port_number;
            info!("[Engine] Server port changed to {}, restarting listener", port);
            if let Err(e) = self.overlay.serve(port, Some(self.command_handler())).await {
                error!("[Engine] Could not restart local server on {}: {}", port, e);
                if let Err(restore) = self.store.save(&old).await {
                    error!("[Engine] Could not restore previous config: {}", restore);
                }
                return Err(CommandError::Engine(format!(
                    "local server cannot listen on port {}: {}",
                    port, e
                )));
            }
        }
        self.config.replace(new.clone());

        if old.endpoint_changed(&new) {
            info!("[Engine] OBS endpoint changed, re-targeting link");
            self.connect_link(obs_instance(&new));
        }
        Ok(())
    }

    async fn inject_debug_raid(&self, from: String, mut clips: Vec<Clip>) -> Result<(), CommandError> {
        if clips.is_empty() {
            let provider = self
                .provider
                .as_ref()
                .ok_or_else(|| CommandError::Unsupported("debug raids need clip provider credentials".into()))?;
            clips = provider.clips_for(&from).await?;
            info!("[Engine] Resolved {} clip(s) for debug raid from {}", clips.len(), from);
        }
        self.orchestrator.inject_debug_raid(RaidEvent::new(from, clips)).await?;
        Ok(())
    }

    async fn test_overlay(&self) -> Result<CommandReply, CommandError> {
        let port = self
            .overlay
            .local_addr()
            .await
            .map(|a| a.port())
            .unwrap_or(self.config.current().local_server_port_number);
        let ping = probe_overlay(port)
            .await
            .map_err(|e| CommandError::Engine(format!("overlay on port {} unreachable: {}", port, e)))?;
        Ok(CommandReply::Status(format!(
            "Overlay on port {} is up ({} renderer(s), {})",
            port,
            ping.renderers,
            if ping.playing { "playing" } else { "idle" }
        )))
    }

    pub async fn status(&self) -> Result<EngineStatus, CommandError> {
        let link = self.link.status();
        let cfg = self.config.current();
        Ok(EngineStatus {
            started_at: self.started_at,
            link_state: link.state,
            link_epoch: link.epoch,
            link_attempts: link.attempts,
            link_error: link.last_error.map(|e| e.to_string()),
            raid: self.orchestrator.status().await?,
            playing: self.overlay.current(),
            renderers: self.overlay.renderer_count(),
            listening_port: self.overlay.local_addr().await.map(|a| a.port()),
            watching: cfg.chat_targets.clone(),
            clip_provider: self.provider.is_some(),
        })
    }

    /// Stops every task, the listener and the control link.
    pub async fn shutdown(&self) {
        info!("[Engine] Shutting down");
        self.cancel.cancel();
        self.bus.shutdown();
        self.overlay.shutdown().await;
        self.link.disconnect().await;

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for t in tasks {
            let _ = t.await;
        }
        info!("[Engine] Shutdown complete");
    }

    fn listen_port(&self, cfg: &EngineConfig) -> u16 {
        self.port_override.unwrap_or(cfg.local_server_port_number)
    }

    fn command_handler(&self) -> Arc<dyn CommandHandler> {
        Arc::new(EngineCommands { engine: self.me.clone() })
    }

    fn connect_link(&self, instance: ObsInstance) {
        let link = self.link.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                res = link.connect(instance.clone()) => match res {
                    Ok(()) => info!("[Engine] OBS link ready ({}:{})", instance.host, instance.port),
                    Err(e) => warn!("[Engine] OBS link not ready yet: {} (retrying in background)", e),
                },
            }
        });
    }
}

/// Command handler handed to the HTTP listener. Holds the engine weakly so
/// the listener does not keep it alive.
struct EngineCommands {
    engine: Weak<Engine>,
}

#[async_trait]
impl CommandHandler for EngineCommands {
    async fn handle(&self, command: EngineCommand) -> Result<CommandReply, CommandError> {
        match self.engine.upgrade() {
            Some(engine) => engine.dispatch(command).await,
            None => Err(CommandError::Engine("engine stopped".into())),
        }
    }
}

fn spawn_link_forwarder(link: &ObsLink, bus: EventBus, cancel: CancellationToken) -> JoinHandle<()> {
    let mut rx = link.subscribe();
    tokio::spawn(async move {
        loop {
            let note = tokio::select! {
                _ = cancel.cancelled() => break,
                note = rx.recv() => note,
            };
            let event = match note {
                Ok(LinkNotification::Connected { epoch }) => EngineEvent::LinkConnected { epoch },
                Ok(LinkNotification::KeepAlive { epoch }) => EngineEvent::LinkKeepAlive { epoch },
                Ok(LinkNotification::StateChanged(state)) => EngineEvent::LinkStateChanged(state),
                Err(RecvError::Lagged(n)) => {
                    warn!("[Engine] Dropped {} link notifications", n);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            bus.publish(event).await;
        }
    })
}

fn spawn_playback_forwarder(overlay: &OverlayServer, bus: EventBus, cancel: CancellationToken) -> JoinHandle<()> {
    let mut rx = overlay.subscribe_events();
    tokio::spawn(async move {
        loop {
            let ev = tokio::select! {
                _ = cancel.cancelled() => break,
                ev = rx.recv() => ev,
            };
            let event = match ev {
                Ok(PlaybackEvent::Started { url }) => EngineEvent::PlaybackStarted { url },
                Ok(PlaybackEvent::Stopped { url, reason }) => EngineEvent::PlaybackStopped { url, reason },
                Err(RecvError::Lagged(n)) => {
                    warn!("[Engine] Dropped {} playback events", n);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            bus.publish(event).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obs_instance_from_config() {
        let inst = obs_instance(&EngineConfig::default());
        assert_eq!(inst, ObsInstance { host: "localhost".into(), port: 4455, password: None });

        let cfg = EngineConfig {
            obs_ip: " 192.168.1.20 ".into(),
            obs_port: 0,
            obs_pass: "hunter2".into(),
            ..Default::default()
        };
        let inst = obs_instance(&cfg);
        assert_eq!(inst.host, "192.168.1.20");
        assert_eq!(inst.port, 4455);
        assert_eq!(inst.password.as_deref(), Some("hunter2"));
    }
}
