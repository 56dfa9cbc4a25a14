// src/lib.rs

pub mod commands;
pub mod config_store;
pub mod engine;
pub mod error;
pub mod eventbus;
pub mod orchestrator;
pub mod overlay;
pub mod provider;
pub mod watcher;

pub use commands::{CommandReply, DesktopShell, EngineCommand, HeadlessShell};
pub use config_store::{ConfigHandle, ConfigStore, FileConfigStore};
pub use engine::{Engine, EngineBuilder, EngineStatus};
pub use error::CommandError;
pub use eventbus::{EngineEvent, EventBus};
pub use orchestrator::{ClipPlayer, RaidOrchestrator, RaidPhase, StreamController};
pub use overlay::{OverlayCommand, OverlayServer, PlaybackEvent};
pub use provider::{ClipProvider, HelixClipProvider};
pub use watcher::ClipWatcher;
