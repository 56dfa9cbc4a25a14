// src/error.rs
use raidclip_common::{ConfigError, OrchestrationError, PlaybackError, ProviderError};
use raidclip_obs::LinkError;
use thiserror::Error;

/// Failure of a process-facing command. Wraps the component errors so the
/// caller sees the typed cause.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Not supported here: {0}")]
    Unsupported(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

impl CommandError {
    /// Stable kind tag used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::Config(_) => "config",
            CommandError::Link(_) => "link",
            CommandError::Playback(_) => "playback",
            CommandError::Orchestration(_) => "orchestration",
            CommandError::Provider(_) => "provider",
            CommandError::Unsupported(_) => "unsupported",
            CommandError::Engine(_) => "engine",
        }
    }
}

pub type Result<T> = std::result::Result<T, CommandError>;
