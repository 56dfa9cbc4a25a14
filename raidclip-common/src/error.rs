// ================================================================
// File: raidclip-common/src/error.rs
// ================================================================

use thiserror::Error;

/// Failures of the raid orchestrator. `NoCandidateClip` is reported but the
/// raid still counts as handled.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestrationError {
    #[error("No playable clip among the raid candidates")]
    NoCandidateClip,

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Raid orchestrator is not running")]
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    #[error("Invalid clip URL (empty)")]
    InvalidUrl,

    #[error("Invalid duration cap: {0}")]
    InvalidDuration(f64),
}

/// Clip provider failures. All of them are transient from the engine's
/// point of view and are retried on the next watch tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("Clip provider unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed clip provider response: {0}")]
    Malformed(String),

    #[error("Clip provider rejected our credentials")]
    Unauthorized,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
