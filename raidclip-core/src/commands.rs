//! Process-facing command boundary.
//!
//! Every surface (HTTP `/api/command`, the CLI client) speaks
//! [`EngineCommand`] / [`CommandReply`]. Desktop-only commands go through a
//! [`DesktopShell`].

use async_trait::async_trait;
use raidclip_common::models::{Clip, EngineConfig};
use serde::{Deserialize, Serialize};

use crate::engine::EngineStatus;
use crate::error::CommandError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum EngineCommand {
    LoadConfig,
    SaveConfig {
        config: EngineConfig,
    },
    OpenFileDialog {
        #[serde(default)]
        previous: String,
        /// Comma separated glob patterns.
        #[serde(default)]
        filter: String,
    },
    OpenDirectoryDialog {
        #[serde(default)]
        previous: String,
    },
    OpenExternalUrl {
        url: String,
    },
    StartClip {
        url: String,
        #[serde(default)]
        duration: Option<f64>,
    },
    StopClip,
    StopStream,
    TestConnection,
    TestOverlay,
    InjectDebugRaid {
        from: String,
        #[serde(default)]
        clips: Vec<Clip>,
    },
    InjectDebugEntry,
    Status,
}

impl EngineCommand {
    pub fn name(&self) -> &'static str {
        match self {
            EngineCommand::LoadConfig => "load-config",
            EngineCommand::SaveConfig { .. } => "save-config",
            EngineCommand::OpenFileDialog { .. } => "open-file-dialog",
            EngineCommand::OpenDirectoryDialog { .. } => "open-directory-dialog",
            EngineCommand::OpenExternalUrl { .. } => "open-external-url",
            EngineCommand::StartClip { .. } => "start-clip",
            EngineCommand::StopClip => "stop-clip",
            EngineCommand::StopStream => "stop-stream",
            EngineCommand::TestConnection => "test-connection",
            EngineCommand::TestOverlay => "test-overlay",
            EngineCommand::InjectDebugRaid { .. } => "inject-debug-raid",
            EngineCommand::InjectDebugEntry => "inject-debug-entry",
            EngineCommand::Status => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CommandReply {
    Done,
    Config(EngineConfig),
    /// A picked path; `None` when the dialog was cancelled.
    Path(Option<String>),
    Status(String),
    Engine(EngineStatus),
}

/// Wire envelope for a command outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandResponse {
    Ok { reply: CommandReply },
    Error { kind: String, message: String },
}

impl CommandResponse {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        CommandResponse::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    pub fn from_error(err: &CommandError) -> Self {
        Self::error(err.kind(), err.to_string())
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: EngineCommand) -> Result<CommandReply, CommandError>;
}

/// Native desktop integration: file pickers and the system browser.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DesktopShell: Send + Sync {
    async fn open_file_dialog(&self, previous: &str, filter: &str) -> Result<Option<String>, CommandError>;
    async fn open_directory_dialog(&self, previous: &str) -> Result<Option<String>, CommandError>;
    async fn open_external_url(&self, url: &str) -> Result<(), CommandError>;
}

/// Shell for a process without a desktop session.
#[derive(Debug, Default, Clone)]
pub struct HeadlessShell;

#[async_trait]
impl DesktopShell for HeadlessShell {
    async fn open_file_dialog(&self, _previous: &str, _filter: &str) -> Result<Option<String>, CommandError> {
        Err(CommandError::Unsupported("open-file-dialog needs a desktop session".into()))
    }

    async fn open_directory_dialog(&self, _previous: &str) -> Result<Option<String>, CommandError> {
        Err(CommandError::Unsupported("open-directory-dialog needs a desktop session".into()))
    }

    async fn open_external_url(&self, url: &str) -> Result<(), CommandError> {
        url::Url::parse(url).map_err(|e| CommandError::Engine(format!("invalid URL {}: {}", url, e)))?;
        Err(CommandError::Unsupported("open-external-url needs a desktop session".into()))
    }
}
