use serde::{Deserialize, Serialize};

use crate::error::LinkError;

/// Where the streaming software listens and how to log in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObsInstance {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl Default for ObsInstance {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4455,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Degraded,
}

impl LinkState {
    /// States in which a connection attempt has finished one way or the other.
    pub fn is_settled(self) -> bool {
        matches!(self, LinkState::Ready | LinkState::Degraded | LinkState::Disconnected)
    }
}

/// Observable snapshot of the link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStatus {
    pub state: LinkState,
    /// Incremented on every transition to `Ready`.
    pub epoch: u64,
    /// Incremented every time an attempt starts.
    pub attempts: u64,
    pub last_error: Option<LinkError>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            epoch: 0,
            attempts: 0,
            last_error: None,
        }
    }
}

/// Fire-and-forget notifications for observers.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkNotification {
    Connected { epoch: u64 },
    KeepAlive { epoch: u64 },
    StateChanged(LinkState),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObsVersion {
    pub obs_version: String,
    pub websocket_version: String,
}

impl std::fmt::Display for ObsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OBS: {} WebSocket: {}", self.obs_version, self.websocket_version)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObsStreamStatus {
    pub is_streaming: bool,
    pub stream_time_ms: Option<u64>,
    pub bytes_sent: Option<u64>,
}
