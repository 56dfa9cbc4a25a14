//! The seam between the link state machine and the wire.
//!
//! [`crate::ObsLink`] only ever talks to these traits; [`crate::ObwsConnector`]
//! implements them over OBS WebSocket v5.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ObsInstance, ObsStreamStatus, ObsVersion};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObsConnector: Send + Sync {
    /// Opens (and drops) a transport connection to check the endpoint is reachable.
    async fn handshake(&self, instance: &ObsInstance) -> Result<()>;

    /// Opens a session and identifies with the instance password.
    async fn login(&self, instance: &ObsInstance) -> Result<Arc<dyn ObsSession>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObsSession: Send + Sync {
    async fn version(&self) -> Result<ObsVersion>;
    async fn stop_stream(&self) -> Result<()>;
    async fn stream_status(&self) -> Result<ObsStreamStatus>;
    async fn set_current_scene(&self, scene_name: &str) -> Result<()>;
    async fn close(&self);
}
