//! Persisted configuration and the live snapshot handed to components.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use raidclip_common::models::EngineConfig;
use raidclip_common::ConfigError;
use tokio::sync::watch;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<EngineConfig, ConfigError>;
    async fn save(&self, config: &EngineConfig) -> Result<(), ConfigError>;
}

/// YAML file on disk. A missing file is created with the defaults.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> Result<EngineConfig, ConfigError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let cfg = EngineConfig::from_yaml(&raw)?;
                info!("[Config] Loaded {}", self.path.display());
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("[Config] {} not found, writing defaults", self.path.display());
                let cfg = EngineConfig::default();
                self.save(&cfg).await?;
                Ok(cfg)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, config: &EngineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let yaml = config.to_yaml()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        // Write beside the target, then rename over it.
        let tmp = self.path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, yaml).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        info!("[Config] Saved {}", self.path.display());
        Ok(())
    }
}

/// The one swappable configuration snapshot.
///
/// Readers take an `Arc` with [`ConfigHandle::current`] and use it for the
/// whole operation, so a concurrent [`ConfigHandle::replace`] is seen either
/// entirely or not at all.
#[derive(Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Arc<EngineConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Self {
        let (tx, _) = watch::channel(Arc::new(config));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<EngineConfig> {
        self.tx.borrow().clone()
    }

    /// Swaps in `config` and returns the snapshot it replaced.
    pub fn replace(&self, config: EngineConfig) -> Arc<EngineConfig> {
        self.tx.send_replace(Arc::new(config))
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<EngineConfig>> {
        self.tx.subscribe()
    }
}
