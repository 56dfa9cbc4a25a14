pub mod error;
pub mod models;

pub use error::{ConfigError, OrchestrationError, PlaybackError, ProviderError};
