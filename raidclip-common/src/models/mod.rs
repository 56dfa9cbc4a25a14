// File: raidclip-common/src/models/mod.rs
pub mod clip;
pub mod config;
pub mod playback;

pub use clip::{Clip, RaidEvent};
pub use config::EngineConfig;
pub use playback::{PlaybackSession, StopReason};
