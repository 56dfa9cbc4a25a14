// File: raidclip-common/src/models/clip.rs

use serde::{Deserialize, Serialize};

/// A short pre-recorded video segment of a channel.
///
/// Field names serialize in the PascalCase shape the overlay UI and the
/// command boundary exchange (`Id`, `Url`, `ViewCount`, ...).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Clip {
    pub id: String,
    pub url: String,
    pub title: String,
    pub thumbnail: String,
    pub view_count: u64,
    /// Length in seconds.
    pub duration: f64,
    /// Direct media URL; empty until resolved.
    #[serde(default)]
    pub mp4: String,
}

impl Clip {
    /// Only clips with a resolved media URL can be handed to the overlay.
    pub fn is_playable(&self) -> bool {
        !self.mp4.trim().is_empty()
    }
}

/// Another broadcaster's audience arriving, together with that broadcaster's
/// candidate clips (possibly none).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RaidEvent {
    pub from: String,
    #[serde(default)]
    pub clips: Vec<Clip>,
}

impl RaidEvent {
    pub fn new(from: impl Into<String>, clips: Vec<Clip>) -> Self {
        Self {
            from: from.into(),
            clips,
        }
    }

    /// Highest `view_count` among playable clips, first one wins on ties.
    pub fn select_clip(&self) -> Option<&Clip> {
        self.clips
            .iter()
            .filter(|c| c.is_playable())
            .fold(None, |best: Option<&Clip>, c| match best {
                Some(b) if b.view_count >= c.view_count => Some(b),
                _ => Some(c),
            })
    }
}
