// File: raidclip-common/src/models/playback.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the overlay is currently showing. At most one is live at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSession {
    /// Media URL handed to the renderers; doubles as the clip identifier.
    pub url: String,
    pub started_at: DateTime<Utc>,
    /// Seconds after which the overlay stops on its own. `None` plays to the end.
    pub duration_cap: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit stop command.
    Requested,
    /// Replaced by a newer clip.
    Superseded,
    /// A renderer reported the video ended.
    Ended,
    /// The duration cap elapsed.
    DurationCap,
}
