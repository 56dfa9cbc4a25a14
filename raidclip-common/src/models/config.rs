// File: raidclip-common/src/models/config.rs

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_OBS_PORT: u16 = 4455;
pub const DEFAULT_SERVER_PORT: u16 = 8930;

/// Snapshot of every option the engine recognises.
///
/// The YAML keys are the ones the tool has always written to `config.yaml`,
/// so existing files keep loading. Any key may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Channels whose new clips are watched.
    #[serde(rename = "CHART_TARGETS")]
    pub chat_targets: Vec<String>,

    #[serde(rename = "DEBUG")]
    pub debug_mode: bool,

    #[serde(rename = "LOG_DEST")]
    pub log_dest: String,

    #[serde(rename = "OBS_IP")]
    pub obs_ip: String,

    #[serde(rename = "OBS_PORT")]
    pub obs_port: u16,

    #[serde(rename = "OBS_PASS")]
    pub obs_pass: String,

    #[serde(rename = "STOP_STREAM_AFTER_RAID")]
    pub stop_stream_after_raided: bool,

    #[serde(rename = "DELAY_TO_STOP")]
    pub delay_seconds_from_raid_to_stop: u64,

    #[serde(rename = "NEW_CLIP_INTERVAL")]
    pub new_clip_watch_interval_second: u64,

    #[serde(rename = "SERVER_PORT")]
    pub local_server_port_number: u16,

    #[serde(rename = "OVERLAY_ENABLE")]
    pub overlay_enabled: bool,

    #[serde(rename = "CLIP_PLAYER_WIDTH")]
    pub clip_player_width: u32,

    #[serde(rename = "CLIP_PLAYER_HEIGHT")]
    pub clip_player_height: u32,

    #[serde(rename = "LOG_TOP_INDENT")]
    pub log_top_indent: String,

    #[serde(rename = "LOG_USER_NAME_PREFIX")]
    pub log_user_name_prefix: String,

    /// Scene to switch to when a raid arrives, if any.
    #[serde(rename = "SCENE_ON_RAID", skip_serializing_if = "Option::is_none")]
    pub scene_on_raid: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chat_targets: Vec::new(),
            debug_mode: false,
            log_dest: ".".to_string(),
            obs_ip: String::new(),
            obs_port: DEFAULT_OBS_PORT,
            obs_pass: String::new(),
            stop_stream_after_raided: true,
            delay_seconds_from_raid_to_stop: 180,
            new_clip_watch_interval_second: 128,
            local_server_port_number: DEFAULT_SERVER_PORT,
            overlay_enabled: true,
            clip_player_width: 640,
            clip_player_height: 480,
            log_top_indent: String::new(),
            log_user_name_prefix: "@".to_string(),
            scene_on_raid: None,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        // An empty file is a valid "all defaults" config.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Self = serde_yaml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_server_port_number == 0 {
            return Err(ConfigError::Invalid("SERVER_PORT must be non-zero".into()));
        }
        if self.clip_player_width == 0 || self.clip_player_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "clip player size {}x{} must be non-zero",
                self.clip_player_width, self.clip_player_height
            )));
        }
        Ok(())
    }

    /// Host used for the control link; an empty `OBS_IP` means the local machine.
    pub fn obs_host(&self) -> &str {
        if self.obs_ip.trim().is_empty() {
            "localhost"
        } else {
            self.obs_ip.trim()
        }
    }

    /// Older config files carry `OBS_PORT: 0`, which means "not set".
    pub fn obs_port(&self) -> u16 {
        if self.obs_port == 0 {
            DEFAULT_OBS_PORT
        } else {
            self.obs_port
        }
    }

    pub fn obs_password(&self) -> Option<&str> {
        if self.obs_pass.is_empty() {
            None
        } else {
            Some(self.obs_pass.as_str())
        }
    }

    /// Whether a switch to `other` requires the control link to be re-targeted.
    pub fn endpoint_changed(&self, other: &EngineConfig) -> bool {
        self.obs_host() != other.obs_host()
            || self.obs_port() != other.obs_port()
            || self.obs_pass != other.obs_pass
    }

    /// Whether a switch to `other` requires the local HTTP listener to be restarted.
    pub fn listener_changed(&self, other: &EngineConfig) -> bool {
        self.local_server_port_number != other.local_server_port_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_partial_yaml_keeps_defaults() {
        let raw = "CHART_TARGETS:\n  - user2\n  - user3\nOBS_PORT: 4456\nDELAY_TO_STOP: 10\n";
        let cfg = EngineConfig::from_yaml(raw).unwrap();
        assert_eq!(cfg.chat_targets, vec!["user2".to_string(), "user3".to_string()]);
        assert_eq!(cfg.obs_port, 4456);
        assert_eq!(cfg.delay_seconds_from_raid_to_stop, 10);
        assert!(cfg.stop_stream_after_raided);
        assert_eq!(cfg.local_server_port_number, DEFAULT_SERVER_PORT);
        assert_eq!(cfg.clip_player_width, 640);
        assert_eq!(cfg.scene_on_raid, None);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(EngineConfig::from_yaml("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_yaml_uses_legacy_keys() {
        let yaml = EngineConfig::default().to_yaml().unwrap();
        assert!(yaml.contains("STOP_STREAM_AFTER_RAID: true"));
        assert!(yaml.contains("SERVER_PORT: 8930"));
        assert!(!yaml.contains("SCENE_ON_RAID"));
        let back = EngineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(back, EngineConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            EngineConfig::from_yaml("SERVER_PORT: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_yaml("CLIP_PLAYER_WIDTH: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_yaml("OBS_PORT: [1, 2]\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_obs_host_and_change_detection() {
        let a = EngineConfig::default();
        assert_eq!(a.obs_host(), "localhost");
        assert_eq!(a.obs_password(), None);
        let legacy = EngineConfig::from_yaml("OBS_PORT: 0\n").unwrap();
        assert_eq!(legacy.obs_port(), DEFAULT_OBS_PORT);

        let mut b = a.clone();
        b.delay_seconds_from_raid_to_stop = 1;
        assert!(!a.endpoint_changed(&b));
        assert!(!a.listener_changed(&b));
        b.overlay_enabled = false;
        assert!(!a.listener_changed(&b));

        b.obs_pass = "secret".into();
        b.local_server_port_number = 9000;
        assert!(a.endpoint_changed(&b));
        assert!(a.listener_changed(&b));
    }
}
