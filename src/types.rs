use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Identifier handed to every live transport client
pub type ClientId = Uuid;

/// Scene name as reported by OBS
pub type SceneName = String;

/// Kind of playable media, decided by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// HTML/CSS/JS animation page
    Animation,
    /// Video file played through the player template
    Video,
}

impl MediaKind {
    /// Wire name used in every event payload
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Animation => "animation",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of `state.json`
///
/// Unknown keys already on disk are carried through `extra` so a rewrite
/// never drops fields written by other tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaState {
    /// Media currently shown on every display
    #[serde(rename = "current_animation", default)]
    pub current_media: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MediaState {
    /// State pointing at `media`
    pub fn with_media(media: Option<String>) -> Self {
        Self {
            current_media: media,
            extra: Map::new(),
        }
    }
}

/// Contents of `obs_current_scene.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneState {
    /// Program scene last reported by OBS
    #[serde(default)]
    pub current_scene: Option<SceneName>,

    /// Local ISO-8601 timestamp of the last scene change
    #[serde(default)]
    pub last_updated: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One scene → media rule from `obs_mappings.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneMapping {
    #[serde(rename = "sceneName")]
    pub scene_name: SceneName,
    pub animation: String,
}

impl SceneMapping {
    pub fn new(scene_name: impl Into<String>, animation: impl Into<String>) -> Self {
        Self {
            scene_name: scene_name.into(),
            animation: animation.into(),
        }
    }
}

/// OBS connection settings from `obs_settings.json`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObsSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub password: String,

    /// User intent: keep the integration running
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    4455
}

fn default_enabled() -> bool {
    true
}

impl Default for ObsSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: String::new(),
            enabled: default_enabled(),
        }
    }
}

impl ObsSettings {
    /// WebSocket URL of the obs-websocket server
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

// Never print the password.
impl fmt::Debug for ObsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.password.is_empty() {
            "[EMPTY]"
        } else {
            "[REDACTED]"
        };
        f.debug_struct("ObsSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &password)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Lifecycle of the OBS connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectScheduled,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::ReconnectScheduled => "reconnect_scheduled",
        };
        f.write_str(s)
    }
}
