use crate::poller::PollerConfig;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Default pub/sub port; the raw protocol listens one above it
pub const DEFAULT_PORT: u16 = 8080;

/// Media shown when no state file exists yet
pub const DEFAULT_MEDIA: &str = "anim1.html";

/// Runtime configuration
///
/// Directory layout under `base_dir`:
///
/// ```text
/// animations/            html animations
/// videos/                video files
/// data/state.json        current media
/// data/trigger.txt       file trigger
/// data/config/           OBS settings, mappings, current scene
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub data_dir: PathBuf,
    pub animations_dir: PathBuf,
    pub videos_dir: PathBuf,
    pub pubsub_addr: SocketAddr,
    pub raw_addr: SocketAddr,
    pub poll: PollerConfig,
    pub default_media: Option<String>,
}

impl Config {
    /// Standard layout under `base_dir`, listening on `host:port` and
    /// `host:port+1`
    pub fn new(base_dir: impl Into<PathBuf>, host: IpAddr, port: u16) -> Self {
        let base_dir = base_dir.into();
        Self {
            data_dir: base_dir.join("data"),
            animations_dir: base_dir.join("animations"),
            videos_dir: base_dir.join("videos"),
            base_dir,
            pubsub_addr: SocketAddr::new(host, port),
            raw_addr: SocketAddr::new(host, port.saturating_add(1)),
            poll: PollerConfig::default(),
            default_media: Some(DEFAULT_MEDIA.to_string()),
        }
    }

    pub fn with_poll(mut self, poll: PollerConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn config_dir(&self) -> PathBuf {
        self.data_dir.join("config")
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn trigger_file(&self) -> PathBuf {
        self.data_dir.join("trigger.txt")
    }

    pub fn scene_file(&self) -> PathBuf {
        self.config_dir().join("obs_current_scene.json")
    }

    pub fn mappings_file(&self) -> PathBuf {
        self.config_dir().join("obs_mappings.json")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir().join("obs_settings.json")
    }

    /// Create every directory the service writes to
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.data_dir.clone(),
            self.config_dir(),
            self.animations_dir.clone(),
            self.videos_dir.clone(),
        ] {
            create_dir(&dir).await?;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(".", IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT)
    }
}

async fn create_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        std::io::Error::new(e.kind(), format!("{}: {}", dir.display(), e))
    })
}
