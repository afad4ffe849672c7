//! File pollers that turn cross-process writes into media changes.
//!
//! The trigger file and the scene file are written by other processes, so
//! there is no notification channel to listen on; each file is polled for a
//! newer modification time instead.

use crate::clock::Clock;
use crate::error::{Result, SyncError};
use crate::hub::{BroadcastHub, MediaChange, SOURCE_FILE_TRIGGER, SOURCE_SCENE};
use crate::mapping::SceneMappingTable;
use crate::store::read_json;
use crate::types::{SceneName, SceneState};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;

/// Timing of a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Delay between two checks of the file
    pub interval: Duration,
    /// Delay between seeing a newer mtime and reading the file
    pub debounce: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            debounce: Duration::ZERO,
        }
    }
}

/// Remembers the newest modification time seen for one file
#[derive(Debug, Default, Clone)]
struct MtimeWatch {
    last: Option<SystemTime>,
}

impl MtimeWatch {
    /// Record `modified`, true when it is newer than anything seen before
    fn observe(&mut self, modified: SystemTime) -> bool {
        match self.last {
            Some(last) if modified <= last => false,
            _ => {
                self.last = Some(modified);
                true
            }
        }
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

async fn modified_time(path: &Path) -> Result<Option<SystemTime>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// One polled change source
#[async_trait]
pub trait ChangeSourcePoller: Send + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// File being watched
    fn path(&self) -> &Path;

    fn config(&self) -> PollerConfig;

    fn clock(&self) -> Arc<dyn Clock>;

    /// Check the file once, returning the media change it caused, if any
    async fn poll_once(&mut self) -> Result<Option<MediaChange>>;
}

/// Handle to a running polling loop
pub struct PollerHandle {
    name: &'static str,
    stop_tx: broadcast::Sender<()>,
    task_handle: tokio::task::JoinHandle<()>,
}

impl PollerHandle {
    /// Run `poller` on its own task until stopped or the handle is dropped
    pub fn spawn<P: ChangeSourcePoller>(mut poller: P) -> Self {
        let (stop_tx, mut stop_rx) = broadcast::channel(1);
        let name = poller.name();
        let config = poller.config();
        let clock = poller.clock();

        let task_handle = tokio::spawn(async move {
            tracing::info!("Started watching {} ({})", poller.path().display(), name);
            loop {
                match stop_rx.try_recv() {
                    Err(broadcast::error::TryRecvError::Empty) => {}
                    _ => break,
                }

                if let Err(e) = poller.poll_once().await {
                    tracing::error!("Error watching {}: {}", poller.path().display(), e);
                }

                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = clock.sleep(config.interval) => {}
                }
            }
            tracing::info!("Stopped watching {} ({})", poller.path().display(), name);
        });

        Self {
            name,
            stop_tx,
            task_handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        !self.task_handle.is_finished()
    }

    /// Ask the loop to stop and wait briefly for it to finish
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(2), self.task_handle).await;
    }
}

/// Consumes `trigger.txt` drops from external tools
///
/// The file holds a single media name. Every newer write is forwarded to the
/// hub once and the file is deleted afterwards.
pub struct FileTriggerPoller {
    path: PathBuf,
    hub: BroadcastHub,
    config: PollerConfig,
    clock: Arc<dyn Clock>,
    watch: MtimeWatch,
}

impl FileTriggerPoller {
    pub fn new(
        path: impl Into<PathBuf>,
        hub: BroadcastHub,
        config: PollerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            path: path.into(),
            hub,
            config,
            clock,
            watch: MtimeWatch::default(),
        }
    }

    async fn consume(&mut self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => self.watch.reset(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.watch.reset(),
            // Keep the mtime so the same write is not replayed.
            Err(e) => tracing::warn!("Could not remove trigger file: {}", e),
        }
    }
}

#[async_trait]
impl ChangeSourcePoller for FileTriggerPoller {
    fn name(&self) -> &'static str {
        "file-trigger"
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn config(&self) -> PollerConfig {
        self.config
    }

    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    async fn poll_once(&mut self) -> Result<Option<MediaChange>> {
        let modified = match modified_time(&self.path).await? {
            Some(modified) => modified,
            None => return Ok(None),
        };
        if !self.watch.observe(modified) {
            return Ok(None);
        }
        if !self.config.debounce.is_zero() {
            self.clock.sleep(self.config.debounce).await;
        }

        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!("Could not read trigger file: {}", e);
                return Ok(None);
            }
        };

        let name = content.trim();
        let outcome = if name.is_empty() {
            Ok(None)
        } else {
            tracing::info!("File trigger received: {}", name);
            match self.hub.set_current_media(name, SOURCE_FILE_TRIGGER).await {
                Ok(change) => Ok(Some(change)),
                Err(SyncError::MediaNotFound { name, .. }) => {
                    tracing::warn!("Media file '{}' not found", name);
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        };

        self.consume().await;
        outcome
    }
}

/// Watches `obs_current_scene.json` and applies scene mappings
pub struct SceneFilePoller {
    path: PathBuf,
    mappings: SceneMappingTable,
    hub: BroadcastHub,
    config: PollerConfig,
    clock: Arc<dyn Clock>,
    watch: MtimeWatch,
    last_observed: Option<SceneName>,
}

impl SceneFilePoller {
    pub fn new(
        path: impl Into<PathBuf>,
        mappings: SceneMappingTable,
        hub: BroadcastHub,
        config: PollerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            path: path.into(),
            mappings,
            hub,
            config,
            clock,
            watch: MtimeWatch::default(),
            last_observed: None,
        }
    }

    /// Treat the scene already on disk as seen
    ///
    /// After a restart the recorded scene is not replayed; only a later
    /// write with a different scene triggers a mapping.
    pub async fn seed_from_disk(mut self) -> Self {
        if let Ok(Some(modified)) = modified_time(&self.path).await {
            self.watch.observe(modified);
        }
        match read_json::<SceneState>(&self.path).await {
            Ok(Some(state)) => {
                tracing::debug!("Seeded last observed scene: {:?}", state.current_scene);
                self.last_observed = state.current_scene;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Could not seed scene watcher: {}", e),
        }
        self
    }

    /// Last scene this poller acted on
    pub fn last_observed(&self) -> Option<&str> {
        self.last_observed.as_deref()
    }

    async fn handle_scene_change(&self, scene: &str) -> Result<Option<MediaChange>> {
        let media = match self.mappings.resolve(scene).await {
            Ok(Some(media)) => media,
            Ok(None) => {
                tracing::debug!("No animation mapping found for scene '{}'", scene);
                return Ok(None);
            }
            Err(e) => {
                tracing::error!("Error loading scene mappings: {}", e);
                return Ok(None);
            }
        };

        tracing::info!("Found mapping: '{}' -> '{}'", scene, media);
        match self.hub.set_current_media(&media, SOURCE_SCENE).await {
            Ok(change) => Ok(Some(change)),
            Err(SyncError::MediaNotFound { name, .. }) => {
                tracing::warn!("Animation file '{}' for scene '{}' not found", name, scene);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ChangeSourcePoller for SceneFilePoller {
    fn name(&self) -> &'static str {
        "scene-file"
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn config(&self) -> PollerConfig {
        self.config
    }

    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    async fn poll_once(&mut self) -> Result<Option<MediaChange>> {
        let modified = match modified_time(&self.path).await? {
            Some(modified) => modified,
            None => return Ok(None),
        };
        if !self.watch.observe(modified) {
            return Ok(None);
        }
        if !self.config.debounce.is_zero() {
            self.clock.sleep(self.config.debounce).await;
        }
        tracing::debug!("Scene file change detected");

        let state = match read_json::<SceneState>(&self.path).await {
            Ok(Some(state)) => state,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!("Error reading scene file: {}", e);
                return Ok(None);
            }
        };

        let scene = match state.current_scene {
            Some(scene) if !scene.is_empty() => scene,
            _ => return Ok(None),
        };
        if self.last_observed.as_deref() == Some(scene.as_str()) {
            return Ok(None);
        }

        tracing::info!(
            "Scene change detected: '{}' -> '{}'",
            self.last_observed.as_deref().unwrap_or("none"),
            scene
        );
        self.last_observed = Some(scene.clone());
        self.handle_scene_change(&scene).await
    }
}
