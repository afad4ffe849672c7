//! Durable state files.
//!
//! Every write goes to a sibling `.tmp` file which is then renamed over the
//! target, so a reader in this or any other process sees either the old or
//! the new document and never a truncated one.

use crate::error::{Result, SyncError};
use crate::types::{MediaState, SceneState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

/// Owner of `state.json` and `obs_current_scene.json`
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state_file: PathBuf,
    scene_file: PathBuf,
    default_media: Option<String>,
    cache: Mutex<Option<CachedState>>,
    /// Serializes writers; readers never take it
    write_lock: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
struct CachedState {
    modified: Option<SystemTime>,
    state: MediaState,
}

impl StateStore {
    /// Create a store over the given media and scene files
    ///
    /// `default_media` is written when `state.json` is missing or unreadable.
    pub fn new(
        state_file: impl Into<PathBuf>,
        scene_file: impl Into<PathBuf>,
        default_media: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state_file: state_file.into(),
                scene_file: scene_file.into(),
                default_media,
                cache: Mutex::new(None),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.inner.state_file
    }

    pub fn scene_file(&self) -> &Path {
        &self.inner.scene_file
    }

    /// Create `state.json` with the default media if it does not exist yet
    pub async fn ensure_state_file(&self) -> Result<()> {
        if tokio::fs::metadata(&self.inner.state_file).await.is_ok() {
            return Ok(());
        }
        let _guard = self.inner.write_lock.lock().await;
        self.write_default().await.map(|_| ())
    }

    /// Current media state
    ///
    /// Served from memory while the file's modification time is unchanged,
    /// reloaded otherwise. A missing or corrupt file is replaced with the
    /// default state.
    pub async fn media_state(&self) -> Result<MediaState> {
        let modified = match tokio::fs::metadata(&self.inner.state_file).await {
            Ok(meta) => meta.modified().ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let _guard = self.inner.write_lock.lock().await;
                return self.write_default().await;
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(cached) = self.cached() {
            if cached.modified.is_some() && cached.modified == modified {
                return Ok(cached.state);
            }
        }

        match read_json::<MediaState>(&self.inner.state_file).await {
            Ok(Some(state)) => {
                self.set_cache(modified, state.clone());
                Ok(state)
            }
            Ok(None) => {
                let _guard = self.inner.write_lock.lock().await;
                self.write_default().await
            }
            Err(SyncError::Json(e)) => {
                tracing::warn!(
                    "Corrupt state file {}, resetting: {}",
                    self.inner.state_file.display(),
                    e
                );
                let _guard = self.inner.write_lock.lock().await;
                self.write_default().await
            }
            Err(e) => Err(e),
        }
    }

    /// Name of the media currently playing
    pub async fn current_media(&self) -> Result<Option<String>> {
        Ok(self.media_state().await?.current_media)
    }

    /// Point the state at `media` and return the previous value
    pub async fn set_media(&self, media: Option<String>) -> Result<Option<String>> {
        let mut state = self.media_state().await?;
        let _guard = self.inner.write_lock.lock().await;

        let previous = std::mem::replace(&mut state.current_media, media);
        write_json_atomic(&self.inner.state_file, &state).await?;

        let modified = file_modified(&self.inner.state_file).await;
        self.set_cache(modified, state);
        Ok(previous)
    }

    /// Scene file contents, `None` if OBS never reported a scene
    pub async fn scene_state(&self) -> Result<Option<SceneState>> {
        read_json(&self.inner.scene_file).await
    }

    /// Record a new program scene
    ///
    /// Fields already on disk that this store does not know about are kept.
    pub async fn update_scene(&self, scene: &str) -> Result<SceneState> {
        let scene = scene.trim();
        if scene.is_empty() {
            return Err(SyncError::MalformedEvent(
                "scene name is empty".to_string(),
            ));
        }

        let _guard = self.inner.write_lock.lock().await;

        let mut state = match read_json::<SceneState>(&self.inner.scene_file).await {
            Ok(Some(state)) => state,
            Ok(None) => SceneState::default(),
            Err(e) => {
                tracing::warn!("Could not read existing scene file: {}", e);
                SceneState::default()
            }
        };

        state.current_scene = Some(scene.to_string());
        state.last_updated = Some(local_timestamp());

        write_json_atomic(&self.inner.scene_file, &state).await?;
        tracing::debug!("Scene state saved: {}", scene);
        Ok(state)
    }

    /// Forget the recorded scene
    pub async fn clear_scene(&self) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        match tokio::fs::remove_file(&self.inner.scene_file).await {
            Ok(()) => {
                tracing::info!("Cleared persistent scene data file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::Persistence {
                path: self.inner.scene_file.clone(),
                source: e,
            }),
        }
    }

    // Callers hold `write_lock`.
    async fn write_default(&self) -> Result<MediaState> {
        let state = MediaState::with_media(self.inner.default_media.clone());
        write_json_atomic(&self.inner.state_file, &state).await?;
        let modified = file_modified(&self.inner.state_file).await;
        self.set_cache(modified, state.clone());
        Ok(state)
    }

    fn cached(&self) -> Option<CachedState> {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_cache(&self, modified: Option<SystemTime>, state: MediaState) {
        *self
            .inner
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(CachedState { modified, state });
    }
}

/// Local time in the `YYYY-MM-DDTHH:MM:SS.ffffff` form used by the scene file
pub(crate) fn local_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

async fn file_modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|meta| meta.modified().ok())
}

/// Read and parse a JSON file, `Ok(None)` when it does not exist
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Write `value` as pretty JSON through a temp file and rename
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let persistence = |source| SyncError::Persistence {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(persistence)?;
        }
    }

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &json).await.map_err(persistence)?;
    tokio::fs::rename(&tmp, path).await.map_err(persistence)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> StateStore {
        StateStore::new(
            dir.join("state.json"),
            dir.join("config").join("obs_current_scene.json"),
            Some("anim1.html".to_string()),
        )
    }

    #[tokio::test]
    async fn first_read_writes_default_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        assert_eq!(store.current_media().await.unwrap().as_deref(), Some("anim1.html"));
        assert!(dir.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn set_media_returns_previous_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let previous = store.set_media(Some("clip.mp4".to_string())).await.unwrap();
        assert_eq!(previous.as_deref(), Some("anim1.html"));

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("state.json")).unwrap()).unwrap();
        assert_eq!(raw["current_animation"], "clip.mp4");
        assert!(!dir.path().join("state.tmp").exists());
    }

    #[tokio::test]
    async fn external_edit_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.ensure_state_file().await.unwrap();
        let _ = store.current_media().await.unwrap();

        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"current_animation":"other.html"}"#).unwrap();
        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(store.current_media().await.unwrap().as_deref(), Some("other.html"));
    }

    #[tokio::test]
    async fn corrupt_state_resets_to_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("state.json"), "{not json").unwrap();
        let store = store_in(dir.path());

        assert_eq!(store.current_media().await.unwrap().as_deref(), Some("anim1.html"));
    }

    #[tokio::test]
    async fn update_scene_merges_with_existing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let scene_path = dir.path().join("config").join("obs_current_scene.json");
        std::fs::create_dir_all(scene_path.parent().unwrap()).unwrap();
        std::fs::write(
            &scene_path,
            r#"{"current_scene":"Old","last_updated":null,"scene_list":["Old","BRB"]}"#,
        )
        .unwrap();
        let store = store_in(dir.path());

        let state = store.update_scene("  BRB ").await.unwrap();
        assert_eq!(state.current_scene.as_deref(), Some("BRB"));
        assert!(state.last_updated.is_some());

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&scene_path).unwrap()).unwrap();
        assert_eq!(raw["current_scene"], "BRB");
        assert_eq!(raw["scene_list"], serde_json::json!(["Old", "BRB"]));
    }

    #[tokio::test]
    async fn update_scene_rejects_blank_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let err = store.update_scene("   ").await.unwrap_err();
        assert!(matches!(err, SyncError::MalformedEvent(_)));
        assert!(store.scene_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_scene_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.update_scene("Live").await.unwrap();

        store.clear_scene().await.unwrap();
        store.clear_scene().await.unwrap();
        assert!(store.scene_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn readers_never_observe_partial_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.ensure_state_file().await.unwrap();
        let path = dir.path().join("state.json");

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let name = if i % 2 == 0 { "clip.mp4" } else { "anim1.html" };
                    store.set_media(Some(name.to_string())).await.unwrap();
                }
            })
        };

        let reader = tokio::spawn(async move {
            for _ in 0..500 {
                let bytes = tokio::fs::read(&path).await.unwrap();
                let state: MediaState = serde_json::from_slice(&bytes).unwrap();
                let media = state.current_media.unwrap();
                assert!(media == "clip.mp4" || media == "anim1.html");
                tokio::task::yield_now().await;
            }
        });

        writer.await.unwrap();
        reader.await.unwrap();
    }
}
