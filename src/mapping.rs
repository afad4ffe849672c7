//! Scene → media rules.

use crate::error::Result;
use crate::store::{read_json, write_json_atomic};
use crate::types::SceneMapping;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// First rule whose scene name matches `scene` exactly
///
/// Matching is case-sensitive and order-dependent. `None` means the scene
/// has no rule and the current media must be left alone.
pub fn resolve<'a>(scene: &str, mappings: &'a [SceneMapping]) -> Option<&'a str> {
    mappings
        .iter()
        .find(|m| m.scene_name == scene)
        .map(|m| m.animation.as_str())
}

/// `obs_mappings.json` is either a bare array or `{"mappings": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum MappingFile {
    List(Vec<SceneMapping>),
    Wrapped {
        #[serde(default)]
        mappings: Vec<SceneMapping>,
    },
}

/// Mapping rules backed by `obs_mappings.json`
///
/// The file is re-read on every [`load`](Self::load) because the admin
/// surface rewrites it wholesale at any time.
#[derive(Debug, Clone)]
pub struct SceneMappingTable {
    path: PathBuf,
}

impl SceneMappingTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current rules, empty when the file does not exist
    pub async fn load(&self) -> Result<Vec<SceneMapping>> {
        let mappings = match read_json::<MappingFile>(&self.path).await? {
            Some(MappingFile::List(list)) => list,
            Some(MappingFile::Wrapped { mappings }) => mappings,
            None => {
                tracing::debug!("Scene mappings file not found");
                Vec::new()
            }
        };
        tracing::debug!("Loaded {} scene mappings", mappings.len());
        Ok(mappings)
    }

    /// Look `scene` up in the rules currently on disk
    pub async fn resolve(&self, scene: &str) -> Result<Option<String>> {
        let mappings = self.load().await?;
        Ok(resolve(scene, &mappings).map(str::to_string))
    }

    /// Replace every rule
    pub async fn save(&self, mappings: &[SceneMapping]) -> Result<()> {
        write_json_atomic(&self.path, &mappings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<SceneMapping> {
        vec![
            SceneMapping::new("Gaming", "anim1.html"),
            SceneMapping::new("BRB", "anim3.html"),
            SceneMapping::new("BRB", "shadowed.html"),
        ]
    }

    #[test]
    fn first_match_wins() {
        assert_eq!(resolve("BRB", &table()), Some("anim3.html"));
    }

    #[test]
    fn match_is_case_sensitive() {
        assert_eq!(resolve("brb", &table()), None);
        assert_eq!(resolve("gaming", &table()), None);
    }

    #[test]
    fn empty_table_resolves_nothing() {
        assert_eq!(resolve("BRB", &[]), None);
    }

    #[tokio::test]
    async fn loads_bare_and_wrapped_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs_mappings.json");
        let table = SceneMappingTable::new(&path);

        std::fs::write(&path, r#"[{"sceneName":"BRB","animation":"anim3.html"}]"#).unwrap();
        assert_eq!(table.resolve("BRB").await.unwrap().as_deref(), Some("anim3.html"));

        std::fs::write(
            &path,
            r#"{"mappings":[{"sceneName":"Live","animation":"clip.mp4"}]}"#,
        )
        .unwrap();
        assert_eq!(table.resolve("Live").await.unwrap().as_deref(), Some("clip.mp4"));
        assert_eq!(table.resolve("BRB").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_file_is_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = SceneMappingTable::new(dir.path().join("absent.json"));
        assert!(table.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let table = SceneMappingTable::new(dir.path().join("config").join("obs_mappings.json"));
        table.save(&[SceneMapping::new("Intro", "anim2.html")]).await.unwrap();

        let raw = std::fs::read_to_string(table.path()).unwrap();
        assert!(raw.contains("\"sceneName\""));
        assert_eq!(table.resolve("Intro").await.unwrap().as_deref(), Some("anim2.html"));
    }
}
