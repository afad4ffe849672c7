//! Playable media known to the system.

use crate::types::MediaKind;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// File extensions served as animation pages
pub const HTML_EXTENSIONS: &[&str] = &["html", "htm"];

/// File extensions served through the video player
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "ogg", "avi", "mov", "mkv"];

/// Source of valid media names
///
/// The hub only ever asks two questions: what kind is this name, and what
/// names exist at all. Implementations may block on the filesystem; the hub
/// calls them from the blocking pool.
pub trait MediaCatalog: Send + Sync + 'static {
    /// Kind of `name`, `None` if the catalog does not contain it
    fn lookup(&self, name: &str) -> Option<MediaKind>;

    /// Every animation name, sorted
    fn animations(&self) -> Vec<String>;

    /// Every video name, sorted
    fn videos(&self) -> Vec<String>;

    /// Every media name, sorted
    fn all_media(&self) -> Vec<String> {
        let mut all = self.animations();
        all.extend(self.videos());
        all.sort();
        all
    }
}

/// True when `name` has a video extension
pub fn is_video_file(name: &str) -> bool {
    has_extension(Path::new(name), VIDEO_EXTENSIONS)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Catalog backed by an animations directory and a videos directory
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    animations_dir: PathBuf,
    videos_dir: PathBuf,
}

impl DirectoryCatalog {
    pub fn new(animations_dir: impl Into<PathBuf>, videos_dir: impl Into<PathBuf>) -> Self {
        Self {
            animations_dir: animations_dir.into(),
            videos_dir: videos_dir.into(),
        }
    }

    fn list(dir: &Path, extensions: &[&str]) -> Vec<String> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let names: BTreeSet<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .filter(|path| has_extension(path, extensions))
            .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
            .collect();
        names.into_iter().collect()
    }
}

/// Plain file name with no directory components
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

impl MediaCatalog for DirectoryCatalog {
    fn lookup(&self, name: &str) -> Option<MediaKind> {
        if !is_plain_name(name) {
            return None;
        }
        if self.animations_dir.join(name).is_file() {
            return Some(MediaKind::Animation);
        }
        if self.videos_dir.join(name).is_file() {
            return Some(MediaKind::Video);
        }
        None
    }

    fn animations(&self) -> Vec<String> {
        Self::list(&self.animations_dir, HTML_EXTENSIONS)
    }

    fn videos(&self) -> Vec<String> {
        Self::list(&self.videos_dir, VIDEO_EXTENSIONS)
    }
}
