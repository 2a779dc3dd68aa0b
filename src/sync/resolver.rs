use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Suffix of the sidecar metadata files that sit next to every tracked asset.
pub const SIDECAR_SUFFIX: &str = ".meta";

static GUID_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^guid:\s*([0-9A-Za-z-]+)\s*$").unwrap());

/// Maps a stable id to its current relative path.
pub trait PathResolver: Send + Sync {
    /// `None` when the id no longer maps to anything.
    fn resolve(&self, id: &str) -> Option<String>;

    /// Allows the next lookup miss to rescan. Called once per sync request.
    fn refresh(&self) {}
}

/// In-memory id → path table.
#[derive(Debug, Default)]
pub struct MapResolver {
    paths: RwLock<HashMap<String, String>>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, path: impl Into<String>) {
        self.paths.write().insert(id.into(), path.into());
    }

    pub fn remove(&self, id: &str) {
        self.paths.write().remove(id);
    }
}

impl PathResolver for MapResolver {
    fn resolve(&self, id: &str) -> Option<String> {
        self.paths.read().get(id).cloned()
    }
}

/// Resolves ids from `guid:` lines in `*.meta` sidecars under a project root.
///
/// A miss rescans the tree at most once between calls to
/// [`PathResolver::refresh`].
pub struct MetaFileResolver {
    root: PathBuf,
    index: Mutex<HashMap<String, String>>,
    stale: AtomicBool,
}

impl MetaFileResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Mutex::new(HashMap::new()),
            stale: AtomicBool::new(true),
        }
    }

    /// Rescans the project and replaces the cached index.
    pub fn rebuild(&self) -> usize {
        let mut index = HashMap::new();

        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let sidecar = entry.path();
            let Some(name) = sidecar.to_str() else { continue };
            if !name.ends_with(SIDECAR_SUFFIX) {
                continue;
            }

            let contents = match std::fs::read_to_string(sidecar) {
                Ok(c) => c,
                Err(e) => {
                    warn!("Unreadable sidecar {}: {}", sidecar.display(), e);
                    continue;
                }
            };
            let Some(guid) = GUID_LINE.captures(&contents).and_then(|c| c.get(1)) else {
                continue;
            };

            let asset = PathBuf::from(&name[..name.len() - SIDECAR_SUFFIX.len()]);
            if let Some(relative) = relative_path(&asset, &self.root) {
                index.insert(guid.as_str().to_string(), relative);
            }
        }

        let count = index.len();
        debug!("Indexed {} sidecar ids under {}", count, self.root.display());
        *self.index.lock() = index;
        self.stale.store(false, Ordering::Relaxed);
        count
    }

    fn cached(&self, id: &str) -> Option<String> {
        let path = self.index.lock().get(id).cloned()?;
        self.root.join(&path).exists().then_some(path)
    }
}

impl PathResolver for MetaFileResolver {
    fn resolve(&self, id: &str) -> Option<String> {
        if let Some(path) = self.cached(id) {
            return Some(path);
        }
        // Stale or unknown: the asset may have moved since the last scan.
        if self.stale.swap(false, Ordering::Relaxed) {
            self.rebuild();
            return self.cached(id);
        }
        None
    }

    fn refresh(&self) {
        self.stale.store(true, Ordering::Relaxed);
    }
}

/// `path` relative to `root`, `/`-separated.
pub fn relative_path(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
