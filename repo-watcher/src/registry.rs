//! Tracked roots and the set of paths handed to the raw source.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::classify;
use crate::config::WatchConfig;
use crate::error::{Result, WatcherError};
use crate::source::EventSource;

/// Outcome of claiming a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The root was not tracked before.
    New,

    /// The root is already tracked; nothing to do.
    Duplicate,
}

/// What a registration walk found on disk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkPlan {
    /// Directories to watch, parents before children, root first.
    pub directories: Vec<PathBuf>,

    /// Directory holding the metadata files, when they exist and
    /// metadata tracking is on.
    pub metadata_dir: Option<PathBuf>,
}

/// Owns the tracked roots, the watched paths and the raw source handle.
pub struct WatchRegistry {
    /// Tracked roots in registration order.
    roots: Vec<PathBuf>,

    /// Watched path -> owning root.
    watched: HashMap<PathBuf, PathBuf>,

    /// Raw source; `None` once released.
    source: Option<Box<dyn EventSource>>,
}

impl WatchRegistry {
    pub fn new(source: Box<dyn EventSource>) -> Self {
        Self {
            roots: Vec::new(),
            watched: HashMap::new(),
            source: Some(source),
        }
    }

    /// Tracked roots in registration order.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Find the root owning `path`.
    pub fn owner_of(&self, path: &Path) -> Option<&Path> {
        classify::owner_of(path, &self.roots)
    }

    /// Whether `path` has been handed to the raw source.
    pub fn is_watched(&self, path: &Path) -> bool {
        self.watched.contains_key(path)
    }

    /// Number of watched paths across all roots.
    pub fn watched_len(&self) -> usize {
        self.watched.len()
    }

    /// Add `root` to the tracked set.
    ///
    /// Fails if `root` is a strict ancestor or descendant of a tracked root.
    pub fn claim(&mut self, root: &Path) -> Result<Claim> {
        for existing in &self.roots {
            if existing == root {
                return Ok(Claim::Duplicate);
            }
            if root.starts_with(existing) || existing.starts_with(root) {
                return Err(WatcherError::RootConflict {
                    root: root.to_path_buf(),
                    existing: existing.clone(),
                });
            }
        }
        self.roots.push(root.to_path_buf());
        Ok(Claim::New)
    }

    /// Drop a freshly claimed root whose registration failed.
    pub fn release(&mut self, root: &Path) {
        self.roots.retain(|r| r != root);
        self.watched.retain(|_, owner| owner != root);
    }

    /// Hand the walked tree of `root` to the raw source.
    ///
    /// Failing to watch the root directory itself is an error. Failures on
    /// anything below it are logged and skipped. Returns the number of new
    /// watches.
    pub fn watch_tree(&mut self, root: &Path, plan: WalkPlan) -> Result<usize> {
        let mut added = 0;
        for dir in plan.directories.iter().chain(plan.metadata_dir.iter()) {
            match self.watch_path(root, dir) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) if dir == root => return Err(e),
                Err(e) => warn!("Failed to watch {}: {e}", dir.display()),
            }
        }
        Ok(added)
    }

    /// Watch a directory that appeared after registration.
    ///
    /// Only directories below a tracked root are added. Returns whether a
    /// new watch was created.
    pub fn grow(&mut self, dir: &Path) -> bool {
        let Some(root) = self.owner_of(dir).map(Path::to_path_buf) else {
            return false;
        };
        match self.watch_path(&root, dir) {
            Ok(added) => {
                if added {
                    debug!("Watching new directory: {}", dir.display());
                }
                added
            }
            Err(e) => {
                warn!("Failed to watch new directory {}: {e}", dir.display());
                false
            }
        }
    }

    /// Take the raw source out for shutdown.
    pub fn take_source(&mut self) -> Option<Box<dyn EventSource>> {
        self.source.take()
    }

    fn watch_path(&mut self, root: &Path, path: &Path) -> Result<bool> {
        if self.watched.contains_key(path) {
            return Ok(false);
        }
        let Some(source) = self.source.as_mut() else {
            return Err(WatcherError::Closed);
        };
        source.watch(path)?;
        self.watched.insert(path.to_path_buf(), root.to_path_buf());
        Ok(true)
    }
}

/// Validate and canonicalize a candidate root.
pub fn canonical_root(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(WatcherError::InvalidRoot {
            path: path.to_path_buf(),
            reason: "empty path",
        });
    }

    let root = match std::fs::canonicalize(path) {
        Ok(root) => root,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(WatcherError::DirectoryNotFound(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let is_fs_root = root
        .components()
        .all(|c| matches!(c, Component::RootDir | Component::Prefix(_)));
    if is_fs_root {
        return Err(WatcherError::InvalidRoot {
            path: root,
            reason: "filesystem root",
        });
    }

    if !root.is_dir() {
        return Err(WatcherError::InvalidRoot {
            path: root,
            reason: "not a directory",
        });
    }

    Ok(root)
}

/// Walk `root` and collect everything registration should watch.
///
/// Blocking; run it off the async threads. Unreadable entries are skipped.
pub fn plan_walk(root: &Path, config: &WatchConfig) -> WalkPlan {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            let path = entry.path();
            !classify::is_vcs_dir(path) && !config.is_ignored(path)
        });

    let directories = walker
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                trace!("Skipping unreadable entry: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .map(walkdir::DirEntry::into_path)
        .collect();

    let has_metadata = config.track_metadata
        && classify::metadata_files(root).iter().any(|p| p.is_file());
    let metadata_dir = has_metadata.then(|| classify::metadata_dir(root));

    WalkPlan {
        directories,
        metadata_dir,
    }
}
