//! Raw and coalesced events.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of raw file system event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawEventKind {
    /// File or directory was created.
    Create,

    /// File contents changed.
    Write,

    /// File or directory was removed.
    Remove,

    /// File or directory was renamed.
    Rename,

    /// Permissions or other metadata changed.
    Chmod,
}

impl RawEventKind {
    /// Map a notify event kind, dropping kinds that never signal a change.
    ///
    /// Access events are discarded: status providers read the index, and
    /// reacting to those reads would feed back into another refresh.
    pub fn from_notify(kind: notify::EventKind) -> Option<Self> {
        use notify::EventKind;
        use notify::event::ModifyKind;

        match kind {
            EventKind::Create(_) => Some(Self::Create),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Rename),
            EventKind::Modify(ModifyKind::Metadata(_)) => Some(Self::Chmod),
            EventKind::Modify(_) => Some(Self::Write),
            EventKind::Remove(_) => Some(Self::Remove),
            EventKind::Access(_) => None,
            EventKind::Any | EventKind::Other => Some(Self::Write),
        }
    }
}

/// A single event from the raw source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawEventKind,
    pub path: PathBuf,
}

impl RawEvent {
    pub fn new(kind: RawEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// One coalesced notification: something under `root` changed.
///
/// `path` is the most recent path observed during the debounce window.
/// It says nothing about file contents; consumers should re-query the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// The tracked root that changed.
    pub root: PathBuf,

    /// Last path observed for the root before the window closed.
    pub path: PathBuf,

    /// When the debounce window closed.
    pub fired_at: DateTime<Utc>,
}

impl ChangeNotification {
    pub fn new(root: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            path: path.into(),
            fired_at: Utc::now(),
        }
    }

    /// Path relative to the root, for display.
    pub fn relative_path(&self) -> &Path {
        self.path.strip_prefix(&self.root).unwrap_or(&self.path)
    }
}

// Two notifications are the same change when they name the same root and
// path; `fired_at` is display only.
impl PartialEq for ChangeNotification {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.path == other.path
    }
}

impl Eq for ChangeNotification {}
