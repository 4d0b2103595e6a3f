//! Configuration types for repo watching.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify;

/// Debounce window applied when none (or a non-positive one) is configured.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Default capacity of the notification stream.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;

/// Default capacity of the error stream.
pub const DEFAULT_ERROR_CAPACITY: usize = 8;

/// Default capacity of the raw event channel fed by the OS watcher.
pub const DEFAULT_RAW_CAPACITY: usize = 1024;

/// Caller supplied replacement for the fragment based ignore rules.
pub type IgnorePredicate = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Configuration for a [`RepoWatcher`](crate::RepoWatcher).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Debounce window in milliseconds. Zero or negative means the default.
    pub debounce_ms: i64,

    /// Always watch `.git/index` and `.git/HEAD`, bypassing the ignore rules.
    pub track_metadata: bool,

    /// Path fragments that mark noise (build output, dependency caches...).
    pub ignore_fragments: Vec<String>,

    /// Capacity of the notification stream.
    pub notification_capacity: usize,

    /// Capacity of the error stream.
    pub error_capacity: usize,

    /// Capacity of the raw event channel.
    pub raw_capacity: usize,

    /// Overrides `ignore_fragments` when set.
    #[serde(skip)]
    ignore: Option<IgnorePredicate>,
}

impl WatchConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as i64,
            track_metadata: true,
            ignore_fragments: classify::DEFAULT_IGNORE_FRAGMENTS
                .iter()
                .map(|f| (*f).to_string())
                .collect(),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            error_capacity: DEFAULT_ERROR_CAPACITY,
            raw_capacity: DEFAULT_RAW_CAPACITY,
            ignore: None,
        }
    }

    /// Set the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = i64::try_from(debounce.as_millis()).unwrap_or(i64::MAX);
        self
    }

    /// Enable or disable tracking of the VCS metadata files.
    pub fn track_metadata(mut self, enabled: bool) -> Self {
        self.track_metadata = enabled;
        self
    }

    /// Add an ignore fragment.
    pub fn ignore_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.ignore_fragments.push(fragment.into());
        self
    }

    /// Replace the ignore rules with a custom predicate.
    pub fn with_ignore<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        self.ignore = Some(Arc::new(predicate));
        self
    }

    /// Set the notification and error stream capacities.
    pub fn with_capacities(mut self, notifications: usize, errors: usize) -> Self {
        self.notification_capacity = notifications;
        self.error_capacity = errors;
        self
    }

    /// The effective debounce window.
    pub fn debounce(&self) -> Duration {
        match u64::try_from(self.debounce_ms) {
            Ok(ms) if ms > 0 => Duration::from_millis(ms),
            _ => DEFAULT_DEBOUNCE,
        }
    }

    /// Check if a path should be ignored.
    pub fn is_ignored(&self, path: &Path) -> bool {
        match &self.ignore {
            Some(predicate) => predicate(path),
            None => classify::matches_fragments(path, &self.ignore_fragments),
        }
    }

    pub(crate) fn notification_capacity(&self) -> usize {
        non_zero_or(self.notification_capacity, DEFAULT_NOTIFICATION_CAPACITY)
    }

    pub(crate) fn error_capacity(&self) -> usize {
        non_zero_or(self.error_capacity, DEFAULT_ERROR_CAPACITY)
    }

    pub(crate) fn raw_capacity(&self) -> usize {
        non_zero_or(self.raw_capacity, DEFAULT_RAW_CAPACITY)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchConfig")
            .field("debounce_ms", &self.debounce_ms)
            .field("track_metadata", &self.track_metadata)
            .field("ignore_fragments", &self.ignore_fragments)
            .field("notification_capacity", &self.notification_capacity)
            .field("error_capacity", &self.error_capacity)
            .field("raw_capacity", &self.raw_capacity)
            .field("custom_ignore", &self.ignore.is_some())
            .finish()
    }
}

fn non_zero_or(value: usize, default: usize) -> usize {
    if value == 0 { default } else { value }
}
