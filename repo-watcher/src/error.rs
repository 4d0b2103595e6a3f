//! Error types for the repo watcher.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors returned synchronously by watcher operations.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// The path cannot serve as a tracked root.
    #[error("invalid repo path {path:?}: {reason}")]
    InvalidRoot { path: PathBuf, reason: &'static str },

    /// Directory not found.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// The root nests inside, or contains, an already tracked root.
    #[error("repo {root} overlaps tracked repo {existing}")]
    RootConflict { root: PathBuf, existing: PathBuf },

    /// The watcher has been closed.
    #[error("watcher is closed")]
    Closed,

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// An error reported by the raw event source after registration.
///
/// These are delivered on the error stream and never stop the pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct PipelineError {
    /// Human readable description.
    pub message: String,

    /// Paths the source attached to the error, if any.
    pub paths: Vec<PathBuf>,
}

impl PipelineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            paths: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }
}

impl From<notify::Error> for PipelineError {
    fn from(err: notify::Error) -> Self {
        let paths = err.paths.clone();
        Self {
            message: err.to_string(),
            paths,
        }
    }
}
