//! Raw event sources.
//!
//! A source turns OS change notifications into [`RawEvent`]s on one bounded
//! channel and source failures into [`PipelineError`]s on another. The
//! pipeline only ever asks it to watch single paths (non-recursively) and to
//! shut down; walking trees is the registry's job.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{PipelineError, Result};
use crate::event::{RawEvent, RawEventKind};

/// Receiving ends of a raw source.
#[derive(Debug)]
pub struct RawStreams {
    pub events: mpsc::Receiver<RawEvent>,
    pub errors: mpsc::Receiver<PipelineError>,
}

/// The OS-facing half of the pipeline.
pub trait EventSource: Send + 'static {
    /// Start delivering events for `path` (a directory or a single file).
    fn watch(&mut self, path: &Path) -> Result<()>;

    /// Release the underlying handle. Called at most once.
    fn close(&mut self) -> Result<()>;
}

/// Raw source backed by the platform's recommended `notify` watcher.
pub struct NotifySource {
    watcher: Option<RecommendedWatcher>,
    watched: Vec<PathBuf>,
}

impl NotifySource {
    /// Create the OS watcher and the channels it feeds.
    pub fn new(capacity: usize) -> Result<(Self, RawStreams)> {
        let (event_tx, events) = mpsc::channel(capacity);
        let (error_tx, errors) = mpsc::channel(capacity);

        // Runs on notify's own thread, so blocking sends are fine and give
        // the OS watcher backpressure when the pipeline falls behind.
        let watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let Some(kind) = RawEventKind::from_notify(event.kind) else {
                        trace!("Dropping {:?} for {:?}", event.kind, event.paths);
                        return;
                    };
                    for path in event.paths {
                        if event_tx.blocking_send(RawEvent::new(kind, path)).is_err() {
                            debug!("Raw event receiver dropped");
                            return;
                        }
                    }
                }
                Err(e) => {
                    if error_tx.blocking_send(PipelineError::from(e)).is_err() {
                        debug!("Raw error receiver dropped");
                    }
                }
            },
        )?;

        let source = Self {
            watcher: Some(watcher),
            watched: Vec::new(),
        };
        Ok((source, RawStreams { events, errors }))
    }
}

impl EventSource for NotifySource {
    fn watch(&mut self, path: &Path) -> Result<()> {
        if let Some(ref mut w) = self.watcher {
            w.watch(path, RecursiveMode::NonRecursive)?;
            self.watched.push(path.to_path_buf());
        }
        Ok(())
    }

    /// Always succeeds: dropping a `notify` watcher cannot fail, and unwatch
    /// errors only mean the path was already gone.
    fn close(&mut self) -> Result<()> {
        let Some(mut watcher) = self.watcher.take() else {
            return Ok(());
        };
        // Paths may already be gone; unwatch failures for those are expected.
        for path in self.watched.drain(..) {
            let _ = watcher.unwatch(&path);
        }
        drop(watcher);
        Ok(())
    }
}

/// In-memory source that records watch requests and lets callers inject
/// events by hand.
///
/// Useful for hosts that want to drive the pipeline deterministically in
/// their own tests.
pub struct ManualSource {
    state: Arc<Mutex<ManualState>>,
}

/// Injection and inspection handle for a [`ManualSource`].
#[derive(Clone)]
pub struct ManualHandle {
    state: Arc<Mutex<ManualState>>,
    events: mpsc::Sender<RawEvent>,
    errors: mpsc::Sender<PipelineError>,
}

#[derive(Default)]
struct ManualState {
    watched: Vec<PathBuf>,
    closed: bool,
    fail_on: HashSet<PathBuf>,
}

impl ManualSource {
    pub fn new(capacity: usize) -> (Self, ManualHandle, RawStreams) {
        let (event_tx, events) = mpsc::channel(capacity);
        let (error_tx, errors) = mpsc::channel(capacity);
        let state = Arc::new(Mutex::new(ManualState::default()));

        let handle = ManualHandle {
            state: state.clone(),
            events: event_tx,
            errors: error_tx,
        };
        (Self { state }, handle, RawStreams { events, errors })
    }
}

impl EventSource for ManualSource {
    fn watch(&mut self, path: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.fail_on.contains(path) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot watch {}", path.display()),
            )
            .into());
        }
        state.watched.push(path.to_path_buf());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
        Ok(())
    }
}

impl ManualHandle {
    /// Inject a raw event.
    pub async fn emit(&self, kind: RawEventKind, path: impl Into<PathBuf>) {
        let _ = self.events.send(RawEvent::new(kind, path)).await;
    }

    /// Inject a raw source error.
    pub async fn fail(&self, error: PipelineError) {
        let _ = self.errors.send(error).await;
    }

    /// Make future `watch` calls for `path` fail.
    pub fn fail_watch(&self, path: impl Into<PathBuf>) {
        self.lock().fail_on.insert(path.into());
    }

    /// Every path handed to `watch`, in order, duplicates included.
    pub fn watched(&self) -> Vec<PathBuf> {
        self.lock().watched.clone()
    }

    /// Whether `close` was called on the source.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
