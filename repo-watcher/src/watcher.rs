//! The repo watcher pipeline.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::adapter::{ConsumerAdapter, Subscription};
use crate::bus::EventBus;
use crate::classify;
use crate::config::WatchConfig;
use crate::debounce::Debouncer;
use crate::error::{PipelineError, Result, WatcherError};
use crate::event::{ChangeNotification, RawEvent, RawEventKind};
use crate::registry::{self, Claim, WatchRegistry};
use crate::source::{EventSource, NotifySource, RawStreams};

/// Watches a set of repository roots and emits one debounced
/// [`ChangeNotification`] per root per burst of file system activity.
///
/// The watcher owns its raw source, its roots and its timers. Consumers
/// read from [`notifications`](Self::notifications) and
/// [`errors`](Self::errors) (or the re-armable [`ConsumerAdapter`]) and
/// call [`register`](Self::register) and [`close`](Self::close).
pub struct RepoWatcher {
    shared: Arc<Shared>,

    /// Raw streams, until the worker takes them.
    streams: StdMutex<Option<RawStreams>>,

    /// Background receive loop.
    worker: StdMutex<Option<JoinHandle<()>>>,

    /// Serializes registrations.
    registering: Mutex<()>,
}

struct Shared {
    config: WatchConfig,
    state: Mutex<State>,
    bus: EventBus,

    /// Cancelled when close begins; stops the worker and every timer.
    shutdown: CancellationToken,
}

struct State {
    closed: bool,
    registry: WatchRegistry,
    debouncer: Debouncer,
}

impl RepoWatcher {
    /// Create a watcher backed by the platform's file system notifications.
    pub fn new(config: WatchConfig) -> Result<Self> {
        let (source, streams) = NotifySource::new(config.raw_capacity())?;
        Ok(Self::with_source(config, source, streams))
    }

    /// Create a watcher over an arbitrary raw source.
    pub fn with_source<S: EventSource>(config: WatchConfig, source: S, streams: RawStreams) -> Self {
        let bus = EventBus::new(config.notification_capacity(), config.error_capacity());
        let state = State {
            closed: false,
            registry: WatchRegistry::new(Box::new(source)),
            debouncer: Debouncer::new(config.debounce()),
        };

        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(state),
                bus,
                shutdown: CancellationToken::new(),
            }),
            streams: StdMutex::new(Some(streams)),
            worker: StdMutex::new(None),
            registering: Mutex::new(()),
        }
    }

    /// Start processing raw events. Calling it again is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let Some(streams) = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let handle = tokio::spawn(run(self.shared.clone(), streams));
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("Repo watcher started");
    }

    /// Track `path` as a repository root.
    ///
    /// Walks the tree and watches every directory that is not ignored, plus
    /// the metadata directory when enabled. Registering the same root twice
    /// is a no-op.
    ///
    /// Registrations run one at a time: a duplicate call made while the
    /// first is still walking returns only after the first has finished, so
    /// `Ok(())` always means the root is being watched. A concurrent
    /// [`close`](Self::close) makes an in-flight registration fail with
    /// [`WatcherError::Closed`] without watching anything.
    pub async fn register(&self, path: impl AsRef<Path>) -> Result<()> {
        let root = registry::canonical_root(path.as_ref())?;
        let _registering = self.registering.lock().await;

        {
            let mut state = self.shared.state.lock().await;
            if state.closed {
                return Err(WatcherError::Closed);
            }
            if state.registry.claim(&root)? == Claim::Duplicate {
                debug!("Repo already tracked: {}", root.display());
                return Ok(());
            }
        }

        info!("Adding repo to watch: {}", root.display());
        let plan = {
            let root = root.clone();
            let shared = self.shared.clone();
            tokio::task::spawn_blocking(move || registry::plan_walk(&root, &shared.config)).await
        };

        let mut state = self.shared.state.lock().await;
        if state.closed {
            state.registry.release(&root);
            return Err(WatcherError::Closed);
        }
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                state.registry.release(&root);
                return Err(e.into());
            }
        };
        if plan.directories.is_empty() {
            warn!("Repo {} is ignored; nothing to watch", root.display());
        }

        match state.registry.watch_tree(&root, plan) {
            Ok(added) => {
                debug!("Watching {added} paths under {}", root.display());
                Ok(())
            }
            Err(e) => {
                state.registry.release(&root);
                Err(e)
            }
        }
    }

    /// Stop watching. Pending notifications are discarded and both streams
    /// end. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let (source, cancelled) = {
            let mut state = self.shared.state.lock().await;
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            (
                state.registry.take_source(),
                state.debouncer.cancel_all(),
            )
        };
        self.shared.shutdown.cancel();

        let result = match source {
            Some(mut source) => source.close(),
            None => Ok(()),
        };
        self.shared.bus.close();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Repo watcher worker ended abnormally: {e}");
            }
        }

        info!("Repo watcher stopped ({cancelled} pending notifications dropped)");
        result
    }

    /// The notification stream.
    pub fn notifications(&self) -> Subscription<ChangeNotification> {
        self.shared.bus.notifications()
    }

    /// The error stream.
    pub fn errors(&self) -> Subscription<PipelineError> {
        self.shared.bus.errors()
    }

    /// A re-armable reader over both streams.
    pub fn consumer(&self) -> ConsumerAdapter {
        ConsumerAdapter::new(self.notifications(), self.errors())
    }

    /// Tracked roots in registration order.
    pub async fn roots(&self) -> Vec<PathBuf> {
        self.shared.state.lock().await.registry.roots().to_vec()
    }

    /// Get statistics about the watcher.
    pub async fn stats(&self) -> WatcherStats {
        let state = self.shared.state.lock().await;
        WatcherStats {
            roots: state.registry.roots().len(),
            watched_paths: state.registry.watched_len(),
            pending: state.debouncer.len(),
            closed: state.closed,
        }
    }

    /// Check if close has begun.
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }
}

impl Drop for RepoWatcher {
    fn drop(&mut self) {
        // Without an explicit close, still stop the worker and timers so the
        // shared state and the raw source get released.
        self.shared.shutdown.cancel();
        self.shared.bus.close();
    }
}

/// Statistics about the repo watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherStats {
    /// Number of tracked roots.
    pub roots: usize,

    /// Directories and metadata files handed to the raw source.
    pub watched_paths: usize,

    /// Roots with a notification pending.
    pub pending: usize,

    /// Whether close has begun.
    pub closed: bool,
}

async fn run(shared: Arc<Shared>, mut streams: RawStreams) {
    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            error = streams.errors.recv() => match error {
                Some(error) => shared.forward_error(error).await,
                None => break,
            },
            event = streams.events.recv() => match event {
                Some(event) => shared.handle_event(event).await,
                None => break,
            },
        }
    }
    debug!("Repo watcher worker exiting");
}

impl Shared {
    async fn handle_event(self: &Arc<Self>, event: RawEvent) {
        let RawEvent { kind, path } = event;

        let Some(root) = self.owner_of(&path).await else {
            trace!("No tracked repo owns {}", path.display());
            return;
        };

        let metadata = self.config.track_metadata && classify::is_metadata_file(&root, &path);
        let noise = classify::is_vcs_internal(&root, &path) || self.config.is_ignored(&path);
        if !metadata && noise {
            trace!("Ignoring {kind:?} for {}", path.display());
            return;
        }

        let new_dir = kind == RawEventKind::Create
            && !metadata
            && tokio::fs::metadata(&path)
                .await
                .is_ok_and(|m| m.is_dir());
        let watch_new_dir = new_dir
            && (!classify::is_vcs_dir(&path)
                || (self.config.track_metadata && path == classify::metadata_dir(&root)));

        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        if watch_new_dir {
            state.registry.grow(&path);
        }
        debug!("{kind:?} {} -> {}", path.display(), root.display());

        let window = state.debouncer.window();
        let timer_root = root.clone();
        state.debouncer.schedule(&root, path, |generation| {
            tokio::spawn(fire_after_window(self.clone(), timer_root, generation, window))
        });
    }

    async fn owner_of(&self, path: &Path) -> Option<PathBuf> {
        let state = self.state.lock().await;
        if state.closed {
            return None;
        }
        state.registry.owner_of(path).map(Path::to_path_buf)
    }

    async fn forward_error(&self, error: PipelineError) {
        warn!("Watch error: {error}");
        if !self.bus.publish_error(error).await {
            debug!("Dropped watch error; bus closed");
        }
    }
}

async fn fire_after_window(
    shared: Arc<Shared>,
    root: PathBuf,
    generation: u64,
    window: std::time::Duration,
) {
    tokio::select! {
        biased;
        _ = shared.shutdown.cancelled() => return,
        _ = tokio::time::sleep(window) => {}
    }

    // Room on the stream first, so the notification is committed under the
    // same lock that close takes to mark the watcher closed.
    let permit = tokio::select! {
        biased;
        _ = shared.shutdown.cancelled() => return,
        permit = shared.bus.reserve_notification() => match permit {
            Some(permit) => permit,
            None => return,
        },
    };

    let mut state = shared.state.lock().await;
    if state.closed {
        return;
    }
    let Some(path) = state.debouncer.take_fired(&root, generation) else {
        return;
    };

    debug!("Repo changed: {} ({})", root.display(), path.display());
    if !shared.bus.commit(permit, ChangeNotification::new(root, path)) {
        debug!("Dropped notification; bus closed");
    }
}
