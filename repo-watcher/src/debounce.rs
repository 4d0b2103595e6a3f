//! Per-root coalescing of raw events.
//!
//! Each root is either idle or has exactly one pending entry holding the most
//! recent path and the handle of the timer that will fire it. A new event for
//! a pending root stops the old timer before starting the next one, so a
//! superseded timer can never fire. Every entry also carries a generation
//! number; a timer that woke up just as it was replaced finds a newer
//! generation in the map and claims nothing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

/// A root with a burst in progress.
#[derive(Debug)]
struct Pending {
    path: PathBuf,
    generation: u64,
    timer: JoinHandle<()>,
}

/// Coalesces events per root into delayed firings.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
    next_generation: u64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            next_generation: 0,
        }
    }

    /// The debounce window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an event for `root`, (re)starting its timer.
    ///
    /// `start_timer` receives the generation of the new entry and must
    /// return the handle of a task that later calls [`take_fired`] with it.
    /// Returns `true` when an earlier pending entry was superseded.
    ///
    /// [`take_fired`]: Debouncer::take_fired
    pub fn schedule<F>(&mut self, root: &Path, path: PathBuf, start_timer: F) -> bool
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        let generation = self.next_generation;
        self.next_generation += 1;

        match self.pending.get_mut(root) {
            Some(entry) => {
                entry.timer.abort();
                trace!(
                    "Restarting debounce for {} (generation {generation})",
                    root.display()
                );
                entry.path = path;
                entry.generation = generation;
                entry.timer = start_timer(generation);
                true
            }
            None => {
                let timer = start_timer(generation);
                self.pending.insert(
                    root.to_path_buf(),
                    Pending {
                        path,
                        generation,
                        timer,
                    },
                );
                false
            }
        }
    }

    /// Claim the path of a firing timer, returning `root` to idle.
    ///
    /// Returns `None` if the entry was superseded or cancelled since the
    /// timer was started.
    pub fn take_fired(&mut self, root: &Path, generation: u64) -> Option<PathBuf> {
        match self.pending.get(root) {
            Some(entry) if entry.generation == generation => {
                self.pending.remove(root).map(|entry| entry.path)
            }
            _ => None,
        }
    }

    /// Stop every pending timer without firing. Returns how many were
    /// cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        for (_, entry) in self.pending.drain() {
            entry.timer.abort();
        }
        count
    }

    /// Whether `root` has a pending entry.
    pub fn is_pending(&self, root: &Path) -> bool {
        self.pending.contains_key(root)
    }

    /// The path currently recorded for `root`.
    pub fn pending_path(&self, root: &Path) -> Option<&Path> {
        self.pending.get(root).map(|entry| entry.path.as_path())
    }

    /// Number of roots with a pending entry.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
