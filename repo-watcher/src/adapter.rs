//! One-item-at-a-time consumption for cooperative host schedulers.
//!
//! Hosts such as a TUI event loop want to issue "read the next change" as a
//! discrete unit of work, run it somewhere, and get a message back. Every
//! read here is an owned `Send + 'static` future that yields exactly one
//! [`Delivery`]. The host re-issues the read after each completion and stops
//! once it sees [`Delivery::Closed`].
//!
//! The futures only use runtime-agnostic primitives, so any executor can
//! drive them, including a single-threaded one living apart from the tokio
//! runtime that runs the pipeline.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::event::ChangeNotification;

/// Result of a single read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    /// The next item.
    Item(T),

    /// The stream ended. Not an error; stop re-arming.
    Closed,
}

impl<T> Delivery<T> {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Item(item) => Some(item),
            Self::Closed => None,
        }
    }
}

/// Read side of one bus stream.
pub struct Subscription<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    closed: CancellationToken,
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
            closed: self.closed.clone(),
        }
    }
}

impl<T: Send + 'static> Subscription<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>, closed: CancellationToken) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
            closed,
        }
    }

    /// Read exactly one item.
    ///
    /// Concurrent reads are served one after another, so an item is never
    /// handed out twice. Once the bus is closed every read, pending or new,
    /// resolves to [`Delivery::Closed`].
    pub fn next(&self) -> impl Future<Output = Delivery<T>> + Send + 'static {
        let rx = Arc::clone(&self.rx);
        let closed = self.closed.clone();
        async move {
            let mut rx = tokio::select! {
                biased;
                _ = closed.cancelled() => return Delivery::Closed,
                guard = rx.lock_owned() => guard,
            };
            tokio::select! {
                biased;
                _ = closed.cancelled() => Delivery::Closed,
                item = rx.recv() => item.map_or(Delivery::Closed, Delivery::Item),
            }
        }
    }

    /// Whether the stream has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Turns a repository root into a fresh status snapshot.
///
/// Implemented by the host; typically this shells out to the VCS.
#[async_trait]
pub trait StatusProvider: Send + Sync + 'static {
    type Snapshot: Send + 'static;

    async fn status(&self, root: &Path) -> Self::Snapshot;
}

/// A notification together with the status it triggered.
#[derive(Debug, Clone)]
pub struct Refresh<S> {
    pub notification: ChangeNotification,
    pub snapshot: S,
}

/// Bridges the pipeline's two streams into re-armable reads.
#[derive(Clone)]
pub struct ConsumerAdapter {
    notifications: Subscription<ChangeNotification>,
    errors: Subscription<PipelineError>,
}

impl ConsumerAdapter {
    pub fn new(
        notifications: Subscription<ChangeNotification>,
        errors: Subscription<PipelineError>,
    ) -> Self {
        Self {
            notifications,
            errors,
        }
    }

    /// Read the next change notification.
    pub fn next_notification(
        &self,
    ) -> impl Future<Output = Delivery<ChangeNotification>> + Send + 'static {
        self.notifications.next()
    }

    /// Read the next source error.
    pub fn next_error(&self) -> impl Future<Output = Delivery<PipelineError>> + Send + 'static {
        self.errors.next()
    }

    /// Read the next notification and re-query `provider` for its root.
    pub fn next_refresh<P: StatusProvider>(
        &self,
        provider: Arc<P>,
    ) -> impl Future<Output = Delivery<Refresh<P::Snapshot>>> + Send + 'static {
        let next = self.notifications.next();
        async move {
            match next.await {
                Delivery::Item(notification) => {
                    let snapshot = provider.status(&notification.root).await;
                    Delivery::Item(Refresh {
                        notification,
                        snapshot,
                    })
                }
                Delivery::Closed => Delivery::Closed,
            }
        }
    }
}
