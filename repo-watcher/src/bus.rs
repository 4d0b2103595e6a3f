//! Bounded, closable output streams.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::Subscription;
use crate::error::PipelineError;
use crate::event::ChangeNotification;

struct Senders {
    notifications: mpsc::Sender<ChangeNotification>,
    errors: mpsc::Sender<PipelineError>,
}

/// Carries coalesced notifications and passthrough errors to consumers.
///
/// Sends wait for capacity when a stream is full. An item is committed to
/// its channel only while holding the lock that [`close`](EventBus::close)
/// takes, so nothing enters either stream once `close` has returned.
pub struct EventBus {
    senders: Mutex<Option<Senders>>,
    notifications: Subscription<ChangeNotification>,
    errors: Subscription<PipelineError>,
    closed: CancellationToken,
}

impl EventBus {
    pub fn new(notification_capacity: usize, error_capacity: usize) -> Self {
        let (notification_tx, notification_rx) = mpsc::channel(notification_capacity);
        let (error_tx, error_rx) = mpsc::channel(error_capacity);
        let closed = CancellationToken::new();

        Self {
            senders: Mutex::new(Some(Senders {
                notifications: notification_tx,
                errors: error_tx,
            })),
            notifications: Subscription::new(notification_rx, closed.clone()),
            errors: Subscription::new(error_rx, closed.clone()),
            closed,
        }
    }

    /// The notification stream.
    pub fn notifications(&self) -> Subscription<ChangeNotification> {
        self.notifications.clone()
    }

    /// The error stream.
    pub fn errors(&self) -> Subscription<PipelineError> {
        self.errors.clone()
    }

    /// Deliver a notification. Returns `false` if the bus closed first.
    pub async fn publish(&self, notification: ChangeNotification) -> bool {
        self.send(notification, |s| s.notifications.clone()).await
    }

    /// Deliver a source error. Returns `false` if the bus closed first.
    pub async fn publish_error(&self, error: PipelineError) -> bool {
        self.send(error, |s| s.errors.clone()).await
    }

    /// Close both streams. Returns `false` if they were already closed.
    pub fn close(&self) -> bool {
        let taken = self.lock().take();
        self.closed.cancel();
        if taken.is_some() {
            debug!("Event bus closed");
        }
        taken.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait for room on the notification stream.
    ///
    /// Returns `None` once the bus is closed. The permit holds its slot
    /// until it is committed or dropped.
    pub async fn reserve_notification(&self) -> Option<mpsc::OwnedPermit<ChangeNotification>> {
        self.reserve(|s| s.notifications.clone()).await
    }

    /// Commit `item` into a reserved slot. Returns `false` if the bus closed
    /// since the slot was reserved.
    pub fn commit<T>(&self, permit: mpsc::OwnedPermit<T>, item: T) -> bool {
        let senders = self.lock();
        if senders.is_none() {
            return false;
        }
        permit.send(item);
        true
    }

    async fn send<T: Send>(&self, item: T, pick: fn(&Senders) -> mpsc::Sender<T>) -> bool {
        match self.reserve(pick).await {
            Some(permit) => self.commit(permit, item),
            None => false,
        }
    }

    async fn reserve<T: Send>(
        &self,
        pick: fn(&Senders) -> mpsc::Sender<T>,
    ) -> Option<mpsc::OwnedPermit<T>> {
        let tx = self.sender(pick)?;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            permit = tx.reserve_owned() => permit.ok(),
        }
    }

    fn sender<T>(&self, pick: fn(&Senders) -> mpsc::Sender<T>) -> Option<mpsc::Sender<T>> {
        self.lock().as_ref().map(pick)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Senders>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
