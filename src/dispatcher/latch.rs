//! The transport-error latch.
use std::sync::OnceLock;

use tokio::sync::Notify;

use crate::error::TransportError;

/// A write-once error cell shared by every stage.
///
/// The first transport failure wins; later writes are ignored. Stages
/// blocked on io or on a queue wait on [`tripped`][TransportLatch::tripped]
/// so a single failure unblocks the whole pipeline.
pub(crate) struct TransportLatch {
    cell: OnceLock<TransportError>,
    notify: Notify,
}

impl TransportLatch {
    pub fn new() -> Self {
        Self { cell: OnceLock::new(), notify: Notify::new() }
    }

    /// Latch `err` unless an earlier error already did.
    pub fn set(&self, err: TransportError) {
        if self.cell.set(err).is_ok() {
            self.notify.notify_waiters();
        }
    }

    pub fn get(&self) -> Option<TransportError> {
        self.cell.get().cloned()
    }

    /// Resolves once the latch is set.
    pub async fn tripped(&self) -> TransportError {
        loop {
            // register before checking, so a concurrent `set` cannot slip
            // between the check and the await
            let notified = self.notify.notified();
            if let Some(err) = self.get() {
                return err;
            }
            notified.await;
        }
    }
}
