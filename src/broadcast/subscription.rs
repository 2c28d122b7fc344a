//! Subscriber handle
//!
//! A `Subscription` owns the receiving side of a single-slot channel. The
//! sending side lives only in the broadcaster's live set, so the channel is
//! closed exclusively by the broadcaster (on unsubscribe or shutdown).

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Error, Result};

use super::broadcaster::FrameBroadcaster;
use super::frame::Frame;

/// Handle for one registered consumer
///
/// Dropping the handle unregisters it from the broadcaster.
pub struct Subscription {
    id: u64,
    rx: watch::Receiver<Option<Frame>>,
    broadcaster: Arc<FrameBroadcaster>,
}

impl Subscription {
    pub(super) fn new(
        id: u64,
        rx: watch::Receiver<Option<Frame>>,
        broadcaster: Arc<FrameBroadcaster>,
    ) -> Self {
        Self {
            id,
            rx,
            broadcaster,
        }
    }

    /// Identity of this subscription within the broadcaster
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next frame
    ///
    /// Returns the most recent frame not yet seen by this subscription.
    /// Returns `None` once the channel has been closed by `unsubscribe` or
    /// `shutdown`; a frame published before the close is still returned first.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }

    /// Take the pending frame without waiting
    ///
    /// `Ok(None)` means nothing new has been published since the last read;
    /// `Err(StreamClosed)` means the channel was closed.
    pub fn try_recv(&mut self) -> Result<Option<Frame>> {
        match self.rx.has_changed() {
            Ok(true) => Ok(self.rx.borrow_and_update().clone()),
            Ok(false) => Ok(None),
            Err(_) => Err(Error::StreamClosed),
        }
    }

    /// Whether the broadcaster has closed this subscription's channel
    pub fn is_closed(&self) -> bool {
        self.rx.has_changed().is_err()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.remove(self.id);
    }
}
