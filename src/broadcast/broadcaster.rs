//! Frame broadcaster implementation
//!
//! Holds the live set of subscriber channels and fans published frames out
//! to them without ever blocking the producer.
//!
//! Each subscriber owns a single slot (`tokio::sync::watch`). Publishing
//! overwrites the slot, so a subscriber that falls behind silently loses the
//! older unconsumed frame and always reads the freshest one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::stats::BroadcastStats;

use super::frame::Frame;
use super::subscription::Subscription;

/// Live set: subscription id to the sending side of its single-slot channel.
/// `None` once the broadcaster has been shut down.
type LiveSet = Option<HashMap<u64, watch::Sender<Option<Frame>>>>;

/// Single-producer, many-consumer distribution point for the latest frame
///
/// Share it as `Arc<FrameBroadcaster>` between the producer and every
/// connection handler. All mutation of the live set happens under one lock,
/// which is only ever held for non-blocking work.
pub struct FrameBroadcaster {
    live: Mutex<LiveSet>,

    next_subscriber_id: AtomicU64,
    next_sequence: AtomicU64,

    /// Mirror of the live set size, readable without the lock
    subscriber_count: AtomicUsize,

    frames_published: AtomicU64,
}

impl FrameBroadcaster {
    /// Create a new, open broadcaster
    pub fn new() -> Self {
        Self {
            live: Mutex::new(Some(HashMap::new())),
            next_subscriber_id: AtomicU64::new(1),
            next_sequence: AtomicU64::new(1),
            subscriber_count: AtomicUsize::new(0),
            frames_published: AtomicU64::new(0),
        }
    }

    // Every critical section leaves the map consistent, so a panic elsewhere
    // while holding the lock does not invalidate it.
    fn lock(&self) -> MutexGuard<'_, LiveSet> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscriber
    ///
    /// Never fails. After shutdown the returned subscription is not added to
    /// the live set and its channel is already closed, so the first `recv`
    /// returns `None` immediately.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = watch::channel(None);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);

        let registered = {
            let mut live = self.lock();
            match live.as_mut() {
                Some(subscribers) => {
                    subscribers.insert(id, tx);
                    self.subscriber_count
                        .store(subscribers.len(), Ordering::Relaxed);
                    true
                }
                // tx dropped here: channel closed before anyone reads it
                None => false,
            }
        };

        if registered {
            tracing::debug!(
                subscriber = id,
                subscribers = self.active_subscriber_count(),
                "Subscriber added"
            );
        } else {
            tracing::debug!(subscriber = id, "Subscribe after shutdown, channel closed");
        }

        Subscription::new(id, rx, Arc::clone(self))
    }

    /// Unregister a subscriber and close its channel
    ///
    /// Idempotent: a second call, or a call after shutdown, does nothing.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.remove(subscription.id());
    }

    /// Remove a subscriber by id. Returns whether it was still registered.
    pub(super) fn remove(&self, id: u64) -> bool {
        let removed = {
            let mut live = self.lock();
            match live.as_mut() {
                Some(subscribers) => {
                    let removed = subscribers.remove(&id).is_some();
                    self.subscriber_count
                        .store(subscribers.len(), Ordering::Relaxed);
                    removed
                }
                None => false,
            }
        };

        if removed {
            tracing::debug!(
                subscriber = id,
                subscribers = self.active_subscriber_count(),
                "Subscriber removed"
            );
        }

        removed
    }

    /// Publish a frame to every live subscriber
    ///
    /// Never blocks. A subscriber that has not consumed its previous frame
    /// only ever sees this newer one. Returns the number of subscribers the
    /// frame was handed to, or `StreamClosed` after shutdown.
    pub fn publish(&self, data: impl Into<Bytes>) -> Result<usize> {
        let live = self.lock();
        let subscribers = live.as_ref().ok_or(Error::StreamClosed)?;

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::new(sequence, data.into());

        for tx in subscribers.values() {
            tx.send_replace(Some(frame.clone()));
        }
        let delivered = subscribers.len();
        drop(live);

        self.frames_published.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(
            sequence = sequence,
            size = frame.len(),
            subscribers = delivered,
            "Frame published"
        );

        Ok(delivered)
    }

    /// Number of live subscribers
    ///
    /// Best-effort snapshot; may be stale against concurrent
    /// subscribe/unsubscribe.
    pub fn active_subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    /// Check if the broadcaster has been shut down
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Close every subscriber channel and refuse further publishing
    ///
    /// A second call is a no-op and also returns `Ok(())`.
    pub fn shutdown(&self) -> Result<()> {
        let closed = self.lock().take();

        match closed {
            Some(subscribers) => {
                let count = subscribers.len();
                // Dropping the senders closes each channel exactly once
                drop(subscribers);
                self.subscriber_count.store(0, Ordering::Relaxed);
                tracing::warn!(subscribers = count, "Closing stream");
            }
            None => {
                tracing::debug!("Stream already closed");
            }
        }

        Ok(())
    }

    /// Wait for the next published frame
    ///
    /// Subscribes, waits for exactly one frame and unsubscribes again. A
    /// channel closed before a frame arrives yields `StreamClosed`.
    pub async fn current(self: &Arc<Self>) -> Result<Frame> {
        let mut subscription = self.subscribe();
        subscription.recv().await.ok_or(Error::StreamClosed)
    }

    /// Snapshot of broadcaster counters
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            subscribers: self.active_subscriber_count(),
            closed: self.is_closed(),
        }
    }
}

impl Default for FrameBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBroadcaster")
            .field("subscribers", &self.active_subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
