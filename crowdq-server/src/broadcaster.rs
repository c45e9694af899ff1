//! Per-session snapshot fan-out
//!
//! Committed snapshots are sent on a `tokio::sync::broadcast` channel. A
//! subscriber that falls behind skips ahead to newer snapshots instead of
//! slowing writers down.

use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crowdq_common::SessionSnapshot;

/// Snapshot publisher of one session
#[derive(Debug, Clone)]
pub struct StateBroadcaster {
    tx: broadcast::Sender<Arc<SessionSnapshot>>,
}

impl StateBroadcaster {
    /// Create a broadcaster buffering up to `capacity` snapshots
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver a snapshot to every current subscriber
    ///
    /// Returns the number of subscribers reached. Publishing with no
    /// subscribers is not an error.
    pub fn publish(&self, snapshot: Arc<SessionSnapshot>) -> usize {
        let version = snapshot.version;
        match self.tx.send(snapshot) {
            Ok(count) => {
                debug!("Published version {} to {} subscribers", version, count);
                count
            }
            Err(_) => 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Open a stream that starts with `current`
    ///
    /// The receiver is attached before the caller reads `current`, so no
    /// snapshot committed in between can be missed; duplicates are dropped
    /// by version.
    pub fn subscribe_from(
        &self,
        receiver: broadcast::Receiver<Arc<SessionSnapshot>>,
        current: Arc<SessionSnapshot>,
    ) -> SnapshotStream {
        SnapshotStream::new(current, receiver)
    }

    /// Attach a receiver for a later [`subscribe_from`](Self::subscribe_from)
    pub fn receiver(&self) -> broadcast::Receiver<Arc<SessionSnapshot>> {
        self.tx.subscribe()
    }
}

/// Lazy sequence of session snapshots with strictly increasing versions
///
/// Ends after yielding the session's terminal snapshot, or when dropped via
/// [`unsubscribe`](Self::unsubscribe).
pub struct SnapshotStream {
    inner: Pin<Box<dyn Stream<Item = Arc<SessionSnapshot>> + Send>>,
}

impl SnapshotStream {
    fn new(current: Arc<SessionSnapshot>, receiver: broadcast::Receiver<Arc<SessionSnapshot>>) -> Self {
        let session_id = current.session_id;

        let stream = async_stream::stream! {
            let mut last_version = current.version;
            let finished = current.is_terminal();
            yield current;

            if !finished {
                let mut updates = BroadcastStream::new(receiver);
                while let Some(item) = updates.next().await {
                    match item {
                        Ok(snapshot) => {
                            if snapshot.version <= last_version {
                                continue;
                            }
                            last_version = snapshot.version;
                            let terminal = snapshot.is_terminal();
                            yield snapshot;
                            if terminal {
                                break;
                            }
                        }
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            warn!("Subscriber of session {} lagged, skipped {} snapshots", session_id, skipped);
                        }
                    }
                }
            }
        };

        Self {
            inner: Box::pin(stream),
        }
    }

    /// Stop receiving snapshots
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Stream for SnapshotStream {
    type Item = Arc<SessionSnapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
