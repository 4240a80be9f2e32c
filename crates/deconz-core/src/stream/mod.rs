// ── Reactive streams ──
//
// Subscription types for consuming catalogue snapshots and per-device
// updates.

mod filter;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::{UnboundedReceiverStream, WatchStream};

use crate::model::DeviceUpdate;
use crate::store::Catalogue;

pub use filter::DeviceFilter;

// ── CatalogueStream ─────────────────────────────────────────────────

/// A subscription to catalogue snapshots.
///
/// Provides point-in-time access and change notification via
/// [`changed()`](Self::changed) or by converting to a `Stream`. Before the
/// first successful discovery there is no snapshot.
pub struct CatalogueStream {
    current: Option<Arc<Catalogue>>,
    receiver: watch::Receiver<Option<Arc<Catalogue>>>,
}

impl CatalogueStream {
    pub(crate) fn new(receiver: watch::Receiver<Option<Arc<Catalogue>>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The snapshot captured at creation (or at the last `changed()`).
    pub fn current(&self) -> Option<&Arc<Catalogue>> {
        self.current.as_ref()
    }

    /// The latest snapshot (may have changed since creation).
    pub fn latest(&self) -> Option<Arc<Catalogue>> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next snapshot. Returns `None` once the directory is gone.
    pub async fn changed(&mut self) -> Option<Arc<Catalogue>> {
        loop {
            self.receiver.changed().await.ok()?;
            let snap = self.receiver.borrow_and_update().clone();
            if let Some(snap) = snap {
                self.current = Some(Arc::clone(&snap));
                return Some(snap);
            }
        }
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    ///
    /// Yields the current snapshot first (if any), then every change.
    pub fn into_stream(self) -> CatalogueWatchStream {
        CatalogueWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by the catalogue `watch::Receiver`.
pub struct CatalogueWatchStream {
    inner: WatchStream<Option<Arc<Catalogue>>>,
}

impl Stream for CatalogueWatchStream {
    type Item = Arc<Catalogue>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Some(snap))) => return Poll::Ready(Some(snap)),
                // No catalogue yet; wait for the next change.
                Poll::Ready(Some(None)) => {}
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// ── DeviceUpdates ───────────────────────────────────────────────────

/// Receiving end of a channel subscription.
///
/// Dropping it is enough to unsubscribe: the registry prunes the entry the
/// next time the device is dispatched to.
pub struct DeviceUpdates {
    receiver: mpsc::UnboundedReceiver<DeviceUpdate>,
}

impl DeviceUpdates {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<DeviceUpdate>) -> Self {
        Self { receiver }
    }

    /// Wait for the next update. `None` after `unsubscribe`.
    pub async fn recv(&mut self) -> Option<DeviceUpdate> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<DeviceUpdate> {
        self.receiver.try_recv().ok()
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<DeviceUpdate> {
        UnboundedReceiverStream::new(self.receiver)
    }
}
