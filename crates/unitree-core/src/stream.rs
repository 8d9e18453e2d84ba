// ── Reactive status stream ──
//
// Subscription type for consuming session status changes.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::machine::SessionStatus;

/// A subscription to the engine's session status.
///
/// Provides both point-in-time snapshot access and change notification via
/// `changed()` or by converting to a `Stream`.
pub struct StatusStream {
    current: Arc<SessionStatus>,
    receiver: watch::Receiver<Arc<SessionStatus>>,
}

impl StatusStream {
    pub(crate) fn new(receiver: watch::Receiver<Arc<SessionStatus>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The snapshot captured at creation time or at the last `changed()`.
    pub fn current(&self) -> &Arc<SessionStatus> {
        &self.current
    }

    /// The latest snapshot.
    pub fn latest(&self) -> Arc<SessionStatus> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. `None` once the engine has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<SessionStatus>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> StatusWatchStream {
        StatusWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter yielding each new status snapshot.
pub struct StatusWatchStream {
    inner: WatchStream<Arc<SessionStatus>>,
}

impl Stream for StatusWatchStream {
    type Item = Arc<SessionStatus>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
