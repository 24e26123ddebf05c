//! Async stream adapter over a piece iterator.
//!
//! Small blobs are split inline as the stream is polled. Large blobs are
//! split on a blocking worker thread that feeds a bounded channel, so the
//! async task never runs the splitting loop itself.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::PieceIter;
use crate::error::{Result, StoreError};

/// Pieces buffered between the worker and the consumer.
const WORKER_CHANNEL_CAPACITY: usize = 32;

/// A stream of pieces produced by a [`ContentSplitter`](super::ContentSplitter).
///
/// Yields `Err(StoreError::Worker)` once if the background worker fails.
pub struct Pieces {
    inner: Inner,
}

enum Inner {
    Inline(PieceIter),
    Worker {
        rx: mpsc::Receiver<String>,
        handle: Option<JoinHandle<()>>,
    },
}

impl Pieces {
    pub(crate) fn inline(iter: PieceIter) -> Self {
        Self {
            inner: Inner::Inline(iter),
        }
    }

    /// Moves `iter` onto a blocking worker, or keeps it inline when no
    /// runtime is available.
    pub(crate) fn spawn(iter: PieceIter) -> Self {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no tokio runtime available, splitting inline");
            return Self::inline(iter);
        };

        let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
        let handle = runtime.spawn_blocking(move || {
            for piece in iter {
                if tx.blocking_send(piece).is_err() {
                    debug!("piece consumer dropped, stopping worker");
                    break;
                }
            }
        });
        Self {
            inner: Inner::Worker {
                rx,
                handle: Some(handle),
            },
        }
    }

    /// Returns true if the pieces are produced by a background worker.
    pub fn is_offloaded(&self) -> bool {
        matches!(self.inner, Inner::Worker { .. })
    }
}

impl Stream for Pieces {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().inner {
            Inner::Inline(iter) => Poll::Ready(iter.next().map(Ok)),
            Inner::Worker { rx, handle } => match rx.poll_recv(cx) {
                Poll::Ready(Some(piece)) => Poll::Ready(Some(Ok(piece))),
                Poll::Pending => Poll::Pending,
                Poll::Ready(None) => {
                    // The channel closed; surface a worker failure before ending.
                    let Some(join) = handle.as_mut() else {
                        return Poll::Ready(None);
                    };
                    match Pin::new(join).poll(cx) {
                        Poll::Pending => Poll::Pending,
                        Poll::Ready(outcome) => {
                            *handle = None;
                            match outcome {
                                Ok(()) => Poll::Ready(None),
                                Err(e) => Poll::Ready(Some(Err(StoreError::Worker(e.to_string())))),
                            }
                        }
                    }
                }
            },
        }
    }
}
