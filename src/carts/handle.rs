//! # Completion handles.
//!
//! Two independent handle categories:
//! - [`CartHandle`] resolves when the engine is done with one cart or command.
//! - [`ProductHandle`] resolves when the build for a key terminates.
//!
//! Both are plain futures over a `oneshot` channel. A sender dropped without
//! resolving (engine stopped, build expired) resolves the handle as cancelled,
//! so callers never poll engine state to learn an outcome.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{JoinAll, join_all};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::error::ConveyorError;

/// Terminal outcome of one placed cart or command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Processed successfully.
    Accepted,
    /// Refused by a validator; never queued.
    Rejected(ConveyorError),
    /// Failed while being processed.
    Failed(ConveyorError),
    /// Dropped unresolved (engine stopped before processing it).
    Cancelled,
}

impl Outcome {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted)
    }

    /// Returns the cause of a rejection or failure.
    pub fn error(&self) -> Option<&ConveyorError> {
        match self {
            Outcome::Rejected(e) | Outcome::Failed(e) => Some(e),
            Outcome::Accepted | Outcome::Cancelled => None,
        }
    }
}

/// Failure of a [`ProductHandle`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProductError {
    /// The build failed; carries the cause.
    #[error("build failed: {0}")]
    Failed(ConveyorError),
    /// The build expired, was cancelled, or the engine stopped first.
    #[error("build cancelled")]
    Cancelled,
}

pub(crate) type Ack = oneshot::Sender<Outcome>;
pub(crate) type Waiter<P> = oneshot::Sender<Result<P, ProductError>>;

enum Pending {
    Single(oneshot::Receiver<Outcome>),
    Joined(Pin<Box<JoinAll<CartHandle>>>),
}

/// Future resolving to the [`Outcome`] of a placed cart or command.
#[must_use = "the outcome is only observable by awaiting the handle"]
pub struct CartHandle {
    pending: Pending,
}

impl CartHandle {
    pub(crate) fn channel() -> (Ack, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                pending: Pending::Single(rx),
            },
        )
    }

    /// Returns a handle that is already resolved.
    pub(crate) fn resolved(outcome: Outcome) -> Self {
        let (tx, handle) = Self::channel();
        let _ = tx.send(outcome);
        handle
    }

    /// Returns the outcome if it is already known, otherwise the handle back.
    ///
    /// Placement rejections are always known when `place` returns.
    pub fn try_outcome(self) -> Result<Outcome, Self> {
        match self.pending {
            Pending::Single(mut rx) => match rx.try_recv() {
                Ok(outcome) => Ok(outcome),
                Err(oneshot::error::TryRecvError::Closed) => Ok(Outcome::Cancelled),
                Err(oneshot::error::TryRecvError::Empty) => Err(Self {
                    pending: Pending::Single(rx),
                }),
            },
            joined @ Pending::Joined(_) => Err(Self { pending: joined }),
        }
    }

    /// Combines several handles; resolves to the first non-accepted outcome
    /// in handle order, or `Accepted` if all were accepted.
    pub fn join(handles: Vec<CartHandle>) -> Self {
        Self {
            pending: Pending::Joined(Box::pin(join_all(handles))),
        }
    }
}

impl Future for CartHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.pending {
            Pending::Single(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                Poll::Ready(Err(_)) => Poll::Ready(Outcome::Cancelled),
                Poll::Pending => Poll::Pending,
            },
            Pending::Joined(all) => match all.as_mut().poll(cx) {
                Poll::Ready(outcomes) => Poll::Ready(
                    outcomes
                        .into_iter()
                        .find(|o| !o.is_accepted())
                        .unwrap_or(Outcome::Accepted),
                ),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl fmt::Debug for CartHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartHandle").finish_non_exhaustive()
    }
}

/// Future resolving to the product of one key.
#[must_use = "the product is only observable by awaiting the handle"]
pub struct ProductHandle<P> {
    rx: oneshot::Receiver<Result<P, ProductError>>,
}

impl<P> ProductHandle<P> {
    pub(crate) fn channel() -> (Waiter<P>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Returns a handle that is already resolved.
    pub(crate) fn resolved(result: Result<P, ProductError>) -> Self {
        let (tx, handle) = Self::channel();
        let _ = tx.send(result);
        handle
    }
}

impl<P> Future for ProductHandle<P> {
    type Output = Result<P, ProductError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ProductError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<P> fmt::Debug for ProductHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProductHandle").finish_non_exhaustive()
    }
}
