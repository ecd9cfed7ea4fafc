//! The `Receiver` capability and its extensions.
//!
//! A `Receiver` is split into two phases, `ready` and `consume`, precisely so
//! that [`crate::select`] can await readiness on a heterogeneous set of
//! receivers and commit to exactly one of them without racing the losers.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::{ConsumeError, ReceiverStoppedError};

/// The receiving half of any channel, merger, selector source, or timer in
/// this crate.
///
/// `ready` suspends until a message is available or the receiver has
/// terminated; `consume` returns the message that `ready` made available.
/// Calling `consume` without a preceding successful `ready` is a programmer
/// error.
#[async_trait]
pub trait Receiver<T: Send>: Send + Sync {
    /// Suspends until at least one message is available, or the receiver is
    /// permanently drained.
    async fn ready(&self) -> Result<(), ReceiverStoppedError>;

    /// Returns the message made available by the last successful `ready`.
    fn consume(&self) -> Result<T, ConsumeError>;

    /// A short, human-readable identity used in diagnostics.
    fn name(&self) -> String;
}

/// Convenience methods built on top of the two-phase [`Receiver`] protocol.
#[async_trait]
pub trait ReceiverExt<T: Send>: Receiver<T> {
    /// The `ready(); consume()` composition.
    async fn receive(&self) -> Result<T, ConsumeError> {
        self.ready().await?;
        self.consume()
    }

    /// Wraps this receiver in a lazy one-to-one transform that preserves
    /// termination.
    fn map<U, F>(self, f: F) -> MapReceiver<Self, F>
    where
        Self: Sized,
        U: Send,
        F: Fn(T) -> U + Send + Sync,
    {
        MapReceiver {
            inner: self,
            f: Arc::new(f),
        }
    }

    /// Turns this receiver into a [`futures_core::Stream`], ending cleanly
    /// once the receiver reports a [`ReceiverStoppedError`].
    fn into_stream(self) -> ReceiverStream<Self, T>
    where
        Self: Sized + Clone + 'static,
    {
        ReceiverStream::new(self)
    }
}

#[async_trait]
impl<T: Send, R: Receiver<T> + ?Sized> ReceiverExt<T> for R {}

/// A receiver produced by [`ReceiverExt::map`].
pub struct MapReceiver<R, F> {
    inner: R,
    f: Arc<F>,
}

impl<R: Clone, F> Clone for MapReceiver<R, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            f: self.f.clone(),
        }
    }
}

impl<R: fmt::Debug, F> fmt::Debug for MapReceiver<R, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapReceiver")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T, U, R, F> Receiver<U> for MapReceiver<R, F>
where
    T: Send + 'static,
    U: Send + 'static,
    R: Receiver<T>,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    async fn ready(&self) -> Result<(), ReceiverStoppedError> {
        self.inner.ready().await
    }

    fn consume(&self) -> Result<U, ConsumeError> {
        self.inner.consume().map(|value| (self.f)(value))
    }

    fn name(&self) -> String {
        format!("map({})", self.inner.name())
    }
}

/// A [`futures_core::Stream`] adapter over any [`Receiver`], produced by
/// [`ReceiverExt::into_stream`].
pub struct ReceiverStream<R, T> {
    receiver: R,
    pending: Option<Pin<Box<dyn Future<Output = Result<T, ReceiverStoppedError>> + Send>>>,
}

impl<R: fmt::Debug, T> fmt::Debug for ReceiverStream<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverStream")
            .field("receiver", &self.receiver)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

impl<R, T> ReceiverStream<R, T>
where
    R: Receiver<T> + Clone + 'static,
    T: Send,
{
    fn new(receiver: R) -> Self {
        Self {
            receiver,
            pending: None,
        }
    }
}

impl<R, T> Stream for ReceiverStream<R, T>
where
    R: Receiver<T> + Clone + 'static,
    T: Send,
{
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        // Safety: none of the fields require structural pinning; `pending`
        // is always replaced wholesale, never moved out while pinned.
        let this = unsafe { self.get_unchecked_mut() };

        if this.pending.is_none() {
            // `ready` and `consume` must land on the very same receiver
            // instance: for a peer-style receiver like `AnycastReceiver`,
            // `consume` only sees what that exact instance's own `ready`
            // reserved. Cloning once per poll and driving both calls on
            // that one clone inside a single future keeps them paired;
            // calling `consume` on `this.receiver` afterwards would read a
            // different, untouched instance and silently lose the message.
            let receiver = this.receiver.clone();
            this.pending = Some(Box::pin(async move {
                receiver.ready().await?;
                Ok(receiver
                    .consume()
                    .expect("consume() must succeed immediately after its own ready()"))
            }));
        }

        let fut = this.pending.as_mut().unwrap();
        match fut.as_mut().poll(cx) {
            Poll::Ready(result) => {
                this.pending = None;
                Poll::Ready(result.ok())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
