//! The error taxonomy shared by every channel, selector and timer.
//!
//! Every suspended operation in this crate eventually resolves to `Ok` or to
//! one of the error kinds defined here; nothing is ever silently dropped.

use std::fmt;

use thiserror::Error;

/// The channel has been closed, either explicitly or because its last live
/// half went away.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
#[error("the channel has been closed")]
pub struct ChannelClosedError;

/// A send failed because the channel was, or became, closed before the
/// message could be accepted.
#[derive(Error)]
#[error("failed to send message into the channel")]
pub struct SendError<T> {
    /// The message that could not be delivered.
    pub message: T,
    #[source]
    source: ChannelClosedError,
}

impl<T> SendError<T> {
    pub(crate) fn new(message: T) -> Self {
        Self {
            message,
            source: ChannelClosedError,
        }
    }

    /// Unwraps the message that failed to send.
    pub fn into_inner(self) -> T {
        self.message
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").finish_non_exhaustive()
    }
}

/// A receiver has permanently terminated: the channel is closed and its
/// buffer has been drained.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
#[error("the receiver has stopped")]
pub struct ReceiverStoppedError(#[source] pub(crate) ChannelClosedError);

impl ReceiverStoppedError {
    pub(crate) fn new() -> Self {
        Self(ChannelClosedError)
    }
}

/// Raised by [`crate::Receiver::consume`] when called without a preceding
/// successful call to `ready`, or by an attempt to consume a receiver that
/// has already terminated.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum ConsumeError {
    /// `consume` was called without a preceding successful `ready`.
    #[error("consume() called without a prior successful ready()")]
    NotReady,
    /// The receiver has already terminated.
    #[error(transparent)]
    Stopped(#[from] ReceiverStoppedError),
}

/// A programmer error: misuse of the library's API rather than a runtime
/// condition.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum UsageError {
    /// `merge`/`select` was called with zero receivers.
    #[error("{0}() requires at least one receiver")]
    EmptyInputSet(&'static str),
    /// A channel was constructed with a non-positive capacity.
    #[error("channel capacity must be a positive integer, got {0}")]
    NonPositiveCapacity(i64),
    /// A timer was constructed with a non-positive interval.
    #[error("timer interval must be positive, got {0:?}")]
    NonPositiveInterval(std::time::Duration),
}

/// Raised when a non-suspending send attempt cannot complete immediately.
#[derive(Clone, Copy, Eq, PartialEq)]
pub enum TrySendError<T> {
    /// The channel's buffer is at capacity.
    Full(T),
    /// The channel has been closed.
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Unwraps the message that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(v) | TrySendError::Closed(v) => v,
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.debug_tuple("Full").field(&"..").finish(),
            TrySendError::Closed(_) => f.debug_tuple("Closed").field(&"..").finish(),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => "channel buffer is full".fmt(f),
            TrySendError::Closed(_) => "sending into a closed channel".fmt(f),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for TrySendError<T> {}

/// Raised when a non-suspending receive attempt finds nothing to return.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum TryConsumeError {
    /// Nothing is currently buffered.
    #[error("the channel is currently empty")]
    Empty,
    /// The channel is closed and fully drained.
    #[error("the channel is closed and empty")]
    Closed,
}

/// Errors raised while tearing down a [`crate::select`] loop are aggregated
/// into a single composite error so that no cause is lost.
#[derive(Debug, Error)]
#[error("{} error(s) occurred while tearing down the selector", .causes.len())]
pub struct CompositeError {
    /// Every cause collected during teardown, in the order they occurred.
    pub causes: Vec<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CompositeError {
    pub(crate) fn from_causes(
        causes: Vec<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Option<Self> {
        if causes.is_empty() {
            None
        } else {
            Some(Self { causes })
        }
    }
}
