//! The Broadcast channel: fan-out to every live receiver, each with its own
//! bounded, lossy buffer and optional latest-message replay.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_event::Event;
use async_trait::async_trait;
use diatomic_waker::primitives::DiatomicWaker;

use crate::error::{
    ConsumeError, ReceiverStoppedError, SendError, TryConsumeError, TrySendError, UsageError,
};
use crate::receiver::Receiver;
use crate::sleep::{race, Raced, Sleep};

/// The buffer capacity given to a receiver created via [`Broadcast::new_receiver`]
/// when no explicit capacity is requested.
pub const DEFAULT_RECEIVER_CAPACITY: usize = 64;

struct ReceiverRecord<T> {
    name: String,
    limit: usize,
    buffer: Mutex<VecDeque<T>>,
    waker: DiatomicWaker,
}

impl<T> ReceiverRecord<T> {
    fn new(name: String, limit: usize) -> Self {
        Self {
            name,
            limit,
            buffer: Mutex::new(VecDeque::new()),
            waker: DiatomicWaker::new(),
        }
    }
}

struct BroadcastState<T> {
    is_closed: bool,
    latest: Option<T>,
    receivers: Vec<Weak<ReceiverRecord<T>>>,
}

struct BroadcastInner<T> {
    name: String,
    resend_latest: bool,
    state: Mutex<BroadcastState<T>>,
    /// Signalled whenever a receiver is registered, for `wait_for_receiver`.
    receiver_registered: Event,
}

impl<T> BroadcastInner<T> {
    fn is_closed(&self) -> bool {
        self.state.lock().unwrap().is_closed
    }
}

/// A multi-producer multi-consumer fan-out channel: every live receiver
/// observes every message, each through its own bounded, lossy buffer.
pub struct Broadcast<T> {
    inner: Arc<BroadcastInner<T>>,
}

impl<T> Broadcast<T> {
    /// Creates a new broadcast channel.
    ///
    /// When `resend_latest` is set, a newly created receiver is primed with
    /// the most recently sent message, if any.
    pub fn new(name: impl Into<String>, resend_latest: bool) -> Self {
        Self {
            inner: Arc::new(BroadcastInner {
                name: name.into(),
                resend_latest,
                state: Mutex::new(BroadcastState {
                    is_closed: false,
                    latest: None,
                    receivers: Vec::new(),
                }),
                receiver_registered: Event::new(),
            }),
        }
    }

    /// Mints a new sender handle.
    pub fn new_sender(&self) -> BroadcastSender<T> {
        BroadcastSender {
            inner: self.inner.clone(),
        }
    }

    /// Mints a new receiver with the default name and capacity
    /// ([`DEFAULT_RECEIVER_CAPACITY`]).
    pub fn new_receiver(&self) -> BroadcastReceiver<T>
    where
        T: Clone,
    {
        self.new_named_receiver(format!("{}-receiver", self.inner.name), DEFAULT_RECEIVER_CAPACITY)
            .expect("DEFAULT_RECEIVER_CAPACITY is always positive")
    }

    /// Mints a new receiver with an explicit name and buffer capacity.
    ///
    /// Returns [`UsageError::NonPositiveCapacity`] if `limit` is zero, matching
    /// [`crate::Anycast::new`]'s validation of its own capacity argument.
    pub fn new_named_receiver(
        &self,
        name: impl Into<String>,
        limit: usize,
    ) -> Result<BroadcastReceiver<T>, UsageError>
    where
        T: Clone,
    {
        if limit == 0 {
            return Err(UsageError::NonPositiveCapacity(0));
        }

        let record = Arc::new(ReceiverRecord::new(name.into(), limit));

        {
            let mut state = self.inner.state.lock().unwrap();
            if self.inner.resend_latest {
                if let Some(latest) = &state.latest {
                    record.buffer.lock().unwrap().push_back(latest.clone());
                }
            }
            state.receivers.push(Arc::downgrade(&record));
        }
        self.inner.receiver_registered.notify(usize::MAX);

        log::trace!(
            "broadcast channel \"{}\" gained receiver \"{}\"",
            self.inner.name,
            record.name
        );

        Ok(BroadcastReceiver {
            channel: self.inner.clone(),
            record,
        })
    }

    /// Suspends until at least `count` live receivers are registered, or
    /// returns `false` if `timeout` elapses first.
    pub async fn wait_for_receiver(&self, count: usize, timeout: Option<Duration>) -> bool {
        let wait = self.inner.receiver_registered.wait_until(|| {
            let state = self.inner.state.lock().unwrap();
            let live = state
                .receivers
                .iter()
                .filter(|weak| weak.strong_count() > 0)
                .count();
            (live >= count).then_some(())
        });

        match timeout {
            None => {
                wait.await;
                true
            }
            Some(d) => {
                let deadline = Instant::now() + d;
                match race(wait, Sleep::until(deadline)).await {
                    Raced::First(()) => true,
                    Raced::Second(()) => false,
                }
            }
        }
    }

    /// The number of currently live receivers.
    pub fn receiver_count(&self) -> usize {
        let state = self.inner.state.lock().unwrap();
        state
            .receivers
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Closes the channel. Idempotent.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.is_closed {
            return;
        }
        state.is_closed = true;
        let receivers = std::mem::take(&mut state.receivers);
        drop(state);

        log::debug!("broadcast channel \"{}\" closed", self.inner.name);
        for weak in receivers {
            if let Some(record) = weak.upgrade() {
                record.waker.notify();
            }
        }
        self.inner.receiver_registered.notify(usize::MAX);
    }

    /// Checks whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// The most recently sent message, if any and if the channel was
    /// constructed with `resend_latest`.
    pub fn latest(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.state.lock().unwrap().latest.clone()
    }

    /// The channel's diagnostic name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Broadcast<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcast")
            .field("name", &self.inner.name)
            .field("resend_latest", &self.inner.resend_latest)
            .field("is_closed", &self.inner.is_closed())
            .field("receivers", &self.receiver_count())
            .finish()
    }
}

/// The sending half of a [`Broadcast`] channel.
pub struct BroadcastSender<T> {
    inner: Arc<BroadcastInner<T>>,
}

impl<T: Clone> BroadcastSender<T> {
    /// Dispatches a message to every live receiver immediately.
    ///
    /// Never suspends: a receiver whose buffer is full has its oldest
    /// message dropped to make room.
    pub fn try_send(&self, message: T) -> Result<(), TrySendError<T>> {
        let mut state = self.inner.state.lock().unwrap();
        if state.is_closed {
            return Err(TrySendError::Closed(message));
        }

        state.latest = Some(message.clone());
        state.receivers.retain(|weak| match weak.upgrade() {
            Some(record) => {
                let mut buffer = record.buffer.lock().unwrap();
                if buffer.len() >= record.limit {
                    buffer.pop_front();
                }
                buffer.push_back(message.clone());
                drop(buffer);
                record.waker.notify();
                true
            }
            None => false,
        });

        Ok(())
    }

    /// The suspending counterpart of [`BroadcastSender::try_send`].
    ///
    /// Broadcast sends never actually suspend; the `async` signature exists
    /// for parity with [`crate::anycast::AnycastSender::send`].
    pub async fn send(&self, message: T) -> Result<(), SendError<T>> {
        match self.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(message)) => Err(SendError::new(message)),
            Err(TrySendError::Full(_)) => unreachable!("broadcast sends are never rejected as full"),
        }
    }

    /// Closes the channel. Idempotent.
    pub fn close(&self) {
        let channel = Broadcast {
            inner: self.inner.clone(),
        };
        channel.close();
    }

    /// Checks whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl<T> Clone for BroadcastSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for BroadcastSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastSender")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

/// A named receiver with a private, bounded, lossy buffer.
///
/// The channel holds only a weak reference to this receiver's record: once
/// this handle is dropped, its buffer is reclaimed without any explicit
/// close.
pub struct BroadcastReceiver<T> {
    channel: Arc<BroadcastInner<T>>,
    record: Arc<ReceiverRecord<T>>,
    held: Mutex<Option<T>>,
}

impl<T> BroadcastReceiver<T> {
    /// Attempts to return a buffered message immediately, without
    /// suspending.
    pub fn try_consume(&self) -> Result<T, TryConsumeError> {
        if let Some(message) = self.held.lock().unwrap().take() {
            return Ok(message);
        }
        if let Some(message) = self.record.buffer.lock().unwrap().pop_front() {
            return Ok(message);
        }
        if self.channel.is_closed() {
            Err(TryConsumeError::Closed)
        } else {
            Err(TryConsumeError::Empty)
        }
    }

    /// This receiver's diagnostic name.
    pub fn receiver_name(&self) -> &str {
        &self.record.name
    }

    /// This receiver's buffer capacity.
    pub fn limit(&self) -> usize {
        self.record.limit
    }

    /// The number of messages currently buffered for this receiver.
    pub fn len(&self) -> usize {
        self.record.buffer.lock().unwrap().len()
    }

    /// Whether this receiver's buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The future backing [`BroadcastReceiver::ready`]: pops the next buffered
/// message, or registers for a wakeup once the buffer is repopulated or the
/// channel closes.
struct BroadcastReady<'a, T> {
    channel: &'a BroadcastInner<T>,
    record: &'a ReceiverRecord<T>,
}

impl<'a, T> Future for BroadcastReady<'a, T> {
    type Output = Result<T, ReceiverStoppedError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: a `BroadcastReceiver` is not `Clone`, so at most one task
        // polls a given record's waker at a time.
        unsafe {
            if let Some(message) = self.record.buffer.lock().unwrap().pop_front() {
                return Poll::Ready(Ok(message));
            }
            if self.channel.is_closed() {
                return Poll::Ready(Err(ReceiverStoppedError::new()));
            }

            self.record.waker.register(cx.waker());

            if let Some(message) = self.record.buffer.lock().unwrap().pop_front() {
                self.record.waker.unregister();
                return Poll::Ready(Ok(message));
            }
            if self.channel.is_closed() {
                self.record.waker.unregister();
                return Poll::Ready(Err(ReceiverStoppedError::new()));
            }

            Poll::Pending
        }
    }
}

#[async_trait]
impl<T: Send> Receiver<T> for BroadcastReceiver<T> {
    async fn ready(&self) -> Result<(), ReceiverStoppedError> {
        if self.held.lock().unwrap().is_some() {
            return Ok(());
        }

        let message = BroadcastReady {
            channel: &self.channel,
            record: &self.record,
        }
        .await?;

        *self.held.lock().unwrap() = Some(message);
        Ok(())
    }

    fn consume(&self) -> Result<T, ConsumeError> {
        if let Some(message) = self.held.lock().unwrap().take() {
            return Ok(message);
        }

        if self.channel.is_closed() && self.record.buffer.lock().unwrap().is_empty() {
            Err(ConsumeError::Stopped(ReceiverStoppedError::new()))
        } else {
            Err(ConsumeError::NotReady)
        }
    }

    fn name(&self) -> String {
        self.record.name.clone()
    }
}

impl<T> fmt::Debug for BroadcastReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastReceiver")
            .field("name", &self.record.name)
            .field("limit", &self.record.limit)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
