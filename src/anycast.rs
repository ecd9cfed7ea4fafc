//! The Anycast channel: a bounded MPMC queue where each message is
//! delivered to exactly one receiver.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_event::Event;
use async_trait::async_trait;

use crate::error::{
    ConsumeError, ReceiverStoppedError, SendError, TryConsumeError, TrySendError, UsageError,
};
use crate::receiver::Receiver;
use crate::sleep::{race, Raced, Sleep};

/// Emit a diagnostic once a sender has been blocked longer than this without
/// making progress.
const SLOW_SEND_WARNING: Duration = Duration::from_secs(3);

struct AnycastState<T> {
    buffer: VecDeque<T>,
    is_closed: bool,
}

struct AnycastInner<T> {
    name: String,
    limit: usize,
    state: Mutex<AnycastState<T>>,
    /// Signalled whenever a message is enqueued, or on close.
    not_empty: Event,
    /// Signalled whenever a message is dequeued, or on close.
    not_full: Event,
}

impl<T> AnycastInner<T> {
    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.is_closed {
            return;
        }
        state.is_closed = true;
        drop(state);

        log::debug!("anycast channel \"{}\" closed", self.name);
        self.not_empty.notify(usize::MAX);
        self.not_full.notify(usize::MAX);
    }

    fn is_closed(&self) -> bool {
        self.state.lock().unwrap().is_closed
    }

    fn len(&self) -> usize {
        self.state.lock().unwrap().buffer.len()
    }
}

/// A bounded, multi-producer multi-consumer channel: every message sent is
/// delivered to exactly one of the live receivers.
///
/// This handle is the channel itself: [`Anycast::new_sender`] and
/// [`Anycast::new_receiver`] mint as many peer handles as needed, before or
/// after [`Anycast::close`].
pub struct Anycast<T> {
    inner: Arc<AnycastInner<T>>,
}

impl<T> Anycast<T> {
    /// Creates a new channel with the given diagnostic name and capacity.
    ///
    /// Returns [`UsageError::NonPositiveCapacity`] if `limit` is zero.
    pub fn new(name: impl Into<String>, limit: usize) -> Result<Self, UsageError> {
        if limit == 0 {
            return Err(UsageError::NonPositiveCapacity(0));
        }

        Ok(Self {
            inner: Arc::new(AnycastInner {
                name: name.into(),
                limit,
                state: Mutex::new(AnycastState {
                    buffer: VecDeque::with_capacity(limit),
                    is_closed: false,
                }),
                not_empty: Event::new(),
                not_full: Event::new(),
            }),
        })
    }

    /// Mints a new sender handle. Senders are cheap to clone and may be
    /// created at any time, even after the channel has closed.
    pub fn new_sender(&self) -> AnycastSender<T> {
        AnycastSender {
            inner: self.inner.clone(),
        }
    }

    /// Mints a new receiver handle, a peer of any other live receiver.
    pub fn new_receiver(&self) -> AnycastReceiver<T> {
        AnycastReceiver {
            inner: self.inner.clone(),
            held: Mutex::new(None),
        }
    }

    /// Closes the channel. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Checks whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// The channel's diagnostic name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The channel's fixed capacity.
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// The number of messages currently buffered.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the channel's buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for Anycast<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Anycast<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Anycast")
            .field("name", &self.inner.name)
            .field("limit", &self.inner.limit)
            .field("is_closed", &self.inner.is_closed())
            .field("len", &self.inner.len())
            .finish()
    }
}

/// The sending half of an [`Anycast`] channel.
pub struct AnycastSender<T> {
    inner: Arc<AnycastInner<T>>,
}

impl<T> AnycastSender<T> {
    /// Attempts to send a message immediately, without suspending.
    pub fn try_send(&self, message: T) -> Result<(), TrySendError<T>> {
        let mut state = self.inner.state.lock().unwrap();
        if state.is_closed {
            return Err(TrySendError::Closed(message));
        }
        if state.buffer.len() < self.inner.limit {
            state.buffer.push_back(message);
            drop(state);
            self.inner.not_empty.notify(1);
            Ok(())
        } else {
            Err(TrySendError::Full(message))
        }
    }

    /// Sends a message, suspending until buffer space is available.
    ///
    /// Fails with [`SendError`] if the channel is, or becomes, closed before
    /// the message is accepted.
    pub async fn send(&self, message: T) -> Result<(), SendError<T>> {
        let mut message = Some(message);

        loop {
            let limit = self.inner.limit;
            let wait = self.inner.not_full.wait_until(|| {
                let mut state = self.inner.state.lock().unwrap();
                if state.is_closed {
                    Some(Err(()))
                } else if state.buffer.len() < limit {
                    state
                        .buffer
                        .push_back(message.take().expect("message already sent"));
                    Some(Ok(()))
                } else {
                    None
                }
            });

            let deadline = Instant::now() + SLOW_SEND_WARNING;
            match race(wait, Sleep::until(deadline)).await {
                Raced::First(Ok(())) => {
                    self.inner.not_empty.notify(1);
                    return Ok(());
                }
                Raced::First(Err(())) => {
                    return Err(SendError::new(
                        message.take().expect("message not consumed"),
                    ));
                }
                Raced::Second(()) => {
                    log::warn!(
                        "anycast channel \"{}\" saturated: a sender has been blocked for over {:?}",
                        self.inner.name,
                        SLOW_SEND_WARNING
                    );
                }
            }
        }
    }

    /// Closes the channel. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Checks whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl<T> Clone for AnycastSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for AnycastSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnycastSender")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

/// A peer receiving half of an [`Anycast`] channel.
///
/// Multiple receivers may be minted from the same channel; any given
/// message is delivered to exactly one of them.
pub struct AnycastReceiver<T> {
    inner: Arc<AnycastInner<T>>,
    /// The message reserved by the last successful `ready`, pending
    /// `consume`. Private to this handle: cloning produces a receiver with
    /// its own, empty slot.
    held: Mutex<Option<T>>,
}

impl<T> AnycastReceiver<T> {
    /// Attempts to reserve and return a message immediately, without
    /// suspending.
    pub fn try_consume(&self) -> Result<T, TryConsumeError> {
        if let Some(message) = self.held.lock().unwrap().take() {
            return Ok(message);
        }

        let mut state = self.inner.state.lock().unwrap();
        if let Some(message) = state.buffer.pop_front() {
            drop(state);
            self.inner.not_full.notify(1);
            Ok(message)
        } else if state.is_closed {
            Err(TryConsumeError::Closed)
        } else {
            Err(TryConsumeError::Empty)
        }
    }

    /// Closes the channel. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}

#[async_trait]
impl<T: Send> Receiver<T> for AnycastReceiver<T> {
    async fn ready(&self) -> Result<(), ReceiverStoppedError> {
        if self.held.lock().unwrap().is_some() {
            return Ok(());
        }

        loop {
            {
                let mut state = self.inner.state.lock().unwrap();
                if let Some(message) = state.buffer.pop_front() {
                    drop(state);
                    *self.held.lock().unwrap() = Some(message);
                    self.inner.not_full.notify(1);
                    return Ok(());
                }
                if state.is_closed {
                    return Err(ReceiverStoppedError::new());
                }
            }

            self.inner
                .not_empty
                .wait_until(|| {
                    let state = self.inner.state.lock().unwrap();
                    if !state.buffer.is_empty() || state.is_closed {
                        Some(())
                    } else {
                        None
                    }
                })
                .await;
        }
    }

    fn consume(&self) -> Result<T, ConsumeError> {
        if let Some(message) = self.held.lock().unwrap().take() {
            return Ok(message);
        }

        let state = self.inner.state.lock().unwrap();
        if state.is_closed && state.buffer.is_empty() {
            Err(ConsumeError::Stopped(ReceiverStoppedError::new()))
        } else {
            Err(ConsumeError::NotReady)
        }
    }

    fn name(&self) -> String {
        self.inner.name.clone()
    }
}

impl<T> Clone for AnycastReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            held: Mutex::new(None),
        }
    }
}

impl<T> fmt::Debug for AnycastReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnycastReceiver")
            .field("name", &self.inner.name)
            .field("holding", &self.held.lock().unwrap().is_some())
            .finish_non_exhaustive()
    }
}
