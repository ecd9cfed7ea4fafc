//! `merge`: N receivers folded into one.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::{ConsumeError, ReceiverStoppedError, UsageError};
use crate::receiver::Receiver;

type BoxedReadyFuture = Pin<Box<dyn Future<Output = Result<(), ReceiverStoppedError>> + Send>>;

struct MergeState<T> {
    /// One in-flight `ready()` probe per input; `None` once that input has
    /// terminated, or transiently while a fresh probe is being (re)started.
    probes: Vec<Option<BoxedReadyFuture>>,
    terminated: Vec<bool>,
    /// Messages already pulled out of an input via `consume`, in arrival
    /// order, awaiting delivery through the merged receiver's own
    /// `ready`/`consume` pair.
    queue: VecDeque<T>,
    held: Option<T>,
}

struct MergeInner<T> {
    inputs: Vec<Arc<dyn Receiver<T>>>,
    state: Mutex<MergeState<T>>,
}

/// The receiver returned by [`merge`]: yields the union of its inputs'
/// messages in arrival order, absorbing individual input terminations
/// silently and terminating only once every input has.
pub struct MergedReceiver<T> {
    inner: Arc<MergeInner<T>>,
}

/// Folds `n >= 1` receivers into one. `n == 0` is a usage error.
pub fn merge<T: Send + 'static>(
    receivers: Vec<Arc<dyn Receiver<T>>>,
) -> Result<MergedReceiver<T>, UsageError> {
    if receivers.is_empty() {
        return Err(UsageError::EmptyInputSet("merge"));
    }

    let n = receivers.len();
    Ok(MergedReceiver {
        inner: Arc::new(MergeInner {
            inputs: receivers,
            state: Mutex::new(MergeState {
                probes: (0..n).map(|_| None).collect(),
                terminated: vec![false; n],
                queue: VecDeque::new(),
                held: None,
            }),
        }),
    })
}

impl<T: Send + 'static> MergedReceiver<T> {
    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), ReceiverStoppedError>> {
        let mut state = self.inner.state.lock().unwrap();

        if let Some(message) = state.queue.pop_front() {
            state.held = Some(message);
            return Poll::Ready(Ok(()));
        }

        let n = self.inner.inputs.len();
        for i in 0..n {
            if !state.terminated[i] && state.probes[i].is_none() {
                let input = self.inner.inputs[i].clone();
                state.probes[i] = Some(Box::pin(async move { input.ready().await }));
            }
        }

        let mut any_in_flight = false;
        for i in 0..n {
            let Some(fut) = state.probes[i].as_mut() else {
                continue;
            };
            match fut.as_mut().poll(cx) {
                Poll::Ready(Ok(())) => {
                    state.probes[i] = None;
                    let input = self.inner.inputs[i].clone();
                    if let Ok(message) = input.consume() {
                        state.queue.push_back(message);
                    }
                }
                Poll::Ready(Err(_)) => {
                    state.probes[i] = None;
                    state.terminated[i] = true;
                }
                Poll::Pending => any_in_flight = true,
            }
        }

        if let Some(message) = state.queue.pop_front() {
            state.held = Some(message);
            return Poll::Ready(Ok(()));
        }

        if !any_in_flight && state.terminated.iter().all(|&t| t) {
            return Poll::Ready(Err(ReceiverStoppedError::new()));
        }

        Poll::Pending
    }
}

#[async_trait]
impl<T: Send + 'static> Receiver<T> for MergedReceiver<T> {
    async fn ready(&self) -> Result<(), ReceiverStoppedError> {
        if self.inner.state.lock().unwrap().held.is_some() {
            return Ok(());
        }
        std::future::poll_fn(|cx| self.poll_ready(cx)).await
    }

    fn consume(&self) -> Result<T, ConsumeError> {
        let mut state = self.inner.state.lock().unwrap();
        match state.held.take() {
            Some(message) => Ok(message),
            None if state.terminated.iter().all(|&t| t) && state.queue.is_empty() => {
                Err(ConsumeError::Stopped(ReceiverStoppedError::new()))
            }
            None => Err(ConsumeError::NotReady),
        }
    }

    fn name(&self) -> String {
        format!("merge({})", self.inner.inputs.len())
    }
}

impl<T: Send + 'static> Stream for MergedReceiver<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        match self.poll_ready(cx) {
            Poll::Ready(Ok(())) => {
                let mut state = self.inner.state.lock().unwrap();
                Poll::Ready(state.held.take())
            }
            Poll::Ready(Err(_)) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for MergedReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("MergedReceiver")
            .field("inputs", &self.inner.inputs.len())
            .field("terminated", &state.terminated.iter().filter(|&&t| t).count())
            .finish()
    }
}
