//! `select`: a fair, lazy merge that tags every yielded value with its
//! source.

use std::fmt;
use std::future::Future;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_core::Stream;

use crate::error::{CompositeError, ReceiverStoppedError, UsageError};
use crate::receiver::Receiver;

type BoxedReadyFuture = Pin<Box<dyn Future<Output = Result<(), ReceiverStoppedError>> + Send>>;

enum ProbeState {
    /// No probe outstanding; the input is still live and eligible.
    Idle,
    /// A `ready()` call is in flight.
    InFlight(BoxedReadyFuture),
    /// `ready()` resolved `Ok`; the input is holding a message awaiting
    /// `consume`, but hasn't yet been chosen by the round-robin rotor.
    Ready,
    /// `ready()` resolved `Err`; the terminal marker is awaiting delivery.
    Terminal,
    /// The terminal marker for this input has already been yielded.
    Done,
}

/// One value produced by a [`Select`] loop: either a message or a terminal
/// marker, tagged with the input it came from.
pub struct Selected<T> {
    source: Arc<dyn Receiver<T>>,
    outcome: Result<T, ReceiverStoppedError>,
}

impl<T> Selected<T> {
    /// The message, if this event carries one.
    pub fn message(self) -> Option<T> {
        self.outcome.ok()
    }

    /// The terminal cause, if this event marks an input's termination.
    pub fn exception(&self) -> Option<&ReceiverStoppedError> {
        self.outcome.as_ref().err()
    }

    /// Whether this event marks an input's termination rather than a
    /// delivered message.
    pub fn was_stopped(&self) -> bool {
        self.outcome.is_err()
    }

    /// The diagnostic name of the input this event came from.
    pub fn source_name(&self) -> String {
        self.source.name()
    }
}

impl<T: fmt::Debug> fmt::Debug for Selected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selected")
            .field("source", &self.source.name())
            .field("outcome", &self.outcome)
            .finish()
    }
}

/// A type-guarding predicate: true if `selected` was produced by `receiver`,
/// compared by identity rather than by downcasting.
pub fn selected_from<T>(selected: &Selected<T>, receiver: &Arc<dyn Receiver<T>>) -> bool {
    Arc::ptr_eq(&selected.source, receiver)
}

struct SelectState {
    probes: Vec<ProbeState>,
    /// Index at which the next round of scanning begins; advanced past the
    /// last chosen input so that no input can starve its peers.
    rotor: usize,
}

/// A fair fan-in over heterogeneous receivers, yielding [`Selected`] values
/// that tag their source.
///
/// Unlike [`crate::merge`], a terminated input produces one terminal
/// [`Selected`] event rather than being absorbed silently; the loop as a
/// whole ends only once every input has been drained this way.
pub struct Select<T> {
    inputs: Vec<Arc<dyn Receiver<T>>>,
    state: Mutex<SelectState>,
}

/// Builds a selector over `n >= 1` receivers. `n == 0` is a usage error.
pub fn select<T: Send + 'static>(
    receivers: Vec<Arc<dyn Receiver<T>>>,
) -> Result<Select<T>, UsageError> {
    if receivers.is_empty() {
        return Err(UsageError::EmptyInputSet("select"));
    }

    let n = receivers.len();
    Ok(Select {
        inputs: receivers,
        state: Mutex::new(SelectState {
            probes: (0..n).map(|_| ProbeState::Idle).collect(),
            rotor: 0,
        }),
    })
}

impl<T: Send + 'static> Select<T> {
    /// Awaits the next [`Selected`] event, or `None` once every input has
    /// yielded its terminal marker.
    pub async fn next(&self) -> Option<Selected<T>> {
        std::future::poll_fn(|cx| self.poll_next_selected(cx)).await
    }

    fn poll_next_selected(&self, cx: &mut Context<'_>) -> Poll<Option<Selected<T>>> {
        let mut state = self.state.lock().unwrap();
        let n = self.inputs.len();

        for i in 0..n {
            if matches!(state.probes[i], ProbeState::Idle) {
                let input = self.inputs[i].clone();
                state.probes[i] = ProbeState::InFlight(Box::pin(async move { input.ready().await }));
            }
        }

        for i in 0..n {
            if let ProbeState::InFlight(fut) = &mut state.probes[i] {
                match fut.as_mut().poll(cx) {
                    Poll::Ready(Ok(())) => state.probes[i] = ProbeState::Ready,
                    Poll::Ready(Err(_)) => state.probes[i] = ProbeState::Terminal,
                    Poll::Pending => {}
                }
            }
        }

        let rotor = state.rotor;
        let chosen = (0..n)
            .map(|offset| (rotor + offset) % n)
            .find(|&i| matches!(state.probes[i], ProbeState::Ready | ProbeState::Terminal));

        let chosen = match chosen {
            Some(i) => i,
            None => {
                let all_done = state.probes.iter().all(|p| matches!(p, ProbeState::Done));
                return if all_done {
                    Poll::Ready(None)
                } else {
                    Poll::Pending
                };
            }
        };

        state.rotor = (chosen + 1) % n;
        let input = self.inputs[chosen].clone();
        let probe = mem::replace(&mut state.probes[chosen], ProbeState::Idle);

        let selected = match probe {
            ProbeState::Ready => match input.consume() {
                Ok(message) => Selected {
                    source: input,
                    outcome: Ok(message),
                },
                Err(_) => {
                    // Raced with the input terminating between `ready` and
                    // `consume`: surface it as this input's terminal event.
                    state.probes[chosen] = ProbeState::Done;
                    Selected {
                        source: input,
                        outcome: Err(ReceiverStoppedError::new()),
                    }
                }
            },
            ProbeState::Terminal => {
                state.probes[chosen] = ProbeState::Done;
                Selected {
                    source: input,
                    outcome: Err(ReceiverStoppedError::new()),
                }
            }
            _ => unreachable!("only Ready/Terminal inputs are chosen"),
        };

        Poll::Ready(Some(selected))
    }

    /// Releases every outstanding probe, aggregating any panic encountered
    /// while dropping one into a [`CompositeError`] rather than propagating
    /// the first and losing the rest.
    pub fn shutdown(self) -> Result<(), CompositeError> {
        let mut state = self.state.into_inner().unwrap();
        let mut causes: Vec<Box<dyn std::error::Error + Send + Sync + 'static>> = Vec::new();

        for probe in state.probes.drain(..) {
            if let ProbeState::InFlight(fut) = probe {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| drop(fut))) {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "panic while dropping a select probe".to_string());
                    causes.push(Box::new(ShutdownCause(message)));
                }
            }
        }

        match CompositeError::from_causes(causes) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
struct ShutdownCause(String);

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ShutdownCause {}

impl<T: Send + 'static> Stream for Select<T> {
    type Item = Selected<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Selected<T>>> {
        self.poll_next_selected(cx)
    }
}

impl<T> fmt::Debug for Select<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        let done = state
            .probes
            .iter()
            .filter(|p| matches!(p, ProbeState::Done))
            .count();
        f.debug_struct("Select")
            .field("inputs", &self.inputs.len())
            .field("done", &done)
            .finish()
    }
}
