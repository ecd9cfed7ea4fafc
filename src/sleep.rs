//! A minimal monotonic-clock sleep future.
//!
//! This is the only place in the crate that talks to the OS clock and to OS
//! threads directly. The [`Timer`](crate::timer::Timer) uses it to wait out
//! the interval between two deadlines; [`crate::broadcast::Broadcast::wait_for_receiver`]
//! uses it to bound how long it waits for subscribers to show up. Neither of
//! those call sites needs more than "wake me up once, at this `Instant`", so
//! a future per sleep, backed by one parked thread, is simpler and cheaper
//! than running a shared reactor for what is a rare, coarse-grained
//! suspension point.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::Instant;

use pin_project_lite::pin_project;

struct Shared {
    fired: bool,
    waker: Option<Waker>,
    started: bool,
}

/// Resolves once `Instant::now() >= deadline`.
pub(crate) struct Sleep {
    deadline: Instant,
    shared: Arc<Mutex<Shared>>,
}

impl Sleep {
    pub(crate) fn until(deadline: Instant) -> Self {
        Self {
            deadline,
            shared: Arc::new(Mutex::new(Shared {
                fired: false,
                waker: None,
                started: false,
            })),
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let now = Instant::now();
        if now >= self.deadline {
            return Poll::Ready(());
        }

        let mut guard = self.shared.lock().unwrap();
        if guard.fired {
            return Poll::Ready(());
        }
        guard.waker = Some(cx.waker().clone());

        if !guard.started {
            guard.started = true;
            let shared = self.shared.clone();
            let remaining = self.deadline - now;
            thread::Builder::new()
                .name("asynctix-sleep".into())
                .spawn(move || {
                    thread::sleep(remaining);
                    let mut guard = shared.lock().unwrap();
                    guard.fired = true;
                    if let Some(waker) = guard.waker.take() {
                        waker.wake();
                    }
                })
                .expect("failed to spawn asynctix timer thread");
        }

        Poll::Pending
    }
}

pin_project! {
    /// Polls two futures with the same output type and resolves with
    /// whichever completes first, without cancelling the loser.
    ///
    /// Used internally wherever an indefinite wait is composed with a
    /// timeout (e.g. `wait_for_receiver`); the public `select`/`merge`
    /// combinators have their own, richer fairness and cancellation
    /// machinery and do not go through this helper.
    pub(crate) struct Race<A, B> {
        #[pin]
        a: A,
        #[pin]
        b: B,
    }
}

/// The side of a [`Race`] that completed first.
pub(crate) enum Raced<A, B> {
    /// The first future (`a`) resolved first.
    First(A),
    /// The second future (`b`) resolved first.
    Second(B),
}

impl<A, B> Future for Race<A, B>
where
    A: Future,
    B: Future,
{
    type Output = Raced<A::Output, B::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(v) = this.a.poll(cx) {
            return Poll::Ready(Raced::First(v));
        }
        if let Poll::Ready(v) = this.b.poll(cx) {
            return Poll::Ready(Raced::Second(v));
        }
        Poll::Pending
    }
}

pub(crate) fn race<A, B>(a: A, b: B) -> Race<A, B>
where
    A: Future,
    B: Future,
{
    Race { a, b }
}
