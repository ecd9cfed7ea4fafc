//! The drift-aware periodic [`Timer`].

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_event::Event;
use async_trait::async_trait;

use crate::error::{ConsumeError, ReceiverStoppedError, UsageError};
use crate::receiver::Receiver;
use crate::sleep::{race, Raced, Sleep};

/// What a [`MissedTickPolicy`] decides at a given `ready()` call: whether to
/// keep waiting, and if not, the drift to report and the deadline to adopt
/// for the following tick.
#[derive(Debug, Clone, Copy)]
pub struct TickDecision {
    /// `Some(instant)` to keep sleeping until `instant`; `None` (or an
    /// instant no later than `now`) to tick immediately.
    pub wait_until: Option<Instant>,
    /// The reported drift for the tick about to be emitted. Only
    /// meaningful when `wait_until` is `None`.
    pub drift: Duration,
    /// The deadline to schedule the next tick against.
    pub next_deadline: Instant,
}

/// A pure function of `(interval, now, scheduled_deadline)` deciding how a
/// [`Timer`] behaves once its deadline has passed. The only user-pluggable
/// point in the library.
pub trait MissedTickPolicy: Send + Sync {
    fn decide(&self, interval: Duration, now: Instant, deadline: Instant) -> TickDecision;

    /// A short identifier used in diagnostics.
    fn name(&self) -> &'static str;
}

fn wait_or_tick(interval: Duration, now: Instant, deadline: Instant, late_drift: Duration) -> TickDecision {
    if now < deadline {
        TickDecision {
            wait_until: Some(deadline),
            drift: Duration::ZERO,
            next_deadline: deadline + interval,
        }
    } else {
        TickDecision {
            wait_until: None,
            drift: late_drift,
            next_deadline: deadline + interval,
        }
    }
}

/// Never loses a missed tick: one tick is emitted per whole interval that
/// has elapsed, each reporting the actual lateness against its own
/// deadline, until the schedule catches up with the clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerAllMissed;

impl MissedTickPolicy for TriggerAllMissed {
    fn decide(&self, interval: Duration, now: Instant, deadline: Instant) -> TickDecision {
        let lateness = now.saturating_duration_since(deadline);
        wait_or_tick(interval, now, deadline, lateness)
    }

    fn name(&self) -> &'static str {
        "TriggerAllMissed"
    }
}

/// Collapses any backlog of missed ticks into a single tick and re-locks
/// the schedule onto the original grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipMissedAndResync;

impl MissedTickPolicy for SkipMissedAndResync {
    fn decide(&self, interval: Duration, now: Instant, deadline: Instant) -> TickDecision {
        let lateness = now.saturating_duration_since(deadline);
        if now < deadline {
            return wait_or_tick(interval, now, deadline, lateness);
        }
        if lateness < interval {
            return wait_or_tick(interval, now, deadline, lateness);
        }

        let missed = lateness.as_secs_f64() / interval.as_secs_f64();
        let periods = missed.ceil() as u32;
        TickDecision {
            wait_until: None,
            drift: lateness,
            next_deadline: deadline + interval * periods,
        }
    }

    fn name(&self) -> &'static str {
        "SkipMissedAndResync"
    }
}

/// Abandons the original phase in favor of honest interval spacing: a
/// missed tick is reported with its real drift, and the following
/// deadline is anchored to the moment it fires, not to the grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipMissedAndDrift;

impl MissedTickPolicy for SkipMissedAndDrift {
    fn decide(&self, interval: Duration, now: Instant, deadline: Instant) -> TickDecision {
        if now < deadline {
            return wait_or_tick(interval, now, deadline, Duration::ZERO);
        }
        TickDecision {
            wait_until: None,
            drift: now.saturating_duration_since(deadline),
            next_deadline: now + interval,
        }
    }

    fn name(&self) -> &'static str {
        "SkipMissedAndDrift"
    }
}

struct TimerState {
    interval: Duration,
    policy: Box<dyn MissedTickPolicy>,
    deadline: Instant,
    stopped: bool,
    /// Bumped by every `reset`/`stop`, so an in-flight `ready()` sleep can
    /// tell it was interrupted rather than having simply reached its
    /// deadline.
    epoch: u64,
}

struct TimerInner {
    name: String,
    state: Mutex<TimerState>,
    reset_signal: Event,
}

enum Step {
    Ready(Duration),
    Wait(Instant, u64),
}

/// A receiver whose messages are tick drifts, paced against the monotonic
/// clock according to a [`MissedTickPolicy`].
pub struct Timer {
    inner: Arc<TimerInner>,
    held: Mutex<Option<Duration>>,
}

impl Timer {
    /// Builds a timer with an explicit policy and optional start delay.
    /// The first deadline is `now + start_delay`, or `now + interval` when
    /// no delay is given.
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        policy: impl MissedTickPolicy + 'static,
        start_delay: Option<Duration>,
    ) -> Result<Self, UsageError> {
        if interval.is_zero() {
            return Err(UsageError::NonPositiveInterval(interval));
        }

        let deadline = Instant::now() + start_delay.unwrap_or(interval);
        Ok(Self {
            inner: Arc::new(TimerInner {
                name: name.into(),
                state: Mutex::new(TimerState {
                    interval,
                    policy: Box::new(policy),
                    deadline,
                    stopped: false,
                    epoch: 0,
                }),
                reset_signal: Event::new(),
            }),
            held: Mutex::new(None),
        })
    }

    /// A periodic timer that never drops a missed tick (policy
    /// [`TriggerAllMissed`]).
    pub fn periodic(interval: Duration) -> Result<Self, UsageError> {
        Self::new("timer", interval, TriggerAllMissed, None)
    }

    /// A one-shot-feeling timer that abandons phase on lateness (policy
    /// [`SkipMissedAndDrift`]), the natural building block for timeouts
    /// composed with [`crate::select`].
    pub fn timeout(interval: Duration) -> Result<Self, UsageError> {
        Self::new("timeout", interval, SkipMissedAndDrift, None)
    }

    /// Reschedules the timer. Safe to call while a `ready()` is in flight
    /// on another task: the pending wait recomputes against the new
    /// deadline instead of firing against the old one. Revives a stopped
    /// timer.
    pub fn reset(&self, start_delay: Option<Duration>) {
        let mut state = self.inner.state.lock().unwrap();
        let interval = state.interval;
        state.deadline = Instant::now() + start_delay.unwrap_or(interval);
        state.stopped = false;
        state.epoch += 1;
        drop(state);
        self.inner.reset_signal.notify(usize::MAX);
    }

    /// Stops the timer. Every subsequent `ready()` (including one already
    /// in flight) reports termination.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.stopped = true;
        state.epoch += 1;
        drop(state);
        self.inner.reset_signal.notify(usize::MAX);
    }

    /// The configured interval.
    pub fn interval(&self) -> Duration {
        self.inner.state.lock().unwrap().interval
    }

    /// The active policy's diagnostic name.
    pub fn missed_tick_policy(&self) -> &'static str {
        self.inner.state.lock().unwrap().policy.name()
    }

    /// Whether `stop()` has been called without an intervening `reset()`.
    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().unwrap().stopped
    }

    /// The timer's diagnostic name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn next_step(&self) -> Result<Step, ReceiverStoppedError> {
        let mut state = self.inner.state.lock().unwrap();
        if state.stopped {
            return Err(ReceiverStoppedError::new());
        }

        let now = Instant::now();
        let decision = state.policy.decide(state.interval, now, state.deadline);
        match decision.wait_until {
            Some(target) if target > now => Ok(Step::Wait(target, state.epoch)),
            _ => {
                state.deadline = decision.next_deadline;
                Ok(Step::Ready(decision.drift))
            }
        }
    }
}

#[async_trait]
impl Receiver<Duration> for Timer {
    async fn ready(&self) -> Result<(), ReceiverStoppedError> {
        if self.held.lock().unwrap().is_some() {
            return Ok(());
        }

        loop {
            match self.next_step()? {
                Step::Ready(drift) => {
                    *self.held.lock().unwrap() = Some(drift);
                    return Ok(());
                }
                Step::Wait(target, baseline_epoch) => {
                    let inner = self.inner.clone();
                    race(
                        Sleep::until(target),
                        inner.reset_signal.wait_until(move || {
                            let state = inner.state.lock().unwrap();
                            if state.epoch != baseline_epoch {
                                Some(())
                            } else {
                                None
                            }
                        }),
                    )
                    .await;
                }
            }
        }
    }

    fn consume(&self) -> Result<Duration, ConsumeError> {
        if let Some(drift) = self.held.lock().unwrap().take() {
            return Ok(drift);
        }
        if self.inner.state.lock().unwrap().stopped {
            Err(ConsumeError::Stopped(ReceiverStoppedError::new()))
        } else {
            Err(ConsumeError::NotReady)
        }
    }

    fn name(&self) -> String {
        self.inner.name.clone()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("Timer")
            .field("name", &self.inner.name)
            .field("interval", &state.interval)
            .field("policy", &state.policy.name())
            .field("stopped", &state.stopped)
            .finish()
    }
}
