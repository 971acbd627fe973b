//! Blocking wait primitives for routine bodies.
//!
//! Every primitive checks liveness before it sleeps and again as soon as it
//! wakes, sleeping at most one cycle at a time, so a routine notices the end
//! of its mode within one cycle and does nothing visible after that.
//! Timeouts are deadlines computed once on entry, so slow cycles never
//! stretch them.

use crate::error::{InstinctError, InstinctResult};
use parking_lot::{Condvar, Mutex};
use reflex_core::{event_fn, BooleanInput, EventSource, Poll, SharedClock, Subscription};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a routine body receives: the liveness signal, a clock and the cycle.
pub struct InstinctContext {
    should_run: BooleanInput,
    shutdown: Arc<AtomicBool>,
    clock: SharedClock,
    cycle: Duration,
}

impl InstinctContext {
    /// A context outside any worker, for running a routine on the current thread.
    pub fn new(should_run: BooleanInput, clock: SharedClock, cycle: Duration) -> Self {
        Self::with_shutdown(should_run, clock, cycle, Arc::new(AtomicBool::new(false)))
    }

    pub(crate) fn with_shutdown(
        should_run: BooleanInput,
        clock: SharedClock,
        cycle: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            should_run,
            shutdown,
            clock,
            cycle,
        }
    }

    pub fn cycle(&self) -> Duration {
        self.cycle
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn is_running(&self) -> bool {
        self.should_run.get() && !self.shutdown.load(Ordering::Acquire)
    }

    /// Fail with [`InstinctError::ModeOver`] once the mode has ended.
    pub fn ensure_running(&self) -> InstinctResult {
        if self.is_running() {
            Ok(())
        } else {
            Err(InstinctError::ModeOver)
        }
    }

    /// Sleep one cycle, or less if `deadline` comes first.
    fn nap(&self, deadline: Option<Duration>) {
        let step = match deadline {
            Some(deadline) => deadline.saturating_sub(self.clock.now()).min(self.cycle),
            None => self.cycle,
        };
        if !step.is_zero() {
            self.clock.sleep(step);
        }
    }

    fn poll_until<F>(&self, deadline: Option<Duration>, mut ready: F) -> InstinctResult<bool>
    where
        F: FnMut() -> bool,
    {
        loop {
            self.ensure_running()?;
            if ready() {
                return Ok(true);
            }
            if let Some(deadline) = deadline {
                if self.clock.now() >= deadline {
                    return Ok(false);
                }
            }
            self.nap(deadline);
        }
    }

    fn deadline_after(&self, timeout: Duration) -> Duration {
        self.clock.now() + timeout
    }

    // ========================================================================
    // Conditions
    // ========================================================================

    pub fn wait_until<C: Poll<bool> + ?Sized>(&self, condition: &C) -> InstinctResult {
        self.poll_until(None, || condition.get()).map(|_| ())
    }

    /// Returns `false` if `timeout` elapses before `condition` holds.
    pub fn wait_until_timeout<C: Poll<bool> + ?Sized>(&self, timeout: Duration, condition: &C) -> InstinctResult<bool> {
        let deadline = self.deadline_after(timeout);
        self.poll_until(Some(deadline), || condition.get())
    }

    pub fn wait_until_not<C: Poll<bool> + ?Sized>(&self, condition: &C) -> InstinctResult {
        self.poll_until(None, || !condition.get()).map(|_| ())
    }

    pub fn wait_until_not_timeout<C: Poll<bool> + ?Sized>(
        &self,
        timeout: Duration,
        condition: &C,
    ) -> InstinctResult<bool> {
        let deadline = self.deadline_after(timeout);
        self.poll_until(Some(deadline), || !condition.get())
    }

    /// Index of the first true condition. Lower indices win ties.
    pub fn wait_until_one_of<C: Poll<bool> + ?Sized>(&self, conditions: &[Arc<C>]) -> InstinctResult<usize> {
        let mut hit = None;
        self.poll_until(None, || {
            hit = first_true(conditions);
            hit.is_some()
        })?;
        hit.ok_or(InstinctError::ModeOver)
    }

    /// Like [`Self::wait_until_one_of`], returning `None` on timeout.
    pub fn wait_until_one_of_timeout<C: Poll<bool> + ?Sized>(
        &self,
        timeout: Duration,
        conditions: &[Arc<C>],
    ) -> InstinctResult<Option<usize>> {
        let deadline = self.deadline_after(timeout);
        let mut hit = None;
        self.poll_until(Some(deadline), || {
            hit = first_true(conditions);
            hit.is_some()
        })?;
        Ok(hit)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Block until `event` fires after this call starts.
    pub fn wait_for_event<S: EventSource + ?Sized>(&self, event: &S) -> InstinctResult {
        self.await_event(event, None).map(|_| ())
    }

    /// Returns `false` if `timeout` elapses before `event` fires.
    pub fn wait_for_event_timeout<S: EventSource + ?Sized>(&self, timeout: Duration, event: &S) -> InstinctResult<bool> {
        let deadline = self.deadline_after(timeout);
        self.await_event(event, Some(deadline))
    }

    fn await_event<S: EventSource + ?Sized>(&self, event: &S, deadline: Option<Duration>) -> InstinctResult<bool> {
        self.ensure_running()?;
        let handoff = Arc::new(Handoff::default());
        let _subscription = SubscriptionGuard(Some(event.on_event({
            let handoff = Arc::clone(&handoff);
            event_fn(move || {
                *handoff.fired.lock() = true;
                handoff.cond.notify_all();
                Ok(())
            })
        })));

        let mut fired = handoff.fired.lock();
        loop {
            if *fired {
                drop(fired);
                self.ensure_running()?;
                return Ok(true);
            }
            if !self.is_running() {
                return Err(InstinctError::ModeOver);
            }
            if let Some(deadline) = deadline {
                if self.clock.now() >= deadline {
                    return Ok(false);
                }
            }
            // Real-time slice: liveness is rechecked at least once per cycle.
            handoff.cond.wait_for(&mut fired, self.cycle);
        }
    }

    // ========================================================================
    // Time
    // ========================================================================

    /// Sleep for `millis` milliseconds of clock time.
    ///
    /// Negative durations log a warning and return at once; zero returns at once.
    pub fn wait_for_time(&self, millis: i64) -> InstinctResult {
        self.ensure_running()?;
        if millis < 0 {
            tracing::warn!("wait_for_time called with negative duration {}ms; not waiting", millis);
            return Ok(());
        }
        if millis == 0 {
            return Ok(());
        }
        self.wait_for_duration(Duration::from_millis(millis as u64))
    }

    pub fn wait_for_duration(&self, duration: Duration) -> InstinctResult {
        let deadline = self.deadline_after(duration);
        loop {
            self.ensure_running()?;
            if self.clock.now() >= deadline {
                return Ok(());
            }
            self.nap(Some(deadline));
        }
    }

    /// Sleep for the number of seconds `seconds` holds right now. Later changes
    /// to the signal do not affect this wait.
    pub fn wait_for_time_signal<C: Poll<f32> + ?Sized>(&self, seconds: &C) -> InstinctResult {
        let snapshot = seconds.get();
        if snapshot.is_nan() {
            tracing::warn!("wait_for_time_signal read NaN seconds; not waiting");
            return self.ensure_running();
        }
        let millis = (f64::from(snapshot) * 1000.0).round();
        let millis = millis.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        self.wait_for_time(millis)
    }
}

impl std::fmt::Debug for InstinctContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstinctContext")
            .field("running", &self.is_running())
            .field("cycle", &self.cycle)
            .finish()
    }
}

fn first_true<C: Poll<bool> + ?Sized>(conditions: &[Arc<C>]) -> Option<usize> {
    conditions.iter().position(|c| c.get())
}

#[derive(Default)]
struct Handoff {
    fired: Mutex<bool>,
    cond: Condvar,
}

/// Unsubscribes on every exit path, including cancellation.
struct SubscriptionGuard(Option<Subscription>);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(subscription) = self.0.take() {
            subscription.unsubscribe();
        }
    }
}
