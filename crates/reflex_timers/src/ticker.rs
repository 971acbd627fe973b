//! Periodic ticker with explicit catch-up policy.

use parking_lot::Mutex;
use reflex_core::{event_fn, EventCell, EventSource, ReflexError, SharedClock, SharedEventSink, Subscription};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How missed periods are handled after a stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchUp {
    /// Fire once for every period that elapsed.
    FixedRate,
    /// Fire once, then schedule the next period from now.
    Skip,
}

pub struct Ticker {
    label: String,
    clock: SharedClock,
    period: Duration,
    catch_up: CatchUp,
    next_due: Mutex<Option<Duration>>,
    tick: EventCell,
}

impl Ticker {
    pub fn new(clock: SharedClock, period: Duration, catch_up: CatchUp) -> Result<Arc<Self>, ReflexError> {
        Self::named("ticker", clock, period, catch_up)
    }

    pub fn named(
        label: impl Into<String>,
        clock: SharedClock,
        period: Duration,
        catch_up: CatchUp,
    ) -> Result<Arc<Self>, ReflexError> {
        let label = label.into();
        if period.is_zero() {
            return Err(ReflexError::invalid(format!("ticker '{}' needs a positive period", label)));
        }
        Ok(Arc::new(Self {
            tick: EventCell::named(label.clone()),
            label,
            clock,
            period,
            catch_up,
            next_due: Mutex::new(None),
        }))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.next_due.lock().is_some()
    }

    /// Arm the ticker; the first firing is one period from now.
    pub fn start(&self) {
        *self.next_due.lock() = Some(self.clock.now() + self.period);
    }

    pub fn stop(&self) {
        *self.next_due.lock() = None;
    }

    pub fn on_tick(&self, target: SharedEventSink) -> Subscription {
        self.tick.on_event(target)
    }

    /// Fire for every due period according to the catch-up policy.
    /// Returns the number of firings. Faults are logged per firing.
    pub fn update(&self) -> usize {
        let firings = {
            let mut next_due = self.next_due.lock();
            let Some(due) = *next_due else {
                return 0;
            };
            let now = self.clock.now();
            if now < due {
                return 0;
            }
            match self.catch_up {
                CatchUp::FixedRate => {
                    let (missed, next) = fixed_rate_step(due, now, self.period);
                    *next_due = Some(next);
                    usize::try_from(missed).unwrap_or(usize::MAX)
                }
                CatchUp::Skip => {
                    *next_due = Some(now + self.period);
                    1
                }
            }
        };

        if firings > 1 {
            tracing::debug!("Ticker '{}' catching up {} periods", self.label, firings);
        }
        for _ in 0..firings {
            self.tick.fire_with_failure_recovery();
        }
        firings
    }

    /// Time at which the next firing is due, if running.
    pub fn next_due(&self) -> Option<Duration> {
        *self.next_due.lock()
    }

    /// Call `update()` every time `source` fires.
    pub fn drive_from<S: EventSource + ?Sized>(self: &Arc<Self>, source: &S) -> Subscription {
        let weak = Arc::downgrade(self);
        source.on_event(event_fn(move || {
            if let Some(ticker) = weak.upgrade() {
                ticker.update();
            }
            Ok(())
        }))
    }

    /// Step this ticker from its own clock on a background thread.
    /// Starts the ticker if it is not running.
    pub fn spawn_thread(self: &Arc<Self>) -> std::io::Result<TickerThread> {
        if !self.is_running() {
            self.start();
        }
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let ticker = Arc::clone(self);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name(format!("ticker-{}", self.label))
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        let Some(due) = ticker.next_due() else {
                            break;
                        };
                        ticker.clock.sleep_until(due);
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        ticker.update();
                    }
                    tracing::debug!("Ticker thread '{}' exiting", ticker.label);
                })?
        };
        Ok(TickerThread {
            stop,
            handle: Some(handle),
        })
    }
}

impl std::fmt::Debug for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticker")
            .field("label", &self.label)
            .field("period", &self.period)
            .field("catch_up", &self.catch_up)
            .finish()
    }
}

/// Background thread stepping a [`Ticker`]. Stopping waits for at most one period.
pub struct TickerThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TickerThread {
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Ticker thread panicked");
            }
        }
    }
}

impl Drop for TickerThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop.store(true, Ordering::Release);
        }
    }
}

/// Periods elapsed since `due` (inclusive) and the first due time after
/// `now` on the same phase. Requires `now >= due` and a nonzero period.
fn fixed_rate_step(due: Duration, now: Duration, period: Duration) -> (u128, Duration) {
    let elapsed = (now - due).as_nanos();
    let period_nanos = period.as_nanos();
    let into_period = Duration::from_nanos(u64::try_from(elapsed % period_nanos).unwrap_or(u64::MAX));
    (elapsed / period_nanos + 1, now + period.saturating_sub(into_period))
}
