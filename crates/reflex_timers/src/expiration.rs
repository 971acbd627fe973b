//! Expiring countdown with scheduled actions.
//!
//! Actions are registered at offsets from the most recent `start()` or
//! `feed()`, and fire in offset order as `update()` observes the clock moving
//! past them. Feeding moves the origin to "now" and re-arms every action, so
//! the whole schedule replays relative to the new zero.

use parking_lot::Mutex;
use reflex_core::{
    event_fn, BooleanCell, BooleanInput, BooleanOutput, EventCell, EventSink, EventSource, Poll, ReflexError,
    SharedClock, SharedEventSink, SharedEventSource, Sink, Subscription,
};
use std::sync::{Arc, Weak};
use std::time::Duration;

struct Scheduled {
    offset: Duration,
    action: SharedEventSink,
}

#[derive(Default)]
struct Schedule {
    entries: Vec<Scheduled>,
    origin: Duration,
    /// Index of the first entry that has not fired since the last start/feed.
    next: usize,
}

pub struct ExpirationTimer {
    label: String,
    clock: SharedClock,
    schedule: Mutex<Schedule>,
    running: Arc<BooleanCell>,
}

impl ExpirationTimer {
    pub fn new(clock: SharedClock) -> Arc<Self> {
        Self::named("expiration timer", clock)
    }

    pub fn named(label: impl Into<String>, clock: SharedClock) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            clock,
            schedule: Mutex::new(Schedule::default()),
            running: BooleanCell::shared(false),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// True while the timer is running.
    pub fn running_input(&self) -> BooleanInput {
        self.running.clone()
    }

    /// Time since the last start or feed, or zero while stopped.
    pub fn elapsed(&self) -> Duration {
        if !self.is_running() {
            return Duration::ZERO;
        }
        let origin = self.schedule.lock().origin;
        self.clock.now().saturating_sub(origin)
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Fire `action` `offset_ms` after each start/feed.
    ///
    /// Actions sharing an offset fire in registration order. The schedule is
    /// frozen while the timer runs.
    pub fn schedule(&self, offset_ms: u64, action: SharedEventSink) -> Result<(), ReflexError> {
        if self.is_running() {
            return Err(ReflexError::illegal(format!(
                "cannot schedule on '{}' while it is running",
                self.label
            )));
        }
        let offset = Duration::from_millis(offset_ms);
        let mut schedule = self.schedule.lock();
        let at = schedule.entries.partition_point(|e| e.offset <= offset);
        schedule.entries.insert(at, Scheduled { offset, action });
        Ok(())
    }

    /// An event that fires `offset_ms` after each start/feed.
    pub fn schedule_event(&self, offset_ms: u64) -> Result<SharedEventSource, ReflexError> {
        let out = Arc::new(EventCell::named(format!("{} +{}ms", self.label, offset_ms)));
        self.schedule(offset_ms, out.clone())?;
        Ok(out)
    }

    /// Write `value` to `target` at `on_ms` and `!value` at `off_ms`.
    pub fn schedule_boolean_period(
        &self,
        on_ms: u64,
        off_ms: u64,
        target: BooleanOutput,
        value: bool,
    ) -> Result<(), ReflexError> {
        if off_ms < on_ms {
            return Err(ReflexError::invalid(format!(
                "boolean period ends ({}ms) before it starts ({}ms)",
                off_ms, on_ms
            )));
        }
        let on_target = Arc::clone(&target);
        self.schedule(on_ms, Arc::new(move || on_target.set(value)))?;
        self.schedule(off_ms, Arc::new(move || target.set(!value)))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Begin counting from now. Zero-offset actions fire immediately.
    pub fn start(&self) -> Result<(), ReflexError> {
        if self.is_running() {
            return Err(ReflexError::illegal(format!("'{}' is already running", self.label)));
        }
        {
            let mut schedule = self.schedule.lock();
            schedule.origin = self.clock.now();
            schedule.next = 0;
        }
        self.running.set(true)?;
        self.update();
        Ok(())
    }

    /// Cancel every action that has not fired yet.
    pub fn stop(&self) -> Result<(), ReflexError> {
        if !self.is_running() {
            return Err(ReflexError::illegal(format!("'{}' is not running", self.label)));
        }
        self.running.set(false)?;
        Ok(())
    }

    /// Restart the countdown from now and re-arm the whole schedule.
    pub fn feed(&self) -> Result<(), ReflexError> {
        if !self.is_running() {
            return Err(ReflexError::illegal(format!("cannot feed '{}' while stopped", self.label)));
        }
        let mut schedule = self.schedule.lock();
        schedule.origin = self.clock.now();
        schedule.next = 0;
        Ok(())
    }

    /// Fire every action whose offset has been reached. Returns how many fired.
    ///
    /// Action faults are logged and never stop the remaining actions.
    pub fn update(&self) -> usize {
        if !self.is_running() {
            return 0;
        }
        let due: Vec<(Duration, SharedEventSink)> = {
            let mut schedule = self.schedule.lock();
            let elapsed = self.clock.now().saturating_sub(schedule.origin);
            let start = schedule.next;
            let end = start + schedule.entries[start..].partition_point(|e| e.offset <= elapsed);
            schedule.next = end;
            schedule.entries[start..end]
                .iter()
                .map(|e| (e.offset, Arc::clone(&e.action)))
                .collect()
        };

        let mut fired = 0;
        for (offset, action) in due {
            if !self.is_running() {
                break;
            }
            fired += 1;
            if let Err(e) = action.event() {
                tracing::error!("Timer '{}' action at {:?} failed: {:#}", self.label, offset, e);
            }
        }
        fired
    }

    // ========================================================================
    // Wiring
    // ========================================================================

    /// Call `update()` every time `tick` fires.
    pub fn drive_from<S: EventSource + ?Sized>(self: &Arc<Self>, tick: &S) -> Subscription {
        let weak = Arc::downgrade(self);
        tick.on_event(event_fn(move || {
            if let Some(timer) = weak.upgrade() {
                timer.update();
            }
            Ok(())
        }))
    }

    pub fn start_event(self: &Arc<Self>) -> SharedEventSink {
        lifecycle_event(Arc::downgrade(self), Self::start)
    }

    pub fn stop_event(self: &Arc<Self>) -> SharedEventSink {
        lifecycle_event(Arc::downgrade(self), Self::stop)
    }

    pub fn feed_event(self: &Arc<Self>) -> SharedEventSink {
        lifecycle_event(Arc::downgrade(self), Self::feed)
    }
}

fn lifecycle_event(
    timer: Weak<ExpirationTimer>,
    op: fn(&ExpirationTimer) -> Result<(), ReflexError>,
) -> SharedEventSink {
    Arc::new(move || match timer.upgrade() {
        Some(timer) => op(&timer).map_err(anyhow::Error::from),
        None => Ok(()),
    })
}

impl std::fmt::Debug for ExpirationTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirationTimer")
            .field("label", &self.label)
            .field("running", &self.is_running())
            .field("scheduled", &self.schedule.lock().entries.len())
            .finish()
    }
}
