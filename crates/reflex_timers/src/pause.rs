//! Retriggerable pause (debounce) timer.
//!
//! Triggering makes the timer active for its configured duration, measured
//! from the latest trigger. The duration may be a live signal; it is read once
//! per trigger. Retriggering while active extends the deadline and never
//! fires "end" for the interrupted period.

use parking_lot::Mutex;
use reflex_core::{
    event_fn, BooleanCell, EventCell, EventSink, EventSource, Fault, FloatPoll, Poll, SharedClock,
    SharedEventSink, Sink, Subscription,
};
use std::sync::Arc;
use std::time::Duration;

/// What a trigger does while the timer is already active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetriggerPolicy {
    /// Extend the deadline only. "start" fires once per active period.
    #[default]
    Silent,
    /// Extend the deadline and fire "start" again.
    Notify,
}

enum DurationSource {
    Fixed(Duration),
    /// Seconds, read at trigger time.
    Signal(FloatPoll),
}

impl DurationSource {
    fn resolve(&self, label: &str) -> Duration {
        match self {
            DurationSource::Fixed(d) => *d,
            DurationSource::Signal(poll) => {
                let seconds = poll.get();
                if seconds.is_finite() && seconds >= 0.0 {
                    Duration::from_secs_f32(seconds)
                } else {
                    tracing::warn!("Pause timer '{}' read duration {}s; using zero", label, seconds);
                    Duration::ZERO
                }
            }
        }
    }
}

pub struct PauseTimer {
    label: String,
    clock: SharedClock,
    duration: DurationSource,
    policy: RetriggerPolicy,
    deadline: Mutex<Option<Duration>>,
    active: Arc<BooleanCell>,
    started: EventCell,
    ended: EventCell,
}

impl PauseTimer {
    pub fn new(clock: SharedClock, duration: Duration) -> Arc<Self> {
        Self::build(clock, DurationSource::Fixed(duration))
    }

    /// A timer whose duration, in seconds, is sampled from `seconds` on every trigger.
    pub fn with_duration_signal(clock: SharedClock, seconds: FloatPoll) -> Arc<Self> {
        Self::build(clock, DurationSource::Signal(seconds))
    }

    fn build(clock: SharedClock, duration: DurationSource) -> Arc<Self> {
        Arc::new(Self {
            label: "pause timer".to_string(),
            clock,
            duration,
            policy: RetriggerPolicy::default(),
            deadline: Mutex::new(None),
            active: BooleanCell::shared(false),
            started: EventCell::named("pause timer start"),
            ended: EventCell::named("pause timer end"),
        })
    }

    /// Builder-style overrides, usable only before the timer is shared.
    pub fn configured(self: Arc<Self>, label: impl Into<String>, policy: RetriggerPolicy) -> Arc<Self> {
        match Arc::try_unwrap(self) {
            Ok(mut timer) => {
                timer.label = label.into();
                timer.policy = policy;
                timer.started = EventCell::named(format!("{} start", timer.label));
                timer.ended = EventCell::named(format!("{} end", timer.label));
                Arc::new(timer)
            }
            Err(shared) => {
                tracing::warn!("Pause timer '{}' is already shared; keeping its configuration", shared.label);
                shared
            }
        }
    }

    pub fn policy(&self) -> RetriggerPolicy {
        self.policy
    }

    /// Start (or extend) the active period from now.
    ///
    /// A period whose deadline has passed but that no `update()` has closed
    /// yet is ended first, so it still announces "end" before the new "start".
    pub fn trigger(&self) {
        let length = self.duration.resolve(&self.label);
        let (was_active, lapsed) = {
            let mut deadline = self.deadline.lock();
            let now = self.clock.now();
            let previous = deadline.replace(now + length);
            match previous {
                Some(at) if now >= at => (false, true),
                Some(_) => (true, false),
                None => (false, false),
            }
        };

        if lapsed {
            self.log_fault("deactivate", self.active.set(false));
            self.ended.fire_with_failure_recovery();
        }
        if !was_active {
            self.log_fault("activate", self.active.set(true));
            self.started.fire_with_failure_recovery();
        } else if self.policy == RetriggerPolicy::Notify {
            self.started.fire_with_failure_recovery();
        }
    }

    /// End the active period if its deadline has passed.
    pub fn update(&self) {
        let expired = {
            let mut deadline = self.deadline.lock();
            match *deadline {
                Some(at) if self.clock.now() >= at => {
                    *deadline = None;
                    true
                }
                _ => false,
            }
        };
        if expired {
            self.log_fault("deactivate", self.active.set(false));
            self.ended.fire_with_failure_recovery();
        }
    }

    fn log_fault(&self, what: &str, result: Result<(), Fault>) {
        if let Err(e) = result {
            tracing::error!("Pause timer '{}' failed to {}: {:#}", self.label, what, e);
        }
    }

    /// Time left in the active period, or zero when idle.
    pub fn remaining(&self) -> Duration {
        match *self.deadline.lock() {
            Some(at) => at.saturating_sub(self.clock.now()),
            None => Duration::ZERO,
        }
    }

    pub fn on_start(&self, target: SharedEventSink) -> Subscription {
        self.started.on_event(target)
    }

    pub fn on_end(&self, target: SharedEventSink) -> Subscription {
        self.ended.on_event(target)
    }

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
}

/// True while active. Reads compare against the clock directly, so they are
/// exact between updates; subscribers hear the falling edge on `update()`.
impl Poll<bool> for PauseTimer {
    fn get(&self) -> bool {
        match *self.deadline.lock() {
            Some(at) => self.clock.now() < at,
            None => false,
        }
    }
}

impl EventSource for PauseTimer {
    fn on_event(&self, target: SharedEventSink) -> Subscription {
        self.active.on_event(target)
    }
}

impl EventSink for PauseTimer {
    fn event(&self) -> Result<(), Fault> {
        self.trigger();
        Ok(())
    }
}

/// Writing `true` triggers; `false` is ignored.
impl Sink<bool> for PauseTimer {
    fn set(&self, value: bool) -> Result<(), Fault> {
        if value {
            self.trigger();
        }
        Ok(())
    }
}

impl std::fmt::Debug for PauseTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PauseTimer")
            .field("label", &self.label)
            .field("policy", &self.policy)
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex_core::{poll_fn, FloatCell, VirtualClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(count: &Arc<AtomicUsize>) -> SharedEventSink {
        let count = Arc::clone(count);
        event_fn(move || {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    struct Counts {
        start: Arc<AtomicUsize>,
        end: Arc<AtomicUsize>,
    }

    fn watch(timer: &PauseTimer) -> (Counts, Subscription) {
        let counts = Counts {
            start: Arc::new(AtomicUsize::new(0)),
            end: Arc::new(AtomicUsize::new(0)),
        };
        let subs = Subscription::all(vec![
            timer.on_start(counting(&counts.start)),
            timer.on_end(counting(&counts.end)),
        ]);
        (counts, subs)
    }

    #[test]
    fn test_active_for_duration() {
        let clock = VirtualClock::shared();
        let timer = PauseTimer::new(clock.clone(), Duration::from_millis(500));
        let (counts, _s) = watch(&timer);

        timer.trigger();
        assert!(timer.get());
        clock.advance_millis(499);
        timer.update();
        assert!(timer.get());
        assert_eq!(counts.end.load(Ordering::SeqCst), 0);

        clock.advance_millis(1);
        assert!(!timer.get());
        timer.update();
        assert_eq!(counts.start.load(Ordering::SeqCst), 1);
        assert_eq!(counts.end.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retrigger_extends_without_end_silent() {
        let clock = VirtualClock::shared();
        let timer = PauseTimer::new(clock.clone(), Duration::from_millis(500));
        let (counts, _s) = watch(&timer);

        timer.trigger();
        clock.advance_millis(300);
        timer.update();
        timer.trigger();
        clock.advance_millis(300);
        timer.update();
        assert!(timer.get());
        assert_eq!(counts.start.load(Ordering::SeqCst), 1);
        assert_eq!(counts.end.load(Ordering::SeqCst), 0);

        clock.advance_millis(200);
        timer.update();
        assert_eq!(counts.end.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retrigger_after_lapse_ends_then_starts() {
        let clock = VirtualClock::shared();
        let timer = PauseTimer::new(clock.clone(), Duration::from_millis(500));
        let (counts, _s) = watch(&timer);
        let edges = Arc::new(Mutex::new(Vec::new()));
        let _edges = {
            let edges = Arc::clone(&edges);
            let active = Arc::clone(&timer.active);
            timer.on_event(event_fn(move || {
                edges.lock().push(active.get());
                Ok(())
            }))
        };

        timer.trigger();
        clock.advance_millis(600);
        assert!(!timer.get());

        // No update() ran between the lapse and this trigger.
        timer.trigger();
        assert!(timer.get());
        assert_eq!(counts.start.load(Ordering::SeqCst), 2);
        assert_eq!(counts.end.load(Ordering::SeqCst), 1);

        clock.advance_millis(600);
        timer.update();
        assert_eq!(counts.start.load(Ordering::SeqCst), 2);
        assert_eq!(counts.end.load(Ordering::SeqCst), 2);
        assert_eq!(*edges.lock(), vec![true, false, true, false]);
    }

    #[test]
    fn test_retrigger_notify_refires_start() {
        let clock = VirtualClock::shared();
        let timer = PauseTimer::new(clock.clone(), Duration::from_millis(500))
            .configured("debounce", RetriggerPolicy::Notify);
        assert_eq!(timer.policy(), RetriggerPolicy::Notify);
        let (counts, _s) = watch(&timer);

        timer.trigger();
        clock.advance_millis(100);
        timer.trigger();
        assert_eq!(counts.start.load(Ordering::SeqCst), 2);
        clock.advance_millis(500);
        timer.update();
        assert_eq!(counts.end.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duration_signal_read_at_trigger_time() {
        let clock = VirtualClock::shared();
        let seconds = FloatCell::shared(1.0);
        let source = seconds.clone();
        let timer = PauseTimer::with_duration_signal(clock.clone(), poll_fn(move || source.get()));

        timer.trigger();
        seconds.set(0.1).unwrap();
        clock.advance_millis(500);
        timer.update();
        assert!(timer.get());
        assert_eq!(timer.remaining(), Duration::from_millis(500));
    }

    #[test]
    fn test_faulting_callbacks_do_not_corrupt_cycle() {
        let clock = VirtualClock::shared();
        let timer = PauseTimer::new(clock.clone(), Duration::from_millis(10));
        let _bad = timer.on_start(event_fn(|| Err(anyhow::anyhow!("start broke"))));
        let _bad_end = timer.on_end(event_fn(|| Err(anyhow::anyhow!("end broke"))));
        let (counts, _s) = watch(&timer);

        for _ in 0..3 {
            timer.trigger();
            clock.advance_millis(10);
            timer.update();
        }
        assert_eq!(counts.start.load(Ordering::SeqCst), 3);
        assert_eq!(counts.end.load(Ordering::SeqCst), 3);
        assert!(!timer.get());
    }

    #[test]
    fn test_sink_and_event_entry_points() {
        let clock = VirtualClock::shared();
        let timer = PauseTimer::new(clock, Duration::from_secs(1));
        timer.set(false).unwrap();
        assert!(!timer.get());
        timer.set(true).unwrap();
        assert!(timer.get());
        timer.event().unwrap();
        assert!(timer.remaining() > Duration::ZERO);
    }
}
