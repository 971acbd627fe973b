//! Elapsed-time measurement.

use parking_lot::Mutex;
use reflex_core::{
    event_fn, EventSource, FloatCell, FloatInput, Poll, ReflexError, SharedClock, SharedEventSink, Sink,
    Subscription,
};
use std::sync::Arc;
use std::time::Duration;

/// Seconds since the last reset.
///
/// [`Poll::get`] is exact. The pushed value, available through
/// [`Stopwatch::granular_input`], moves in whole steps of the configured
/// granularity and is truncated toward zero, never rounded.
pub struct Stopwatch {
    clock: SharedClock,
    origin: Mutex<Duration>,
    granularity: Duration,
    granular: Arc<FloatCell>,
}

impl Stopwatch {
    pub fn new(clock: SharedClock, granularity: Duration) -> Result<Arc<Self>, ReflexError> {
        if granularity.is_zero() {
            return Err(ReflexError::invalid("stopwatch granularity must be positive"));
        }
        let origin = clock.now();
        Ok(Arc::new(Self {
            clock,
            origin: Mutex::new(origin),
            granularity,
            granular: FloatCell::shared(0.0),
        }))
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(*self.origin.lock())
    }

    pub fn reset(&self) {
        *self.origin.lock() = self.clock.now();
        self.update();
    }

    /// Push the truncated elapsed time to subscribers if it crossed a step.
    pub fn update(&self) {
        let steps = self.elapsed().as_nanos() / self.granularity.as_nanos();
        let truncated = self.granularity.as_secs_f64() * steps as f64;
        if let Err(e) = self.granular.set(truncated as f32) {
            tracing::error!("Stopwatch subscriber failed: {:#}", e);
        }
    }

    pub fn granular_input(&self) -> FloatInput {
        self.granular.clone()
    }

    pub fn reset_event(self: &Arc<Self>) -> SharedEventSink {
        let weak = Arc::downgrade(self);
        event_fn(move || {
            if let Some(watch) = weak.upgrade() {
                watch.reset();
            }
            Ok(())
        })
    }

    /// Call `update()` every time `tick` fires.
    pub fn drive_from<S: EventSource + ?Sized>(self: &Arc<Self>, tick: &S) -> Subscription {
        let weak = Arc::downgrade(self);
        tick.on_event(event_fn(move || {
            if let Some(watch) = weak.upgrade() {
                watch.update();
            }
            Ok(())
        }))
    }
}

impl Poll<f32> for Stopwatch {
    fn get(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }
}

impl std::fmt::Debug for Stopwatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stopwatch")
            .field("elapsed", &self.elapsed())
            .field("granularity", &self.granularity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex_core::{EventCell, VirtualClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_exact_and_truncated_readings() {
        let clock = VirtualClock::shared();
        let watch = Stopwatch::new(clock.clone(), Duration::from_millis(100)).unwrap();
        let granular = watch.granular_input();

        clock.advance_millis(250);
        watch.update();
        assert!((watch.get() - 0.25).abs() < 1e-6);
        assert!((granular.get() - 0.2).abs() < 1e-6);

        clock.advance_millis(49);
        watch.update();
        assert!((granular.get() - 0.2).abs() < 1e-6);
        clock.advance_millis(1);
        watch.update();
        assert!((granular.get() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_pushes_only_on_step_boundaries() {
        let clock = VirtualClock::shared();
        let watch = Stopwatch::new(clock.clone(), Duration::from_secs(1)).unwrap();
        let tick = EventCell::new();
        let _d = watch.drive_from(&tick);
        let pushes = Arc::new(AtomicUsize::new(0));
        let _s = {
            let pushes = Arc::clone(&pushes);
            watch.granular_input().on_event(event_fn(move || {
                pushes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        };

        for _ in 0..30 {
            clock.advance_millis(100);
            tick.fire().unwrap();
        }
        assert_eq!(pushes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reset_zeroes() {
        let clock = VirtualClock::shared();
        let watch = Stopwatch::new(clock.clone(), Duration::from_millis(10)).unwrap();
        clock.advance_millis(500);
        watch.update();
        watch.reset_event().event().unwrap();
        assert_eq!(watch.get(), 0.0);
        assert_eq!(watch.granular_input().get(), 0.0);
    }

    #[test]
    fn test_zero_granularity_rejected() {
        assert!(Stopwatch::new(VirtualClock::shared(), Duration::ZERO).is_err());
    }
}
