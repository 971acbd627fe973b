//! Time sources.
//!
//! Everything that measures or waits on time goes through [`Clock`], so tests
//! can swap in a [`VirtualClock`] and step time by hand instead of sleeping.

use parking_lot::{Condvar, Mutex};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic time source that can also block the calling thread.
pub trait Clock: Send + Sync + Debug {
    /// Time elapsed since this clock's origin.
    fn now(&self) -> Duration;

    /// Block the calling thread for at least `duration` of this clock's time.
    fn sleep(&self, duration: Duration);

    /// Block until `now() >= deadline`.
    fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            self.sleep(deadline - now);
        }
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually stepped clock for deterministic tests.
///
/// Sleepers park on a condition variable and wake once [`VirtualClock::advance`]
/// (or [`VirtualClock::set`]) moves time past their deadline.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Mutex<Duration>,
    moved: Condvar,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now += delta;
        self.moved.notify_all();
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Jump to an absolute time. Moving backwards is ignored.
    pub fn set(&self, time: Duration) {
        let mut now = self.now.lock();
        if time > *now {
            *now = time;
            self.moved.notify_all();
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        let mut now = self.now.lock();
        let deadline = *now + duration;
        while *now < deadline {
            self.moved.wait(&mut now);
        }
    }

    fn sleep_until(&self, deadline: Duration) {
        let mut now = self.now.lock();
        while *now < deadline {
            self.moved.wait(&mut now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        clock.sleep(Duration::from_millis(2));
        assert!(clock.now() >= a + Duration::from_millis(2));
    }

    #[test]
    fn test_virtual_clock_only_moves_when_told() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance_millis(250);
        assert_eq!(clock.now(), Duration::from_millis(250));
        clock.set(Duration::from_millis(100));
        assert_eq!(clock.now(), Duration::from_millis(250));
    }

    #[test]
    fn test_virtual_sleep_wakes_after_deadline() {
        let clock = VirtualClock::shared();
        let woke = Arc::new(AtomicBool::new(false));
        let handle = {
            let clock = Arc::clone(&clock);
            let woke = Arc::clone(&woke);
            std::thread::spawn(move || {
                clock.sleep_until(Duration::from_millis(1000));
                woke.store(true, Ordering::SeqCst);
            })
        };

        clock.advance_millis(999);
        std::thread::sleep(Duration::from_millis(20));
        assert!(!woke.load(Ordering::SeqCst));

        clock.advance_millis(1);
        handle.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
    }
}
