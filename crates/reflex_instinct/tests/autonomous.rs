//! A multi-mode autonomous program on a virtual clock, driven the way a robot
//! main loop would drive it.

use reflex_core::{BooleanCell, EventCell, FloatCell, InstinctConfig, Poll, Sink, VirtualClock};
use reflex_instinct::{
    Instinct, InstinctContext, InstinctMulti, InstinctResult, MemoryStore, ModeStore, RunOutcome, WorkerState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

/// Advances the virtual clock in 5ms steps until dropped.
struct TimeDriver {
    done: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TimeDriver {
    fn start(clock: Arc<VirtualClock>) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let handle = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    clock.advance_millis(5);
                    thread::sleep(Duration::from_micros(200));
                }
            })
        };
        Self {
            done,
            handle: Some(handle),
        }
    }
}

impl Drop for TimeDriver {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[test]
fn test_drive_forward_routine_on_virtual_clock() {
    let clock = VirtualClock::shared();
    let _time = TimeDriver::start(clock.clone());
    let enabled = BooleanCell::shared(false);
    let motor = FloatCell::shared(0.0);
    let started_at = Arc::new(parking_lot::Mutex::new(None));
    let stopped_at = Arc::new(parking_lot::Mutex::new(None));

    let drive_forward = {
        let motor = motor.clone();
        let started_at = Arc::clone(&started_at);
        let stopped_at = Arc::clone(&stopped_at);
        move |ctx: &InstinctContext| -> InstinctResult {
            *started_at.lock() = Some(ctx.clock().now());
            motor.set(0.5)?;
            ctx.wait_for_time(1000)?;
            motor.set(0.0)?;
            *stopped_at.lock() = Some(ctx.clock().now());
            Ok(())
        }
    };

    let store = Arc::new(MemoryStore::new());
    let multi = InstinctMulti::builder("auto")
        .mode("DriveForward", drive_forward)
        .mode("Nothing", |_ctx: &InstinctContext| -> InstinctResult { Ok(()) })
        .build(store.clone())
        .unwrap();
    let selector = multi.selector();
    selector.set_active("DriveForward").unwrap();
    assert_eq!(store.get_string("auto.active_mode").as_deref(), Some("DriveForward"));

    let instinct = Instinct::spawn(
        "auto",
        enabled.clone(),
        clock.clone(),
        &InstinctConfig::with_cycle(Duration::from_millis(20)).unwrap(),
        multi,
    )
    .unwrap();

    enabled.set(true).unwrap();
    eventually("routine to finish", || stopped_at.lock().is_some());
    let started = started_at.lock().unwrap();
    let stopped = stopped_at.lock().unwrap();
    assert!(stopped - started >= Duration::from_millis(1000));
    assert_eq!(motor.get(), 0.0);
    eventually("suspended", || instinct.state() == WorkerState::SuspendedWaitingToStop);
    assert_eq!(instinct.last_outcome(), Some(RunOutcome::Completed));

    enabled.set(false).unwrap();
    eventually("blocked", || instinct.state() == WorkerState::BlockedWaitingToStart);
    instinct.shutdown();
}

#[test]
fn test_disable_mid_routine_leaves_outputs_untouched() {
    let clock = VirtualClock::shared();
    let _time = TimeDriver::start(clock.clone());
    let enabled = BooleanCell::shared(true);
    let arm = FloatCell::shared(0.0);
    let go = Arc::new(EventCell::named("go"));

    let body = {
        let arm = arm.clone();
        let go = Arc::clone(&go);
        move |ctx: &InstinctContext| -> InstinctResult {
            arm.set(1.0)?;
            ctx.wait_for_event(&*go)?;
            arm.set(2.0)?;
            Ok(())
        }
    };
    let instinct = Instinct::spawn(
        "arm",
        enabled.clone(),
        clock.clone(),
        &InstinctConfig::default(),
        body,
    )
    .unwrap();

    eventually("waiting on go", || go.has_subscribers());
    enabled.set(false).unwrap();
    eventually("mode over", || instinct.last_outcome() == Some(RunOutcome::ModeOver));
    assert!(!go.has_subscribers());

    go.fire().unwrap();
    assert_eq!(arm.get(), 1.0);
    instinct.shutdown();
}
