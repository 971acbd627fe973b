//! The Instinct worker: one dedicated thread per engine.
//!
//! ```text
//! BlockedWaitingToStart --should_run--> Running --body ends--> SuspendedWaitingToStop
//!          ^                                                            |
//!          +----------------------------!should_run---------------------+
//! ```
//!
//! A routine that never calls a wait primitive cannot be cancelled; the
//! worker only observes the liveness signal at those checkpoints.

use crate::context::InstinctContext;
use crate::error::{InstinctError, InstinctResult};
use anyhow::Context as _;
use parking_lot::Mutex;
use reflex_core::{BooleanInput, InstinctConfig, SharedClock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A routine body run each time the mode becomes active.
pub trait InstinctModule: Send + 'static {
    fn autonomous_main(&mut self, ctx: &InstinctContext) -> InstinctResult;
}

impl<F> InstinctModule for F
where
    F: FnMut(&InstinctContext) -> InstinctResult + Send + 'static,
{
    fn autonomous_main(&mut self, ctx: &InstinctContext) -> InstinctResult {
        self(ctx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    BlockedWaitingToStart,
    Running,
    SuspendedWaitingToStop,
}

/// How the most recent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    ModeOver,
    Faulted,
}

struct Shared {
    label: String,
    state: Mutex<WorkerState>,
    last_outcome: Mutex<Option<RunOutcome>>,
    runs: AtomicU64,
    shutdown: Arc<AtomicBool>,
}

impl Shared {
    fn enter(&self, state: WorkerState) {
        let mut current = self.state.lock();
        if *current != state {
            tracing::debug!("Instinct '{}': {:?} -> {:?}", self.label, *current, state);
            *current = state;
        }
    }
}

/// Handle to a running Instinct worker.
///
/// Dropping the handle asks the worker to stop but does not wait for it.
pub struct Instinct {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Instinct {
    /// Spawn the worker. `module` runs each time `should_run` becomes true.
    pub fn spawn<M: InstinctModule>(
        label: impl Into<String>,
        should_run: BooleanInput,
        clock: SharedClock,
        config: &InstinctConfig,
        module: M,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let label = label.into();
        let shared = Arc::new(Shared {
            label: label.clone(),
            state: Mutex::new(WorkerState::BlockedWaitingToStart),
            last_outcome: Mutex::new(None),
            runs: AtomicU64::new(0),
            shutdown: Arc::new(AtomicBool::new(false)),
        });
        let ctx = InstinctContext::with_shutdown(should_run, clock, config.cycle(), Arc::clone(&shared.shutdown));

        let thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("instinct-{}", label))
                .spawn(move || worker_loop(&shared, &ctx, module))
                .with_context(|| format!("Failed to spawn Instinct worker '{}'", label))?
        };
        tracing::info!("Instinct '{}' worker started (cycle {:?})", label, config.cycle());

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state.lock()
    }

    /// Number of times the routine body has been entered.
    pub fn runs(&self) -> u64 {
        self.shared.runs.load(Ordering::Acquire)
    }

    pub fn last_outcome(&self) -> Option<RunOutcome> {
        *self.shared.last_outcome.lock()
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// A running body sees the mode end at its next wait. With a virtual clock
    /// the worker only notices once the clock moves past its current sleep.
    pub fn shutdown(mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Instinct '{}' worker panicked during shutdown", self.shared.label);
            }
        }
        tracing::info!("Instinct '{}' worker stopped", self.shared.label);
    }
}

impl Drop for Instinct {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for Instinct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instinct")
            .field("label", &self.shared.label)
            .field("state", &self.state())
            .field("runs", &self.runs())
            .finish()
    }
}

fn worker_loop<M: InstinctModule>(shared: &Shared, ctx: &InstinctContext, mut module: M) {
    let stopping = || shared.shutdown.load(Ordering::Acquire);
    let should_run = || ctx.is_running();

    loop {
        shared.enter(WorkerState::BlockedWaitingToStart);
        while !should_run() {
            if stopping() {
                return;
            }
            ctx.clock().sleep(ctx.cycle());
        }

        shared.enter(WorkerState::Running);
        shared.runs.fetch_add(1, Ordering::AcqRel);
        tracing::info!("Instinct '{}' starting routine", shared.label);
        let outcome = run_once(&shared.label, ctx, &mut module);
        *shared.last_outcome.lock() = Some(outcome);

        shared.enter(WorkerState::SuspendedWaitingToStop);
        while should_run() {
            if stopping() {
                return;
            }
            ctx.clock().sleep(ctx.cycle());
        }
        if stopping() {
            return;
        }
    }
}

fn run_once<M: InstinctModule>(label: &str, ctx: &InstinctContext, module: &mut M) -> RunOutcome {
    match catch_unwind(AssertUnwindSafe(|| module.autonomous_main(ctx))) {
        Ok(Ok(())) => {
            tracing::info!("Instinct '{}' routine finished", label);
            RunOutcome::Completed
        }
        Ok(Err(InstinctError::ModeOver)) => {
            tracing::info!("Instinct '{}' routine ended: mode over", label);
            RunOutcome::ModeOver
        }
        Ok(Err(InstinctError::Fault(e))) => {
            tracing::error!("Instinct '{}' routine failed: {:#}", label, e);
            RunOutcome::Faulted
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!("Instinct '{}' routine panicked: {}", label, message);
            RunOutcome::Faulted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex_core::{BooleanCell, Sink, SystemClock};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn fast_config() -> InstinctConfig {
        InstinctConfig::with_cycle(Duration::from_millis(2)).unwrap()
    }

    fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_runs_once_per_activation() {
        let run = BooleanCell::shared(false);
        let entered = Arc::new(AtomicUsize::new(0));
        let body = {
            let entered = Arc::clone(&entered);
            move |_ctx: &InstinctContext| -> InstinctResult {
                entered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };
        let instinct = Instinct::spawn("drive", run.clone(), SystemClock::shared(), &fast_config(), body).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(instinct.state(), WorkerState::BlockedWaitingToStart);
        assert_eq!(entered.load(Ordering::SeqCst), 0);

        run.set(true).unwrap();
        eventually("suspended", || instinct.state() == WorkerState::SuspendedWaitingToStop);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(entered.load(Ordering::SeqCst), 1);
        assert_eq!(instinct.last_outcome(), Some(RunOutcome::Completed));

        run.set(false).unwrap();
        eventually("blocked", || instinct.state() == WorkerState::BlockedWaitingToStart);
        run.set(true).unwrap();
        eventually("second run", || entered.load(Ordering::SeqCst) == 2);

        instinct.shutdown();
    }

    #[test]
    fn test_mode_over_stops_routine_quietly() {
        let run = BooleanCell::shared(true);
        let after_wait = Arc::new(AtomicUsize::new(0));
        let body = {
            let after_wait = Arc::clone(&after_wait);
            move |ctx: &InstinctContext| -> InstinctResult {
                ctx.wait_for_time(60_000)?;
                after_wait.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };
        let instinct = Instinct::spawn("auto", run.clone(), SystemClock::shared(), &fast_config(), body).unwrap();

        eventually("running", || instinct.state() == WorkerState::Running);
        run.set(false).unwrap();
        eventually("blocked", || instinct.state() == WorkerState::BlockedWaitingToStart);

        assert_eq!(instinct.last_outcome(), Some(RunOutcome::ModeOver));
        assert_eq!(after_wait.load(Ordering::SeqCst), 0);
        instinct.shutdown();
    }

    #[test]
    fn test_fault_and_panic_end_the_run() {
        let run = BooleanCell::shared(true);
        let attempt = Arc::new(AtomicUsize::new(0));
        let body = {
            let attempt = Arc::clone(&attempt);
            move |_ctx: &InstinctContext| -> InstinctResult {
                if attempt.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(anyhow::anyhow!("gyro not calibrated").into())
                } else {
                    panic!("arm out of range");
                }
            }
        };
        let instinct = Instinct::spawn("faulty", run.clone(), SystemClock::shared(), &fast_config(), body).unwrap();

        eventually("first run", || instinct.last_outcome() == Some(RunOutcome::Faulted));
        eventually("suspended", || instinct.state() == WorkerState::SuspendedWaitingToStop);

        run.set(false).unwrap();
        eventually("blocked", || instinct.state() == WorkerState::BlockedWaitingToStart);
        run.set(true).unwrap();
        eventually("second run", || instinct.runs() == 2);
        eventually("suspended", || instinct.state() == WorkerState::SuspendedWaitingToStop);
        assert_eq!(instinct.last_outcome(), Some(RunOutcome::Faulted));

        instinct.shutdown();
    }

    #[test]
    fn test_shutdown_interrupts_running_routine() {
        let run = BooleanCell::shared(true);
        let body = |ctx: &InstinctContext| -> InstinctResult {
            loop {
                ctx.wait_for_time(10)?;
            }
        };
        let instinct = Instinct::spawn("loop", run, SystemClock::shared(), &fast_config(), body).unwrap();
        eventually("running", || instinct.state() == WorkerState::Running);
        instinct.shutdown();
    }

    #[test]
    fn test_zero_cycle_rejected() {
        let config = InstinctConfig { cycle_ms: 0 };
        let result = Instinct::spawn(
            "bad",
            BooleanCell::shared(false),
            SystemClock::shared(),
            &config,
            |_: &InstinctContext| -> InstinctResult { Ok(()) },
        );
        assert!(result.is_err());
    }
}
