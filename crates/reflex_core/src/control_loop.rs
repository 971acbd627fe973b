//! Fixed-period control-loop driver.
//!
//! Each tick fires the periodic event with failure recovery, so a faulting
//! module is logged and skipped while every other subscriber still runs.
//! A decaying failure score decides whether the low-priority event fires too.
//! It rises sharply on every failed tick and drains by one on every clean one.

use crate::config::ControlLoopConfig;
use crate::error::ReflexError;
use crate::event::{EventCell, EventSource, SharedEventSink};
use crate::subscribers::Subscription;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Score added for each tick on which some subscriber failed.
const FAILURE_PENALTY: u32 = 10;
const FAILURE_SCORE_CAP: u32 = 1000;

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub failed: bool,
    pub low_priority_skipped: bool,
}

pub struct ControlLoop {
    config: ControlLoopConfig,
    periodic: EventCell,
    low_priority: EventCell,
    failure_score: AtomicU32,
    ticks: AtomicU64,
}

impl ControlLoop {
    pub fn new(config: ControlLoopConfig) -> Result<Arc<Self>, ReflexError> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            periodic: EventCell::named("control-loop tick"),
            low_priority: EventCell::named("control-loop low-priority tick"),
            failure_score: AtomicU32::new(0),
            ticks: AtomicU64::new(0),
        }))
    }

    pub fn config(&self) -> &ControlLoopConfig {
        &self.config
    }

    /// The periodic event, for wiring timers and dispatchers to it.
    pub fn periodic(&self) -> &EventCell {
        &self.periodic
    }

    pub fn on_tick(&self, target: SharedEventSink) -> Subscription {
        self.periodic.on_event(target)
    }

    /// Work that may be shed while the loop is recovering from failures.
    pub fn on_low_priority_tick(&self, target: SharedEventSink) -> Subscription {
        self.low_priority.on_event(target)
    }

    pub fn failure_score(&self) -> u32 {
        self.failure_score.load(Ordering::Relaxed)
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Run one tick synchronously. Never fails; subscriber faults are logged.
    pub fn tick(&self) -> TickReport {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let mut failed = self.periodic.fire_with_failure_recovery();

        let low_priority_skipped = self.failure_score() > self.config.failure_threshold;
        if low_priority_skipped {
            tracing::debug!(
                "Skipping low-priority tick (failure score {} > {})",
                self.failure_score(),
                self.config.failure_threshold
            );
        } else {
            failed |= self.low_priority.fire_with_failure_recovery();
        }

        self.record_outcome(failed);
        TickReport {
            failed,
            low_priority_skipped,
        }
    }

    fn record_outcome(&self, failed: bool) {
        let _ = self
            .failure_score
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |score| {
                Some(if failed {
                    (score + FAILURE_PENALTY).min(FAILURE_SCORE_CAP)
                } else {
                    score.saturating_sub(1)
                })
            });
    }

    /// Drive ticks from a tokio interval until the handle is stopped.
    /// Must be called from within a tokio runtime.
    pub fn spawn(self: &Arc<Self>) -> ControlLoopHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let period = self.config.period();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!("Control loop started with period {:?}", period);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = this.tick();
                        if report.failed {
                            tracing::trace!("Tick {} recovered from a failure", this.tick_count());
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }

            tracing::info!("Control loop stopped after {} ticks", this.tick_count());
        });

        ControlLoopHandle { stop_tx, task }
    }
}

pub struct ControlLoopHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ControlLoopHandle {
    /// Stop ticking and wait for the current tick to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("Control loop task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_fn;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting(count: &Arc<AtomicUsize>) -> SharedEventSink {
        let count = Arc::clone(count);
        event_fn(move || {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_faulting_module_does_not_starve_others() {
        let cl = ControlLoop::new(ControlLoopConfig::default()).unwrap();
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let _a = cl.on_tick(counting(&before));
        let _b = cl.on_tick(event_fn(|| Err(anyhow::anyhow!("sensor unplugged"))));
        let _c = cl.on_tick(counting(&after));

        let report = cl.tick();
        assert!(report.failed);
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_low_priority_shed_while_failing_then_restored() {
        let config = ControlLoopConfig {
            period_ms: 10,
            failure_threshold: 10,
        };
        let cl = ControlLoop::new(config).unwrap();
        let low = Arc::new(AtomicUsize::new(0));
        let _l = cl.on_low_priority_tick(counting(&low));
        let broken = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let _b = {
            let broken = Arc::clone(&broken);
            cl.on_tick(event_fn(move || {
                if broken.load(Ordering::SeqCst) {
                    anyhow::bail!("still broken");
                }
                Ok(())
            }))
        };

        cl.tick();
        cl.tick();
        assert_eq!(cl.failure_score(), 20);
        let report = cl.tick();
        assert!(report.low_priority_skipped);
        assert_eq!(low.load(Ordering::SeqCst), 2);

        broken.store(false, Ordering::SeqCst);
        for _ in 0..30 {
            cl.tick();
        }
        assert_eq!(cl.failure_score(), 0);
        assert!(!cl.tick().low_priority_skipped);
    }

    #[test]
    fn test_zero_period_rejected() {
        let config = ControlLoopConfig {
            period_ms: 0,
            failure_threshold: 1,
        };
        assert!(ControlLoop::new(config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_ticks_until_stopped() {
        let cl = ControlLoop::new(ControlLoopConfig::default()).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let _s = cl.on_tick(counting(&count));

        let handle = cl.spawn();
        tokio::time::sleep(Duration::from_millis(105)).await;
        handle.stop().await;

        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 5, "expected at least 5 ticks, got {}", ticks);
        let frozen = ticks;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), frozen);
    }
}
