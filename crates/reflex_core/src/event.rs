//! Pure events: "this happened", with no payload.
//!
//! Two firing modes exist:
//! - [`EventCell::fire`] stops at the first failing subscriber and returns its
//!   fault to the caller.
//! - [`EventCell::fire_with_failure_recovery`] notifies every subscriber,
//!   logging faults as they happen. The control-loop tick uses this mode so one
//!   broken module cannot starve the rest.

use crate::error::Fault;
use crate::subscribers::{Subscribers, Subscription};
use std::sync::Arc;

/// Something that can be told an event happened.
pub trait EventSink: Send + Sync {
    fn event(&self) -> Result<(), Fault>;
}

/// Something that announces events to subscribers.
pub trait EventSource: Send + Sync {
    /// Notify `target` every time this source fires, after all earlier subscribers.
    fn on_event(&self, target: SharedEventSink) -> Subscription;
}

pub type SharedEventSink = Arc<dyn EventSink>;
pub type SharedEventSource = Arc<dyn EventSource>;

impl<F> EventSink for F
where
    F: Fn() -> Result<(), Fault> + Send + Sync,
{
    fn event(&self) -> Result<(), Fault> {
        self()
    }
}

/// Wrap a closure as an event sink.
pub fn event_fn<F>(f: F) -> SharedEventSink
where
    F: Fn() -> Result<(), Fault> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A sink that ignores every event.
pub fn ignored_event() -> SharedEventSink {
    event_fn(|| Ok(()))
}

/// An event source that never fires.
pub fn never() -> SharedEventSource {
    struct Never;
    impl EventSource for Never {
        fn on_event(&self, _target: SharedEventSink) -> Subscription {
            Subscription::empty()
        }
    }
    Arc::new(Never)
}

/// The standard event producer: fires its subscribers in subscription order.
pub struct EventCell {
    label: String,
    subscribers: Arc<Subscribers<dyn EventSink>>,
}

impl EventCell {
    pub fn new() -> Self {
        Self::named("event")
    }

    /// A cell whose label appears in fault logs.
    pub fn named(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            subscribers: Subscribers::new(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Notify subscribers in order, returning the first fault immediately.
    /// Subscribers after the failing one are not notified.
    pub fn fire(&self) -> Result<(), Fault> {
        notify(&self.subscribers)
    }

    /// Notify every subscriber regardless of faults.
    ///
    /// Each fault is logged at error level. Returns `true` if any subscriber
    /// failed.
    pub fn fire_with_failure_recovery(&self) -> bool {
        notify_with_recovery(&self.subscribers, &self.label)
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for EventCell {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventCell {
    fn event(&self) -> Result<(), Fault> {
        self.fire()
    }
}

impl EventSource for EventCell {
    fn on_event(&self, target: SharedEventSink) -> Subscription {
        self.subscribers.add(target)
    }
}

impl std::fmt::Debug for EventCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCell")
            .field("label", &self.label)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

pub(crate) fn notify(subscribers: &Subscribers<dyn EventSink>) -> Result<(), Fault> {
    for entry in subscribers.snapshot().iter() {
        entry.target.event()?;
    }
    Ok(())
}

pub(crate) fn notify_with_recovery(subscribers: &Subscribers<dyn EventSink>, label: &str) -> bool {
    let mut failed = false;
    for entry in subscribers.snapshot().iter() {
        if let Err(e) = entry.target.event() {
            tracing::error!("Subscriber of '{}' failed, continuing with the rest: {:#}", label, e);
            failed = true;
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> SharedEventSink {
        let log = Arc::clone(log);
        event_fn(move || {
            log.lock().push(name);
            Ok(())
        })
    }

    #[test]
    fn test_fires_in_subscription_order() {
        let cell = EventCell::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = cell.on_event(recorder(&log, "a"));
        let _b = cell.on_event(recorder(&log, "b"));
        let _c = cell.on_event(recorder(&log, "c"));

        cell.fire().unwrap();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_plain_fire_stops_at_first_fault() {
        let cell = EventCell::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = cell.on_event(recorder(&log, "a"));
        let _b = cell.on_event(event_fn(|| Err(anyhow::anyhow!("broken"))));
        let _c = cell.on_event(recorder(&log, "c"));

        let err = cell.fire().unwrap_err();
        assert_eq!(err.to_string(), "broken");
        assert_eq!(*log.lock(), vec!["a"]);
    }

    #[test]
    fn test_recovery_fire_reaches_every_subscriber() {
        let cell = EventCell::named("tick");
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = cell.on_event(recorder(&log, "a"));
        let _b = cell.on_event(event_fn(|| Err(anyhow::anyhow!("broken"))));
        let _c = cell.on_event(recorder(&log, "c"));

        assert!(cell.fire_with_failure_recovery());
        assert_eq!(*log.lock(), vec!["a", "c"]);

        log.lock().clear();
        let clean = EventCell::new();
        let _d = clean.on_event(recorder(&log, "d"));
        assert!(!clean.fire_with_failure_recovery());
    }

    #[test]
    fn test_self_unsubscribe_during_fire() {
        let cell = Arc::new(EventCell::new());
        let count = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let once = {
            let slot = Arc::clone(&slot);
            let count = Arc::clone(&count);
            event_fn(move || {
                count.fetch_add(1, Ordering::SeqCst);
                if let Some(sub) = slot.lock().take() {
                    sub.unsubscribe();
                }
                Ok(())
            })
        };
        *slot.lock() = Some(cell.on_event(once));

        let after = Arc::new(AtomicUsize::new(0));
        let _after = {
            let after = Arc::clone(&after);
            cell.on_event(event_fn(move || {
                after.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        };

        cell.fire().unwrap();
        cell.fire().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_never_source_has_no_effect() {
        let source = never();
        let sub = source.on_event(ignored_event());
        sub.unsubscribe();
    }
}
