//! Value signals: floats, booleans and discrete integers.
//!
//! Each signal kind comes in four capability forms:
//! - [`Poll`]: read the current value.
//! - [`Observable`]: poll, plus a change notification ([`EventSource`]).
//! - [`Sink`]: write-only.
//! - [`ValueCell`]: all of the above, holding the current value.
//!
//! Setting a cell notifies subscribers synchronously before `set` returns, and
//! only when the value actually changed. Floats compare bitwise, so writing NaN
//! over NaN is not a change.

use crate::error::Fault;
use crate::event::{notify, EventSink, EventSource, SharedEventSink};
use crate::subscribers::{Subscribers, Subscription};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::{Arc, Weak};

/// Scalar types that can flow through signals.
pub trait SignalValue: Copy + Send + Sync + Debug + 'static {
    /// Whether writing `other` over `self` counts as "no change".
    fn same_as(&self, other: &Self) -> bool;
}

impl SignalValue for f32 {
    fn same_as(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl SignalValue for bool {
    fn same_as(&self, other: &Self) -> bool {
        self == other
    }
}

impl SignalValue for i64 {
    fn same_as(&self, other: &Self) -> bool {
        self == other
    }
}

pub trait Poll<T>: Send + Sync {
    fn get(&self) -> T;
}

pub trait Sink<T>: Send + Sync {
    fn set(&self, value: T) -> Result<(), Fault>;
}

/// A pollable value whose changes are announced through [`EventSource::on_event`].
pub trait Observable<T>: Poll<T> + EventSource {}

impl<T, O> Observable<T> for O where O: Poll<T> + EventSource + ?Sized {}

impl<T, F> Sink<T> for F
where
    F: Fn(T) -> Result<(), Fault> + Send + Sync,
{
    fn set(&self, value: T) -> Result<(), Fault> {
        self(value)
    }
}

pub type FloatPoll = Arc<dyn Poll<f32>>;
pub type BooleanPoll = Arc<dyn Poll<bool>>;
pub type FloatInput = Arc<dyn Observable<f32>>;
pub type BooleanInput = Arc<dyn Observable<bool>>;
pub type DiscreteInput = Arc<dyn Observable<i64>>;
pub type FloatOutput = Arc<dyn Sink<f32>>;
pub type BooleanOutput = Arc<dyn Sink<bool>>;
pub type DiscreteOutput = Arc<dyn Sink<i64>>;
pub type FloatCell = ValueCell<f32>;
pub type BooleanCell = ValueCell<bool>;
pub type DiscreteCell = ValueCell<i64>;

/// Wrap a closure as a sink.
pub fn sink_fn<T, F>(f: F) -> Arc<dyn Sink<T>>
where
    T: 'static,
    F: Fn(T) -> Result<(), Fault> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a poll.
pub fn poll_fn<T, F>(f: F) -> Arc<dyn Poll<T>>
where
    T: 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    struct PollFn<F>(F);
    impl<T, F: Fn() -> T + Send + Sync> Poll<T> for PollFn<F> {
        fn get(&self) -> T {
            (self.0)()
        }
    }
    Arc::new(PollFn(f))
}

/// A sink that discards every value.
pub fn ignored<T: 'static>() -> Arc<dyn Sink<T>> {
    sink_fn(|_| Ok(()))
}

/// An observable that never changes.
pub fn constant<T: SignalValue>(value: T) -> Arc<dyn Observable<T>> {
    struct Constant<T>(T);
    impl<T: SignalValue> Poll<T> for Constant<T> {
        fn get(&self) -> T {
            self.0
        }
    }
    impl<T: SignalValue> EventSource for Constant<T> {
        fn on_event(&self, _target: SharedEventSink) -> Subscription {
            Subscription::empty()
        }
    }
    Arc::new(Constant(value))
}

// ============================================================================
// ValueCell
// ============================================================================

/// A stateful signal: holds a value, accepts writes, announces changes.
pub struct ValueCell<T: SignalValue> {
    value: Mutex<T>,
    subscribers: Arc<Subscribers<dyn EventSink>>,
}

impl<T: SignalValue> ValueCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: Mutex::new(initial),
            subscribers: Subscribers::new(),
        }
    }

    pub fn shared(initial: T) -> Arc<Self> {
        Arc::new(Self::new(initial))
    }

    /// Store `value` and report whether it differed, without notifying.
    fn store(&self, value: T) -> bool {
        let mut current = self.value.lock();
        if current.same_as(&value) {
            false
        } else {
            *current = value;
            true
        }
    }

    /// Push a new value to every subscriber that asked for it.
    /// The lock is released before any subscriber runs.
    fn set_and_notify(&self, value: T) -> Result<(), Fault> {
        if self.store(value) {
            notify(&self.subscribers)
        } else {
            Ok(())
        }
    }

    /// An event sink that writes `value` into this cell when fired.
    pub fn set_event(self: &Arc<Self>, value: T) -> SharedEventSink {
        let cell = Arc::clone(self);
        Arc::new(move || cell.set(value))
    }
}

impl ValueCell<bool> {
    pub fn toggle(&self) -> Result<(), Fault> {
        {
            let mut current = self.value.lock();
            *current = !*current;
        }
        notify(&self.subscribers)
    }

    /// An event sink that flips this cell when fired.
    pub fn toggle_event(self: &Arc<Self>) -> SharedEventSink {
        let cell = Arc::clone(self);
        Arc::new(move || cell.toggle())
    }
}

impl<T: SignalValue> Poll<T> for ValueCell<T> {
    fn get(&self) -> T {
        *self.value.lock()
    }
}

impl<T: SignalValue> Sink<T> for ValueCell<T> {
    fn set(&self, value: T) -> Result<(), Fault> {
        self.set_and_notify(value)
    }
}

impl<T: SignalValue> EventSource for ValueCell<T> {
    fn on_event(&self, target: SharedEventSink) -> Subscription {
        self.subscribers.add(target)
    }
}

impl<T: SignalValue + Default> Default for ValueCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: SignalValue> Debug for ValueCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCell")
            .field("value", &self.get())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

// ============================================================================
// Derived values
// ============================================================================

/// A value recomputed whenever one of the sources it follows changes.
///
/// Sources hold only a weak reference back to the derived value, so dropping
/// every handle to it turns the follow subscriptions into no-ops.
pub struct Derived<T: SignalValue> {
    cell: ValueCell<T>,
    compute: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: SignalValue> Derived<T> {
    pub fn new<F>(compute: F) -> Arc<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let initial = compute();
        Arc::new(Self {
            cell: ValueCell::new(initial),
            compute: Box::new(compute),
        })
    }

    /// Recompute now and notify subscribers if the result changed.
    pub fn refresh(&self) -> Result<(), Fault> {
        self.cell.set((self.compute)())
    }

    /// Recompute every time `source` fires.
    pub fn follow<S>(self: &Arc<Self>, source: &S) -> Subscription
    where
        S: EventSource + ?Sized,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        source.on_event(Arc::new(move || match weak.upgrade() {
            Some(derived) => derived.refresh(),
            None => Ok(()),
        }))
    }
}

impl<T: SignalValue> Poll<T> for Derived<T> {
    fn get(&self) -> T {
        self.cell.get()
    }
}

impl<T: SignalValue> EventSource for Derived<T> {
    fn on_event(&self, target: SharedEventSink) -> Subscription {
        self.cell.on_event(target)
    }
}

// ============================================================================
// Wiring helpers
// ============================================================================

/// Write the current value of `input` into `target` now and after every change.
///
/// The returned subscription holds only a weak reference to `input`.
pub fn connect<T: SignalValue>(
    input: &Arc<dyn Observable<T>>,
    target: Arc<dyn Sink<T>>,
) -> Result<Subscription, Fault> {
    target.set(input.get())?;
    let weak = Arc::downgrade(input);
    Ok(input.on_event(Arc::new(move || match weak.upgrade() {
        Some(input) => target.set(input.get()),
        None => Ok(()),
    })))
}

/// Subscribe `target` to changes of `input` without pushing the current value.
pub fn on_change<T: SignalValue>(input: &Arc<dyn Observable<T>>, target: Arc<dyn Sink<T>>) -> Subscription {
    let weak = Arc::downgrade(input);
    input.on_event(Arc::new(move || match weak.upgrade() {
        Some(input) => target.set(input.get()),
        None => Ok(()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(count: &Arc<AtomicUsize>) -> SharedEventSink {
        let count = Arc::clone(count);
        event_fn(move || {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_cell_notifies_only_on_change() {
        let cell = FloatCell::new(0.0);
        let count = Arc::new(AtomicUsize::new(0));
        let _sub = cell.on_event(counter(&count));

        cell.set(1.5).unwrap();
        cell.set(1.5).unwrap();
        cell.set(-2.0).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(cell.get(), -2.0);
    }

    #[test]
    fn test_nan_is_stored_and_not_a_change_twice() {
        let cell = FloatCell::new(0.0);
        let count = Arc::new(AtomicUsize::new(0));
        let _sub = cell.on_event(counter(&count));

        cell.set(f32::NAN).unwrap();
        cell.set(f32::NAN).unwrap();
        assert!(cell.get().is_nan());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscriber_sees_new_value_synchronously() {
        let cell = BooleanCell::shared(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let seen = Arc::clone(&seen);
            let reader = Arc::clone(&cell);
            cell.on_event(event_fn(move || {
                seen.lock().push(reader.get());
                Ok(())
            }))
        };
        cell.set(true).unwrap();
        cell.toggle().unwrap();
        assert_eq!(*seen.lock(), vec![true, false]);
    }

    #[test]
    fn test_connect_pushes_current_value_then_changes() {
        let source = FloatCell::shared(3.0);
        let target = FloatCell::shared(0.0);
        let input: FloatInput = source.clone();
        let sub = connect(&input, target.clone()).unwrap();
        assert_eq!(target.get(), 3.0);

        source.set(4.0).unwrap();
        assert_eq!(target.get(), 4.0);

        sub.unsubscribe();
        source.set(5.0).unwrap();
        assert_eq!(target.get(), 4.0);
    }

    #[test]
    fn test_derived_tracks_sources() {
        let a = FloatCell::shared(1.0);
        let b = FloatCell::shared(2.0);
        let derived = {
            let (a, b) = (a.clone(), b.clone());
            Derived::new(move || a.get() * b.get())
        };
        let _fa = derived.follow(&*a);
        let _fb = derived.follow(&*b);
        assert_eq!(derived.get(), 2.0);
        a.set(3.0).unwrap();
        assert_eq!(derived.get(), 6.0);
        b.set(0.5).unwrap();
        assert_eq!(derived.get(), 1.5);
    }

    #[test]
    fn test_set_propagates_subscriber_fault() {
        let cell = DiscreteCell::new(0);
        let _sub = cell.on_event(event_fn(|| Err(anyhow::anyhow!("driver fault"))));
        assert!(cell.set(7).is_err());
        assert_eq!(cell.get(), 7);
    }

    #[test]
    fn test_set_event_and_toggle_event() {
        let cell = BooleanCell::shared(false);
        cell.set_event(true).event().unwrap();
        assert!(cell.get());
        cell.toggle_event().event().unwrap();
        assert!(!cell.get());
    }
}
