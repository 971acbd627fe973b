//! Pure constructors that build new signals out of existing ones.
//!
//! Combinators are meant to be called while wiring, once at startup. The
//! derived signals they return recompute synchronously whenever one of their
//! inputs changes.
//!
//! ## Non-finite values
//!
//! NaN and ±infinity flow through arithmetic unchanged. Bounding combinators
//! follow one rule everywhere:
//! - a NaN *input* passes through unclamped,
//! - an infinite input saturates to the finite bound,
//! - a NaN *bound* is treated as "no bound on that side".

use crate::error::ReflexError;
use crate::event::{EventCell, EventSink, EventSource, SharedEventSink, SharedEventSource};
use crate::signal::{
    BooleanInput, BooleanOutput, BooleanPoll, Derived, FloatInput, FloatOutput, Observable, Poll,
    SignalValue, Sink, ValueCell,
};
use crate::subscribers::Subscription;
use parking_lot::Mutex;
use std::sync::Arc;

fn derive2<A, B, T, F>(
    a: &Arc<dyn Observable<A>>,
    b: &Arc<dyn Observable<B>>,
    f: F,
) -> Arc<dyn Observable<T>>
where
    A: SignalValue,
    B: SignalValue,
    T: SignalValue,
    F: Fn(A, B) -> T + Send + Sync + 'static,
{
    let derived = {
        let (a, b) = (Arc::clone(a), Arc::clone(b));
        Derived::new(move || f(a.get(), b.get()))
    };
    let _ = derived.follow(&**a);
    let _ = derived.follow(&**b);
    derived
}

fn derive1<A, T, F>(a: &Arc<dyn Observable<A>>, f: F) -> Arc<dyn Observable<T>>
where
    A: SignalValue,
    T: SignalValue,
    F: Fn(A) -> T + Send + Sync + 'static,
{
    let derived = {
        let a = Arc::clone(a);
        Derived::new(move || f(a.get()))
    };
    let _ = derived.follow(&**a);
    derived
}

// ============================================================================
// Boolean
// ============================================================================

pub fn not(input: &BooleanInput) -> BooleanInput {
    derive1(input, |v: bool| !v)
}

pub fn and(a: &BooleanInput, b: &BooleanInput) -> BooleanInput {
    derive2(a, b, |x: bool, y: bool| x && y)
}

pub fn or(a: &BooleanInput, b: &BooleanInput) -> BooleanInput {
    derive2(a, b, |x: bool, y: bool| x || y)
}

pub fn xor(a: &BooleanInput, b: &BooleanInput) -> BooleanInput {
    derive2(a, b, |x: bool, y: bool| x != y)
}

/// True while every input is true. An empty slice is true.
pub fn and_all(inputs: &[BooleanInput]) -> BooleanInput {
    fold_all(inputs, true, |acc, v| acc && v)
}

/// True while any input is true. An empty slice is false.
pub fn or_all(inputs: &[BooleanInput]) -> BooleanInput {
    fold_all(inputs, false, |acc, v| acc || v)
}

fn fold_all(inputs: &[BooleanInput], init: bool, f: fn(bool, bool) -> bool) -> BooleanInput {
    let derived = {
        let inputs: Vec<BooleanInput> = inputs.to_vec();
        Derived::new(move || inputs.iter().fold(init, |acc, i| f(acc, i.get())))
    };
    for input in inputs {
        let _ = derived.follow(&**input);
    }
    derived
}

/// A sink that writes the inverse of every value into `target`.
pub fn not_output(target: BooleanOutput) -> BooleanOutput {
    Arc::new(move |v: bool| target.set(!v))
}

/// Fires when `input` goes from false to true.
pub fn on_press(input: &BooleanInput) -> SharedEventSource {
    edge(input, |was, now| !was && now)
}

/// Fires when `input` goes from true to false.
pub fn on_release(input: &BooleanInput) -> SharedEventSource {
    edge(input, |was, now| was && !now)
}

/// Fires whenever `input` flips.
pub fn on_flip(input: &BooleanInput) -> SharedEventSource {
    edge(input, |was, now| was != now)
}

fn edge(input: &BooleanInput, fires: fn(bool, bool) -> bool) -> SharedEventSource {
    let out = Arc::new(EventCell::named("edge"));
    let last = Mutex::new(input.get());
    let weak_input = Arc::downgrade(input);
    let target = Arc::clone(&out);
    let _ = input.on_event(Arc::new(move || {
        let Some(input) = weak_input.upgrade() else {
            return Ok(());
        };
        let now = input.get();
        let was = std::mem::replace(&mut *last.lock(), now);
        if fires(was, now) {
            target.fire()
        } else {
            Ok(())
        }
    }));
    out
}

/// Write `value` into `target` every time `when` fires.
pub fn set_when<T, S>(target: Arc<dyn Sink<T>>, value: T, when: &S) -> Subscription
where
    T: SignalValue,
    S: EventSource + ?Sized,
{
    when.on_event(Arc::new(move || target.set(value)))
}

/// Flip `cell` every time `when` fires.
pub fn toggle_when<S: EventSource + ?Sized>(cell: &Arc<ValueCell<bool>>, when: &S) -> Subscription {
    when.on_event(cell.toggle_event())
}

// ============================================================================
// Float
// ============================================================================

pub fn add(a: &FloatInput, b: &FloatInput) -> FloatInput {
    derive2(a, b, |x: f32, y: f32| x + y)
}

pub fn subtract(a: &FloatInput, b: &FloatInput) -> FloatInput {
    derive2(a, b, |x: f32, y: f32| x - y)
}

pub fn multiply(a: &FloatInput, b: &FloatInput) -> FloatInput {
    derive2(a, b, |x: f32, y: f32| x * y)
}

pub fn negate(input: &FloatInput) -> FloatInput {
    derive1(input, |v: f32| -v)
}

pub fn scale(input: &FloatInput, factor: f32) -> FloatInput {
    derive1(input, move |v: f32| v * factor)
}

/// Values with magnitude below `threshold` read as zero. NaN passes through.
pub fn deadzone_value(value: f32, threshold: f32) -> f32 {
    if value.is_nan() || value.abs() >= threshold {
        value
    } else {
        0.0
    }
}

/// Clamp `value` into `[min, max]` following the module's non-finite rules.
pub fn limit_value(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        return value;
    }
    let mut v = value;
    if !min.is_nan() && v < min {
        v = min;
    }
    if !max.is_nan() && v > max {
        v = max;
    }
    v
}

pub fn deadzone(input: &FloatInput, threshold: f32) -> Result<FloatInput, ReflexError> {
    check_threshold(threshold)?;
    Ok(derive1(input, move |v: f32| deadzone_value(v, threshold)))
}

/// Clamp `input` into the fixed range `[min, max]`.
pub fn limit(input: &FloatInput, min: f32, max: f32) -> Result<FloatInput, ReflexError> {
    check_range(min, max)?;
    Ok(derive1(input, move |v: f32| limit_value(v, min, max)))
}

/// Clamp `input` into a range whose bounds are themselves live signals.
/// A NaN bound disables that side of the clamp.
pub fn limit_by(input: &FloatInput, min: &FloatInput, max: &FloatInput) -> FloatInput {
    let derived = {
        let (input, min, max) = (Arc::clone(input), Arc::clone(min), Arc::clone(max));
        Derived::new(move || limit_value(input.get(), min.get(), max.get()))
    };
    let _ = derived.follow(&**input);
    let _ = derived.follow(&**min);
    let _ = derived.follow(&**max);
    derived
}

pub fn deadzone_output(target: FloatOutput, threshold: f32) -> Result<FloatOutput, ReflexError> {
    check_threshold(threshold)?;
    Ok(Arc::new(move |v: f32| target.set(deadzone_value(v, threshold))))
}

pub fn limit_output(target: FloatOutput, min: f32, max: f32) -> Result<FloatOutput, ReflexError> {
    check_range(min, max)?;
    Ok(Arc::new(move |v: f32| target.set(limit_value(v, min, max))))
}

pub fn negate_output(target: FloatOutput) -> FloatOutput {
    Arc::new(move |v: f32| target.set(-v))
}

fn check_threshold(threshold: f32) -> Result<(), ReflexError> {
    if threshold.is_nan() || threshold < 0.0 {
        return Err(ReflexError::invalid(format!(
            "deadzone threshold must be a non-negative number, got {}",
            threshold
        )));
    }
    Ok(())
}

fn check_range(min: f32, max: f32) -> Result<(), ReflexError> {
    if min > max {
        return Err(ReflexError::invalid(format!("empty range: min {} > max {}", min, max)));
    }
    Ok(())
}

/// True while `input >= threshold`. NaN reads as false.
pub fn at_least(input: &FloatInput, threshold: f32) -> BooleanInput {
    derive1(input, move |v: f32| v >= threshold)
}

/// True while `input <= threshold`. NaN reads as false.
pub fn at_most(input: &FloatInput, threshold: f32) -> BooleanInput {
    derive1(input, move |v: f32| v <= threshold)
}

/// True while `min <= input <= max`.
pub fn in_range(input: &FloatInput, min: f32, max: f32) -> BooleanInput {
    derive1(input, move |v: f32| v >= min && v <= max)
}

/// True while `a > b`.
pub fn greater_than(a: &FloatInput, b: &FloatInput) -> BooleanInput {
    derive2(a, b, |x: f32, y: f32| x > y)
}

/// `on` while `input` is true, `off` otherwise.
pub fn boolean_to_float(input: &BooleanInput, off: f32, on: f32) -> FloatInput {
    derive1(input, move |v: bool| if v { on } else { off })
}

/// A boolean sink that drives `target` to `on` or `off`.
pub fn float_select_output(target: FloatOutput, off: f32, on: f32) -> BooleanOutput {
    Arc::new(move |v: bool| target.set(if v { on } else { off }))
}

// ============================================================================
// Generic
// ============================================================================

/// Reads `if_true` while `toggle` is true and `if_false` otherwise.
pub fn select<T: SignalValue>(
    toggle: &BooleanInput,
    if_false: &Arc<dyn Observable<T>>,
    if_true: &Arc<dyn Observable<T>>,
) -> Arc<dyn Observable<T>> {
    let derived = {
        let (toggle, if_false, if_true) = (Arc::clone(toggle), Arc::clone(if_false), Arc::clone(if_true));
        Derived::new(move || if toggle.get() { if_true.get() } else { if_false.get() })
    };
    let _ = derived.follow(&**toggle);
    let _ = derived.follow(&**if_false);
    let _ = derived.follow(&**if_true);
    derived
}

/// Turn a pollable value into an observable one by sampling it each time
/// `trigger` fires. Subscribers hear about the most recent sample when it
/// differs from the previous one.
pub fn dispatch<T, S>(poll: Arc<dyn Poll<T>>, trigger: &S) -> Arc<dyn Observable<T>>
where
    T: SignalValue,
    S: EventSource + ?Sized,
{
    let derived = Derived::new(move || poll.get());
    let _ = derived.follow(trigger);
    derived
}

/// Fan a value out to several sinks. Stops at the first failing sink.
pub fn fan_out<T: SignalValue>(targets: Vec<Arc<dyn Sink<T>>>) -> Arc<dyn Sink<T>> {
    Arc::new(move |v: T| targets.iter().try_for_each(|t| t.set(v)))
}

// ============================================================================
// Events
// ============================================================================

/// Fires whenever any of `sources` fires.
pub fn any_event(sources: &[SharedEventSource]) -> SharedEventSource {
    let out = Arc::new(EventCell::named("any_event"));
    for source in sources {
        let _ = source.on_event(Arc::clone(&out) as SharedEventSink);
    }
    out
}

/// Passes `source` through only while `condition` is true.
pub fn event_when<S: EventSource + ?Sized>(source: &S, condition: BooleanPoll) -> SharedEventSource {
    let out = Arc::new(EventCell::named("event_when"));
    let target = Arc::clone(&out);
    let _ = source.on_event(Arc::new(move || {
        if condition.get() {
            target.fire()
        } else {
            Ok(())
        }
    }));
    out
}

/// A sink that forwards each event to every target in order.
pub fn fan_out_events(targets: Vec<SharedEventSink>) -> SharedEventSink {
    Arc::new(move || targets.iter().try_for_each(|t| t.event()))
}

/// Forward every firing of `source` into `target`.
pub fn forward<S: EventSource + ?Sized>(source: &S, target: SharedEventSink) -> Subscription {
    source.on_event(target)
}
