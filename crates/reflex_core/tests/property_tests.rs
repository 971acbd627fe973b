//! Property-based tests for reflex_core.
//!
//! Checks the bounding rules and change-only notification over arbitrary
//! inputs rather than hand-picked values.

use proptest::prelude::*;
use reflex_core::combinators::{deadzone_value, limit, limit_value};
use reflex_core::{EventSource, FloatCell, FloatInput, Poll, Sink};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Strategies
// ============================================================================

/// Any f32 including NaN and both infinities.
fn arb_any_f32() -> impl Strategy<Value = f32> {
    prop_oneof![
        8 => -1.0e6f32..1.0e6,
        1 => Just(f32::NAN),
        1 => Just(f32::INFINITY),
        1 => Just(f32::NEG_INFINITY),
    ]
}

/// A finite, non-empty range.
fn arb_range() -> impl Strategy<Value = (f32, f32)> {
    (-1.0e3f32..1.0e3, 0.0f32..1.0e3).prop_map(|(min, width)| (min, min + width))
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn limit_stays_in_range_unless_nan(v in arb_any_f32(), (min, max) in arb_range()) {
        let out = limit_value(v, min, max);
        if v.is_nan() {
            prop_assert!(out.is_nan());
        } else {
            prop_assert!(out >= min && out <= max, "{} clamped to {} outside [{}, {}]", v, out, min, max);
        }
    }

    #[test]
    fn limit_is_identity_inside_range(t in 0.0f32..=1.0, (min, max) in arb_range()) {
        let v = min + (max - min) * t;
        prop_assume!(v >= min && v <= max);
        prop_assert_eq!(limit_value(v, min, max), v);
    }

    #[test]
    fn nan_bound_disables_that_side(v in -1.0e6f32..1.0e6, bound in -1.0e3f32..1.0e3) {
        prop_assert!(limit_value(v, f32::NAN, bound) <= bound);
        prop_assert!(limit_value(v, bound, f32::NAN) >= bound);
        prop_assert_eq!(limit_value(v, f32::NAN, f32::NAN), v);
    }

    #[test]
    fn deadzone_zeroes_small_values_only(v in arb_any_f32(), threshold in 0.0f32..100.0) {
        let out = deadzone_value(v, threshold);
        if v.is_nan() {
            prop_assert!(out.is_nan());
        } else if v.abs() < threshold {
            prop_assert_eq!(out, 0.0);
        } else {
            prop_assert_eq!(out, v);
        }
    }

    #[test]
    fn cell_notifies_once_per_distinct_value(values in prop::collection::vec(-3i32..3, 1..40)) {
        let cell = FloatCell::shared(0.0);
        let notified = Arc::new(AtomicUsize::new(0));
        let _s = {
            let notified = Arc::clone(&notified);
            cell.on_event(reflex_core::event_fn(move || {
                notified.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        };

        let mut last = 0.0f32;
        let mut expected = 0;
        for v in values {
            let v = v as f32;
            if v != last {
                expected += 1;
                last = v;
            }
            cell.set(v).unwrap();
        }
        prop_assert_eq!(notified.load(Ordering::SeqCst), expected);
        prop_assert_eq!(cell.get(), last);
    }

    #[test]
    fn derived_limit_tracks_source(values in prop::collection::vec(arb_any_f32(), 1..20), (min, max) in arb_range()) {
        let cell = FloatCell::shared(0.0);
        let input: FloatInput = cell.clone();
        let limited = limit(&input, min, max).unwrap();
        for v in values {
            cell.set(v).unwrap();
            let expected = limit_value(v, min, max);
            let got = limited.get();
            prop_assert!(
                got == expected || (got.is_nan() && expected.is_nan()),
                "source {} gave {} expected {}", v, got, expected
            );
        }
    }
}
