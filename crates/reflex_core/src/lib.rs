//! Reactive dataflow primitives for fixed-period robot control.
//!
//! Values flow from inputs through combinators to outputs; events announce that
//! something happened. Everything here is synchronous: a `set` or `fire`
//! completes all downstream work before it returns.

pub mod combinators;
pub mod config;
pub mod control_loop;
pub mod error;
pub mod event;
pub mod signal;
pub mod state_machine;
pub mod subscribers;
pub mod time;

pub use config::{ControlLoopConfig, InstinctConfig, RecorderConfig, ReflexConfig};
pub use control_loop::{ControlLoop, ControlLoopHandle, TickReport};
pub use error::{Fault, ReflexError, Result};
pub use event::{
    event_fn, ignored_event, never, EventCell, EventSink, EventSource, SharedEventSink, SharedEventSource,
};
pub use signal::{
    connect, constant, ignored, on_change, poll_fn, sink_fn, BooleanCell, BooleanInput, BooleanOutput, BooleanPoll,
    Derived, DiscreteCell, DiscreteInput, DiscreteOutput, FloatCell, FloatInput, FloatOutput, FloatPoll, Observable,
    Poll, SignalValue, Sink, ValueCell,
};
pub use state_machine::{StateMachine, StateRef};
pub use subscribers::Subscription;
pub use time::{Clock, SharedClock, SystemClock, VirtualClock};

/// Everything a control module usually needs, in one import.
pub mod prelude {
    pub use crate::combinators as ops;
    pub use crate::{
        event_fn, sink_fn, BooleanCell, BooleanInput, BooleanOutput, Clock, DiscreteCell, DiscreteInput, EventCell,
        EventSink, EventSource, Fault, FloatCell, FloatInput, FloatOutput, Observable, Poll, ReflexError,
        SharedClock, SharedEventSink, SharedEventSource, Sink, StateMachine, Subscription,
    };
}
