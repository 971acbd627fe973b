//! Timers built on reflex signals and events.
//!
//! None of these run on their own: each is stepped by `update()`, usually
//! wired to the control-loop tick with `drive_from`, and reads time from a
//! [`reflex_core::Clock`] so tests can drive them with a virtual clock.

pub mod expiration;
pub mod pause;
pub mod stopwatch;
pub mod ticker;

pub use expiration::ExpirationTimer;
pub use pause::{PauseTimer, RetriggerPolicy};
pub use stopwatch::Stopwatch;
pub use ticker::{CatchUp, Ticker, TickerThread};
