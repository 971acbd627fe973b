//! Instinct: autonomous routines written as straight-line blocking code.
//!
//! A routine body runs on a dedicated worker thread while a boolean
//! "should run" signal is true. The body waits with the primitives on
//! [`InstinctContext`]; when the signal goes false those waits return
//! [`InstinctError::ModeOver`], which the body propagates with `?` to unwind.

pub mod context;
pub mod engine;
pub mod error;
pub mod multi;
pub mod store;

pub use context::InstinctContext;
pub use engine::{Instinct, InstinctModule, RunOutcome, WorkerState};
pub use error::{InstinctError, InstinctResult};
pub use multi::{InstinctMulti, InstinctMultiBuilder, Invokable, ModeSelector};
pub use store::{MemoryStore, ModeStore};
