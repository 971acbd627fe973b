//! Error taxonomy shared by every reflex crate.
//!
//! Wiring mistakes (bad names, out-of-range indices, illegal timer calls)
//! surface as [`ReflexError`] at the call that caused them. Faults raised by
//! user callbacks travel as [`Fault`] (an `anyhow::Error`).

use thiserror::Error;

/// A fault raised by a user-supplied callback (sink, subscriber, timer action).
pub type Fault = anyhow::Error;

/// Errors raised by the reflex runtime itself.
#[derive(Debug, Error)]
pub enum ReflexError {
    /// A caller passed a value that can never be valid (unknown state name,
    /// out-of-range index, non-positive period, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A call that is only legal in a different state (starting a running
    /// timer, stopping an idle one, ...).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A subscriber fault propagated by a plain (non-recovering) firing path.
    #[error("callback failed: {0:#}")]
    Callback(#[from] anyhow::Error),
}

impl ReflexError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn illegal(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// True for the configuration/programming-error variants.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::IllegalState(_))
    }
}

pub type Result<T, E = ReflexError> = std::result::Result<T, E>;
