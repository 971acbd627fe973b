use reflex_core::ReflexError;
use thiserror::Error;

/// How a routine body stops early.
#[derive(Debug, Error)]
pub enum InstinctError {
    /// The liveness signal went false. Expected; the worker logs it quietly.
    #[error("autonomous mode is over")]
    ModeOver,

    /// Anything else. The worker logs it as a failure and ends the run.
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl InstinctError {
    pub fn is_mode_over(&self) -> bool {
        matches!(self, InstinctError::ModeOver)
    }
}

impl From<ReflexError> for InstinctError {
    fn from(e: ReflexError) -> Self {
        InstinctError::Fault(e.into())
    }
}

pub type InstinctResult<T = ()> = std::result::Result<T, InstinctError>;
