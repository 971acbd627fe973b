//! Decode-side failures.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("stream does not start with the recording magic")]
    BadMagic,

    /// A data record referenced a channel that was never declared (or was
    /// already retired).
    #[error("record at t={timestamp} references undeclared channel {channel}")]
    UnknownChannel { channel: u64, timestamp: u64 },

    #[error("stream ended in the middle of {0}")]
    Truncated(&'static str),

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FormatError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}
