//! Buffered record encoder.

use crate::codec::{Record, MAGIC};
use crate::varint;
use std::io::{self, Write};

/// Default soft flush threshold, in bytes.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 10 * 1024;

/// Serializes records into an owned buffer and hands the buffer to the
/// underlying writer once it grows past the flush threshold.
///
/// Timestamps must be non-decreasing; the encoder stores each record as a
/// delta from the previous one.
#[derive(Debug)]
pub struct RecordEncoder<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    flush_threshold: usize,
    last_timestamp: u64,
    records: u64,
}

impl<W: Write> RecordEncoder<W> {
    /// Create an encoder and write the magic header.
    pub fn new(inner: W, flush_threshold: usize) -> Self {
        let mut buffer = Vec::with_capacity(flush_threshold.max(MAGIC.len()) + 64);
        buffer.extend_from_slice(MAGIC);
        Self {
            inner,
            buffer,
            flush_threshold,
            last_timestamp: 0,
            records: 0,
        }
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    pub fn encode(&mut self, record: &Record) -> io::Result<()> {
        let delta = record.timestamp.checked_sub(self.last_timestamp).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "record timestamp {} precedes previous record at {}",
                    record.timestamp, self.last_timestamp
                ),
            )
        })?;

        // Encode into a scratch tail so a rejected record leaves the buffer intact.
        let mark = self.buffer.len();
        let result = varint::write_time_delta(&mut self.buffer, delta)
            .and_then(|_| varint::write_channel(&mut self.buffer, record.channel))
            .and_then(|_| record.payload.write_to(&mut self.buffer));
        if let Err(e) = result {
            self.buffer.truncate(mark);
            return Err(e);
        }

        self.last_timestamp = record.timestamp;
        self.records += 1;
        if self.buffer.len() >= self.flush_threshold {
            self.drain()?;
        }
        Ok(())
    }

    /// Push buffered bytes through to the underlying writer and flush it.
    pub fn flush(&mut self) -> io::Result<()> {
        self.drain()?;
        self.inner.flush()
    }

    /// Flush everything and return the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush()?;
        Ok(self.inner)
    }

    fn drain(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            self.inner.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }
}
