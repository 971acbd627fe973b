//! Streaming record decoder.

use crate::codec::{ChannelKind, Metadata, Payload, PayloadType, Record, MAGIC, METADATA_CHANNEL};
use crate::error::FormatError;
use crate::varint;
use std::collections::HashMap;
use std::io::{self, ErrorKind, Read};

/// Reads records back in stream order, tracking channel declarations so each
/// data record can be decoded with its declared payload type.
#[derive(Debug)]
pub struct RecordDecoder<R: Read> {
    inner: R,
    channels: HashMap<u64, ChannelKind>,
    timestamp: u64,
    ended: bool,
}

impl<R: Read> RecordDecoder<R> {
    /// Check the magic header and position the decoder at the first record.
    pub fn new(mut inner: R) -> Result<Self, FormatError> {
        let mut header = vec![0u8; MAGIC.len()];
        match inner.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(FormatError::BadMagic),
            Err(e) => return Err(e.into()),
        }
        if header != MAGIC {
            return Err(FormatError::BadMagic);
        }
        Ok(Self {
            inner,
            channels: HashMap::new(),
            timestamp: 0,
            ended: false,
        })
    }

    /// The kind a channel is currently declared with.
    pub fn channel_kind(&self, channel: u64) -> Option<ChannelKind> {
        self.channels.get(&channel).copied()
    }

    /// Whether the end-of-recording sentinel has been read.
    pub fn saw_end(&self) -> bool {
        self.ended
    }

    /// Read the next record, or `None` at a clean end of stream.
    ///
    /// Metadata records are returned as well as applied.
    pub fn next_record(&mut self) -> Result<Option<Record>, FormatError> {
        let Some(first) = self.read_record_start()? else {
            return Ok(None);
        };
        let delta = varint::read_time_delta(first, &mut self.inner)?;
        let timestamp = self
            .timestamp
            .checked_add(delta)
            .ok_or_else(|| FormatError::malformed("timestamp overflow"))?;
        let channel = varint::read_channel(&mut self.inner)?;

        let payload_type = if channel == METADATA_CHANNEL {
            PayloadType::Bytes
        } else {
            self.channels
                .get(&channel)
                .map(|kind| kind.payload_type())
                .ok_or(FormatError::UnknownChannel { channel, timestamp })?
        };
        let payload = Payload::read_from(payload_type, &mut self.inner)?;
        self.timestamp = timestamp;

        if channel == METADATA_CHANNEL {
            if let Payload::Bytes(bytes) = &payload {
                self.apply(Metadata::parse(bytes)?);
            }
        }
        Ok(Some(Record::new(timestamp, channel, payload)))
    }

    fn apply(&mut self, meta: Metadata) {
        match meta {
            Metadata::Declare { channel, kind, .. } => {
                if let Some(previous) = self.channels.insert(channel, kind) {
                    tracing::warn!("Channel {} redeclared ({} -> {})", channel, previous, kind);
                }
            }
            Metadata::Retire { channel } => {
                if self.channels.remove(&channel).is_none() {
                    tracing::warn!("Retiring channel {} that was never declared", channel);
                }
            }
            Metadata::End => self.ended = true,
        }
    }

    /// Read the first byte of a record. EOF here is a clean end of stream.
    fn read_record_start(&mut self) -> Result<Option<u8>, FormatError> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<R: Read> Iterator for RecordDecoder<R> {
    type Item = Result<Record, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
