//! Binary recording and replay of signal timelines.
//!
//! A [`Recorder`] taps signals and events into a channel-multiplexed stream
//! written by a background thread. [`Timeline::read`] turns a recording back
//! into per-channel samples. The lower layers ([`RecordEncoder`],
//! [`RecordDecoder`]) are usable on their own.

pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod pool;
pub mod recorder;
pub mod replay;
pub mod varint;
pub mod writer;

pub use codec::{ChannelKind, Metadata, Payload, PayloadType, Record, END_SENTINEL, MAGIC, METADATA_CHANNEL};
pub use decoder::RecordDecoder;
pub use encoder::{RecordEncoder, DEFAULT_FLUSH_THRESHOLD};
pub use error::FormatError;
pub use pool::BufferPool;
pub use recorder::{Recorder, StreamChannel};
pub use replay::{ChannelTimeline, Sample, SampleValue, Timeline};
pub use writer::BackgroundWriter;
