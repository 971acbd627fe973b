//! Rebuild per-channel timelines from a recording.

use crate::codec::{self, ChannelKind, Metadata, Payload, Record, METADATA_CHANNEL};
use crate::decoder::RecordDecoder;
use crate::error::FormatError;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Event,
    Boolean(bool),
    Short(i16),
    Float(f32),
    Long(i64),
    Discrete(i64),
    Bytes(Vec<u8>),
}

impl SampleValue {
    fn from_payload(payload: Payload) -> Self {
        match payload {
            Payload::Null => SampleValue::Event,
            Payload::Byte(b) => SampleValue::Boolean(b != 0),
            Payload::Short(v) => SampleValue::Short(v),
            Payload::Int(bits) => SampleValue::Float(f32::from_bits(bits as u32)),
            Payload::Long(v) => SampleValue::Long(v),
            Payload::VarInt(v) => SampleValue::Discrete(v),
            Payload::Bytes(bytes) => SampleValue::Bytes(bytes),
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            SampleValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SampleValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_discrete(&self) -> Option<i64> {
        match self {
            SampleValue::Discrete(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: u64,
    pub value: SampleValue,
}

impl Sample {
    pub fn offset(&self) -> Duration {
        codec::ticks_to_duration(self.timestamp)
    }
}

/// Everything recorded on one channel, from declaration to retirement.
#[derive(Debug, Clone)]
pub struct ChannelTimeline {
    pub channel: u64,
    pub name: String,
    pub kind: ChannelKind,
    pub declared_at: u64,
    pub retired_at: Option<u64>,
    pub samples: Vec<Sample>,
}

impl ChannelTimeline {
    /// The latest sample at or before `timestamp`.
    pub fn value_at(&self, timestamp: u64) -> Option<&SampleValue> {
        let idx = self.samples.partition_point(|s| s.timestamp <= timestamp);
        idx.checked_sub(1).map(|i| &self.samples[i].value)
    }
}

/// A fully decoded recording.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    channels: Vec<ChannelTimeline>,
    end_timestamp: u64,
    closed_cleanly: bool,
}

impl Timeline {
    pub fn read<R: Read>(reader: R) -> Result<Self, FormatError> {
        let mut decoder = RecordDecoder::new(reader)?;
        let mut timeline = Timeline::default();
        // Channel id -> index of its current declaration in `channels`.
        let mut live: HashMap<u64, usize> = HashMap::new();

        while let Some(Record {
            timestamp,
            channel,
            payload,
        }) = decoder.next_record()?
        {
            timeline.end_timestamp = timestamp;
            if channel != METADATA_CHANNEL {
                // The decoder has already rejected undeclared channels.
                if let Some(&idx) = live.get(&channel) {
                    timeline.channels[idx].samples.push(Sample {
                        timestamp,
                        value: SampleValue::from_payload(payload),
                    });
                }
                continue;
            }
            let Payload::Bytes(bytes) = payload else {
                continue;
            };
            match Metadata::parse(&bytes)? {
                Metadata::Declare { channel, kind, name } => {
                    live.insert(channel, timeline.channels.len());
                    timeline.channels.push(ChannelTimeline {
                        channel,
                        name,
                        kind,
                        declared_at: timestamp,
                        retired_at: None,
                        samples: Vec::new(),
                    });
                }
                Metadata::Retire { channel } => {
                    if let Some(idx) = live.remove(&channel) {
                        timeline.channels[idx].retired_at = Some(timestamp);
                    }
                }
                Metadata::End => timeline.closed_cleanly = true,
            }
        }
        Ok(timeline)
    }

    pub fn open(path: &Path) -> Result<Self, FormatError> {
        let file = File::open(path)?;
        Self::read(BufReader::new(file))
    }

    /// Channels in declaration order.
    pub fn channels(&self) -> &[ChannelTimeline] {
        &self.channels
    }

    pub fn channel(&self, id: u64) -> Option<&ChannelTimeline> {
        self.channels.iter().rev().find(|c| c.channel == id)
    }

    /// The most recent channel declared under `name`.
    pub fn by_name(&self, name: &str) -> Option<&ChannelTimeline> {
        self.channels.iter().rev().find(|c| c.name == name)
    }

    /// Timestamp of the last record, in ticks.
    pub fn end_timestamp(&self) -> u64 {
        self.end_timestamp
    }

    pub fn duration(&self) -> Duration {
        codec::ticks_to_duration(self.end_timestamp)
    }

    /// Whether the recording ends with the end sentinel.
    pub fn closed_cleanly(&self) -> bool {
        self.closed_cleanly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{RecordEncoder, DEFAULT_FLUSH_THRESHOLD};

    fn declare(timestamp: u64, channel: u64, kind: ChannelKind, name: &str) -> Record {
        Record::metadata(
            timestamp,
            &Metadata::Declare {
                channel,
                kind,
                name: name.to_string(),
            },
        )
    }

    fn build(records: &[Record]) -> Timeline {
        let mut encoder = RecordEncoder::new(Vec::new(), DEFAULT_FLUSH_THRESHOLD);
        for record in records {
            encoder.encode(record).unwrap();
        }
        Timeline::read(encoder.finish().unwrap().as_slice()).unwrap()
    }

    #[test]
    fn test_samples_grouped_by_channel() {
        let timeline = build(&[
            declare(0, 1, ChannelKind::Float, "lift.height"),
            declare(0, 2, ChannelKind::Boolean, "lift.limit"),
            Record::new(10, 1, Payload::Int(1.5f32.to_bits() as i32)),
            Record::new(20, 2, Payload::Byte(1)),
            Record::new(30, 1, Payload::Int(2.0f32.to_bits() as i32)),
            Record::metadata(40, &Metadata::End),
        ]);

        assert!(timeline.closed_cleanly());
        assert_eq!(timeline.end_timestamp(), 40);
        let height = timeline.by_name("lift.height").unwrap();
        assert_eq!(height.samples.len(), 2);
        assert_eq!(height.value_at(9), None);
        assert_eq!(height.value_at(10).and_then(SampleValue::as_float), Some(1.5));
        assert_eq!(height.value_at(29).and_then(SampleValue::as_float), Some(1.5));
        assert_eq!(height.value_at(30).and_then(SampleValue::as_float), Some(2.0));
        let limit = timeline.channel(2).unwrap();
        assert_eq!(limit.samples[0].value.as_bool(), Some(true));
    }

    #[test]
    fn test_missing_sentinel_means_unclean() {
        let timeline = build(&[
            declare(0, 1, ChannelKind::Discrete, "mode"),
            Record::new(5, 1, Payload::VarInt(-3)),
        ]);
        assert!(!timeline.closed_cleanly());
        assert_eq!(timeline.channel(1).unwrap().samples[0].value.as_discrete(), Some(-3));
    }

    #[test]
    fn test_retirement_recorded() {
        let timeline = build(&[
            declare(0, 4, ChannelKind::Bytes, "log"),
            Record::new(1, 4, Payload::Bytes(b"boot".to_vec())),
            Record::metadata(2, &Metadata::Retire { channel: 4 }),
        ]);
        let log = timeline.channel(4).unwrap();
        assert_eq!(log.retired_at, Some(2));
        assert_eq!(log.samples[0].value, SampleValue::Bytes(b"boot".to_vec()));
    }
}
