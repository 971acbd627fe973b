//! Record layout shared by the encoder and decoder.
//!
//! A recording is [`MAGIC`] followed by records of the form
//! `<time delta><channel><payload>`. Timestamps count 10 microsecond units
//! since the start of the recording. Channel 0 carries [`Metadata`] as byte
//! payloads; every other channel must be declared there before use.

use crate::error::FormatError;
use crate::varint::{self, read_array};
use std::fmt;
use std::io::{self, Read};
use std::time::Duration;

pub const MAGIC: &[u8] = b"ReflexRecording-v1\n";
pub const END_SENTINEL: &[u8] = b"REFLEX-RECORDING-END";
pub const METADATA_CHANNEL: u64 = 0;

const DECLARE_TAG: u8 = 0;
const RETIRE_TAG: u8 = 1;

/// Convert a time offset into recording ticks (10 microseconds each).
pub fn ticks(offset: Duration) -> u64 {
    u64::try_from(offset.as_micros() / 10).unwrap_or(u64::MAX)
}

pub fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_micros(ticks.saturating_mul(10))
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    Null,
    Byte,
    Short,
    Int,
    Long,
    VarInt,
    Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Null,
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    VarInt(i64),
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Payload::Null => PayloadType::Null,
            Payload::Byte(_) => PayloadType::Byte,
            Payload::Short(_) => PayloadType::Short,
            Payload::Int(_) => PayloadType::Int,
            Payload::Long(_) => PayloadType::Long,
            Payload::VarInt(_) => PayloadType::VarInt,
            Payload::Bytes(_) => PayloadType::Bytes,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) -> io::Result<()> {
        match self {
            Payload::Null => {}
            Payload::Byte(b) => out.push(*b),
            Payload::Short(v) => out.extend_from_slice(&v.to_be_bytes()),
            Payload::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            Payload::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
            Payload::VarInt(v) => varint::write_varint(out, *v),
            Payload::Bytes(bytes) => {
                varint::write_length(out, bytes.len())?;
                out.extend_from_slice(bytes);
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(kind: PayloadType, r: &mut R) -> Result<Self, FormatError> {
        Ok(match kind {
            PayloadType::Null => Payload::Null,
            PayloadType::Byte => Payload::Byte(read_array::<1, R>(r, "byte payload")?[0]),
            PayloadType::Short => Payload::Short(i16::from_be_bytes(read_array(r, "short payload")?)),
            PayloadType::Int => Payload::Int(i32::from_be_bytes(read_array(r, "int payload")?)),
            PayloadType::Long => Payload::Long(i64::from_be_bytes(read_array(r, "long payload")?)),
            PayloadType::VarInt => Payload::VarInt(varint::read_varint(r)?),
            PayloadType::Bytes => {
                let len = varint::read_length(r)?;
                let mut bytes = Vec::new();
                r.by_ref().take(len as u64).read_to_end(&mut bytes)?;
                if bytes.len() != len {
                    return Err(FormatError::Truncated("byte payload"));
                }
                Payload::Bytes(bytes)
            }
        })
    }
}

// ============================================================================
// Channel kinds
// ============================================================================

/// What a channel carries. Each kind is stored as exactly one payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Event,
    Boolean,
    Short,
    Float,
    Long,
    Discrete,
    Bytes,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 7] = [
        ChannelKind::Event,
        ChannelKind::Boolean,
        ChannelKind::Short,
        ChannelKind::Float,
        ChannelKind::Long,
        ChannelKind::Discrete,
        ChannelKind::Bytes,
    ];

    pub fn payload_type(self) -> PayloadType {
        match self {
            ChannelKind::Event => PayloadType::Null,
            ChannelKind::Boolean => PayloadType::Byte,
            ChannelKind::Short => PayloadType::Short,
            ChannelKind::Float => PayloadType::Int,
            ChannelKind::Long => PayloadType::Long,
            ChannelKind::Discrete => PayloadType::VarInt,
            ChannelKind::Bytes => PayloadType::Bytes,
        }
    }

    pub fn for_payload(kind: PayloadType) -> Self {
        match kind {
            PayloadType::Null => ChannelKind::Event,
            PayloadType::Byte => ChannelKind::Boolean,
            PayloadType::Short => ChannelKind::Short,
            PayloadType::Int => ChannelKind::Float,
            PayloadType::Long => ChannelKind::Long,
            PayloadType::VarInt => ChannelKind::Discrete,
            PayloadType::Bytes => ChannelKind::Bytes,
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            ChannelKind::Event => "EVENT",
            ChannelKind::Boolean => "BOOLEAN",
            ChannelKind::Short => "SHORT",
            ChannelKind::Float => "FLOAT",
            ChannelKind::Long => "LONG",
            ChannelKind::Discrete => "DISCRETE",
            ChannelKind::Bytes => "BYTES",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Ticks since the start of the recording.
    pub timestamp: u64,
    pub channel: u64,
    pub payload: Payload,
}

impl Record {
    pub fn new(timestamp: u64, channel: u64, payload: Payload) -> Self {
        Self {
            timestamp,
            channel,
            payload,
        }
    }

    pub fn metadata(timestamp: u64, meta: &Metadata) -> Self {
        Self::new(timestamp, METADATA_CHANNEL, Payload::Bytes(meta.encode()))
    }
}

// ============================================================================
// Metadata channel
// ============================================================================

/// Control messages carried on channel 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    /// `\0<id>\0<KIND>\0<name>`
    Declare { channel: u64, kind: ChannelKind, name: String },
    /// `\1<id>`
    Retire { channel: u64 },
    /// The literal end-of-recording sentinel.
    End,
}

impl Metadata {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Metadata::Declare { channel, kind, name } => {
                let mut out = vec![DECLARE_TAG];
                out.extend_from_slice(channel.to_string().as_bytes());
                out.push(0);
                out.extend_from_slice(kind.wire_name().as_bytes());
                out.push(0);
                out.extend_from_slice(name.as_bytes());
                out
            }
            Metadata::Retire { channel } => {
                let mut out = vec![RETIRE_TAG];
                out.extend_from_slice(channel.to_string().as_bytes());
                out
            }
            Metadata::End => END_SENTINEL.to_vec(),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes == END_SENTINEL {
            return Ok(Metadata::End);
        }
        match bytes.split_first() {
            Some((&DECLARE_TAG, rest)) => {
                let mut fields = rest.splitn(3, |b| *b == 0);
                let channel = parse_channel_id(fields.next().unwrap_or_default())?;
                let kind_field = fields
                    .next()
                    .ok_or_else(|| FormatError::malformed("channel declaration without a kind"))?;
                let kind = std::str::from_utf8(kind_field)
                    .ok()
                    .and_then(ChannelKind::from_wire_name)
                    .ok_or_else(|| {
                        FormatError::malformed(format!("unknown channel kind {:?}", String::from_utf8_lossy(kind_field)))
                    })?;
                let name_field = fields
                    .next()
                    .ok_or_else(|| FormatError::malformed("channel declaration without a name"))?;
                let name = String::from_utf8(name_field.to_vec())
                    .map_err(|_| FormatError::malformed("channel name is not UTF-8"))?;
                Ok(Metadata::Declare { channel, kind, name })
            }
            Some((&RETIRE_TAG, rest)) => Ok(Metadata::Retire {
                channel: parse_channel_id(rest)?,
            }),
            _ => Err(FormatError::malformed(format!(
                "unrecognized metadata record {:?}",
                String::from_utf8_lossy(bytes)
            ))),
        }
    }
}

fn parse_channel_id(field: &[u8]) -> Result<u64, FormatError> {
    let channel = std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| FormatError::malformed(format!("bad channel id {:?}", String::from_utf8_lossy(field))))?;
    if channel == METADATA_CHANNEL || channel > varint::CHANNEL_MAX {
        return Err(FormatError::malformed(format!("channel id {} cannot be declared", channel)));
    }
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_layout() {
        let meta = Metadata::Declare {
            channel: 12,
            kind: ChannelKind::Float,
            name: "arm.angle".to_string(),
        };
        assert_eq!(meta.encode(), b"\x0012\x00FLOAT\x00arm.angle".to_vec());
        assert_eq!(Metadata::parse(&meta.encode()).unwrap(), meta);
    }

    #[test]
    fn test_retire_and_end() {
        assert_eq!(Metadata::Retire { channel: 7 }.encode(), b"\x017".to_vec());
        assert_eq!(Metadata::parse(b"\x017").unwrap(), Metadata::Retire { channel: 7 });
        assert_eq!(Metadata::parse(END_SENTINEL).unwrap(), Metadata::End);
    }

    #[test]
    fn test_bad_metadata_rejected() {
        assert!(Metadata::parse(b"").is_err());
        assert!(Metadata::parse(b"\x02junk").is_err());
        assert!(Metadata::parse(b"\x00x\x00FLOAT\x00name").is_err());
        assert!(Metadata::parse(b"\x003\x00QUATERNION\x00name").is_err());
        assert!(Metadata::parse(b"\x003\x00FLOAT").is_err());
        assert!(Metadata::parse(b"\x000\x00FLOAT\x00meta").is_err());
    }

    #[test]
    fn test_kind_payload_mapping_is_one_to_one() {
        for kind in ChannelKind::ALL {
            assert_eq!(ChannelKind::for_payload(kind.payload_type()), kind);
            assert_eq!(ChannelKind::from_wire_name(kind.wire_name()), Some(kind));
        }
    }

    #[test]
    fn test_truncated_byte_payload() {
        let bytes = [5u8, 1, 2];
        let err = Payload::read_from(PayloadType::Bytes, &mut &bytes[..]).unwrap_err();
        assert!(matches!(err, FormatError::Truncated("byte payload")));
    }

    #[test]
    fn test_ticks_are_ten_microseconds() {
        assert_eq!(ticks(Duration::from_millis(1)), 100);
        assert_eq!(ticks(Duration::from_micros(19)), 1);
        assert_eq!(ticks_to_duration(100), Duration::from_millis(1));
    }
}
