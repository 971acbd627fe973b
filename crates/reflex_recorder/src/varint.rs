//! Variable-length integer forms used by the record layout.
//!
//! | Field        | Tiers                                                          |
//! |--------------|----------------------------------------------------------------|
//! | time delta   | `< 128`: 1 byte; `< 32895`: 2 bytes; else `FF FF` + u32 BE      |
//! | channel      | `< 128`: 1 byte; `< 4335`: 2 bytes; else `FF` + 48-bit BE       |
//! | byte length  | `< 255`: 1 byte; else `FF` + u32 BE                             |
//! | signed value | zig-zag, then LEB128 (7 bits per byte, low group first)         |
//!
//! Two-byte forms store `value - 128` with the top bit of the first byte set.
//! Channels have a single two-byte tier: the `< 196`, `< 224` and `< 240`
//! breakpoints of the original channel scheme are merged into `128..4335`,
//! so first bytes `0x91..=0xFE` never occur.

use crate::error::FormatError;
use std::io::{self, Read};

pub const DELTA_ONE_BYTE_LIMIT: u64 = 128;
pub const DELTA_TWO_BYTE_LIMIT: u64 = 32_895;
pub const CHANNEL_ONE_BYTE_LIMIT: u64 = 128;
pub const CHANNEL_TWO_BYTE_LIMIT: u64 = 4_335;
/// Channels must fit the 6-byte escape form.
pub const CHANNEL_MAX: u64 = (1 << 48) - 1;

const LENGTH_ESCAPE: u8 = 0xFF;
const CHANNEL_ESCAPE: u8 = 0xFF;

fn out_of_range(what: &str, value: u64) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("{} {} does not fit the record layout", what, value))
}

// ============================================================================
// Reading helpers
// ============================================================================

pub(crate) fn read_array<const N: usize, R: Read>(r: &mut R, what: &'static str) -> Result<[u8; N], FormatError> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => FormatError::Truncated(what),
        _ => FormatError::Io(e),
    })?;
    Ok(buf)
}

pub(crate) fn read_u8<R: Read>(r: &mut R, what: &'static str) -> Result<u8, FormatError> {
    Ok(read_array::<1, R>(r, what)?[0])
}

// ============================================================================
// Time delta (units of 10 microseconds)
// ============================================================================

pub fn write_time_delta(out: &mut Vec<u8>, delta: u64) -> io::Result<()> {
    if delta < DELTA_ONE_BYTE_LIMIT {
        out.push(delta as u8);
    } else if delta < DELTA_TWO_BYTE_LIMIT {
        let v = delta - DELTA_ONE_BYTE_LIMIT;
        out.push(0x80 | (v >> 8) as u8);
        out.push(v as u8);
    } else {
        let wide = u32::try_from(delta).map_err(|_| out_of_range("time delta", delta))?;
        out.extend_from_slice(&[0xFF, 0xFF]);
        out.extend_from_slice(&wide.to_be_bytes());
    }
    Ok(())
}

/// Decode a time delta whose first byte has already been consumed.
pub fn read_time_delta<R: Read>(first: u8, r: &mut R) -> Result<u64, FormatError> {
    if first < 0x80 {
        return Ok(u64::from(first));
    }
    let second = read_u8(r, "time delta")?;
    if first == 0xFF && second == 0xFF {
        let wide = read_array::<4, R>(r, "time delta")?;
        return Ok(u64::from(u32::from_be_bytes(wide)));
    }
    let v = (u64::from(first & 0x7F) << 8) | u64::from(second);
    Ok(v + DELTA_ONE_BYTE_LIMIT)
}

// ============================================================================
// Channel number
// ============================================================================

pub fn write_channel(out: &mut Vec<u8>, channel: u64) -> io::Result<()> {
    if channel < CHANNEL_ONE_BYTE_LIMIT {
        out.push(channel as u8);
    } else if channel < CHANNEL_TWO_BYTE_LIMIT {
        let v = channel - CHANNEL_ONE_BYTE_LIMIT;
        out.push(0x80 + (v >> 8) as u8);
        out.push(v as u8);
    } else {
        if channel > CHANNEL_MAX {
            return Err(out_of_range("channel", channel));
        }
        out.push(CHANNEL_ESCAPE);
        out.extend_from_slice(&channel.to_be_bytes()[2..]);
    }
    Ok(())
}

pub fn read_channel<R: Read>(r: &mut R) -> Result<u64, FormatError> {
    let first = read_u8(r, "channel number")?;
    match first {
        0x00..=0x7F => Ok(u64::from(first)),
        CHANNEL_ESCAPE => {
            let six = read_array::<6, R>(r, "channel number")?;
            let mut wide = [0u8; 8];
            wide[2..].copy_from_slice(&six);
            Ok(u64::from_be_bytes(wide))
        }
        _ => {
            let second = read_u8(r, "channel number")?;
            let v = (u64::from(first - 0x80) << 8) | u64::from(second);
            let channel = v + CHANNEL_ONE_BYTE_LIMIT;
            if channel >= CHANNEL_TWO_BYTE_LIMIT {
                return Err(FormatError::malformed(format!(
                    "two-byte channel prefix {:#04x} out of range",
                    first
                )));
            }
            Ok(channel)
        }
    }
}

// ============================================================================
// Zig-zag LEB128
// ============================================================================

pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn unzigzag(raw: u64) -> i64 {
    ((raw >> 1) as i64) ^ -((raw & 1) as i64)
}

pub fn write_varint(out: &mut Vec<u8>, value: i64) {
    let mut raw = zigzag(value);
    while raw >= 0x80 {
        out.push((raw as u8) | 0x80);
        raw >>= 7;
    }
    out.push(raw as u8);
}

pub fn read_varint<R: Read>(r: &mut R) -> Result<i64, FormatError> {
    let mut raw = 0u64;
    for group in 0..10 {
        let byte = read_u8(r, "varint")?;
        raw |= u64::from(byte & 0x7F) << (7 * group);
        if byte & 0x80 == 0 {
            return Ok(unzigzag(raw));
        }
    }
    Err(FormatError::malformed("varint longer than 10 bytes"))
}

// ============================================================================
// Byte-array length
// ============================================================================

pub fn write_length(out: &mut Vec<u8>, len: usize) -> io::Result<()> {
    if len < usize::from(LENGTH_ESCAPE) {
        out.push(len as u8);
    } else {
        let wide = u32::try_from(len).map_err(|_| out_of_range("byte length", len as u64))?;
        out.push(LENGTH_ESCAPE);
        out.extend_from_slice(&wide.to_be_bytes());
    }
    Ok(())
}

pub fn read_length<R: Read>(r: &mut R) -> Result<usize, FormatError> {
    let first = read_u8(r, "byte length")?;
    if first < LENGTH_ESCAPE {
        return Ok(usize::from(first));
    }
    let wide = read_array::<4, R>(r, "byte length")?;
    Ok(u32::from_be_bytes(wide) as usize)
}
