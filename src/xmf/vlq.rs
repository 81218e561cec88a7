//! Variable-length quantities.
//!
//! Every size, count and pointer in an XMF file is a big-endian base-128
//! integer of 1-4 stored bytes. All bytes but the last carry a continuation
//! flag in their top bit; the low seven bits of each byte are data, most
//! significant group first.

use byteorder::{BigEndian, ByteOrder};
use smallvec::SmallVec;

use super::format::{MAX_VLQ_VALUE, MAX_VLQ_WIDTH};
use crate::util::{Error, Result};

/// Encoded VLQ bytes.
pub type VlqBytes = SmallVec<[u8; MAX_VLQ_WIDTH]>;

/// A decoded VLQ and the number of bytes it occupied on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vlq {
    pub value: u32,
    pub width: u8,
}

/// Determine how many bytes the VLQ at the start of `bytes` occupies.
///
/// Encodings whose fourth byte still has the continuation flag set are
/// rejected rather than truncated.
pub fn detect_width(bytes: &[u8], offset: u64) -> Result<usize> {
    for i in 0..MAX_VLQ_WIDTH {
        let byte = *bytes.get(i).ok_or(Error::UnexpectedEof {
            offset,
            needed: i as u64 + 1,
            available: bytes.len() as u64,
        })?;
        if byte & 0x80 == 0 {
            return Ok(i + 1);
        }
    }
    Err(Error::VlqTooLong { offset })
}

/// Combine the 7-bit groups of a big-endian `raw` word of `width` bytes.
pub fn decode_raw(raw: u32, width: usize) -> u32 {
    let mut n = raw & 0x7F;
    if width >= 2 && raw & 0x8000 != 0 {
        n += ((raw & 0x7F00) >> 8) * 128;
    }
    if width >= 3 && raw & 0x80_0000 != 0 {
        n += ((raw & 0x7F_0000) >> 16) * 128 * 128;
    }
    if width == 4 && raw & 0x8000_0000 != 0 {
        n += ((raw & 0x7F00_0000) >> 24) * 128 * 128 * 128;
    }
    n
}

/// Decode the VLQ at the start of `bytes`; `offset` is only used for errors.
pub fn decode(bytes: &[u8], offset: u64) -> Result<Vlq> {
    let width = detect_width(bytes, offset)?;
    let raw = BigEndian::read_uint(&bytes[..width], width) as u32;
    Ok(Vlq { value: decode_raw(raw, width), width: width as u8 })
}

/// Smallest width able to hold `value`.
pub fn encoded_width(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        _ => 4,
    }
}

/// Encode `value` using exactly `width` bytes (leading groups may be zero).
pub fn encode(value: u32, width: usize) -> Result<VlqBytes> {
    if width == 0 || width > MAX_VLQ_WIDTH {
        return Err(Error::invalid(format!("VLQ width {width} outside 1..=4")));
    }
    if value > MAX_VLQ_VALUE || encoded_width(value) > width {
        return Err(Error::invalid(format!("{value} does not fit a {width}-byte VLQ")));
    }

    let mut out = VlqBytes::new();
    for i in (0..width).rev() {
        let group = ((value >> (7 * i)) & 0x7F) as u8;
        out.push(if i == 0 { group } else { group | 0x80 });
    }
    Ok(out)
}

/// Encode `value` in its shortest form.
pub fn encode_min(value: u32) -> Result<VlqBytes> {
    encode(value, encoded_width(value))
}
