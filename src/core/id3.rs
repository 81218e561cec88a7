//! ID3v2 tag parsing for the ID3Metadata field.
//!
//! The decoder only needs a tag structure and the number of bytes the tag
//! occupies; frame payloads are kept raw.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::util::{Error, Result};

const HEADER_LEN: usize = 10;
const FLAG_EXTENDED_HEADER: u8 = 0x40;
const FLAG_FOOTER: u8 = 0x10;

/// A parsed ID3v2 tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id3Tag {
    /// Major version (2, 3 or 4).
    pub major: u8,
    pub revision: u8,
    pub flags: u8,
    pub frames: Vec<Id3Frame>,
}

impl Id3Tag {
    pub fn frame(&self, id: &str) -> Option<&Id3Frame> {
        self.frames.iter().find(|f| f.id == id)
    }
}

/// One ID3v2 frame with its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id3Frame {
    pub id: String,
    pub flags: u16,
    pub data: Vec<u8>,
}

impl Id3Frame {
    /// Text of a `T***` frame in ISO-8859-1 or UTF-8 encoding.
    pub fn text(&self) -> Option<String> {
        let (&encoding, body) = self.data.split_first()?;
        let body = body.strip_suffix(&[0]).unwrap_or(body);
        match encoding {
            0 => Some(body.iter().map(|&b| b as char).collect()),
            3 => String::from_utf8(body.to_vec()).ok(),
            _ => None,
        }
    }
}

/// External tag parser used for the ID3Metadata field.
pub trait Id3Parser: Send + Sync + fmt::Debug {
    /// Parse the tag at the start of `bytes`; returns the tag and bytes consumed.
    fn parse(&self, bytes: &[u8]) -> Result<(Id3Tag, usize)>;
}

/// Built-in ID3v2.2-2.4 frame splitter.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicId3Parser;

fn syncsafe(b: &[u8]) -> usize {
    b.iter().fold(0usize, |acc, &x| (acc << 7) | (x & 0x7F) as usize)
}

fn truncated(offset: usize, needed: usize, available: usize) -> Error {
    Error::UnexpectedEof {
        offset: offset as u64,
        needed: needed as u64,
        available: available as u64,
    }
}

impl Id3Parser for BasicId3Parser {
    fn parse(&self, bytes: &[u8]) -> Result<(Id3Tag, usize)> {
        if bytes.len() < HEADER_LEN {
            return Err(truncated(0, HEADER_LEN, bytes.len()));
        }
        if &bytes[..3] != b"ID3" {
            return Err(Error::invalid("ID3 tag does not start with \"ID3\""));
        }

        let major = bytes[3];
        let revision = bytes[4];
        let flags = bytes[5];
        if !(2..=4).contains(&major) {
            return Err(Error::UnknownTag { offset: 3, kind: "ID3v2 version", value: major as u32 });
        }

        let body_len = syncsafe(&bytes[6..10]);
        let end = HEADER_LEN + body_len;
        if end > bytes.len() {
            return Err(truncated(HEADER_LEN, body_len, bytes.len() - HEADER_LEN));
        }
        let consumed = if major == 4 && flags & FLAG_FOOTER != 0 { end + HEADER_LEN } else { end };
        if consumed > bytes.len() {
            return Err(truncated(end, HEADER_LEN, bytes.len() - end));
        }

        let mut pos = HEADER_LEN;
        if major >= 3 && flags & FLAG_EXTENDED_HEADER != 0 {
            if pos + 4 > end {
                return Err(truncated(pos, 4, end - pos));
            }
            pos += match major {
                3 => 4 + BigEndian::read_u32(&bytes[pos..pos + 4]) as usize,
                _ => syncsafe(&bytes[pos..pos + 4]),
            };
        }

        let (id_len, size_len, flags_len) = if major == 2 { (3, 3, 0) } else { (4, 4, 2) };
        let frame_header = id_len + size_len + flags_len;
        let mut frames = Vec::new();

        while pos + frame_header <= end && bytes[pos] != 0 {
            let id = String::from_utf8_lossy(&bytes[pos..pos + id_len]).into_owned();
            let size_bytes = &bytes[pos + id_len..pos + id_len + size_len];
            let size = match major {
                4 => syncsafe(size_bytes),
                _ => BigEndian::read_uint(size_bytes, size_len) as usize,
            };
            let frame_flags = if flags_len == 2 {
                BigEndian::read_u16(&bytes[pos + id_len + size_len..pos + frame_header])
            } else {
                0
            };
            let data_start = pos + frame_header;
            if data_start + size > end {
                return Err(truncated(data_start, size, end - data_start));
            }
            frames.push(Id3Frame {
                id,
                flags: frame_flags,
                data: bytes[data_start..data_start + size].to_vec(),
            });
            pos = data_start + size;
        }

        Ok((Id3Tag { major, revision, flags, frames }, consumed))
    }
}
