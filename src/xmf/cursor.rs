//! Bounded reading position over a [`ByteSource`].

use super::format::MAX_VLQ_WIDTH;
use super::source::ByteSource;
use super::vlq::{self, Vlq};
use crate::util::{Error, Result};

/// A read position with an upper bound.
///
/// Sub-blocks with a declared size are read through a [`Cursor::window`] so
/// that a corrupt inner field cannot run past its enclosing block.
#[derive(Clone)]
pub struct Cursor<'a> {
    src: &'a ByteSource,
    pos: u64,
    limit: u64,
}

impl<'a> Cursor<'a> {
    /// Cursor at `pos` that may read up to the end of the source.
    pub fn new(src: &'a ByteSource, pos: u64) -> Self {
        Self { src, pos, limit: src.len() }
    }

    #[inline]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    #[inline]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.pos)
    }

    #[inline]
    pub fn source(&self) -> &'a ByteSource {
        self.src
    }

    fn ensure(&self, len: u64) -> Result<()> {
        if len > self.remaining() {
            return Err(Error::UnexpectedEof {
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Split off a cursor over the next `len` bytes and step past them.
    pub fn window(&mut self, len: u64) -> Result<Cursor<'a>> {
        self.ensure(len)?;
        let sub = Cursor { src: self.src, pos: self.pos, limit: self.pos + len };
        self.pos += len;
        Ok(sub)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let b = self.src.read_u8(self.pos)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let v = self.src.read_u32(self.pos)?;
        self.pos += 4;
        Ok(v)
    }

    pub fn read_tag(&mut self) -> Result<[u8; 4]> {
        self.ensure(4)?;
        let mut tag = [0u8; 4];
        self.src.read_into(self.pos, &mut tag)?;
        self.pos += 4;
        Ok(tag)
    }

    pub fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>> {
        self.ensure(len)?;
        let bytes = self.src.read_bytes(self.pos, len as usize)?;
        self.pos += len;
        Ok(bytes)
    }

    /// Everything up to the limit.
    pub fn read_rest(&mut self) -> Result<Vec<u8>> {
        self.read_bytes(self.remaining())
    }

    /// Peek the width, then read exactly that many bytes.
    pub fn read_vlq(&mut self) -> Result<Vlq> {
        let peek_len = self.remaining().min(MAX_VLQ_WIDTH as u64) as usize;
        let mut peek = [0u8; MAX_VLQ_WIDTH];
        self.src.read_into(self.pos, &mut peek[..peek_len])?;
        let v = vlq::decode(&peek[..peek_len], self.pos)?;
        self.pos += v.width as u64;
        Ok(v)
    }

    /// VLQ value only.
    pub fn read_vlq_value(&mut self) -> Result<u32> {
        Ok(self.read_vlq()?.value)
    }

    /// VLQ reinterpreted as an absolute offset into the source.
    pub fn read_pointer(&mut self) -> Result<u64> {
        Ok(self.read_vlq()?.value as u64)
    }

    /// `count` consecutive pointer fields.
    pub fn read_pointers(&mut self, count: u32) -> Result<Vec<u64>> {
        (0..count).map(|_| self.read_pointer()).collect()
    }

    /// VLQ length followed by that many bytes.
    pub fn read_prefixed(&mut self) -> Result<Vec<u8>> {
        let len = self.read_vlq_value()?;
        self.read_bytes(len as u64)
    }

    pub fn skip(&mut self, len: u64) -> Result<()> {
        self.ensure(len)?;
        self.pos += len;
        Ok(())
    }

    /// Advance to `target`, the end of a block that started at `start` and
    /// declared `target - start` bytes. Overshooting is a size mismatch.
    pub fn pad_to(&mut self, start: u64, target: u64, context: &'static str) -> Result<()> {
        if self.pos > target {
            return Err(Error::SizeMismatch {
                offset: start,
                context,
                expected: target.saturating_sub(start),
                consumed: self.pos - start,
            });
        }
        if target > self.limit {
            return Err(Error::UnexpectedEof {
                offset: self.pos,
                needed: target - self.pos,
                available: self.remaining(),
            });
        }
        self.pos = target;
        Ok(())
    }
}

/// Decode Extended ASCII (Latin-1) bytes.
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlq_and_pointer_reads() {
        let src = ByteSource::from_bytes(vec![0x81, 0x00, 0x05, 0x03, b'a', b'b', b'c']);
        let mut cur = Cursor::new(&src, 0);
        assert_eq!(cur.read_vlq().unwrap(), Vlq { value: 128, width: 2 });
        assert_eq!(cur.read_pointer().unwrap(), 5);
        assert_eq!(cur.read_prefixed().unwrap(), b"abc");
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn test_vlq_near_end_of_window() {
        let src = ByteSource::from_bytes(vec![0x01, 0x81, 0x00]);
        let mut cur = Cursor::new(&src, 0);
        let mut win = cur.window(2).unwrap();
        assert_eq!(win.read_vlq_value().unwrap(), 1);
        // The continuation byte lies inside the window but its terminator does not
        assert!(matches!(win.read_vlq(), Err(Error::UnexpectedEof { offset: 1, .. })));
        assert_eq!(cur.pos(), 2);
    }

    #[test]
    fn test_window_bounds() {
        let src = ByteSource::from_bytes(vec![0u8; 8]);
        let mut cur = Cursor::new(&src, 2);
        let mut win = cur.window(3).unwrap();
        assert_eq!(win.limit(), 5);
        assert!(win.read_bytes(4).is_err());
        assert!(cur.window(4).is_err());
    }

    #[test]
    fn test_pad_to() {
        let src = ByteSource::from_bytes(vec![0u8; 10]);
        let mut cur = Cursor::new(&src, 0);
        cur.skip(3).unwrap();
        cur.pad_to(0, 6, "test").unwrap();
        assert_eq!(cur.pos(), 6);
        let err = cur.pad_to(0, 4, "test").unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { expected: 4, consumed: 6, .. }));
        assert!(cur.pad_to(0, 11, "test").is_err());
    }

    #[test]
    fn test_latin1() {
        assert_eq!(latin1(&[b'C', 0xE9]), "Cé");
    }
}
