//! Node unpackers (decompression filters).

use smallvec::SmallVec;

use super::cursor::Cursor;
use super::format::{StandardUnpacker, STANDARD_ID_TYPE};
use crate::core::compression;
use crate::util::{Error, Result, UnpackFailure};

/// Identifies one filter stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackerId {
    Standard(StandardUnpacker),
    /// Manufacturer/registered unpacker. Parsing accepts it; applying the
    /// chain fails with an `UnpackFailure` for that node.
    Custom { type_id: u32, id: u32 },
}

impl UnpackerId {
    pub fn parse(cur: &mut Cursor<'_>) -> Result<Self> {
        let type_id = cur.read_vlq_value()?;
        let id_pos = cur.pos();
        let id = cur.read_vlq_value()?;
        if type_id == STANDARD_ID_TYPE {
            Ok(Self::Standard(StandardUnpacker::from_id(id, id_pos)?))
        } else {
            Ok(Self::Custom { type_id, id })
        }
    }
}

/// One filter stage and the length its output is declared to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpackerEntry {
    pub id: UnpackerId,
    pub decoded_len: u32,
}

/// Ordered filter list of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackerChain {
    entries: SmallVec<[UnpackerEntry; 2]>,
}

impl UnpackerChain {
    pub fn new(entries: impl IntoIterator<Item = UnpackerEntry>) -> Self {
        Self { entries: entries.into_iter().collect() }
    }

    /// Parse a length-prefixed unpacker block.
    pub fn parse(cur: &mut Cursor<'_>) -> Result<Self> {
        let len = cur.read_vlq_value()? as u64;
        let start = cur.pos();
        let end = start + len;

        let mut entries = SmallVec::new();
        while cur.pos() < end {
            let before = cur.pos();
            let id = UnpackerId::parse(cur)?;
            let decoded_len = cur.read_vlq_value()?;
            entries.push(UnpackerEntry { id, decoded_len });
            if cur.pos() == before {
                return Err(Error::invalid(format!("unpacker entry at {before} consumed no bytes")));
            }
        }
        cur.pad_to(start, end, "node unpackers")?;

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[UnpackerEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Run every stage in order over `raw`.
    pub fn apply(&self, raw: &[u8]) -> std::result::Result<Vec<u8>, UnpackFailure> {
        let mut data = raw.to_vec();
        for (stage, entry) in self.entries.iter().enumerate() {
            match entry.id {
                UnpackerId::Standard(StandardUnpacker::None) => {}
                UnpackerId::Standard(StandardUnpacker::Zlib) => {
                    data = compression::inflate(&data, entry.decoded_len)
                        .map_err(|e| UnpackFailure { stage, reason: format!("zlib: {e}") })?;
                }
                UnpackerId::Custom { type_id, id } => {
                    return Err(UnpackFailure {
                        stage,
                        reason: format!("unsupported unpacker (type {type_id}, id {id})"),
                    });
                }
            }
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmf::source::ByteSource;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn zlib_entry(decoded_len: u32) -> UnpackerEntry {
        UnpackerEntry { id: UnpackerId::Standard(StandardUnpacker::Zlib), decoded_len }
    }

    #[test]
    fn test_parse_chain() {
        // len=6: {standard none, 0}, {standard zlib, 5}
        let src = ByteSource::from_bytes(vec![6, 0, 0, 0, 0, 1, 5, 0xFF]);
        let mut cur = Cursor::new(&src, 0);
        let chain = UnpackerChain::parse(&mut cur).unwrap();
        assert_eq!(cur.pos(), 7);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.entries()[1], zlib_entry(5));
    }

    #[test]
    fn test_empty_chain() {
        let src = ByteSource::from_bytes(vec![0]);
        let mut cur = Cursor::new(&src, 0);
        let chain = UnpackerChain::parse(&mut cur).unwrap();
        assert!(chain.is_empty());
        assert_eq!(chain.apply(b"raw").unwrap(), b"raw");
    }

    #[test]
    fn test_unknown_standard_unpacker() {
        let src = ByteSource::from_bytes(vec![3, 0, 4, 0]);
        let mut cur = Cursor::new(&src, 0);
        assert!(matches!(
            UnpackerChain::parse(&mut cur),
            Err(Error::UnknownTag { kind: "unpacker", value: 4, .. })
        ));
    }

    #[test]
    fn test_apply_zlib() {
        let chain = UnpackerChain::new([
            UnpackerEntry { id: UnpackerId::Standard(StandardUnpacker::None), decoded_len: 0 },
            zlib_entry(5),
        ]);
        assert_eq!(chain.apply(&zlib(b"HELLO")).unwrap(), b"HELLO");
    }

    #[test]
    fn test_apply_corrupt() {
        let chain = UnpackerChain::new([zlib_entry(5)]);
        let failure = chain.apply(&[0x78, 0x9C, 0xFF, 0xFF, 0xFF]).unwrap_err();
        assert_eq!(failure.stage, 0);
        assert!(failure.reason.starts_with("zlib"));
    }

    #[test]
    fn test_custom_unpacker_fails() {
        let chain = UnpackerChain::new([UnpackerEntry {
            id: UnpackerId::Custom { type_id: 1, id: 0x43 },
            decoded_len: 10,
        }]);
        let failure = chain.apply(b"data").unwrap_err();
        assert!(failure.reason.contains("unsupported"));

        // the chain itself parses; only applying it fails
        let src = ByteSource::from_bytes(vec![3, 1, 0x43, 10]);
        let parsed = UnpackerChain::parse(&mut Cursor::new(&src, 0)).unwrap();
        assert_eq!(parsed, chain);
        assert_eq!(parsed.apply(b"data").unwrap_err().stage, 0);
    }
}
