//! XMF file header.
//!
//! ```text
//! +----------------------+
//! | "XMF_"               |  4 bytes
//! | "1.00" | "2.00"      |  4 bytes
//! | FileTypeID           |  4 bytes, 2.00 only
//! | FileTypeRevisionID   |  4 bytes, 2.00 only
//! | FileLength           |  VLQ
//! | MetadataTypesTable   |  VLQ length [+ VLQ count + entries]
//! | TreeStart            |  VLQ offset
//! | TreeEnd              |  VLQ offset
//! +----------------------+
//! ```

use super::cursor::{latin1, Cursor};
use super::format::{StringFormat, XmfVersion, MOBILE_XMF_FILE_TYPE, XMF_MAGIC};
use super::source::ByteSource;
use crate::util::{Error, Result};

/// Per-file description of a custom metadata type number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTypeEntry {
    pub type_number: u32,
    pub format: StringFormat,
    /// Language/country tag, e.g. "en-US".
    pub language: String,
}

/// Metadata types declared once for the whole file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataTypesTable {
    entries: Vec<MetadataTypeEntry>,
}

impl MetadataTypesTable {
    pub fn new(entries: Vec<MetadataTypeEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, type_number: u32) -> Option<&MetadataTypeEntry> {
        self.entries.iter().find(|e| e.type_number == type_number)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetadataTypeEntry> {
        self.entries.iter()
    }

    fn parse(cur: &mut Cursor<'_>) -> Result<Self> {
        let table_len = cur.read_vlq_value()? as u64;
        let start = cur.pos();
        if table_len == 0 {
            return Ok(Self::default());
        }

        let mut block = cur.window(table_len)?;
        let count = block.read_vlq_value()?;
        let mut entries = Vec::with_capacity(count.min(256) as usize);
        for _ in 0..count {
            let type_number = block.read_vlq_value()?;
            let format_pos = block.pos();
            let format = StringFormat::from_id(block.read_vlq_value()?, format_pos)?;
            let language = latin1(&block.read_prefixed()?);
            entries.push(MetadataTypeEntry { type_number, format, language });
        }
        block.pad_to(start, start + table_len, "metadata types table")?;

        Ok(Self { entries })
    }
}

/// Decoded file header. Immutable after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: XmfVersion,
    /// (file type id, revision id); present in 2.00 files only.
    pub file_type: Option<(u32, u32)>,
    /// Total file size as declared by the file.
    pub file_size: u32,
    pub metadata_types: MetadataTypesTable,
    pub tree_start: u64,
    pub tree_end: u64,
    /// Bytes consumed by the header.
    pub header_len: u64,
}

impl FileHeader {
    /// Parse the header at offset 0 and validate the tree bounds.
    pub fn parse(src: &ByteSource) -> Result<Self> {
        let mut cur = Cursor::new(src, 0);

        let magic = cur.read_tag()?;
        if &magic != XMF_MAGIC {
            return Err(Error::InvalidMagic { found: magic });
        }

        let version = XmfVersion::from_tag(cur.read_tag()?)?;
        let file_type = match version {
            XmfVersion::V1 => None,
            XmfVersion::V2 => Some((cur.read_u32()?, cur.read_u32()?)),
        };

        let file_size = cur.read_vlq_value()?;
        let metadata_types = MetadataTypesTable::parse(&mut cur)?;
        let tree_start = cur.read_pointer()?;
        let tree_end = cur.read_pointer()?;

        if tree_start > tree_end || tree_end > src.len() {
            return Err(Error::invalid(format!(
                "tree bounds [{tree_start}, {tree_end}) outside file of {} bytes",
                src.len()
            )));
        }
        if tree_start < cur.pos() {
            return Err(Error::invalid(format!(
                "tree start {tree_start} overlaps the file header ending at {}",
                cur.pos()
            )));
        }
        if file_size as u64 != src.len() {
            tracing::warn!(declared = file_size, actual = src.len(), "XMF file length mismatch");
        }

        tracing::debug!(?version, ?file_type, tree_start, tree_end, "parsed XMF header");
        Ok(Self {
            version,
            file_type,
            file_size,
            metadata_types,
            tree_start,
            tree_end,
            header_len: cur.pos(),
        })
    }

    pub fn file_type_id(&self) -> Option<u32> {
        self.file_type.map(|(id, _)| id)
    }

    pub fn revision_id(&self) -> Option<u32> {
        self.file_type.map(|(_, rev)| rev)
    }

    /// Whether this is a Mobile XMF (MXMF) container.
    pub fn is_mobile_xmf(&self) -> bool {
        self.file_type_id() == Some(MOBILE_XMF_FILE_TYPE)
    }

    pub fn metadata_type(&self, type_number: u32) -> Option<&MetadataTypeEntry> {
        self.metadata_types.get(type_number)
    }
}
