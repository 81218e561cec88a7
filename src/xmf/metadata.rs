//! Node metadata.
//!
//! A node's metadata block is a VLQ byte length followed by items until that
//! many bytes are consumed. Each item is a field specifier and its contents;
//! the grammar of the contents depends on which field is being described, so
//! the parsed specifier is passed into the contents parser.

use super::cursor::{latin1, Cursor};
use super::format::{StandardField, StandardResourceFormat, StringFormat, STANDARD_ID_TYPE};
use super::header::MetadataTypesTable;
use crate::core::{Guid, Id3Parser, Id3Tag};
use crate::util::{Error, Result};

/// State the field parsers need besides the cursor.
#[derive(Clone, Copy)]
pub struct MetadataContext<'a> {
    pub id3: &'a dyn Id3Parser,
}

/// Names the field an item describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldSpecifier {
    Standard(StandardField),
    Custom(String),
}

impl FieldSpecifier {
    pub fn parse(cur: &mut Cursor<'_>) -> Result<Self> {
        let len = cur.read_vlq_value()?;
        if len == 0 {
            let id_pos = cur.pos();
            Ok(Self::Standard(StandardField::from_id(cur.read_vlq_value()?, id_pos)?))
        } else {
            Ok(Self::Custom(latin1(&cur.read_bytes(len as u64)?)))
        }
    }

    pub fn standard(&self) -> Option<StandardField> {
        match self {
            Self::Standard(field) => Some(*field),
            Self::Custom(_) => None,
        }
    }
}

/// Resource format named by the ResourceFormat field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFormat {
    Standard(StandardResourceFormat),
    /// Manufacturer or registered format; `type_id` is the non-standard id space.
    Custom { type_id: u32, format_id: u32 },
}

impl ResourceFormat {
    pub fn parse(cur: &mut Cursor<'_>) -> Result<Self> {
        let type_id = cur.read_vlq_value()?;
        let id_pos = cur.pos();
        let format_id = cur.read_vlq_value()?;
        if type_id == STANDARD_ID_TYPE {
            Ok(Self::Standard(StandardResourceFormat::from_id(format_id, id_pos)?))
        } else {
            Ok(Self::Custom { type_id, format_id })
        }
    }
}

/// Mobile XMF content description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDescription {
    pub mip_index: u32,
    pub channel_count: u32,
    pub resource_count: u32,
    /// Playback resource list: identity of each resource.
    pub prl: Vec<Guid>,
    /// Playback resource group list: group of each resource.
    pub prgl: Vec<u32>,
    /// `usage[channel][resource]` counters.
    pub usage: Vec<Vec<u32>>,
}

impl ContentDescription {
    pub fn parse(cur: &mut Cursor<'_>) -> Result<Self> {
        let mip_index = cur.read_vlq_value()?;
        let channel_count = cur.read_vlq_value()?;
        let resource_count = cur.read_vlq_value()?;

        // 16 GUID bytes + at least one byte per group id and counter
        let needed = resource_count as u64 * 17 + channel_count as u64 * resource_count as u64;
        if needed > cur.remaining() {
            return Err(Error::UnexpectedEof {
                offset: cur.pos(),
                needed,
                available: cur.remaining(),
            });
        }

        let mut prl = Vec::with_capacity(resource_count as usize);
        for _ in 0..resource_count {
            let mut guid = [0u8; 16];
            guid.copy_from_slice(&cur.read_bytes(16)?);
            prl.push(Guid(guid));
        }
        let prgl = (0..resource_count)
            .map(|_| cur.read_vlq_value())
            .collect::<Result<Vec<_>>>()?;
        let usage = (0..channel_count)
            .map(|_| (0..resource_count).map(|_| cur.read_vlq_value()).collect())
            .collect::<Result<Vec<Vec<_>>>>()?;

        Ok(Self { mip_index, channel_count, resource_count, prl, prgl, usage })
    }

    /// Usage counter for a channel/resource pair.
    pub fn usage(&self, channel: usize, resource: usize) -> Option<u32> {
        self.usage.get(channel)?.get(resource).copied()
    }
}

/// Typed value of a universal (single-version) field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    FileType { file_type_id: u32, revision_id: u32 },
    NodeId(u32),
    ResourceFormat(ResourceFormat),
    ContentDescription(ContentDescription),
    Id3(Id3Tag),
    /// Fields without a dedicated grammar (names, titles, MIME types, ...).
    Data(Vec<u8>),
}

/// One encoded version of a multi-version field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentVersion {
    /// Type number looked up in the file's metadata types table.
    pub metadata_type: u32,
    pub data: Vec<u8>,
}

impl ContentVersion {
    /// Decode using the format the metadata types table declares.
    pub fn text(&self, table: &MetadataTypesTable) -> Option<String> {
        decode_text(table.get(self.metadata_type)?.format, &self.data)
    }

    /// Language/country tag the table declares for this version.
    pub fn language<'t>(&self, table: &'t MetadataTypesTable) -> Option<&'t str> {
        table.get(self.metadata_type).map(|e| e.language.as_str())
    }
}

/// Contents of a metadata field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldContents {
    /// Field present without a value.
    Empty,
    Universal { format: StringFormat, value: FieldValue },
    Versions(Vec<ContentVersion>),
    /// Typed parsing failed; the field's bytes are kept as-is.
    Opaque { data: Vec<u8>, diagnostic: String },
}

impl FieldContents {
    /// Parse contents for `field`. Always consumes exactly the declared length.
    pub fn parse(cur: &mut Cursor<'_>, field: &FieldSpecifier, ctx: MetadataContext<'_>) -> Result<Self> {
        let versions = cur.read_vlq_value()?;
        let len = cur.read_vlq_value()? as u64;
        if len == 0 {
            // reserved placeholder byte
            cur.skip(1)?;
            return Ok(Self::Empty);
        }

        let start = cur.pos();
        let window = cur.window(len)?;
        let mut typed = window.clone();
        let parsed = if versions == 0 {
            Self::parse_universal(&mut typed, field, ctx)
        } else {
            Self::parse_versions(&mut typed, versions)
        };

        match parsed {
            Ok(contents) => {
                if typed.remaining() > 0 {
                    tracing::warn!(
                        offset = start,
                        ?field,
                        unread = typed.remaining(),
                        "metadata field shorter than its declared length"
                    );
                }
                Ok(contents)
            }
            Err(e @ Error::Io(_)) => Err(e),
            Err(e) => {
                tracing::warn!(offset = start, ?field, error = %e, "keeping metadata field as raw bytes");
                let mut raw = window;
                Ok(Self::Opaque { data: raw.read_rest()?, diagnostic: e.to_string() })
            }
        }
    }

    fn parse_universal(cur: &mut Cursor<'_>, field: &FieldSpecifier, ctx: MetadataContext<'_>) -> Result<Self> {
        let format_pos = cur.pos();
        let format = StringFormat::from_id(cur.read_vlq_value()?, format_pos)?;

        let value = match field.standard() {
            Some(StandardField::XmfFileType) => FieldValue::FileType {
                file_type_id: cur.read_vlq_value()?,
                revision_id: cur.read_vlq_value()?,
            },
            Some(StandardField::NodeId) => FieldValue::NodeId(cur.read_vlq_value()?),
            Some(StandardField::ResourceFormat) => FieldValue::ResourceFormat(ResourceFormat::parse(cur)?),
            Some(StandardField::ContentDescription) => {
                FieldValue::ContentDescription(ContentDescription::parse(cur)?)
            }
            Some(StandardField::Id3Metadata) => {
                let tag_pos = cur.pos();
                let bytes = cur.read_rest()?;
                let (tag, consumed) = ctx.id3.parse(&bytes)?;
                if consumed < bytes.len() {
                    tracing::debug!(offset = tag_pos, padding = bytes.len() - consumed, "bytes after ID3 tag");
                }
                FieldValue::Id3(tag)
            }
            _ => FieldValue::Data(cur.read_rest()?),
        };

        Ok(Self::Universal { format, value })
    }

    // Terminates on the field's own length; the version count is advisory.
    fn parse_versions(cur: &mut Cursor<'_>, declared: u32) -> Result<Self> {
        let mut versions = Vec::with_capacity(declared.min(64) as usize);
        while cur.remaining() > 0 {
            let metadata_type = cur.read_vlq_value()?;
            let data = cur.read_prefixed()?;
            versions.push(ContentVersion { metadata_type, data });
        }
        if versions.len() != declared as usize {
            tracing::warn!(declared, found = versions.len(), "metadata version count mismatch");
        }
        Ok(Self::Versions(versions))
    }

    /// The typed value of a universal field.
    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            Self::Universal { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Text of a universal string field, decoded per its string format.
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Universal { format, value: FieldValue::Data(data) } => decode_text(*format, data),
            _ => None,
        }
    }
}

/// Decode Extended ASCII (as Latin-1) and UTF-16BE; SCSU and binary stay raw.
pub fn decode_text(format: StringFormat, data: &[u8]) -> Option<String> {
    match format {
        StringFormat::ExtendedAsciiVisible | StringFormat::ExtendedAsciiHidden => Some(latin1(data)),
        StringFormat::Utf16Visible | StringFormat::Utf16Hidden => {
            if data.len() % 2 != 0 {
                return None;
            }
            let units: Vec<u16> = data.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
            String::from_utf16(&units).ok()
        }
        _ => None,
    }
}

/// A (field specifier, field contents) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataItem {
    pub field: FieldSpecifier,
    pub contents: FieldContents,
}

impl MetadataItem {
    pub fn parse(cur: &mut Cursor<'_>, ctx: MetadataContext<'_>) -> Result<Self> {
        let field = FieldSpecifier::parse(cur)?;
        let contents = FieldContents::parse(cur, &field, ctx)?;
        Ok(Self { field, contents })
    }
}

/// All metadata items of one node, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMetadata {
    items: Vec<MetadataItem>,
}

impl NodeMetadata {
    /// Parse a length-prefixed metadata block.
    pub fn parse(cur: &mut Cursor<'_>, ctx: MetadataContext<'_>) -> Result<Self> {
        let len = cur.read_vlq_value()? as u64;
        let start = cur.pos();
        let end = start + len;

        let mut items = Vec::new();
        while cur.pos() < end {
            let before = cur.pos();
            items.push(MetadataItem::parse(cur, ctx)?);
            if cur.pos() == before {
                return Err(Error::invalid(format!("metadata item at {before} consumed no bytes")));
            }
        }
        cur.pad_to(start, end, "node metadata")?;

        Ok(Self { items })
    }

    pub fn items(&self) -> &[MetadataItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First item for a standard field.
    pub fn get(&self, field: StandardField) -> Option<&FieldContents> {
        self.items
            .iter()
            .find(|item| item.field == FieldSpecifier::Standard(field))
            .map(|item| &item.contents)
    }

    /// First item for a custom field name.
    pub fn custom(&self, name: &str) -> Option<&FieldContents> {
        self.items
            .iter()
            .find(|item| matches!(&item.field, FieldSpecifier::Custom(n) if n == name))
            .map(|item| &item.contents)
    }

    pub fn node_name(&self) -> Option<String> {
        self.get(StandardField::NodeName)?.text()
    }

    pub fn node_id(&self) -> Option<u32> {
        match self.get(StandardField::NodeId)?.value()? {
            FieldValue::NodeId(id) => Some(*id),
            _ => None,
        }
    }

    pub fn resource_format(&self) -> Option<ResourceFormat> {
        match self.get(StandardField::ResourceFormat)?.value()? {
            FieldValue::ResourceFormat(format) => Some(*format),
            _ => None,
        }
    }

    pub fn content_description(&self) -> Option<&ContentDescription> {
        match self.get(StandardField::ContentDescription)?.value()? {
            FieldValue::ContentDescription(desc) => Some(desc),
            _ => None,
        }
    }

    pub fn file_type(&self) -> Option<(u32, u32)> {
        match self.get(StandardField::XmfFileType)?.value()? {
            FieldValue::FileType { file_type_id, revision_id } => Some((*file_type_id, *revision_id)),
            _ => None,
        }
    }

    pub fn id3(&self) -> Option<&Id3Tag> {
        match self.get(StandardField::Id3Metadata)?.value()? {
            FieldValue::Id3(tag) => Some(tag),
            _ => None,
        }
    }
}
