//! Helpers that assemble XMF files byte by byte.
//!
//! Size, count and pointer fields are written as 4-byte VLQs so a node's
//! length does not depend on the offsets it contains.

#![allow(dead_code)]

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use xmf::xmf::vlq;
use xmf::xmf::StandardField;

pub fn vlq(value: u32) -> Vec<u8> {
    vlq::encode_min(value).unwrap().to_vec()
}

/// Fixed-width VLQ, used for sizes and pointers.
pub fn vlq4(value: u32) -> Vec<u8> {
    vlq::encode(value, 4).unwrap().to_vec()
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Valid zlib header followed by a deflate block of the reserved type.
pub fn corrupt_zlib() -> Vec<u8> {
    vec![0x78, 0x9C, 0xFF, 0xFF, 0xFF, 0xFF]
}

/// Universal metadata item for a standard field.
pub fn meta(field: StandardField, format: u8, value: &[u8]) -> Vec<u8> {
    let mut out = vec![0];
    out.extend(vlq(field.id()));
    out.push(0);
    out.extend(vlq(value.len() as u32 + 1));
    out.push(format);
    out.extend_from_slice(value);
    out
}

pub fn meta_name(name: &str) -> Vec<u8> {
    meta(StandardField::NodeName, 0, name.as_bytes())
}

pub fn meta_node_id(id: u32) -> Vec<u8> {
    meta(StandardField::NodeId, 6, &vlq(id))
}

/// ResourceFormat naming a standard format id.
pub fn meta_resource_format(format_id: u32) -> Vec<u8> {
    let mut value = vec![0];
    value.extend(vlq(format_id));
    meta(StandardField::ResourceFormat, 6, &value)
}

pub fn unpacker_none() -> Vec<u8> {
    vec![0, 0, 0]
}

pub fn unpacker_zlib(decoded_len: u32) -> Vec<u8> {
    let mut out = vec![0, 1];
    out.extend(vlq(decoded_len));
    out
}

/// Reference type ids.
pub const INLINE: u32 = 1;
pub const IN_FILE_RESOURCE: u32 = 2;
pub const IN_FILE_NODE: u32 = 3;
pub const EXTERNAL_FILE: u32 = 4;
pub const XMF_URI: u32 = 5;
pub const XMF_URI_AND_NODE_ID: u32 = 6;

#[derive(Clone, Default)]
pub struct NodeSpec {
    pub item_count: u32,
    pub metadata: Vec<u8>,
    pub unpackers: Vec<u8>,
    pub header_padding: usize,
    pub reference: u32,
    pub content: Vec<u8>,
    pub trailing_padding: usize,
}

impl NodeSpec {
    /// Inline resource holding `data`.
    pub fn leaf(data: &[u8]) -> Self {
        Self { reference: INLINE, content: data.to_vec(), ..Self::default() }
    }

    /// Folder with inline children (already built).
    pub fn folder(children: &[Vec<u8>]) -> Self {
        Self {
            item_count: children.len() as u32,
            reference: INLINE,
            content: children.concat(),
            ..Self::default()
        }
    }

    /// Folder with one pointer per child.
    pub fn folder_pointers(pointers: &[u64]) -> Self {
        Self {
            item_count: pointers.len() as u32,
            reference: IN_FILE_RESOURCE,
            content: pointers.iter().flat_map(|&p| vlq4(p as u32)).collect(),
            ..Self::default()
        }
    }

    /// Folder or leaf redirected to the node at `pointer`.
    pub fn redirect(item_count: u32, pointer: u64) -> Self {
        Self { item_count, reference: IN_FILE_NODE, content: vlq4(pointer as u32), ..Self::default() }
    }

    /// Resource stored elsewhere in the file.
    pub fn in_file_data(pointer: u64) -> Self {
        Self { reference: IN_FILE_RESOURCE, content: vlq4(pointer as u32), ..Self::default() }
    }

    /// Leaf with a length-prefixed string for reference types 4 and 5.
    pub fn external(reference: u32, location: &str) -> Self {
        let mut content = vlq(location.len() as u32);
        content.extend_from_slice(location.as_bytes());
        Self { reference, content, ..Self::default() }
    }

    pub fn node_id_ref(uri: &str, node_id: u32) -> Self {
        let mut content = vlq(uri.len() as u32);
        content.extend_from_slice(uri.as_bytes());
        content.extend(vlq(node_id));
        Self { reference: XMF_URI_AND_NODE_ID, content, ..Self::default() }
    }

    pub fn with_metadata(mut self, items: &[Vec<u8>]) -> Self {
        self.metadata = items.concat();
        self
    }

    pub fn with_unpackers(mut self, entries: &[Vec<u8>]) -> Self {
        self.unpackers = entries.concat();
        self
    }

    pub fn with_padding(mut self, header: usize, trailing: usize) -> Self {
        self.header_padding = header;
        self.trailing_padding = trailing;
        self
    }

    pub fn header_size(&self) -> usize {
        12 + vlq(self.metadata.len() as u32).len()
            + self.metadata.len()
            + vlq(self.unpackers.len() as u32).len()
            + self.unpackers.len()
            + self.header_padding
    }

    pub fn build(&self) -> Vec<u8> {
        let header_size = self.header_size();
        let mut body = vlq(self.reference);
        body.extend_from_slice(&self.content);
        body.extend(std::iter::repeat(0).take(self.trailing_padding));
        let node_size = header_size + body.len();

        let mut out = vlq4(node_size as u32);
        out.extend(vlq4(self.item_count));
        out.extend(vlq4(header_size as u32));
        out.extend(vlq(self.metadata.len() as u32));
        out.extend_from_slice(&self.metadata);
        out.extend(vlq(self.unpackers.len() as u32));
        out.extend_from_slice(&self.unpackers);
        out.extend(std::iter::repeat(0).take(self.header_padding));
        out.extend(body);
        assert_eq!(out.len(), node_size);
        out
    }
}

/// Whole-file assembler. The tree starts right after the header and runs to
/// the end of the file.
pub struct XmfBuilder {
    file_type: Option<(u32, u32)>,
    body: Vec<u8>,
}

impl XmfBuilder {
    pub fn v1() -> Self {
        Self { file_type: None, body: Vec::new() }
    }

    pub fn v2(file_type: u32, revision: u32) -> Self {
        Self { file_type: Some((file_type, revision)), body: Vec::new() }
    }

    /// "XMF_" + version [+ type + revision] + fileSize + empty table + tree bounds.
    pub fn header_len(&self) -> u64 {
        let base = 8 + 4 + 1 + 4 + 4;
        if self.file_type.is_some() { base + 8 } else { base }
    }

    /// Offset the next pushed bytes will land at.
    pub fn offset(&self) -> u64 {
        self.header_len() + self.body.len() as u64
    }

    pub fn push(&mut self, bytes: &[u8]) -> u64 {
        let at = self.offset();
        self.body.extend_from_slice(bytes);
        at
    }

    pub fn finish(self) -> Vec<u8> {
        let total = self.offset() as u32;
        let mut out = b"XMF_".to_vec();
        match self.file_type {
            None => out.extend_from_slice(b"1.00"),
            Some((file_type, revision)) => {
                out.extend_from_slice(b"2.00");
                out.extend_from_slice(&file_type.to_be_bytes());
                out.extend_from_slice(&revision.to_be_bytes());
            }
        }
        out.extend(vlq4(total));
        out.push(0);
        out.extend(vlq4(self.header_len() as u32));
        out.extend(vlq4(total));
        out.extend(self.body);
        out
    }
}

/// Single-root file.
pub fn file_with_root(root: &[u8]) -> Vec<u8> {
    let mut builder = XmfBuilder::v1();
    builder.push(root);
    builder.finish()
}
