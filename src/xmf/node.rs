//! Nodes of the XMF tree.
//!
//! ```text
//! +----------------------+
//! | NodeLength           |  VLQ, whole node
//! | NumberOfItems        |  VLQ, 0 = resource, >0 = folder
//! | NodeHeaderLength     |  VLQ, node start to contents
//! | NodeMetaData         |  VLQ length + items
//! | NodeUnpackers        |  VLQ length + entries
//! | ... padding ...      |
//! +----------------------+
//! | ReferenceTypeID      |  VLQ
//! | contents             |  per reference type
//! | ... padding ...      |
//! +----------------------+
//! ```

use std::sync::Arc;

use super::cursor::{latin1, Cursor};
use super::format::ReferenceType;
use super::metadata::{ContentDescription, MetadataContext, NodeMetadata, ResourceFormat};
use super::source::ByteSource;
use super::unpacker::UnpackerChain;
use crate::util::{Error, Result, UnpackFailure};

/// Absolute offset of a node stored elsewhere in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePointer(pub u64);

/// Absolute offset of resource data stored elsewhere in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataPointer(pub u64);

/// Declared header fields of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHeader {
    pub node_size: u32,
    pub item_count: u32,
    pub header_size: u32,
    pub metadata: NodeMetadata,
    pub unpackers: UnpackerChain,
}

/// Children of a folder node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderContents {
    /// Children stored back to back inside this node.
    Inline(Vec<Arc<Node>>),
    /// One pointer per child.
    InFileResources(Vec<NodePointer>),
    /// Another folder supplies the children.
    InFileNode(NodePointer),
}

/// Payload stored inside a resource node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineData {
    /// Bytes as stored.
    pub raw: Vec<u8>,
    /// Unpacker chain output; `None` when the node declares no unpackers.
    pub unpacked: Option<std::result::Result<Vec<u8>, UnpackFailure>>,
}

impl InlineData {
    /// Logical content: unpacked bytes, or the raw bytes without unpackers.
    pub fn content(&self) -> std::result::Result<&[u8], &UnpackFailure> {
        match &self.unpacked {
            None => Ok(&self.raw),
            Some(Ok(data)) => Ok(data),
            Some(Err(failure)) => Err(failure),
        }
    }
}

/// Payload or payload location of a resource node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceContents {
    Inline(InlineData),
    /// Data elsewhere in this file; the format stores no length.
    InFileResource(DataPointer),
    /// Another node whose contents this node adopts.
    InFileNode(NodePointer),
    ExternalResourceFile(String),
    XmfUri(String),
    /// A node addressed by its NodeID, in this file when `uri` is `None`.
    XmfUriAndNodeId { uri: Option<String>, node_id: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeContents {
    Folder(FolderContents),
    Resource(ResourceContents),
}

/// A decoded node. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Where the node starts in the file.
    pub offset: u64,
    pub header: NodeHeader,
    pub contents: NodeContents,
}

impl Node {
    #[inline]
    pub fn is_folder(&self) -> bool {
        matches!(self.contents, NodeContents::Folder(_))
    }

    #[inline]
    pub fn item_count(&self) -> u32 {
        self.header.item_count
    }

    #[inline]
    pub fn node_size(&self) -> u32 {
        self.header.node_size
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.header.metadata
    }

    pub fn unpackers(&self) -> &UnpackerChain {
        &self.header.unpackers
    }

    pub fn name(&self) -> Option<String> {
        self.header.metadata.node_name()
    }

    pub fn node_id(&self) -> Option<u32> {
        self.header.metadata.node_id()
    }

    pub fn resource_format(&self) -> Option<ResourceFormat> {
        self.header.metadata.resource_format()
    }

    pub fn content_description(&self) -> Option<&ContentDescription> {
        self.header.metadata.content_description()
    }

    /// Inline payload, if this is an inline resource.
    pub fn inline_data(&self) -> Option<&InlineData> {
        match &self.contents {
            NodeContents::Resource(ResourceContents::Inline(data)) => Some(data),
            _ => None,
        }
    }

    /// Logical content of an inline resource.
    pub fn content(&self) -> Result<&[u8]> {
        let data = self.inline_data().ok_or_else(|| {
            Error::invalid(format!("node at offset {} has no inline content", self.offset))
        })?;
        data.content().map_err(|failure| Error::Unpack {
            offset: self.offset,
            failure: failure.clone(),
        })
    }
}

/// Reads nodes from a source. Holds no state besides its configuration.
#[derive(Clone, Copy)]
pub struct NodeParser<'a> {
    pub src: &'a ByteSource,
    pub ctx: MetadataContext<'a>,
    pub max_depth: usize,
}

impl<'a> NodeParser<'a> {
    /// Parse the node starting at `offset`, `depth` levels below the caller's root.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn parse_at(&self, offset: u64, depth: usize) -> Result<Node> {
        if depth > self.max_depth {
            return Err(Error::DepthExceeded { offset, limit: self.max_depth });
        }

        let mut cur = Cursor::new(self.src, offset);
        let node_size = cur.read_vlq_value()?;
        let item_count = cur.read_vlq_value()?;
        let header_size = cur.read_vlq_value()?;

        let node_end = offset + node_size as u64;
        if node_end > self.src.len() {
            return Err(Error::UnexpectedEof {
                offset,
                needed: node_size as u64,
                available: self.src.len().saturating_sub(offset),
            });
        }
        if header_size > node_size {
            return Err(Error::SizeMismatch {
                offset,
                context: "node header",
                expected: node_size as u64,
                consumed: header_size as u64,
            });
        }

        let metadata = NodeMetadata::parse(&mut cur, self.ctx)?;
        let unpackers = UnpackerChain::parse(&mut cur)?;
        cur.pad_to(offset, offset + header_size as u64, "node header")?;

        let ref_pos = cur.pos();
        let reference = ReferenceType::from_id(cur.read_vlq_value()?, ref_pos)?;
        let header = NodeHeader { node_size, item_count, header_size, metadata, unpackers };

        let contents = if item_count > 0 {
            NodeContents::Folder(self.parse_folder(&mut cur, reference, &header, offset, depth)?)
        } else {
            NodeContents::Resource(self.parse_resource(&mut cur, reference, &header, offset)?)
        };
        cur.pad_to(offset, node_end, "node")?;

        tracing::trace!(offset, node_size, item_count, ?reference, "decoded node");
        Ok(Node { offset, header, contents })
    }

    fn parse_folder(
        &self,
        cur: &mut Cursor<'_>,
        reference: ReferenceType,
        header: &NodeHeader,
        offset: u64,
        depth: usize,
    ) -> Result<FolderContents> {
        let node_end = offset + header.node_size as u64;
        let overrun = |consumed: u64| Error::SizeMismatch {
            offset,
            context: "folder node",
            expected: header.node_size as u64,
            consumed,
        };

        match reference {
            ReferenceType::InlineResource => {
                let mut children = Vec::new();
                for _ in 0..header.item_count {
                    if cur.pos() >= node_end {
                        return Err(overrun(cur.pos() + 1 - offset));
                    }
                    let child = self.parse_at(cur.pos(), depth + 1)?;
                    let child_end = cur.pos() + child.header.node_size as u64;
                    if child_end > node_end {
                        return Err(overrun(child_end - offset));
                    }
                    cur.skip(child.header.node_size as u64)?;
                    children.push(Arc::new(child));
                }
                Ok(FolderContents::Inline(children))
            }
            ReferenceType::InFileResource => {
                // every pointer takes at least one byte
                if header.item_count as u64 > node_end.saturating_sub(cur.pos()) {
                    return Err(overrun(cur.pos() - offset + header.item_count as u64));
                }
                let pointers = cur.read_pointers(header.item_count)?;
                Ok(FolderContents::InFileResources(pointers.into_iter().map(NodePointer).collect()))
            }
            ReferenceType::InFileNode => Ok(FolderContents::InFileNode(NodePointer(cur.read_pointer()?))),
            other => Err(Error::UnknownTag {
                offset: cur.pos(),
                kind: "folder reference type",
                value: other.id(),
            }),
        }
    }

    fn parse_resource(
        &self,
        cur: &mut Cursor<'_>,
        reference: ReferenceType,
        header: &NodeHeader,
        offset: u64,
    ) -> Result<ResourceContents> {
        let node_end = offset + header.node_size as u64;

        Ok(match reference {
            ReferenceType::InlineResource => {
                if cur.pos() > node_end {
                    return Err(Error::SizeMismatch {
                        offset,
                        context: "resource node",
                        expected: header.node_size as u64,
                        consumed: cur.pos() - offset,
                    });
                }
                let raw = cur.read_bytes(node_end - cur.pos())?;
                let unpacked = if header.unpackers.is_empty() {
                    None
                } else {
                    let result = header.unpackers.apply(&raw);
                    if let Err(failure) = &result {
                        tracing::warn!(offset, %failure, "resource content unavailable");
                    }
                    Some(result)
                };
                ResourceContents::Inline(InlineData { raw, unpacked })
            }
            ReferenceType::InFileResource => ResourceContents::InFileResource(DataPointer(cur.read_pointer()?)),
            ReferenceType::InFileNode => ResourceContents::InFileNode(NodePointer(cur.read_pointer()?)),
            ReferenceType::ExternalResourceFile => {
                ResourceContents::ExternalResourceFile(latin1(&cur.read_prefixed()?))
            }
            ReferenceType::XmfUri => ResourceContents::XmfUri(latin1(&cur.read_prefixed()?)),
            ReferenceType::XmfUriAndNodeId => {
                let uri = cur.read_prefixed()?;
                let node_id = cur.read_vlq_value()?;
                ResourceContents::XmfUriAndNodeId {
                    uri: (!uri.is_empty()).then(|| latin1(&uri)),
                    node_id,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BasicId3Parser;

    fn parser(src: &ByteSource) -> NodeParser<'_> {
        NodeParser {
            src,
            ctx: MetadataContext { id3: &BasicId3Parser },
            max_depth: 8,
        }
    }

    #[test]
    fn test_inline_leaf() {
        // size=9, items=0, header=5, no metadata, no unpackers, inline, "abc"
        let src = ByteSource::from_bytes(vec![9, 0, 5, 0, 0, 1, b'a', b'b', b'c']);
        let node = parser(&src).parse_at(0, 0).unwrap();
        assert!(!node.is_folder());
        assert_eq!(node.header.header_size, 5);
        assert_eq!(node.content().unwrap(), b"abc");
    }

    #[test]
    fn test_zero_items_with_in_file_node_is_a_resource() {
        let src = ByteSource::from_bytes(vec![7, 0, 5, 0, 0, 3, 0]);
        let node = parser(&src).parse_at(0, 0).unwrap();
        assert_eq!(
            node.contents,
            NodeContents::Resource(ResourceContents::InFileNode(NodePointer(0)))
        );
        assert!(node.content().is_err());
    }

    #[test]
    fn test_folder_pointers() {
        let src = ByteSource::from_bytes(vec![8, 2, 5, 0, 0, 2, 0x40, 0x41]);
        let node = parser(&src).parse_at(0, 0).unwrap();
        assert_eq!(
            node.contents,
            NodeContents::Folder(FolderContents::InFileResources(vec![NodePointer(0x40), NodePointer(0x41)]))
        );
    }

    #[test]
    fn test_header_size_beyond_node() {
        let src = ByteSource::from_bytes(vec![4, 0, 6, 0, 0, 1]);
        assert!(matches!(
            parser(&src).parse_at(0, 0),
            Err(Error::SizeMismatch { context: "node header", .. })
        ));
    }

    #[test]
    fn test_header_fields_longer_than_declared() {
        // header declares 4 bytes but the unpacker length field ends at 5
        let src = ByteSource::from_bytes(vec![7, 0, 4, 0, 0, 1, 0]);
        assert!(matches!(
            parser(&src).parse_at(0, 0),
            Err(Error::SizeMismatch { context: "node header", expected: 4, consumed: 5, .. })
        ));
    }

    #[test]
    fn test_node_past_end_of_source() {
        let src = ByteSource::from_bytes(vec![40, 0, 5, 0, 0, 1]);
        assert!(matches!(parser(&src).parse_at(0, 0), Err(Error::UnexpectedEof { .. })));
    }

    #[test]
    fn test_depth_limit() {
        let src = ByteSource::from_bytes(vec![6, 0, 5, 0, 0, 1]);
        assert!(parser(&src).parse_at(0, 8).is_ok());
        assert!(matches!(
            parser(&src).parse_at(0, 9),
            Err(Error::DepthExceeded { offset: 0, limit: 8 })
        ));
    }
}
