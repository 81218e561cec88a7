//! XMF file reader: header access, pointer resolution and tree walking.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use super::format::{StandardUnpacker, DEFAULT_MAX_DEPTH};
use super::header::FileHeader;
use super::metadata::MetadataContext;
use super::node::{DataPointer, FolderContents, Node, NodeContents, NodeParser, NodePointer, ResourceContents};
use super::source::ByteSource;
use super::unpacker::UnpackerId;
use crate::core::{is_zlib, BasicId3Parser, Id3Parser};
use crate::util::{Error, Result, UnpackFailure};

/// Decoder configuration.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Ceiling on folder nesting and pointer chains.
    pub max_depth: usize,
    /// Resolve pointer-referenced siblings on the rayon pool.
    pub parallel: bool,
    /// Memory-map files opened from a path.
    pub use_mmap: bool,
    /// Parser for the ID3Metadata field.
    pub id3: Arc<dyn Id3Parser>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            parallel: false,
            use_mmap: cfg!(feature = "mmap"),
            id3: Arc::new(BasicId3Parser),
        }
    }
}

impl DecodeOptions {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    pub fn with_id3_parser(mut self, parser: Arc<dyn Id3Parser>) -> Self {
        self.id3 = parser;
        self
    }
}

/// A node together with its decoded subtree.
///
/// Children that failed to decode are kept as errors so that the rest of
/// the tree stays available. A node referenced from several places is
/// decoded once and its subtree shared, so the tree is a DAG; the walking
/// helpers below visit each distinct node once.
#[derive(Debug)]
pub struct TreeNode {
    pub node: Arc<Node>,
    pub children: Vec<Result<Arc<TreeNode>>>,
}

impl TreeNode {
    /// Successfully decoded children.
    pub fn subtrees(&self) -> impl DoubleEndedIterator<Item = &TreeNode> + '_ {
        self.children.iter().filter_map(|c| c.as_deref().ok())
    }

    /// Number of levels, counting this node.
    pub fn depth(&self) -> usize {
        fn walk(tree: &TreeNode, memo: &mut HashMap<u64, usize>) -> usize {
            if let Some(&depth) = memo.get(&tree.node.offset) {
                return depth;
            }
            let depth = 1 + tree.subtrees().map(|sub| walk(sub, memo)).max().unwrap_or(0);
            memo.insert(tree.node.offset, depth);
            depth
        }
        walk(self, &mut HashMap::new())
    }

    /// Number of distinct decoded nodes.
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Errors of failed subtrees, depth first, each reported once.
    pub fn errors(&self) -> Vec<&Error> {
        fn collect<'t>(tree: &'t TreeNode, seen: &mut HashSet<u64>, out: &mut Vec<&'t Error>) {
            if !seen.insert(tree.node.offset) {
                return;
            }
            for child in &tree.children {
                match child {
                    Ok(sub) => collect(sub, seen, out),
                    Err(e) => out.push(e),
                }
            }
        }
        let mut out = Vec::new();
        collect(self, &mut HashSet::new(), &mut out);
        out
    }

    /// Depth-first iterator over distinct decoded nodes.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Node>> + '_ {
        let mut stack = vec![self];
        let mut seen = HashSet::new();
        std::iter::from_fn(move || loop {
            let tree = stack.pop()?;
            if seen.insert(tree.node.offset) {
                stack.extend(tree.subtrees().rev());
                return Some(&tree.node);
            }
        })
    }

    /// Follow child indices from this node.
    pub fn get(&self, path: &[usize]) -> Option<&TreeNode> {
        match path.split_first() {
            None => Some(self),
            Some((&i, rest)) => self.children.get(i)?.as_deref().ok()?.get(rest),
        }
    }
}

/// Nodes decoded during one tree walk, keyed by offset.
///
/// Every pointer to an offset resolves to the same `Arc`; parsing happens
/// outside the lock so parallel siblings do not serialize.
#[derive(Default)]
struct NodeArena {
    nodes: Mutex<HashMap<u64, Arc<Node>>>,
}

impl NodeArena {
    fn intern(&self, offset: u64, parse: impl FnOnce() -> Result<Node>) -> Result<Arc<Node>> {
        if let Some(node) = self.nodes.lock().get(&offset) {
            return Ok(Arc::clone(node));
        }
        let node = Arc::new(parse()?);
        Ok(Arc::clone(self.nodes.lock().entry(offset).or_insert(node)))
    }

    /// Register a node decoded as part of its parent.
    fn share(&self, node: &Arc<Node>) -> Arc<Node> {
        Arc::clone(self.nodes.lock().entry(node.offset).or_insert_with(|| Arc::clone(node)))
    }
}

/// Per-call state of `decode_tree`.
#[derive(Default)]
struct TreeWalk {
    arena: NodeArena,
    trees: HashMap<u64, Arc<TreeNode>>,
    ancestors: Vec<u64>,
}

/// XMF file reader.
pub struct XmfReader {
    src: Arc<ByteSource>,
    header: FileHeader,
    options: DecodeOptions,
}

impl XmfReader {
    /// Open an XMF file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, DecodeOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: DecodeOptions) -> Result<Self> {
        let src = ByteSource::open_opts(path, options.use_mmap)?;
        Self::from_source(Arc::new(src), options)
    }

    /// Decode from bytes already in memory.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        Self::from_source(Arc::new(ByteSource::from_bytes(bytes)), DecodeOptions::default())
    }

    /// Decode from an existing source; parses the file header.
    pub fn from_source(src: Arc<ByteSource>, options: DecodeOptions) -> Result<Self> {
        let header = FileHeader::parse(&src)?;
        Ok(Self { src, header, options })
    }

    #[inline]
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    #[inline]
    pub fn source(&self) -> &Arc<ByteSource> {
        &self.src
    }

    #[inline]
    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    fn parser(&self) -> NodeParser<'_> {
        NodeParser {
            src: &self.src,
            ctx: MetadataContext { id3: self.options.id3.as_ref() },
            max_depth: self.options.max_depth,
        }
    }

    fn parse_at(&self, offset: u64, depth: usize) -> Result<Arc<Node>> {
        self.parser().parse_at(offset, depth).map(Arc::new)
    }

    /// Decode the root node at the start of the tree.
    pub fn root(&self) -> Result<Arc<Node>> {
        self.parse_at(self.header.tree_start, 0)
    }

    /// Decode the node at an absolute offset.
    pub fn node_at(&self, offset: u64) -> Result<Arc<Node>> {
        self.parse_at(offset, 0)
    }

    /// Decode the node a pointer refers to.
    pub fn resolve(&self, pointer: NodePointer) -> Result<Arc<Node>> {
        self.parse_at(pointer.0, 0)
    }

    /// Children of `node`, each decoded independently.
    ///
    /// The outer error covers folder indirection; a failure to decode one
    /// pointer-referenced child only affects that child's entry.
    pub fn children(&self, node: &Node) -> Result<Vec<Result<Arc<Node>>>> {
        self.children_at(node, 0, None)
    }

    fn parse_shared(&self, offset: u64, depth: usize, arena: Option<&NodeArena>) -> Result<Arc<Node>> {
        match arena {
            Some(arena) => arena.intern(offset, || self.parser().parse_at(offset, depth)),
            None => self.parse_at(offset, depth),
        }
    }

    fn children_at(
        &self,
        node: &Node,
        depth: usize,
        arena: Option<&NodeArena>,
    ) -> Result<Vec<Result<Arc<Node>>>> {
        match &node.contents {
            NodeContents::Resource(_) => Ok(Vec::new()),
            NodeContents::Folder(FolderContents::Inline(children)) => Ok(children
                .iter()
                .map(|child| Ok(arena.map_or_else(|| Arc::clone(child), |a| a.share(child))))
                .collect()),
            NodeContents::Folder(FolderContents::InFileResources(pointers)) => {
                Ok(self.resolve_all(pointers, depth + 1, arena))
            }
            NodeContents::Folder(FolderContents::InFileNode(pointer)) => {
                // cached targets skip the parser's own depth check
                if depth + 1 > self.options.max_depth {
                    return Err(Error::DepthExceeded { offset: pointer.0, limit: self.options.max_depth });
                }
                let target = self.parse_shared(pointer.0, depth + 1, arena)?;
                if !target.is_folder() {
                    return Err(Error::NotAFolder { offset: pointer.0 });
                }
                self.children_at(&target, depth + 1, arena)
            }
        }
    }

    fn resolve_all(
        &self,
        pointers: &[NodePointer],
        depth: usize,
        arena: Option<&NodeArena>,
    ) -> Vec<Result<Arc<Node>>> {
        if self.options.parallel {
            pointers.par_iter().map(|p| self.parse_shared(p.0, depth, arena)).collect()
        } else {
            pointers.iter().map(|p| self.parse_shared(p.0, depth, arena)).collect()
        }
    }

    /// Follow `InFileNode` redirects from a resource node to the node whose
    /// contents it adopts. Other nodes are returned unchanged.
    pub fn resolve_redirect(&self, node: &Arc<Node>) -> Result<Arc<Node>> {
        self.resolve_redirect_at(node, 0)
    }

    fn resolve_redirect_at(&self, node: &Arc<Node>, depth: usize) -> Result<Arc<Node>> {
        let mut current = Arc::clone(node);
        let mut depth = depth;
        while let NodeContents::Resource(ResourceContents::InFileNode(pointer)) = &current.contents {
            depth += 1;
            let next = self.parse_at(pointer.0, depth)?;
            tracing::trace!(from = current.offset, to = next.offset, "following node redirect");
            current = next;
        }
        Ok(current)
    }

    /// Decode the whole tree from the root.
    ///
    /// Only a failure to decode the root itself is returned as an error.
    /// Each node offset is parsed and expanded once; aliases share the
    /// resulting `Arc`s.
    pub fn decode_tree(&self) -> Result<Arc<TreeNode>> {
        let mut walk = TreeWalk::default();
        let root = walk.arena.intern(self.header.tree_start, || {
            self.parser().parse_at(self.header.tree_start, 0)
        })?;
        let tree = self.build_tree(root, 0, &mut walk);
        tracing::debug!(nodes = walk.trees.len(), "decoded XMF tree");
        Ok(tree)
    }

    fn build_tree(&self, node: Arc<Node>, depth: usize, walk: &mut TreeWalk) -> Arc<TreeNode> {
        if let Some(tree) = walk.trees.get(&node.offset) {
            return Arc::clone(tree);
        }

        let children = match self.children_at(&node, depth, Some(&walk.arena)) {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!(offset = node.offset, error = %e, "folder children unavailable");
                let tree = Arc::new(TreeNode { node, children: vec![Err(e)] });
                walk.trees.insert(tree.node.offset, Arc::clone(&tree));
                return tree;
            }
        };

        walk.ancestors.push(node.offset);
        let children = children
            .into_iter()
            .map(|child| {
                let child = child?;
                if walk.ancestors.contains(&child.offset) {
                    return Err(Error::invalid(format!(
                        "node at offset {} references its own ancestor",
                        child.offset
                    )));
                }
                if depth + 1 > self.options.max_depth {
                    return Err(Error::DepthExceeded { offset: child.offset, limit: self.options.max_depth });
                }
                Ok(self.build_tree(child, depth + 1, walk))
            })
            .collect();
        walk.ancestors.pop();

        let tree = Arc::new(TreeNode { node, children });
        walk.trees.insert(tree.node.offset, Arc::clone(&tree));
        tree
    }

    /// Find a node by its NodeID metadata.
    pub fn find_node_id(&self, node_id: u32) -> Result<Option<Arc<Node>>> {
        let tree = self.decode_tree()?;
        let found = tree.iter().find(|n| n.node_id() == Some(node_id)).cloned();
        Ok(found)
    }

    /// Logical content of a resource node, following in-file references.
    pub fn read_resource(&self, node: &Arc<Node>) -> Result<Vec<u8>> {
        self.read_resource_at(node, 0)
    }

    fn read_resource_at(&self, node: &Arc<Node>, depth: usize) -> Result<Vec<u8>> {
        if depth > self.options.max_depth {
            return Err(Error::DepthExceeded { offset: node.offset, limit: self.options.max_depth });
        }

        let target = self.resolve_redirect_at(node, depth)?;
        match &target.contents {
            NodeContents::Folder(_) => Err(Error::invalid(format!(
                "node at offset {} is a folder, not a resource",
                target.offset
            ))),
            NodeContents::Resource(ResourceContents::Inline(_)) => Ok(target.content()?.to_vec()),
            NodeContents::Resource(ResourceContents::InFileResource(pointer)) => {
                self.read_in_file_resource(&target, *pointer)
            }
            NodeContents::Resource(ResourceContents::XmfUriAndNodeId { uri: None, node_id }) => {
                let referenced = self
                    .find_node_id(*node_id)?
                    .ok_or_else(|| Error::invalid(format!("no node with NodeID {node_id}")))?;
                self.read_resource_at(&referenced, depth + 1)
            }
            NodeContents::Resource(other) => Err(Error::invalid(format!(
                "node at offset {} refers outside this file: {other:?}",
                target.offset
            ))),
        }
    }

    fn read_in_file_resource(&self, node: &Node, pointer: DataPointer) -> Result<Vec<u8>> {
        let chain = node.unpackers();
        let zlib_first = matches!(
            chain.entries().first().map(|e| e.id),
            Some(UnpackerId::Standard(StandardUnpacker::Zlib))
        );

        // A zlib stream ends itself; otherwise the payload must describe its own size
        let len = if zlib_first {
            self.region_end(pointer).saturating_sub(pointer.0)
        } else {
            self.in_file_extent(pointer)?
        };
        let raw = self.src.read_bytes(pointer.0, len as usize)?;
        if zlib_first && !is_zlib(&raw) {
            return Err(Error::Unpack {
                offset: node.offset,
                failure: UnpackFailure {
                    stage: 0,
                    reason: format!("no zlib header at offset {}", pointer.0),
                },
            });
        }
        if chain.is_empty() {
            return Ok(raw);
        }
        chain.apply(&raw).map_err(|failure| Error::Unpack { offset: node.offset, failure })
    }

    fn region_end(&self, pointer: DataPointer) -> u64 {
        if pointer.0 < self.header.tree_end {
            self.header.tree_end
        } else {
            self.src.len()
        }
    }

    /// Infer the length of in-file resource data from its own framing
    /// (RIFF/DLS or Standard MIDI File chunks).
    pub fn in_file_extent(&self, pointer: DataPointer) -> Result<u64> {
        let start = pointer.0;
        let end = self.region_end(pointer);
        let id = self.src.read_bytes(start, 4)?;

        let len = match id.as_slice() {
            b"RIFF" => {
                let size = self.src.read_u32_le(start + 4)? as u64;
                8 + size + (size & 1)
            }
            b"MThd" => self.smf_extent(start, end)?,
            _ => {
                return Err(Error::invalid(format!(
                    "cannot infer the length of in-file resource at offset {start}"
                )))
            }
        };

        if start + len > end {
            return Err(Error::UnexpectedEof { offset: start, needed: len, available: end - start });
        }
        Ok(len)
    }
}

impl XmfReader {
    /// Walk a Standard MIDI File: the header chunk, then chunks until the
    /// declared number of `MTrk` chunks has been seen. Other chunk types
    /// are skipped.
    fn smf_extent(&self, start: u64, end: u64) -> Result<u64> {
        let header_len = self.smf_chunk(start, end)?.1;
        if header_len < 6 {
            return Err(Error::invalid(format!(
                "SMF header at offset {start} holds {header_len} bytes, expected at least 6"
            )));
        }
        let tracks = self.src.read_u16(start + 10)?;

        let mut pos = start + 8 + header_len;
        let mut remaining = tracks;
        while remaining > 0 {
            let (id, len) = self.smf_chunk(pos, end)?;
            if &id == b"MTrk" {
                remaining -= 1;
            } else {
                tracing::debug!(offset = pos, "skipping non-track SMF chunk");
            }
            pos += 8 + len;
        }
        Ok(pos - start)
    }

    /// Id and body length of the chunk at `pos`, which must end by `end`.
    fn smf_chunk(&self, pos: u64, end: u64) -> Result<([u8; 4], u64)> {
        if pos + 8 > end {
            return Err(Error::UnexpectedEof { offset: pos, needed: 8, available: end.saturating_sub(pos) });
        }
        let mut id = [0u8; 4];
        self.src.read_into(pos, &mut id)?;
        let len = self.src.read_u32(pos + 4)? as u64;
        if pos + 8 + len > end {
            return Err(Error::UnexpectedEof { offset: pos, needed: 8 + len, available: end - pos });
        }
        Ok((id, len))
    }
}

impl std::fmt::Debug for XmfReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmfReader")
            .field("src", &self.src)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}
