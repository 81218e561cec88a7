//! # XMF
//!
//! Decoder for XMF and Mobile XMF (.xmf / .mxmf) containers: the
//! tree-structured meta-file format wrapping Standard MIDI Files, DLS
//! instrument collections and audio clips.
//!
//! ## Modules
//!
//! - [`util`] - Errors
//! - [`xmf`] - File header, node tree, metadata, unpackers, VLQ codec
//! - [`core`] - zlib, GUID and ID3 collaborators
//!
//! ## Example
//!
//! ```ignore
//! use xmf::XmfReader;
//!
//! let reader = XmfReader::open("ringtone.mxmf")?;
//! let tree = reader.decode_tree()?;
//!
//! for node in tree.iter() {
//!     println!("{:?} {:?}", node.name(), node.resource_format());
//! }
//! ```

pub mod util;
pub mod xmf;
pub mod core;

// Re-export commonly used types
pub use util::{Error, Result, UnpackFailure};
pub use xmf::{DecodeOptions, FileHeader, Node, XmfReader};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Error, Result, UnpackFailure};
    pub use crate::xmf::{
        DecodeOptions, FieldContents, FieldSpecifier, FieldValue, FileHeader, FolderContents, Node,
        NodeContents, ResourceContents, ResourceFormat, StandardField, StandardResourceFormat,
        TreeNode, XmfReader, XmfVersion,
    };
}
