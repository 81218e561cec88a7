//! Collaborators the decoder calls into but does not define the format of.
//!
//! - [`compression`] - zlib inflate used by the ZLIB unpacker
//! - [`guid`] - GUID display for playback resource identities
//! - [`id3`] - ID3v2 tag parsing for the ID3Metadata field

pub mod compression;
pub mod guid;
pub mod id3;

pub use compression::{inflate, is_zlib};
pub use guid::{format_guid, Guid};
pub use id3::{BasicId3Parser, Id3Frame, Id3Parser, Id3Tag};
