//! XMF / Mobile XMF container decoding.
//!
//! ## File Structure
//!
//! ```text
//! +------------------+
//! | File header      |  magic, version, metadata types, tree bounds
//! +------------------+
//! | Node tree        |  [TreeStart, TreeEnd)
//! |   root node      |
//! |     nodes ...    |  inline, or addressed by absolute offset
//! +------------------+
//! | Other data       |  resources referenced by pointer
//! +------------------+
//! ```
//!
//! Every size, count and offset is a VLQ (see [`vlq`]).

mod cursor;
mod format;
mod header;
mod metadata;
mod node;
mod reader;
mod source;
mod unpacker;
pub mod vlq;

pub use cursor::Cursor;
pub use format::*;
pub use header::*;
pub use metadata::*;
pub use node::*;
pub use reader::*;
pub use source::*;
pub use unpacker::*;
pub use vlq::Vlq;
