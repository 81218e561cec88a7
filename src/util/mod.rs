//! Utility types shared across the decoder.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`UnpackFailure`] - Per-node unpacker failure record

mod error;

pub use error::*;
