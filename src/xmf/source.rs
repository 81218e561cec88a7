//! Random-access byte source backing a decode.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use memmap2::Mmap;
use parking_lot::Mutex;

use crate::util::{Error, Result};

/// Flat, read-only byte sequence addressed from offset 0.
/// Supports memory-mapped, buffered file and in-memory modes.
pub struct ByteSource {
    inner: SourceInner,
    size: u64,
}

enum SourceInner {
    /// Memory-mapped file (preferred for large files)
    Mmap(Mmap),
    /// Buffered file access (fallback)
    File(Arc<Mutex<File>>),
    /// Bytes already in memory
    Memory(Vec<u8>),
}

impl ByteSource {
    /// Open a file, memory-mapping it when the `mmap` feature is enabled.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_opts(path, cfg!(feature = "mmap"))
    }

    /// Open a file with optional memory mapping.
    pub fn open_opts(path: impl AsRef<Path>, use_mmap: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;

        let size = file.metadata()?.len();

        let inner = if use_mmap && size > 0 {
            // Safety: the file is opened read-only and never written through the map
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MmapFailed(e.to_string()))?;
            SourceInner::Mmap(mmap)
        } else {
            SourceInner::File(Arc::new(Mutex::new(file)))
        };

        tracing::debug!(path = %path.display(), size, use_mmap, "opened XMF source");
        Ok(Self { inner, size })
    }

    /// Wrap bytes that are already in memory.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        Self { inner: SourceInner::Memory(bytes), size }
    }

    /// Get the total size in bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn check(&self, pos: u64, len: u64) -> Result<()> {
        match pos.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::UnexpectedEof {
                offset: pos,
                needed: len,
                available: self.size.saturating_sub(pos),
            }),
        }
    }

    /// Read bytes into an existing buffer.
    pub fn read_into(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        self.check(pos, buf.len() as u64)?;
        let start = pos as usize;

        match &self.inner {
            SourceInner::Mmap(mmap) => {
                buf.copy_from_slice(&mmap[start..start + buf.len()]);
                Ok(())
            }
            SourceInner::Memory(bytes) => {
                buf.copy_from_slice(&bytes[start..start + buf.len()]);
                Ok(())
            }
            SourceInner::File(file) => {
                let mut f = file.lock();
                f.seek(SeekFrom::Start(pos))?;
                f.read_exact(buf)?;
                Ok(())
            }
        }
    }

    /// Read bytes at a specific position.
    pub fn read_bytes(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        self.check(pos, len as u64)?;
        let mut buf = vec![0u8; len];
        self.read_into(pos, &mut buf)?;
        Ok(buf)
    }

    /// Read a single byte.
    pub fn read_u8(&self, pos: u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_into(pos, &mut buf)?;
        Ok(buf[0])
    }

    /// Read a big-endian u16.
    pub fn read_u16(&self, pos: u64) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_into(pos, &mut buf)?;
        Ok(BigEndian::read_u16(&buf))
    }

    /// Read a big-endian u32.
    pub fn read_u32(&self, pos: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(pos, &mut buf)?;
        Ok(BigEndian::read_u32(&buf))
    }

    /// Read a little-endian u32 (RIFF chunk sizes).
    pub fn read_u32_le(&self, pos: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(pos, &mut buf)?;
        Ok(byteorder::LittleEndian::read_u32(&buf))
    }
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.inner {
            SourceInner::Mmap(_) => "mmap",
            SourceInner::File(_) => "file",
            SourceInner::Memory(_) => "memory",
        };
        f.debug_struct("ByteSource").field("mode", &mode).field("size", &self.size).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_reads() {
        let src = ByteSource::from_bytes(vec![0x12, 0x34, 0x56, 0x78, 0x9A]);
        assert_eq!(src.len(), 5);
        assert_eq!(src.read_u8(4).unwrap(), 0x9A);
        assert_eq!(src.read_u32(0).unwrap(), 0x1234_5678);
        assert_eq!(src.read_u16(1).unwrap(), 0x3456);
    }

    #[test]
    fn test_read_past_end() {
        let src = ByteSource::from_bytes(vec![1, 2, 3]);
        let err = src.read_bytes(2, 4).unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedEof { offset: 2, needed: 4, available: 1 }
        ));
        assert!(src.read_u8(u64::MAX).is_err());
    }

    #[test]
    fn test_file_modes() {
        use std::io::Write;

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"XMF_2.00").unwrap();
        tmp.flush().unwrap();

        for use_mmap in [true, false] {
            let src = ByteSource::open_opts(tmp.path(), use_mmap).unwrap();
            assert_eq!(src.len(), 8);
            assert_eq!(src.read_bytes(4, 4).unwrap(), b"2.00");
        }
    }

    #[test]
    fn test_missing_file() {
        let err = ByteSource::open("/nonexistent/file.mxmf").unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }
}
