//! Zlib decompression for the standard ZLIB unpacker.

use std::io::{self, Read};

use flate2::read::ZlibDecoder;

/// Upper bound on the buffer reserved up front from a declared length.
const MAX_PREALLOC: usize = 16 * 1024 * 1024;

/// Inflate a zlib stream.
///
/// `decoded_len` is the length declared by the unpacker entry; zero means
/// unknown. A non-zero declaration that disagrees with the inflated size is
/// reported as `InvalidData`.
pub fn inflate(data: &[u8], decoded_len: u32) -> io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity((decoded_len as usize).min(MAX_PREALLOC));
    decoder.read_to_end(&mut out)?;

    if decoded_len != 0 && out.len() != decoded_len as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("inflated {} bytes, declared {}", out.len(), decoded_len),
        ));
    }
    Ok(out)
}

/// Check if data starts with a zlib header.
pub fn is_zlib(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    // CMF 0x78 (deflate, 32K window); FCHECK makes the pair a multiple of 31
    data[0] == 0x78 && (u16::from(data[0]) << 8 | u16::from(data[1])) % 31 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_inflate() {
        let original = b"Hello, XMF! This should compress well when repeated. ".repeat(50);
        let packed = zlib(&original);
        assert!(is_zlib(&packed));
        assert_eq!(inflate(&packed, original.len() as u32).unwrap(), original);
        assert_eq!(inflate(&packed, 0).unwrap(), original);
    }

    #[test]
    fn test_declared_length_mismatch() {
        let packed = zlib(b"HELLO");
        let err = inflate(&packed, 6).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_corrupt_stream() {
        // Valid zlib header, then a deflate block with the reserved type 3
        let packed = [0x78, 0x9C, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(is_zlib(&packed));
        assert!(inflate(&packed, 5).is_err());
        assert!(!is_zlib(b"HELLO"));
    }
}
