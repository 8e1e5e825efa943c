//! zlib inflation to an exactly-declared size.
//!
//! Both the PKG chunk stream and the DAT plaintext carry a zlib-framed
//! DEFLATE stream next to the uncompressed length it must produce.  The
//! framing is consumed through `flate2`; nothing here reimplements DEFLATE.

use std::io::Read;

use flate2::read::ZlibDecoder;
use thiserror::Error;

use crate::io_stream::MAX_PREALLOC;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Inflate error: {0}")]
    Inflate(#[from] std::io::Error),
    #[error("Inflated length {actual} does not match declared length {declared}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Inflate `data` into exactly `expected_len` bytes.
///
/// Output beyond `expected_len` is treated as a mismatch rather than
/// silently truncated.
pub fn inflate_exact(data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(expected_len.min(MAX_PREALLOC));
    // One byte of headroom is enough to detect over-long streams.
    ZlibDecoder::new(data)
        .take((expected_len as u64).saturating_add(1))
        .read_to_end(&mut out)?;
    if out.len() != expected_len {
        return Err(CodecError::LengthMismatch { declared: expected_len, actual: out.len() });
    }
    Ok(out)
}

/// Inflate `data` and append exactly `expected_len` bytes to `out`.
pub fn inflate_into(data: &[u8], expected_len: usize, out: &mut Vec<u8>) -> Result<(), CodecError> {
    let chunk = inflate_exact(data, expected_len)?;
    out.extend_from_slice(&chunk);
    Ok(())
}

#[cfg(test)]
pub(crate) fn deflate(data: &[u8]) -> Vec<u8> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflates_declared_length() {
        let packed = deflate(b"hello hello hello");
        assert_eq!(inflate_exact(&packed, 17).unwrap(), b"hello hello hello");
    }

    #[test]
    fn short_declaration_is_mismatch() {
        let packed = deflate(b"hello hello hello");
        match inflate_exact(&packed, 5) {
            Err(CodecError::LengthMismatch { declared: 5, actual: 6 }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn long_declaration_is_mismatch() {
        let packed = deflate(b"abc");
        assert!(matches!(
            inflate_exact(&packed, 10),
            Err(CodecError::LengthMismatch { declared: 10, actual: 3 })
        ));
    }

    #[test]
    fn huge_declaration_does_not_reserve_it() {
        let packed = deflate(b"abc");
        assert!(matches!(
            inflate_exact(&packed, usize::MAX / 2),
            Err(CodecError::LengthMismatch { actual: 3, .. })
        ));
    }

    #[test]
    fn garbage_is_inflate_error() {
        assert!(matches!(inflate_exact(&[0xFF, 0x00, 0x12], 4), Err(CodecError::Inflate(_))));
    }
}
