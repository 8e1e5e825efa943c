//! Optional 8-byte signature envelope in front of a DAT file.
//!
//! ```text
//! [ size_part (4 B LE) | check (4 B LE) | body ... ]
//!
//! size_part = len(body) ^ K1 ^ K2
//! p1        = CRC32(body) ^ K2
//! check     = CRC32(LE(p1) ++ body) ^ K1
//! ```
//!
//! The body is hashed twice straight from the source; the position is
//! restored after each pass.

use std::io::{self, SeekFrom};

use crc32fast::Hasher;

use crate::io_stream::ByteSource;

pub const SIGNATURE_LEN: usize = 8;

pub const SIGNATURE_KEY_1: u32 = 0x13F8_A5C2;
pub const SIGNATURE_KEY_2: u32 = 0x6D2E_91B4;

const HASH_BUF: usize = 64 * 1024;

/// Expected envelope for an in-memory body.
pub fn signature(body: &[u8]) -> [u8; SIGNATURE_LEN] {
    let p1 = crc32fast::hash(body) ^ SIGNATURE_KEY_2;
    let mut h = Hasher::new();
    h.update(&p1.to_le_bytes());
    h.update(body);
    assemble(body.len() as u64, h.finalize() ^ SIGNATURE_KEY_1)
}

/// Expected envelope for everything from the current position to
/// end-of-stream.  The position is unchanged on success.
pub fn stream_signature<S: ByteSource + ?Sized>(src: &mut S) -> io::Result<[u8; SIGNATURE_LEN]> {
    let len = src.remaining_len()?;
    let p1 = hash_remaining(src, Hasher::new())? ^ SIGNATURE_KEY_2;
    let mut h = Hasher::new();
    h.update(&p1.to_le_bytes());
    let p2 = hash_remaining(src, h)? ^ SIGNATURE_KEY_1;
    Ok(assemble(len, p2))
}

fn assemble(len: u64, check: u32) -> [u8; SIGNATURE_LEN] {
    // The size field is 32 bits wide; longer bodies wrap like the on-disk field.
    let size_part = (len as u32) ^ SIGNATURE_KEY_1 ^ SIGNATURE_KEY_2;
    let mut out = [0u8; SIGNATURE_LEN];
    out[..4].copy_from_slice(&size_part.to_le_bytes());
    out[4..].copy_from_slice(&check.to_le_bytes());
    out
}

fn hash_remaining<S: ByteSource + ?Sized>(src: &mut S, mut h: Hasher) -> io::Result<u32> {
    let start = src.stream_position()?;
    let mut buf = vec![0u8; HASH_BUF];
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        h.update(&buf[..n]);
    }
    src.seek(SeekFrom::Start(start))?;
    Ok(h.finalize())
}
