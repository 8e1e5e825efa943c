//! DAT cipher tree decoder.
//!
//! # Pipeline
//!
//! 1. Optional signature envelope ([`crate::crypto::signature`]); if the
//!    first 8 bytes do not match, decoding restarts at offset 0.
//! 2. Header: `hash (4) | encrypted_seed (4)`; the next 4 bytes are peeked
//!    and trial-decrypted under each [`KEY_TABLE`] entry until one yields
//!    `"ZL01"`.
//! 3. The rest of the stream is XOR-decrypted with a fresh keystream seeded
//!    from the decrypted seed; its CRC32 must equal `hash`.
//! 4. Plaintext: `marker (4) | uncompressed_size (4) | zlib stream`.
//! 5. The inflated bytes are a node tree, see [`tree`].
//!
//! Every stage is fatal on failure.

pub mod tree;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::io::{self, SeekFrom};
use thiserror::Error;
use tracing::{debug, warn};

use crate::codec::{inflate_exact, CodecError};
use crate::crypto::signature::{stream_signature, SIGNATURE_LEN};
use crate::crypto::{detect_key, Dialect, Rand31, KEY_TABLE, MARKER};
use crate::io_stream::ByteSource;

pub use tree::{CipherTreeNode, NodeValue};

/// Bytes of plaintext ahead of the zlib stream.
pub const PLAIN_PREFIX_LEN: usize = 8;

#[derive(Error, Debug)]
pub enum DatError {
    #[error("Unknown format: no known key decrypts the header marker")]
    UnknownFormat,
    #[error("Bad content: stored hash {stored:08x}, computed {computed:08x}")]
    BadContent { stored: u32, computed: u32 },
    #[error("Decrypted content too short ({0} bytes)")]
    Truncated(usize),
    #[error("Unknown node tag {tag} at offset {offset}")]
    UnknownNodeTag { tag: u8, offset: u64 },
    #[error("Invalid UTF-16 string at offset {offset}")]
    InvalidString { offset: u64 },
    #[error("Node nesting exceeds {} levels", tree::MAX_DEPTH)]
    TooDeep,
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Header fields recovered from a DAT file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CipherHeader {
    /// CRC32 of the decrypted body.
    pub hash:    u32,
    /// Keystream seed, already decrypted.
    pub seed:    u32,
    pub key:     u32,
    pub dialect: Dialect,
    /// Whether the signature envelope was present and valid.
    pub signed:  bool,
}

/// A fully decoded DAT file.
#[derive(Debug, Clone, Serialize)]
pub struct CipherTree {
    pub header: CipherHeader,
    /// Unnamed root block.
    pub root:   CipherTreeNode,
}

impl CipherTree {
    pub fn decode<S: ByteSource + ?Sized>(src: &mut S) -> Result<Self, DatError> {
        src.seek(SeekFrom::Start(0))?;
        let signed = check_signature(src)?;
        let header = read_header(src, signed)?;
        let plain = decrypt_body(src, &header)?;
        let content = decompress(&plain)?;
        let root = tree::parse_root(&content, header.dialect)?;
        Ok(Self { header, root })
    }

    /// Look up a node by `/`-separated path of names from the root.
    pub fn get(&self, path: &str) -> Option<&CipherTreeNode> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(&self.root, |node, name| node.child(name))
    }
}

/// Stage 1.  Leaves the source just past the envelope when it matches,
/// otherwise at offset 0.
///
/// The envelope covers the bytes after itself: `size_part` and both CRC
/// passes are taken from the end of the 8 envelope bytes, not from the
/// position before them.
pub fn check_signature<S: ByteSource + ?Sized>(src: &mut S) -> Result<bool, DatError> {
    let start = src.stream_position()?;
    if src.remaining_len()? < SIGNATURE_LEN as u64 {
        src.seek(SeekFrom::Start(0))?;
        return Ok(false);
    }
    let candidate = src.read_vec(SIGNATURE_LEN)?;
    let expected = stream_signature(src)?;
    if candidate == expected {
        debug!(at = start, signature = %hex::encode(&candidate), "signed file");
        Ok(true)
    } else {
        src.seek(SeekFrom::Start(0))?;
        Ok(false)
    }
}

/// Stage 2.  Consumes hash and seed; the probed marker bytes stay unread.
pub fn read_header<S: ByteSource + ?Sized>(src: &mut S, signed: bool) -> Result<CipherHeader, DatError> {
    let hash = src.read_u32::<LittleEndian>()?;
    let encrypted_seed = src.read_u32::<LittleEndian>()?;
    let mut probe = [0u8; 4];
    probe.copy_from_slice(&src.peek_exact(MARKER.len())?);

    let (profile, seed) = detect_key(encrypted_seed, probe).ok_or_else(|| {
        warn!(encrypted_seed, tried = KEY_TABLE.len(), "no key matched");
        DatError::UnknownFormat
    })?;
    debug!(dialect = profile.dialect.name(), key = format_args!("{:#010x}", profile.key), "key detected");
    Ok(CipherHeader { hash, seed, key: profile.key, dialect: profile.dialect, signed })
}

/// Stage 3.  Decrypt from the current position to end-of-stream and verify
/// the stored hash.
pub fn decrypt_body<S: ByteSource + ?Sized>(src: &mut S, header: &CipherHeader) -> Result<Vec<u8>, DatError> {
    let mut body = src.read_remaining()?;
    Rand31::new(header.seed).apply(&mut body);
    verify_content(&body, header.hash)?;
    Ok(body)
}

pub fn verify_content(plain: &[u8], stored: u32) -> Result<(), DatError> {
    let computed = crc32fast::hash(plain);
    if computed != stored {
        warn!(stored, computed, "content hash mismatch");
        return Err(DatError::BadContent { stored, computed });
    }
    Ok(())
}

/// Stage 4.  Inflate the plaintext past its 8-byte prefix.
pub fn decompress(plain: &[u8]) -> Result<Vec<u8>, DatError> {
    if plain.len() < PLAIN_PREFIX_LEN {
        return Err(DatError::Truncated(plain.len()));
    }
    let size = LittleEndian::read_u32(&plain[4..8]) as usize;
    Ok(inflate_exact(&plain[PLAIN_PREFIX_LEN..], size)?)
}
