use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read, SeekFrom};
use tracing::{debug, warn};

use super::{ArchiveEntry, PkgError};
use crate::codec::inflate_into;
use crate::io_stream::{ByteSource, MAX_PREALLOC};

/// `"ZL02"` read as a little-endian u32.
pub const CHUNK_SIGNATURE: u32 = 0x3230_4C5A;
/// Bytes of the chunk header counted by `total_len` (signature + uncompressed_len).
pub const CHUNK_COUNTED_HEADER: u32 = 8;

#[derive(Debug, Clone)]
pub struct ChunkHeader {
    pub total_len:        u32,
    pub signature:        u32,
    pub uncompressed_len: u32,
}

impl ChunkHeader {
    pub fn read<R: Read + ?Sized>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            total_len:        reader.read_u32::<LittleEndian>()?,
            signature:        reader.read_u32::<LittleEndian>()?,
            uncompressed_len: reader.read_u32::<LittleEndian>()?,
        })
    }

    /// Length of the zlib stream following the header.
    pub fn packed_len(&self) -> Option<u32> {
        self.total_len.checked_sub(CHUNK_COUNTED_HEADER)
    }
}

/// Read a chunk-compressed payload and inflate it to `entry.real_size` bytes.
///
/// Layout at `entry.offset`: 4 ignored bytes, then chunks until the
/// accumulated output reaches `real_size`.  A chunk that would overshoot
/// `real_size` is rejected before it is inflated.
pub(crate) fn read_chunked<S: ByteSource + ?Sized>(
    src:   &mut S,
    entry: &ArchiveEntry,
) -> Result<Vec<u8>, PkgError> {
    src.seek(SeekFrom::Start(u64::from(entry.offset)))?;
    let _stream_len = src.read_u32::<LittleEndian>()?;

    let real_size = entry.real_size as usize;
    let mut out = Vec::with_capacity(real_size.min(MAX_PREALLOC));
    let mut chunks = 0usize;
    while out.len() < real_size {
        let at = src.stream_position()?;
        let header = ChunkHeader::read(src)?;
        if header.signature != CHUNK_SIGNATURE {
            warn!(offset = at, found = format_args!("{:#010x}", header.signature), "bad chunk signature");
            return Err(PkgError::BadChunkSignature { offset: at, found: header.signature });
        }
        let packed_len = header.packed_len()
            .ok_or(PkgError::ChunkTooShort { offset: at, total_len: header.total_len })?;
        let unpacked = header.uncompressed_len as usize;
        if out.len() + unpacked > real_size {
            return Err(PkgError::ChunkOverflow {
                name:      entry.display_name.clone(),
                real_size: entry.real_size,
                would_be:  (out.len() + unpacked) as u64,
            });
        }

        let packed = src.read_vec(packed_len as usize)?;
        inflate_into(&packed, unpacked, &mut out)?;
        chunks += 1;
    }
    debug!(name = %entry.display_name, chunks, real_size, "inflated payload");
    Ok(out)
}
