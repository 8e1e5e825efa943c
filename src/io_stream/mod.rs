//! Seekable byte source shared by every decoder.
//!
//! All three formats are decoded from one `Read + Seek` handle that is
//! owned by a single decode for its whole lifetime.  Recursive walks mix
//! absolute seeks with sequential reads on that handle, so the helpers here
//! either advance the position by exactly the bytes they consume or restore
//! it before returning (including on error).
//!
//! # Endianness
//! Every integer in the three formats is little-endian; multi-byte reads go
//! through `byteorder::LittleEndian`.

use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

/// Upper bound on buffer space reserved up front from a size read off disk.
/// Larger buffers grow as bytes actually arrive.
pub const MAX_PREALLOC: usize = 1 << 20;

/// A stateful stream supporting sequential reads and absolute seeks.
///
/// Blanket-implemented for every `Read + Seek`, so a `File`, a
/// `BufReader<File>` and a `Cursor<Vec<u8>>` all qualify.
pub trait ByteSource: Read + Seek {
    /// Bytes between the current position and end-of-stream.  Position is kept.
    fn remaining_len(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(pos))?;
        Ok(end.saturating_sub(pos))
    }

    /// Read the next `len` bytes without consuming them.
    fn peek_exact(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let pos = self.stream_position()?;
        let mut buf = vec![0u8; len];
        let res = self.read_exact(&mut buf);
        self.seek(SeekFrom::Start(pos))?;
        res.map(|_| buf)
    }

    /// Out-of-band fetch of `len` bytes at absolute `offset`.
    ///
    /// The position before the call is restored afterwards, even when the
    /// read fails, so sequential header parsing can continue.
    fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let pos = self.stream_position()?;
        let res = (|| {
            self.seek(SeekFrom::Start(offset))?;
            self.read_vec(len)
        })();
        self.seek(SeekFrom::Start(pos))?;
        res
    }

    /// Read exactly `len` bytes into a fresh buffer.  A short stream is
    /// `UnexpectedEof`.
    fn read_vec(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC));
        Read::take(&mut *self, len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("wanted {len} bytes, stream ended after {}", buf.len()),
            ));
        }
        Ok(buf)
    }

    /// Read everything from the current position to end-of-stream.
    fn read_remaining(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.remaining_len()? as usize);
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Fixed-width, NUL-padded name field.
    ///
    /// Always consumes `width` bytes.  The text before the first NUL is
    /// decoded as UTF-8, replacing invalid sequences.
    fn read_fixed_name(&mut self, width: usize) -> io::Result<String> {
        let raw = self.read_vec(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Code units of a NUL-terminated UTF-16LE string; the terminator is
    /// consumed but not returned.
    fn read_utf16z_units(&mut self) -> io::Result<Vec<u16>> {
        let mut units = Vec::new();
        loop {
            match self.read_u16::<LittleEndian>()? {
                0 => return Ok(units),
                u => units.push(u),
            }
        }
    }

    /// NUL-terminated UTF-16LE string.  Unpaired surrogates are `InvalidData`.
    fn read_utf16z(&mut self) -> io::Result<String> {
        let units = self.read_utf16z_units()?;
        String::from_utf16(&units)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<T: Read + Seek + ?Sized> ByteSource for T {}
