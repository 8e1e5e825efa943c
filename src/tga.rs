//! Uncompressed 32-bit truecolor TGA writer for composited GI canvases.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};
use thiserror::Error;

pub const TGA_HEADER_LEN: usize = 18;
const IMAGE_TYPE_TRUECOLOR: u8 = 2;
const BITS_PER_PIXEL: u8 = 32;
/// Top-left origin (bit 5) plus 8 attribute bits.
const DESCRIPTOR: u8 = 0x20 | 0x08;

#[derive(Error, Debug)]
pub enum TgaError {
    #[error("Image {width}x{height} does not fit in a TGA header")]
    TooLarge { width: u32, height: u32 },
    #[error("Pixel buffer has {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Write `rgba` (row-major, top row first) as a TGA image.
pub fn write_tga<W: Write>(mut w: W, width: u32, height: u32, rgba: &[u8]) -> Result<(), TgaError> {
    let (w16, h16) = match (u16::try_from(width), u16::try_from(height)) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return Err(TgaError::TooLarge { width, height }),
    };
    let expected = width as usize * height as usize * 4;
    if rgba.len() != expected {
        return Err(TgaError::BufferSize { expected, actual: rgba.len() });
    }

    w.write_u8(0)?; // id length
    w.write_u8(0)?; // no color map
    w.write_u8(IMAGE_TYPE_TRUECOLOR)?;
    w.write_all(&[0u8; 5])?; // color map spec
    w.write_u16::<LittleEndian>(0)?; // x origin
    w.write_u16::<LittleEndian>(0)?; // y origin
    w.write_u16::<LittleEndian>(w16)?;
    w.write_u16::<LittleEndian>(h16)?;
    w.write_u8(BITS_PER_PIXEL)?;
    w.write_u8(DESCRIPTOR)?;

    let mut bgra = Vec::with_capacity(rgba.len());
    for px in rgba.chunks_exact(4) {
        bgra.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
    }
    w.write_all(&bgra)?;
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_pixel_order() {
        let mut out = Vec::new();
        write_tga(&mut out, 1, 1, &[1, 2, 3, 4]).unwrap();
        assert_eq!(out.len(), TGA_HEADER_LEN + 4);
        assert_eq!(out[2], 2);
        assert_eq!(&out[12..14], &[1, 0]);
        assert_eq!(&out[14..16], &[1, 0]);
        assert_eq!(out[16], 32);
        assert_eq!(out[17], 0x28);
        assert_eq!(&out[18..], &[3, 2, 1, 4]);
    }

    #[test]
    fn rejects_wrong_buffer() {
        assert!(matches!(
            write_tga(Vec::new(), 2, 2, &[0; 4]),
            Err(TgaError::BufferSize { expected: 16, actual: 4 })
        ));
    }

    #[test]
    fn rejects_huge_dimensions() {
        assert!(matches!(
            write_tga(Vec::new(), 70_000, 1, &[]),
            Err(TgaError::TooLarge { .. })
        ));
    }
}
