//! GI layered image decoder.
//!
//! # Layout (little-endian)
//!
//! ```text
//! header = magic "GIMG" (4) | version (4, = 1) | left, top, right, bottom (4 × i32)
//!        | red, green, blue, alpha masks (4 × 4) | frame_type (4) | layer_count (4)
//!        | reserved (16)
//! layer  = offset (4, absolute) | size (4) | left, top, right, bottom (4 × i32)
//!        | reserved (8)
//! ```
//!
//! Layer payloads are fetched out-of-band and kept raw; the pixel buffer is
//! produced by [`compose`].  Only frame type 2 is decodable.

pub mod compose;

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Serialize, Serializer};
use std::io::{self, SeekFrom};
use thiserror::Error;
use tracing::{debug, warn};

use crate::io_stream::ByteSource;

pub const MAGIC: &[u8; 4] = b"GIMG";
pub const VERSION: u32 = 1;
pub const HEADER_RESERVED: usize = 16;
pub const LAYER_RESERVED: usize = 8;
/// Highest frame type value the format defines.
pub const MAX_FRAME_TYPE: u32 = 5;

#[derive(Error, Debug)]
pub enum GiError {
    #[error("Invalid magic number")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("Invalid frame type {0}")]
    InvalidFrameType(u32),
    #[error("Frame type {0} is not implemented")]
    NotImplemented(u32),
    #[error("Invalid bounds {0:?}")]
    InvalidBounds(Rect),
    #[error("Layer {layer} is truncated at payload byte {at}")]
    TruncatedLayer { layer: usize, at: usize },
    #[error("Layer {layer} writes outside the canvas at ({x}, {y})")]
    PixelOutOfBounds { layer: usize, x: i64, y: i64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Header types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub left:   i32,
    pub top:    i32,
    pub right:  i32,
    pub bottom: i32,
}

impl Rect {
    pub fn read<S: ByteSource + ?Sized>(src: &mut S) -> io::Result<Self> {
        Ok(Self {
            left:   src.read_i32::<LittleEndian>()?,
            top:    src.read_i32::<LittleEndian>()?,
            right:  src.read_i32::<LittleEndian>()?,
            bottom: src.read_i32::<LittleEndian>()?,
        })
    }

    pub fn width(&self) -> Result<u32, GiError> {
        u32::try_from(i64::from(self.right) - i64::from(self.left))
            .map_err(|_| GiError::InvalidBounds(*self))
    }

    pub fn height(&self) -> Result<u32, GiError> {
        u32::try_from(i64::from(self.bottom) - i64::from(self.top))
            .map_err(|_| GiError::InvalidBounds(*self))
    }
}

/// Channel bit-masks.  Parsed for completeness; decoding does not use them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColorMask {
    pub red:   u32,
    pub green: u32,
    pub blue:  u32,
    pub alpha: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameType(pub u32);

impl FrameType {
    /// RLE 5-6-5 color layers plus 6-bit alpha mask layers.
    pub const LAYERED_RLE: FrameType = FrameType(2);

    pub fn is_implemented(self) -> bool { self == Self::LAYERED_RLE }
}

#[derive(Debug, Clone, Serialize)]
pub struct GiHeader {
    pub version:     u32,
    pub bounds:      Rect,
    pub mask:        ColorMask,
    pub frame_type:  FrameType,
    pub layer_count: u32,
}

impl GiHeader {
    pub fn read<S: ByteSource + ?Sized>(src: &mut S) -> Result<Self, GiError> {
        let mut magic = [0u8; 4];
        src.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(GiError::InvalidMagic);
        }
        let version = src.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(GiError::UnsupportedVersion(version));
        }
        let bounds = Rect::read(src)?;
        let mask = ColorMask {
            red:   src.read_u32::<LittleEndian>()?,
            green: src.read_u32::<LittleEndian>()?,
            blue:  src.read_u32::<LittleEndian>()?,
            alpha: src.read_u32::<LittleEndian>()?,
        };
        let frame_type = src.read_u32::<LittleEndian>()?;
        if frame_type > MAX_FRAME_TYPE {
            return Err(GiError::InvalidFrameType(frame_type));
        }
        let layer_count = src.read_u32::<LittleEndian>()?;
        let mut reserved = [0u8; HEADER_RESERVED];
        src.read_exact(&mut reserved)?;
        Ok(Self { version, bounds, mask, frame_type: FrameType(frame_type), layer_count })
    }
}

// ── Layers ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Layer {
    pub offset: u32,
    pub size:   u32,
    pub bounds: Rect,
    #[serde(rename = "data_len", serialize_with = "serialize_len")]
    pub data:   Vec<u8>,
}

impl Layer {
    /// Read one layer record and fetch its payload; the source is left just
    /// past the record.
    pub fn read<S: ByteSource + ?Sized>(src: &mut S) -> Result<Self, GiError> {
        let offset = src.read_u32::<LittleEndian>()?;
        let size   = src.read_u32::<LittleEndian>()?;
        let bounds = Rect::read(src)?;
        let mut reserved = [0u8; LAYER_RESERVED];
        src.read_exact(&mut reserved)?;
        let data = src.read_at(u64::from(offset), size as usize)?;
        Ok(Self { offset, size, bounds, data })
    }
}

fn serialize_len<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(data.len() as u64)
}

// ── Image ────────────────────────────────────────────────────────────────────

/// A fully decoded GI file: header, raw layers and the composited canvas.
#[derive(Debug, Clone, Serialize)]
pub struct LayeredImage {
    pub header: GiHeader,
    pub layers: Vec<Layer>,
    pub width:  u32,
    pub height: u32,
    /// `width * height` RGBA pixels, row-major, top row first.
    #[serde(skip)]
    pub pixels: Vec<u8>,
}

impl LayeredImage {
    pub fn decode<S: ByteSource + ?Sized>(src: &mut S) -> Result<Self, GiError> {
        src.seek(SeekFrom::Start(0))?;
        let header = GiHeader::read(src)?;
        if !header.frame_type.is_implemented() {
            warn!(frame_type = header.frame_type.0, "unsupported frame type");
            return Err(GiError::NotImplemented(header.frame_type.0));
        }
        let width = header.bounds.width()?;
        let height = header.bounds.height()?;
        if compose::canvas_len(width, height).is_none() {
            warn!(width, height, "canvas too large");
            return Err(GiError::InvalidBounds(header.bounds));
        }
        debug!(width, height, layers = header.layer_count, "image header");

        let mut layers = Vec::with_capacity((header.layer_count as usize).min(64));
        for i in 0..header.layer_count {
            let layer = Layer::read(src)?;
            debug!(layer = i, offset = layer.offset, size = layer.size, bounds = ?layer.bounds, "layer");
            layers.push(layer);
        }

        let pixels = compose::compose(&header.bounds, width, height, &layers)?;
        Ok(Self { header, layers, width, height, pixels })
    }

    pub fn pixels(&self) -> &[u8] { &self.pixels }

    /// RGBA of the pixel at (`x`, `y`) in canvas coordinates.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.pixels.get(i..i + 4).and_then(|p| p.try_into().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header_bytes(frame_type: u32, version: u32) -> Vec<u8> {
        let mut h = MAGIC.to_vec();
        h.extend(version.to_le_bytes());
        for v in [0i32, 0, 2, 2] {
            h.extend(v.to_le_bytes());
        }
        for m in [0xF800u32, 0x07E0, 0x001F, 0] {
            h.extend(m.to_le_bytes());
        }
        h.extend(frame_type.to_le_bytes());
        h.extend(0u32.to_le_bytes());
        h.extend([0u8; HEADER_RESERVED]);
        h
    }

    #[test]
    fn parses_header_fields() {
        let h = GiHeader::read(&mut Cursor::new(header_bytes(2, 1))).unwrap();
        assert_eq!(h.bounds.width().unwrap(), 2);
        assert_eq!(h.mask.green, 0x07E0);
        assert_eq!(h.frame_type, FrameType::LAYERED_RLE);
    }

    #[test]
    fn bad_magic() {
        let mut b = header_bytes(2, 1);
        b[0] = b'X';
        assert!(matches!(GiHeader::read(&mut Cursor::new(b)), Err(GiError::InvalidMagic)));
    }

    #[test]
    fn bad_version() {
        assert!(matches!(
            GiHeader::read(&mut Cursor::new(header_bytes(2, 3))),
            Err(GiError::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn other_frame_types_are_not_implemented() {
        for ft in [0u32, 1, 3, 4, 5] {
            assert!(matches!(
                LayeredImage::decode(&mut Cursor::new(header_bytes(ft, 1))),
                Err(GiError::NotImplemented(t)) if t == ft
            ));
        }
        assert!(matches!(
            LayeredImage::decode(&mut Cursor::new(header_bytes(6, 1))),
            Err(GiError::InvalidFrameType(6))
        ));
    }

    #[test]
    fn empty_layer_list_is_transparent_canvas() {
        let img = LayeredImage::decode(&mut Cursor::new(header_bytes(2, 1))).unwrap();
        assert_eq!(img.pixels().len(), 2 * 2 * 4);
        assert!(img.pixels().iter().all(|&b| b == 0));
        assert_eq!(img.pixel(1, 1), Some([0, 0, 0, 0]));
        assert_eq!(img.pixel(2, 0), None);
    }

    #[test]
    fn overflowing_canvas_is_invalid_bounds() {
        let mut b = header_bytes(2, 1);
        for (i, v) in [i32::MIN, i32::MIN, i32::MAX, i32::MAX].into_iter().enumerate() {
            b[8 + i * 4..12 + i * 4].copy_from_slice(&v.to_le_bytes());
        }
        assert!(matches!(
            LayeredImage::decode(&mut Cursor::new(b)),
            Err(GiError::InvalidBounds(r)) if r.left == i32::MIN && r.right == i32::MAX
        ));
    }

    #[test]
    fn inverted_bounds_are_invalid() {
        let r = Rect { left: 5, top: 0, right: 1, bottom: 1 };
        assert!(matches!(r.width(), Err(GiError::InvalidBounds(_))));
    }
}
