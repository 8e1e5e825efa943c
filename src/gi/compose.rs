//! Scanline RLE decode and layer compositing for frame type 2.
//!
//! Each layer payload starts with a 16-byte mini-header (size, width,
//! height, reserved) that is skipped; the rest is a stream of control
//! bytes:
//!
//! | byte            | meaning                                        |
//! |-----------------|------------------------------------------------|
//! | `0x00`, `0x80`  | next scanline, column 0                        |
//! | `0x81..=0xFF`   | run of `byte & 0x7F` pixels, data follows      |
//! | `0x01..=0x7F`   | skip `byte` transparent columns                |
//!
//! Layers 0 and 1 carry 2-byte 5-6-5 color per pixel and are written
//! opaque.  Layers 2 and up carry a 1-byte inverted 6-bit alpha per pixel;
//! they keep the color already on the canvas, set its alpha and
//! un-premultiply it.

use super::{GiError, Layer, Rect};

pub const LAYER_HEADER_LEN: usize = 16;
/// Layers at this index and above are alpha masks.
pub const FIRST_MASK_LAYER: usize = 2;

const OP_NEWLINE: u8 = 0x00;
const OP_NEWLINE_ALT: u8 = 0x80;
const RUN_FLAG: u8 = 0x80;

/// Expand a 5-6-5 pixel stored as `[G-low3 << 5 | B5, R5 << 3 | G-high3]`.
#[inline]
pub fn rgb565(lo: u8, hi: u8) -> [u8; 3] {
    let v = u16::from_le_bytes([lo, hi]);
    let r = hi & 0xF8;
    let g = (((v >> 5) & 0x3F) as u8) << 2;
    let b = ((v & 0x1F) as u8) << 3;
    [r, g, b]
}

/// Alpha of a mask sample: `(63 - v) << 2`, truncated to 8 bits.
#[inline]
pub fn mask_alpha(v: u8) -> u8 {
    63u8.wrapping_sub(v).wrapping_shl(2)
}

/// Recover a straight-alpha channel: `round(old / alpha * 63) << 2`,
/// truncated to 8 bits like [`mask_alpha`].  Only meaningful for `alpha`
/// in `1..=254`.
#[inline]
pub fn unpremultiply(old: u8, alpha: u8) -> u8 {
    let scaled = ((f32::from(old) / f32::from(alpha)) * 63.0).round() as u32;
    (scaled as u8).wrapping_shl(2)
}

/// Byte length of a `width × height` RGBA canvas, if it fits in 32 bits.
pub fn canvas_len(width: u32, height: u32) -> Option<usize> {
    width.checked_mul(height)?.checked_mul(4).map(|n| n as usize)
}

/// Composite `layers` in order onto a zeroed `width × height` RGBA canvas.
pub fn compose(canvas: &Rect, width: u32, height: u32, layers: &[Layer]) -> Result<Vec<u8>, GiError> {
    let len = canvas_len(width, height).ok_or(GiError::InvalidBounds(*canvas))?;
    let mut pixels = vec![0u8; len];
    for (index, layer) in layers.iter().enumerate() {
        blit_layer(&mut pixels, canvas, width, height, index, layer)?;
    }
    Ok(pixels)
}

fn blit_layer(
    pixels: &mut [u8],
    canvas: &Rect,
    width:  u32,
    height: u32,
    index:  usize,
    layer:  &Layer,
) -> Result<(), GiError> {
    let data = &layer.data;
    if data.len() < LAYER_HEADER_LEN {
        return Err(GiError::TruncatedLayer { layer: index, at: data.len() });
    }
    let dx = i64::from(layer.bounds.left) - i64::from(canvas.left);
    let dy = i64::from(layer.bounds.top) - i64::from(canvas.top);
    let is_mask = index >= FIRST_MASK_LAYER;
    let sample_len = if is_mask { 1 } else { 2 };
    let area = i64::from(width) * i64::from(height);

    let mut pos = LAYER_HEADER_LEN;
    let mut row = 0i64;
    let mut col = 0i64;
    while pos < data.len() {
        let op = data[pos];
        pos += 1;
        match op {
            OP_NEWLINE | OP_NEWLINE_ALT => {
                row += 1;
                col = 0;
            }
            op if op > RUN_FLAG => {
                for _ in 0..(op & 0x7F) {
                    let sample = data.get(pos..pos + sample_len)
                        .ok_or(GiError::TruncatedLayer { layer: index, at: pos })?;
                    pos += sample_len;

                    // Columns past the row end continue on the next row.
                    let (x, y) = (col + dx, row + dy);
                    let linear = y * i64::from(width) + x;
                    if linear < 0 || linear >= area {
                        return Err(GiError::PixelOutOfBounds { layer: index, x, y });
                    }
                    let i = linear as usize * 4;
                    let px = &mut pixels[i..i + 4];
                    if is_mask {
                        apply_mask(px, sample[0]);
                    } else {
                        px[..3].copy_from_slice(&rgb565(sample[0], sample[1]));
                        px[3] = 255;
                    }
                    col += 1;
                }
            }
            skip => col += i64::from(skip),
        }
    }
    Ok(())
}

fn apply_mask(px: &mut [u8], v: u8) {
    let alpha = mask_alpha(v);
    if alpha != 0 && alpha != 255 {
        for c in &mut px[..3] {
            *c = unpremultiply(*c, alpha);
        }
    }
    px[3] = alpha;
}
