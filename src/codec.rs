//! Default survey-configurable decode callback (§6 `create_tile`). Grounded
//! in the teacher's `decoder.rs` (`zune_jpeg::JpegDecoder`, grayscale -> RGB
//! expansion), extended with the per-quadrant transparency computation §6
//! requires and that the teacher never needed.

use bytes::Bytes;
use zune_jpeg::JpegDecoder;

/// Decoded payload for an image survey: a flat RGB(A) buffer.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel: 3 for RGB, 4 for RGBA.
    pub bpp: u32,
}

impl DecodedImage {
    /// `cost = w * h * bpp` (§3, §6).
    pub fn cost(&self) -> usize {
        self.width as usize * self.height as usize * self.bpp as usize
    }
}

/// `create_tile(user, order, pix, bytes, size, &cost_out, &transparency_out)
/// -> payload | none` (§6). Returns the decoded image plus a 4-bit
/// transparency mask (one bit per quadrant), or `None` on decode failure.
pub type DecodeTile = dyn Fn(&[u8]) -> Option<(DecodedImage, u8)> + Send + Sync;

/// Default codec for image surveys: JPEG via `zune-jpeg`.
pub fn default_decode_tile(bytes: &[u8]) -> Option<(DecodedImage, u8)> {
    let mut decoder = JpegDecoder::new(bytes);
    let pixels = decoder.decode().ok()?;
    let info = decoder.info()?;
    let width = info.width as u32;
    let height = info.height as u32;
    let components = info.components as usize;

    let (data, bpp) = match components {
        1 => (expand_grayscale_to_rgb(&pixels), 3u32),
        3 => (pixels, 3u32),
        4 => (pixels, 4u32),
        _ => return None,
    };

    let transparency = compute_transparency(&data, width, height, bpp);
    Some((
        DecodedImage {
            data: Bytes::from(data),
            width,
            height,
            bpp,
        },
        transparency,
    ))
}

fn expand_grayscale_to_rgb(gray: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(gray.len() * 3);
    for &g in gray {
        out.push(g);
        out.push(g);
        out.push(g);
    }
    out
}

/// A quadrant is transparent iff `bpp >= 4` (it carries an alpha channel)
/// and every pixel in it has alpha == 0 (§6). Quadrant bit packing matches
/// `transform::Mat3::child_transform` / `tile::TileFlags::no_child`: the
/// low bit of the quadrant index selects the column, the high bit the row.
fn compute_transparency(data: &[u8], width: u32, height: u32, bpp: u32) -> u8 {
    if bpp < 4 || width == 0 || height == 0 {
        return 0;
    }
    let half_w = width / 2;
    let half_h = height / 2;
    let mut mask = 0u8;

    for quadrant in 0..4u32 {
        let col0 = (quadrant % 2) * half_w;
        let row0 = (quadrant / 2) * half_h;
        let col1 = if quadrant % 2 == 0 { half_w } else { width };
        let row1 = if quadrant / 2 == 0 { half_h } else { height };

        if col1 <= col0 || row1 <= row0 {
            continue;
        }

        let mut transparent = true;
        'scan: for row in row0..row1 {
            for col in col0..col1 {
                let idx = ((row * width + col) * bpp + (bpp - 1)) as usize;
                if data[idx] != 0 {
                    transparent = false;
                    break 'scan;
                }
            }
        }
        if transparent {
            mask |= 1 << quadrant;
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_transparent_rgba_sets_all_quadrant_bits() {
        let data = vec![0u8; 8 * 8 * 4];
        assert_eq!(compute_transparency(&data, 8, 8, 4), 0b1111);
    }

    #[test]
    fn rgb_never_reports_transparency() {
        let data = vec![0u8; 8 * 8 * 3];
        assert_eq!(compute_transparency(&data, 8, 8, 3), 0);
    }

    #[test]
    fn single_opaque_quadrant_clears_its_bit() {
        let width = 4u32;
        let height = 4u32;
        let mut data = vec![0u8; (width * height * 4) as usize];
        // quadrant 0 (top-left, rows 0..2 cols 0..2) gets one opaque pixel.
        let idx = (0 * width + 0) * 4 + 3;
        data[idx as usize] = 255;
        let mask = compute_transparency(&data, width, height, 4);
        assert_eq!(mask & 0b0001, 0);
        assert_eq!(mask & 0b1110, 0b1110);
    }
}
