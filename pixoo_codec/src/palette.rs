/*!
Palette quantization and bit packing.

A frame is reduced to a table of at most 256 unique colors, kept in the order
they are first met while scanning rows, plus one palette index per pixel. The
indices are then packed least-significant-bit first using the smallest bit
width that can address the whole palette.
*/

use std::collections::HashMap;

use tracing::debug;

use crate::error::{CodecError, Result};
use crate::protocol::{MAX_PALETTE_SIZE, MAX_SUBFRAME_SIZE, SUBFRAME_HEADER_SIZE};
use crate::raster::{RasterFrame, Resizer};

/// An opaque (r, g, b) color
pub type Rgb = [u8; 3];

/// First-seen ordered color table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Rgb>,
    lookup: HashMap<Rgb, u8>,
}

impl Palette {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `color`, appending it when first seen
    pub fn index_of(&mut self, color: Rgb) -> Result<u8> {
        if let Some(&idx) = self.lookup.get(&color) {
            return Ok(idx);
        }
        if self.colors.len() >= MAX_PALETTE_SIZE {
            return Err(CodecError::PaletteOverflow {
                limit: MAX_PALETTE_SIZE,
            });
        }

        let idx = self.colors.len() as u8;
        self.colors.push(color);
        self.lookup.insert(color, idx);
        Ok(idx)
    }

    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Palette as flattened RGB triples
    pub fn to_bytes(&self) -> Vec<u8> {
        self.colors.iter().flatten().copied().collect()
    }

    /// Palette length as carried by the sub-frame header (0 means 256)
    pub fn count_byte(&self) -> u8 {
        if self.colors.len() == MAX_PALETTE_SIZE {
            0
        } else {
            self.colors.len() as u8
        }
    }

    /// Bits needed per index, never less than one
    pub fn bit_width(&self) -> u32 {
        let n = self.colors.len().max(2);
        usize::BITS - (n - 1).leading_zeros()
    }
}

/// One frame after quantization and packing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub palette: Palette,
    pub packed_pixels: Vec<u8>,
    /// Palette index of every pixel, row-major
    pub indices: Vec<u8>,
    pub pixel_count: usize,
    pub bit_width: u32,
    /// Total frames in the source this frame came from
    pub frame_count: usize,
    pub source_frame_index: usize,
    pub timecode_ms: u32,
    pub intrinsic_speed_ms: u32,
}

impl EncodedImage {
    /// Attach source metadata used later by the animation assembler
    pub fn with_source(
        mut self,
        source_frame_index: usize,
        frame_count: usize,
        timecode_ms: u32,
        intrinsic_speed_ms: u32,
    ) -> Self {
        self.source_frame_index = source_frame_index;
        self.frame_count = frame_count;
        self.timecode_ms = timecode_ms;
        self.intrinsic_speed_ms = intrinsic_speed_ms;
        self
    }

    /// Rebuild the RGB sequence from palette and packed indices
    pub fn to_rgb(&self) -> Vec<Rgb> {
        unpack_indices(&self.packed_pixels, self.bit_width, self.pixel_count)
            .into_iter()
            .map(|idx| self.palette.colors()[idx as usize])
            .collect()
    }

    /// Text rendering of the quantized frame, one hex glyph pair per pixel
    pub fn preview(&self) -> String {
        let size = (self.pixel_count as f64).sqrt() as usize;
        let border = "═══".repeat(size).chars().skip(1).collect::<String>();

        let mut display = format!("╔{}╗\n", border);
        for row in self.indices.chunks(size.max(1)) {
            let line = row
                .iter()
                .map(|idx| format!("{:02x}", idx).replace('0', " "))
                .collect::<Vec<_>>()
                .join(".");
            display.push_str(&format!("║{}║\n", line));
        }
        display.push_str(&format!("╚{}╝", border));
        display
    }
}

/// Scale color channels by alpha and drop the alpha channel
#[inline]
fn composite(pixel: [u8; 4]) -> Rgb {
    let [r, g, b, a] = pixel;
    if a == 255 {
        return [r, g, b];
    }
    let scale = |c: u8| ((c as u32 * a as u32 + 127) / 255) as u8;
    [scale(r), scale(g), scale(b)]
}

/// Pack indices least-significant-bit first, `bit_width` bits each
pub fn pack_indices(indices: &[u8], bit_width: u32) -> Vec<u8> {
    let mut packed = Vec::with_capacity((indices.len() * bit_width as usize).div_ceil(8));
    let mut acc: u32 = 0;
    let mut nbits: u32 = 0;

    for &idx in indices {
        acc |= (idx as u32) << nbits;
        nbits += bit_width;
        while nbits >= 8 {
            packed.push((acc & 0xFF) as u8);
            acc >>= 8;
            nbits -= 8;
        }
    }
    if nbits > 0 {
        packed.push((acc & 0xFF) as u8);
    }

    packed
}

/// Inverse of [`pack_indices`]
pub fn unpack_indices(packed: &[u8], bit_width: u32, count: usize) -> Vec<u8> {
    let mask = (1u32 << bit_width) - 1;
    let mut indices = Vec::with_capacity(count);
    let mut acc: u32 = 0;
    let mut nbits: u32 = 0;
    let mut bytes = packed.iter();

    while indices.len() < count {
        while nbits < bit_width {
            match bytes.next() {
                Some(&b) => {
                    acc |= (b as u32) << nbits;
                    nbits += 8;
                }
                None => return indices,
            }
        }
        indices.push((acc & mask) as u8);
        acc >>= bit_width;
        nbits -= bit_width;
    }

    indices
}

/// Quantize and pack one frame at the display resolution
///
/// Non-square sources fail with [`CodecError::Geometry`]. Sources of another
/// size go through `resizer` first and fail with
/// [`CodecError::UnsupportedResolution`] when it cannot hit `target` exactly.
pub fn pack(frame: &RasterFrame, target: usize, resizer: &dyn Resizer) -> Result<EncodedImage> {
    if !frame.is_square() {
        return Err(CodecError::geometry(frame.width, frame.height));
    }

    let resized;
    let frame = if frame.width != target {
        resized = resizer
            .resize(frame, target)
            .filter(|f| f.width == target && f.height == target)
            .ok_or_else(|| CodecError::unsupported_resolution(frame.width, target))?;
        &resized
    } else {
        frame
    };

    let mut palette = Palette::new();
    let indices = frame
        .pixels
        .iter()
        .map(|&p| palette.index_of(composite(p)))
        .collect::<Result<Vec<u8>>>()?;

    let bit_width = palette.bit_width();
    let packed_pixels = pack_indices(&indices, bit_width);

    let size = SUBFRAME_HEADER_SIZE + palette.len() * 3 + packed_pixels.len();
    if size > MAX_SUBFRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size,
            limit: MAX_SUBFRAME_SIZE,
        });
    }

    let image = EncodedImage {
        pixel_count: indices.len(),
        palette,
        packed_pixels,
        indices,
        bit_width,
        frame_count: 1,
        source_frame_index: 0,
        timecode_ms: 0,
        intrinsic_speed_ms: 0,
    };

    debug!(
        "Display {{{},{}}}\n{}",
        image.palette.len(),
        image.pixel_count,
        image.preview()
    );

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::BlockResizer;
    use proptest::prelude::*;

    fn frame_from_colors(size: usize, colors: impl Fn(usize) -> [u8; 4]) -> RasterFrame {
        RasterFrame::new(size, size, (0..size * size).map(colors).collect()).unwrap()
    }

    #[test]
    fn test_black_frame() {
        let frame = RasterFrame::solid(16, [0, 0, 0, 255]);
        let image = pack(&frame, 16, &BlockResizer).unwrap();

        assert_eq!(image.palette.colors(), &[[0, 0, 0]]);
        assert_eq!(image.bit_width, 1);
        assert_eq!(image.packed_pixels.len(), 32);
        assert!(image.packed_pixels.iter().all(|&b| b == 0));
        assert_eq!(image.pixel_count, 256);
    }

    #[test]
    fn test_bit_width() {
        let mut palette = Palette::new();
        assert_eq!(palette.bit_width(), 1);
        palette.index_of([0, 0, 0]).unwrap();
        assert_eq!(palette.bit_width(), 1);
        palette.index_of([1, 0, 0]).unwrap();
        assert_eq!(palette.bit_width(), 1);
        palette.index_of([2, 0, 0]).unwrap();
        assert_eq!(palette.bit_width(), 2);
        for i in 3..=4 {
            palette.index_of([i, 0, 0]).unwrap();
        }
        assert_eq!(palette.bit_width(), 3);
    }

    #[test]
    fn test_lsb_first_packing() {
        // 2-bit indices 1, 2, 3, 0 -> 0b00_11_10_01
        assert_eq!(pack_indices(&[1, 2, 3, 0], 2), vec![0b0011_1001]);
        // 3-bit indices straddle byte boundaries
        assert_eq!(pack_indices(&[7, 7, 7], 3), vec![0xFF, 0x01]);
        assert_eq!(unpack_indices(&[0xFF, 0x01], 3, 3), vec![7, 7, 7]);
    }

    #[test]
    fn test_first_seen_order() {
        let frame = frame_from_colors(2, |i| match i {
            0 => [9, 9, 9, 255],
            1 => [1, 1, 1, 255],
            2 => [9, 9, 9, 255],
            _ => [5, 5, 5, 255],
        });
        let image = pack(&frame, 2, &BlockResizer).unwrap();
        assert_eq!(image.palette.colors(), &[[9, 9, 9], [1, 1, 1], [5, 5, 5]]);
        assert_eq!(image.indices, vec![0, 1, 0, 2]);
    }

    #[test]
    fn test_alpha_is_composited() {
        let frame = frame_from_colors(1, |_| [200, 100, 50, 128]);
        let image = pack(&frame, 1, &BlockResizer).unwrap();
        assert_eq!(image.palette.colors(), &[[100, 50, 25]]);

        let transparent = frame_from_colors(1, |_| [200, 100, 50, 0]);
        let image = pack(&transparent, 1, &BlockResizer).unwrap();
        assert_eq!(image.palette.colors(), &[[0, 0, 0]]);
    }

    #[test]
    fn test_256_colors_fit() {
        let frame = frame_from_colors(16, |i| [i as u8, 0, 0, 255]);
        let image = pack(&frame, 16, &BlockResizer).unwrap();
        assert_eq!(image.palette.len(), 256);
        assert_eq!(image.palette.count_byte(), 0);
        assert_eq!(image.bit_width, 8);
        assert_eq!(image.packed_pixels, (0..=255u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_257_colors_overflow() {
        let frame = frame_from_colors(17, |i| [(i % 256) as u8, (i / 256) as u8, 0, 255]);
        let err = pack(&frame, 17, &BlockResizer).unwrap_err();
        assert!(matches!(err, CodecError::PaletteOverflow { limit: 256 }));
    }

    #[test]
    fn test_non_square_rejected() {
        let frame = RasterFrame::new(2, 1, vec![[0; 4]; 2]).unwrap();
        assert!(matches!(
            pack(&frame, 16, &BlockResizer),
            Err(CodecError::Geometry { width: 2, height: 1 })
        ));
    }

    #[test]
    fn test_resize_applied_or_refused() {
        let big = RasterFrame::solid(32, [4, 5, 6, 255]);
        let image = pack(&big, 16, &BlockResizer).unwrap();
        assert_eq!(image.pixel_count, 256);

        let odd = RasterFrame::solid(20, [4, 5, 6, 255]);
        assert!(matches!(
            pack(&odd, 16, &BlockResizer),
            Err(CodecError::UnsupportedResolution { from: 20, to: 16 })
        ));
    }

    #[test]
    fn test_oversized_subframe_rejected() {
        // 256x256 at 8 bits per pixel cannot be described by a 16-bit size
        let frame = frame_from_colors(256, |i| [(i % 256) as u8, 0, 0, 255]);
        assert!(matches!(
            pack(&frame, 256, &BlockResizer),
            Err(CodecError::FrameTooLarge { size: 66311, .. })
        ));

        let two_tone = frame_from_colors(256, |i| [(i % 2) as u8, 0, 0, 255]);
        let image = pack(&two_tone, 256, &BlockResizer).unwrap();
        assert_eq!(image.packed_pixels.len(), 8192);
    }

    #[test]
    fn test_preview_shape() {
        let frame = RasterFrame::solid(2, [0, 0, 0, 255]);
        let image = pack(&frame, 2, &BlockResizer).unwrap();
        let preview = image.preview();
        assert_eq!(preview.lines().count(), 4);
        assert!(preview.contains("║  .  ║"));
    }

    proptest! {
        #[test]
        fn prop_lossless_and_deterministic(
            palette in proptest::collection::vec(any::<[u8; 3]>(), 1..40),
            picks in proptest::collection::vec(any::<prop::sample::Index>(), 64),
        ) {
            let pixels: Vec<[u8; 4]> = picks
                .iter()
                .map(|i| {
                    let [r, g, b] = *i.get(&palette);
                    [r, g, b, 255]
                })
                .collect();
            let frame = RasterFrame::new(8, 8, pixels.clone()).unwrap();

            let first = pack(&frame, 8, &BlockResizer).unwrap();
            let second = pack(&frame, 8, &BlockResizer).unwrap();
            prop_assert_eq!(&first, &second);

            let expected: Vec<Rgb> = pixels.iter().map(|p| [p[0], p[1], p[2]]).collect();
            prop_assert_eq!(first.to_rgb(), expected);
        }
    }
}
