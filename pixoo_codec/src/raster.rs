/*!
Raster model and the decoder/resizer collaborators.

Decoding source files and rescaling them are not protocol concerns; the codec
consumes them through the narrow [`RasterDecoder`] and [`Resizer`] traits.
[`ImageDecoder`] and [`BlockResizer`] are the default implementations.
*/

use std::io::Cursor;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ImageFormat};
use tracing::debug;

use crate::error::{CodecError, Result};
use crate::protocol::DEFAULT_SPEED_MS;

/// One decoded, immutable source frame in row-major RGBA order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterFrame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<[u8; 4]>,
}

impl RasterFrame {
    /// Create a frame, checking the pixel count against the geometry
    pub fn new(width: usize, height: usize, pixels: Vec<[u8; 4]>) -> Result<Self> {
        if pixels.len() != width * height {
            return Err(CodecError::invalid_frame(format!(
                "Expected {} pixels for {}x{}, got {}",
                width * height,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A square frame filled with one color
    pub fn solid(size: usize, pixel: [u8; 4]) -> Self {
        Self {
            width: size,
            height: size,
            pixels: vec![pixel; size * size],
        }
    }

    /// Build a frame from packed bytes, detecting RGB or RGBA stride
    pub fn from_bytes(width: usize, height: usize, bytes: &[u8]) -> Result<Self> {
        let count = width * height;
        if count == 0 || bytes.len() % count != 0 {
            return Err(CodecError::invalid_frame(format!(
                "{} bytes cannot hold {}x{} pixels",
                bytes.len(),
                width,
                height
            )));
        }

        let stride = bytes.len() / count;
        let pixels = match stride {
            3 => bytes
                .chunks_exact(3)
                .map(|p| [p[0], p[1], p[2], 255])
                .collect(),
            4 => bytes
                .chunks_exact(4)
                .map(|p| [p[0], p[1], p[2], p[3]])
                .collect(),
            other => {
                return Err(CodecError::invalid_frame(format!(
                    "Unsupported pixel stride of {} bytes",
                    other
                )))
            }
        };

        Self::new(width, height, pixels)
    }

    pub fn is_square(&self) -> bool {
        self.width == self.height
    }
}

/// One frame as handed over by a decoder
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub pixel_bytes: Vec<u8>,
    pub timecode_ms: u32,
}

/// Everything a decoder extracted from one source file
#[derive(Debug, Clone)]
pub struct DecodedRaster {
    pub width: usize,
    pub height: usize,
    pub frames: Vec<DecodedFrame>,
}

impl DecodedRaster {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Get one frame as a [`RasterFrame`]
    pub fn frame(&self, index: usize) -> Result<RasterFrame> {
        let frame = self.frames.get(index).ok_or_else(|| {
            CodecError::invalid_frame(format!(
                "Frame {} out of range, source has {}",
                index,
                self.frames.len()
            ))
        })?;
        RasterFrame::from_bytes(self.width, self.height, &frame.pixel_bytes)
    }

    pub fn timecode(&self, index: usize) -> u32 {
        self.frames.get(index).map(|f| f.timecode_ms).unwrap_or(0)
    }

    /// Source timecodes in frame order
    pub fn timecodes(&self) -> Vec<u32> {
        self.frames.iter().map(|f| f.timecode_ms).collect()
    }

    /// Inter-frame speed: distance between the first two timecodes, 100 ms otherwise
    pub fn intrinsic_speed_ms(&self) -> u32 {
        match self.frames.as_slice() {
            [first, second, ..] => second.timecode_ms.saturating_sub(first.timecode_ms),
            _ => DEFAULT_SPEED_MS as u32,
        }
    }
}

/// Turns file bytes into frames of pixels
pub trait RasterDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedRaster>;
}

/// Rescales a frame to a square target size; `None` when no exact result exists
pub trait Resizer: Send + Sync {
    fn resize(&self, frame: &RasterFrame, target: usize) -> Option<RasterFrame>;
}

/// Decoder backed by the `image` crate
///
/// GIFs yield every frame with cumulative timecodes; any other format
/// yields a single frame at timecode 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl ImageDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_gif(&self, bytes: &[u8]) -> Result<DecodedRaster> {
        let decoder = GifDecoder::new(Cursor::new(bytes))?;
        let frames = decoder.into_frames().collect_frames()?;

        let mut width = 0;
        let mut height = 0;
        let mut timecode = 0u32;
        let mut decoded = Vec::with_capacity(frames.len());

        for frame in frames {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let buffer = frame.into_buffer();
            width = buffer.width() as usize;
            height = buffer.height() as usize;

            decoded.push(DecodedFrame {
                pixel_bytes: buffer.into_raw(),
                timecode_ms: timecode,
            });
            timecode = timecode.saturating_add(numer / denom.max(1));
        }

        if decoded.is_empty() {
            return Err(CodecError::decode("GIF contains no frames"));
        }

        Ok(DecodedRaster {
            width,
            height,
            frames: decoded,
        })
    }

    fn decode_still(&self, bytes: &[u8]) -> Result<DecodedRaster> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();

        Ok(DecodedRaster {
            width: width as usize,
            height: height as usize,
            frames: vec![DecodedFrame {
                pixel_bytes: rgba.into_raw(),
                timecode_ms: 0,
            }],
        })
    }
}

impl RasterDecoder for ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedRaster> {
        let format = image::guess_format(bytes)?;
        let raster = if format == ImageFormat::Gif {
            self.decode_gif(bytes)?
        } else {
            self.decode_still(bytes)?
        };

        debug!(
            "Decoded {:?}: {}x{}, {} frame(s)",
            format,
            raster.width,
            raster.height,
            raster.frames.len()
        );
        Ok(raster)
    }
}

/// Integer-ratio resizer
///
/// Downscales by averaging each `ratio x ratio` block and upscales by
/// replicating pixels. Any ratio that is not a whole number is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockResizer;

impl BlockResizer {
    pub fn new() -> Self {
        Self
    }

    fn downscale(frame: &RasterFrame, target: usize, ratio: usize) -> RasterFrame {
        let area = (ratio * ratio) as u32;
        let mut pixels = Vec::with_capacity(target * target);

        for ty in 0..target {
            for tx in 0..target {
                let mut sum = [0u32; 4];
                for dy in 0..ratio {
                    let row = (ty * ratio + dy) * frame.width;
                    for dx in 0..ratio {
                        let p = frame.pixels[row + tx * ratio + dx];
                        for c in 0..4 {
                            sum[c] += p[c] as u32;
                        }
                    }
                }
                pixels.push(sum.map(|s| ((s + area / 2) / area) as u8));
            }
        }

        RasterFrame {
            width: target,
            height: target,
            pixels,
        }
    }

    fn upscale(frame: &RasterFrame, target: usize, ratio: usize) -> RasterFrame {
        let mut pixels = Vec::with_capacity(target * target);
        for ty in 0..target {
            let row = (ty / ratio) * frame.width;
            for tx in 0..target {
                pixels.push(frame.pixels[row + tx / ratio]);
            }
        }

        RasterFrame {
            width: target,
            height: target,
            pixels,
        }
    }
}

impl Resizer for BlockResizer {
    fn resize(&self, frame: &RasterFrame, target: usize) -> Option<RasterFrame> {
        let size = frame.width;
        if !frame.is_square() || size == 0 || target == 0 {
            return None;
        }

        if size == target {
            Some(frame.clone())
        } else if size > target && size % target == 0 {
            Some(Self::downscale(frame, target, size / target))
        } else if target > size && target % size == 0 {
            Some(Self::upscale(frame, target, target / size))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_detection() {
        let rgb = RasterFrame::from_bytes(2, 1, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(rgb.pixels, vec![[1, 2, 3, 255], [4, 5, 6, 255]]);

        let rgba = RasterFrame::from_bytes(1, 2, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(rgba.pixels, vec![[1, 2, 3, 4], [5, 6, 7, 8]]);

        assert!(RasterFrame::from_bytes(2, 2, &[0; 5]).is_err());
        assert!(RasterFrame::from_bytes(1, 1, &[0; 2]).is_err());
    }

    #[test]
    fn test_intrinsic_speed() {
        let mut raster = DecodedRaster {
            width: 1,
            height: 1,
            frames: vec![DecodedFrame {
                pixel_bytes: vec![0, 0, 0],
                timecode_ms: 0,
            }],
        };
        assert_eq!(raster.intrinsic_speed_ms(), 100);

        raster.frames.push(DecodedFrame {
            pixel_bytes: vec![0, 0, 0],
            timecode_ms: 40,
        });
        assert_eq!(raster.intrinsic_speed_ms(), 40);
        assert_eq!(raster.timecodes(), vec![0, 40]);
        assert!(raster.frame(2).is_err());
    }

    #[test]
    fn test_downscale_averages_blocks() {
        let mut pixels = vec![[0, 0, 0, 255]; 16];
        // top-left 2x2 block: two white, two black
        pixels[0] = [255, 255, 255, 255];
        pixels[1] = [255, 255, 255, 255];
        let frame = RasterFrame::new(4, 4, pixels).unwrap();

        let resized = BlockResizer.resize(&frame, 2).unwrap();
        assert_eq!(resized.width, 2);
        assert_eq!(resized.pixels[0], [128, 128, 128, 255]);
        assert_eq!(resized.pixels[1], [0, 0, 0, 255]);
    }

    #[test]
    fn test_upscale_replicates() {
        let frame = RasterFrame::new(2, 2, vec![[1, 0, 0, 255], [2, 0, 0, 255], [3, 0, 0, 255], [4, 0, 0, 255]]).unwrap();
        let resized = BlockResizer.resize(&frame, 4).unwrap();
        assert_eq!(resized.pixels[0], [1, 0, 0, 255]);
        assert_eq!(resized.pixels[3], [2, 0, 0, 255]);
        assert_eq!(resized.pixels[15], [4, 0, 0, 255]);
    }

    #[test]
    fn test_non_integer_ratio_refused() {
        let frame = RasterFrame::solid(24, [0, 0, 0, 255]);
        assert!(BlockResizer.resize(&frame, 16).is_none());
        assert!(BlockResizer.resize(&RasterFrame::solid(32, [0; 4]), 16).is_some());
    }

    #[test]
    fn test_decode_png_still() {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();

        let raster = ImageDecoder.decode(&bytes).unwrap();
        assert_eq!((raster.width, raster.height), (2, 2));
        assert_eq!(raster.frame_count(), 1);
        assert_eq!(raster.frame(0).unwrap().pixels[3], [10, 20, 30, 255]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(ImageDecoder.decode(b"not an image").is_err());
    }
}
