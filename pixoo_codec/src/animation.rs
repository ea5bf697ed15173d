/*!
Animation assembly and chunking.

Each encoded frame is wrapped in a sub-frame:

```text
AA SS SS TC TC RP PC <palette RGB triples...> <packed pixel bytes...>
```

The sub-frames of an animation are concatenated into one buffer which is then
cut into chunks of at most [`MAX_CHUNK_PAYLOAD`] bytes. Chunk boundaries only
follow the byte count; a sub-frame may straddle two chunks.
*/

use crate::codec::{encode_frame, little_endian};
use crate::palette::EncodedImage;
use crate::protocol::opcode::DRAW_ANIMATION;
use crate::protocol::{DEFAULT_SPEED_MS, MAX_CHUNK_PAYLOAD, SUBFRAME_HEADER_SIZE, SUBFRAME_MARKER};

/// Wrap one encoded frame in its sub-frame header
pub fn encode_subframe(image: &EncodedImage, timecode: u16, reset_palette: bool) -> Vec<u8> {
    let palette = image.palette.to_bytes();
    let size = SUBFRAME_HEADER_SIZE + image.packed_pixels.len() + palette.len();

    let mut frame = Vec::with_capacity(size);
    frame.push(SUBFRAME_MARKER);
    frame.extend_from_slice(&little_endian(size));
    frame.extend_from_slice(&timecode.to_le_bytes());
    frame.push(reset_palette as u8);
    frame.push(image.palette.count_byte());
    frame.extend_from_slice(&palette);
    frame.extend_from_slice(&image.packed_pixels);

    frame
}

/// How the running timecode advances when no speed override is set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Follow the source's own timecodes (GIF material)
    Intrinsic,
    /// Advance by a fixed step (animations built from stills)
    Fixed(u16),
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing::Fixed(DEFAULT_SPEED_MS)
    }
}

/// Concatenates sub-frames into one animation buffer
#[derive(Debug, Clone, Default)]
pub struct AnimationAssembler {
    pacing: Pacing,
    speed_ms: u16,
    timecode_start: u16,
}

impl AnimationAssembler {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            pacing,
            ..Default::default()
        }
    }

    /// Fixed inter-frame speed overriding the pacing; 0 keeps the pacing
    pub fn speed(mut self, speed_ms: u16) -> Self {
        self.speed_ms = speed_ms;
        self
    }

    pub fn timecode_start(mut self, timecode: u16) -> Self {
        self.timecode_start = timecode;
        self
    }

    /// Timecode step taken after frame `index`
    fn step(&self, frames: &[EncodedImage], index: usize) -> u32 {
        if self.speed_ms != 0 {
            return self.speed_ms as u32;
        }
        match self.pacing {
            Pacing::Fixed(ms) => ms as u32,
            Pacing::Intrinsic => match frames.get(index + 1) {
                Some(next) => next.timecode_ms.saturating_sub(frames[index].timecode_ms),
                None => frames[index].intrinsic_speed_ms,
            },
        }
    }

    pub fn assemble(&self, frames: &[EncodedImage]) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut timecode = self.timecode_start as u32;

        for (index, image) in frames.iter().enumerate() {
            buffer.extend(encode_subframe(image, (timecode & 0xFFFF) as u16, false));
            timecode = timecode.wrapping_add(self.step(frames, index));
        }

        buffer
    }
}

/// One transport-sized slice of an animation buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationChunk {
    pub total_frame_count: u16,
    pub chunk_index: u8,
    pub payload: Vec<u8>,
}

impl AnimationChunk {
    /// Command arguments: frame count, chunk index, then the payload
    pub fn args(&self) -> Vec<u8> {
        let mut args = Vec::with_capacity(self.payload.len() + 3);
        args.extend_from_slice(&self.total_frame_count.to_le_bytes());
        args.push(self.chunk_index);
        args.extend_from_slice(&self.payload);
        args
    }

    /// Complete command frame for this chunk
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(DRAW_ANIMATION, &self.args())
    }
}

/// Split an animation buffer into chunks of at most `max_payload` bytes
pub fn chunk(buffer: &[u8], total_frame_count: u16, max_payload: usize) -> Vec<AnimationChunk> {
    buffer
        .chunks(max_payload.max(1))
        .enumerate()
        .map(|(i, payload)| AnimationChunk {
            total_frame_count,
            chunk_index: (i & 0xFF) as u8,
            payload: payload.to_vec(),
        })
        .collect()
}

/// Chunk with the device's default payload limit
pub fn chunk_default(buffer: &[u8], total_frame_count: u16) -> Vec<AnimationChunk> {
    chunk(buffer, total_frame_count, MAX_CHUNK_PAYLOAD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::pack;
    use crate::raster::{BlockResizer, RasterFrame};
    use proptest::prelude::*;

    fn black(timecode_ms: u32) -> EncodedImage {
        pack(&RasterFrame::solid(16, [0, 0, 0, 255]), 16, &BlockResizer)
            .unwrap()
            .with_source(0, 1, timecode_ms, 100)
    }

    #[test]
    fn test_black_subframe() {
        let frame = encode_subframe(&black(0), 0, false);
        assert_eq!(frame.len(), 42);
        assert_eq!(&frame[..10], &[0xAA, 42, 0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_timecode_and_reset_flag() {
        let frame = encode_subframe(&black(0), 0x1234, true);
        assert_eq!(&frame[3..6], &[0x34, 0x12, 0x01]);
    }

    #[test]
    fn test_fixed_pacing() {
        let frames = vec![black(0), black(0), black(0)];
        let buffer = AnimationAssembler::new(Pacing::default()).assemble(&frames);
        assert_eq!(buffer.len(), 42 * 3);
        assert_eq!(&buffer[3..5], &[0, 0]);
        assert_eq!(&buffer[42 + 3..42 + 5], &[100, 0]);
        assert_eq!(&buffer[84 + 3..84 + 5], &[200, 0]);
    }

    #[test]
    fn test_intrinsic_pacing_and_override() {
        let frames = vec![black(0), black(30), black(100)];

        let buffer = AnimationAssembler::new(Pacing::Intrinsic).assemble(&frames);
        assert_eq!(buffer[42 + 3], 30);
        assert_eq!(buffer[84 + 3], 100);

        let buffer = AnimationAssembler::new(Pacing::Intrinsic)
            .speed(50)
            .timecode_start(10)
            .assemble(&frames);
        assert_eq!(buffer[3], 10);
        assert_eq!(buffer[42 + 3], 60);
        assert_eq!(buffer[84 + 3], 110);
    }

    #[test]
    fn test_chunk_prefix() {
        let buffer = vec![7u8; 450];
        let chunks = chunk_default(&buffer, 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].payload.len(), 50);

        let args = chunks[1].args();
        assert_eq!(&args[..3], &[3, 0, 1]);
        assert_eq!(args.len(), 203);

        let wire = chunks[0].encode();
        assert_eq!(wire[3], 0x49);
        assert_eq!(wire.len(), 203 + 7);
    }

    #[test]
    fn test_empty_buffer_has_no_chunks() {
        assert!(chunk_default(&[], 0).is_empty());
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_buffer(buffer in proptest::collection::vec(any::<u8>(), 0..2000)) {
            let chunks = chunk(&buffer, 1, 200);
            prop_assert_eq!(chunks.len(), buffer.len().div_ceil(200));

            let joined: Vec<u8> = chunks.iter().flat_map(|c| c.payload.clone()).collect();
            prop_assert_eq!(joined, buffer);

            for (i, c) in chunks.iter().enumerate() {
                prop_assert_eq!(c.chunk_index as usize, i);
                prop_assert!(c.payload.len() <= 200);
            }
        }
    }
}
