/*!
# Pixoo Protocol Codec

This crate contains the wire-level pieces shared by every tool that talks to a
Divoom Pixoo LED matrix over its Bluetooth serial link.

## Core Types

- [`CommandFrame`] - Opcode plus argument bytes, framed with length and checksum
- [`RasterFrame`] - Decoded RGBA pixels of one square source frame
- [`Palette`] - First-seen ordered color table (max 256 entries)
- [`EncodedImage`] - Palette plus bit-packed pixel indices
- [`AnimationChunk`] - Transport-sized slice of an animation buffer

## Modules

- [`codec`] - Command frame encoding
- [`palette`] - Palette quantization and bit packing
- [`animation`] - Sub-frame assembly and chunking
- [`raster`] - Raster model, decoder and resizer collaborators
- [`error`] - Common error types
*/

pub mod animation;
pub mod codec;
pub mod error;
pub mod palette;
pub mod raster;

// Re-export commonly used types
pub use animation::{chunk, chunk_default, encode_subframe, AnimationAssembler, AnimationChunk, Pacing};
pub use codec::{encode_frame, CommandFrame};
pub use error::{CodecError, Result};
pub use palette::{pack, EncodedImage, Palette, Rgb};
pub use raster::{
    BlockResizer, DecodedFrame, DecodedRaster, ImageDecoder, RasterDecoder, RasterFrame, Resizer,
};

/// Version information for the codec library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// First byte of every command frame
    pub const FRAME_START: u8 = 0x01;

    /// Last byte of every command frame
    pub const FRAME_END: u8 = 0x02;

    /// Bytes a command frame adds around its arguments
    pub const FRAME_OVERHEAD: usize = 7;

    /// Marker byte opening an image sub-frame
    pub const SUBFRAME_MARKER: u8 = 0xAA;

    /// Size of the sub-frame header in bytes
    pub const SUBFRAME_HEADER_SIZE: usize = 7;

    /// Side length of the stock display in pixels
    pub const DEFAULT_SIZE: usize = 16;

    /// Largest palette the device accepts
    pub const MAX_PALETTE_SIZE: usize = 256;

    /// Largest animation payload carried by one chunk
    pub const MAX_CHUNK_PAYLOAD: usize = 200;

    /// Inter-frame speed used when a source carries no timing
    pub const DEFAULT_SPEED_MS: u16 = 100;

    /// Argument prefix preceding the sub-frame of a still image
    pub const STILL_PREFIX: [u8; 4] = [0x00, 0x0A, 0x0A, 0x04];

    /// Largest sub-frame whose still command still fits the 16-bit length field
    pub const MAX_SUBFRAME_SIZE: usize = u16::MAX as usize - STILL_PREFIX.len() - 3;

    /// Frames an animation can announce in its chunk prefix
    pub const MAX_ANIMATION_FRAMES: usize = u16::MAX as usize;

    /// Device opcodes
    pub mod opcode {
        pub const SET_SYSTEM_DATETIME: u8 = 0x18;
        pub const SET_SYSTEM_FULLDAY: u8 = 0x2D;
        pub const DRAW_STILL: u8 = 0x44;
        pub const SET_BOX_MODE: u8 = 0x45;
        pub const DRAW_ANIMATION: u8 = 0x49;
        pub const DRAWING_ENCODE_PIC: u8 = 0x5B;
        pub const SET_SYSTEM_CLIMATE: u8 = 0x5F;
        pub const SET_COLOR: u8 = 0x6F;
        pub const SET_SYSTEM_BRIGHTNESS: u8 = 0x74;
        pub const SPP_SET_USER_GIF: u8 = 0xB1;
    }

    /// Box modes selectable with [`opcode::SET_BOX_MODE`]
    pub mod box_mode {
        pub const CLOCK: u8 = 0x00;
        pub const TEMP: u8 = 0x01;
        pub const COLOR: u8 = 0x02;
        pub const EFFECTS: u8 = 0x03;
        pub const EQUALIZER: u8 = 0x04;
        pub const STOPWATCH: u8 = 0x06;
        pub const SCOREBOARD: u8 = 0x07;
    }

    /// Visual variants passed alongside a box mode
    pub mod box_visual {
        pub const CLOCK_US: u8 = 0x00;
        pub const CLOCK_ISO: u8 = 0x01;
        pub const TEMP_DEGREES: u8 = 0x00;
        pub const TEMP_FAHRENHEIT: u8 = 0x01;
    }
}
