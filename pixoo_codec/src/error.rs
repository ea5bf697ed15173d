/*!
Encode-time error types for the Pixoo protocol codec.
*/

use thiserror::Error;

/// Common result type used throughout the codec library
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while turning source rasters into device payloads
#[derive(Error, Debug)]
pub enum CodecError {
    /// The source frame is not square
    #[error("Image must be square, got {width}x{height}")]
    Geometry { width: usize, height: usize },

    /// The source cannot be resized exactly to the display resolution
    #[error("Cannot resize {from}x{from} to {to}x{to}, choose an image with a multiple resolution of {to}x{to}")]
    UnsupportedResolution { from: usize, to: usize },

    /// More than 256 distinct colors after compositing
    #[error("The color palette cannot exceed {limit} colors")]
    PaletteOverflow { limit: usize },

    /// The raster decoder rejected the source bytes
    #[error("Decode error: {0}")]
    Decode(String),

    /// The sub-frame would not fit the 16-bit length fields
    #[error("Sub-frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    /// An animation carries more frames than its 16-bit count field
    #[error("Animation of {count} frames exceeds the {limit} frame limit")]
    TooManyFrames { count: usize, limit: usize },

    /// Pixel data does not match the declared geometry
    #[error("Invalid frame data: {0}")]
    InvalidFrame(String),

    /// I/O errors (reading source files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Create a new geometry error
    pub fn geometry(width: usize, height: usize) -> Self {
        Self::Geometry { width, height }
    }

    /// Create a new unsupported resolution error
    pub fn unsupported_resolution(from: usize, to: usize) -> Self {
        Self::UnsupportedResolution { from, to }
    }

    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new invalid frame error
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }
}

impl From<image::ImageError> for CodecError {
    fn from(err: image::ImageError) -> Self {
        Self::Decode(err.to_string())
    }
}
