/*!
Error types for the display session, transport and playback.
*/

use pixoo_codec::CodecError;
use thiserror::Error;

/// Common result type for display operations
pub type Result<T> = std::result::Result<T, DisplayError>;

#[derive(Error, Debug)]
pub enum DisplayError {
    /// Encode-time errors (geometry, resolution, palette, decoding)
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Every connection attempt failed
    #[error("Could not connect to {address} after {attempts} attempts")]
    ConnectionExhausted { address: String, attempts: u32 },

    /// No serial channel could be resolved for the address
    #[error("Not found: {0}")]
    NotFound(String),

    /// The device refused to open the channel
    #[error("Cannot connect: {0}")]
    Refused(String),

    /// Underlying channel write failed
    #[error("Transport write failed: {0}")]
    TransportWrite(#[source] std::io::Error),

    /// Write attempted while disconnected under the fail-fast policy
    #[error("Not connected")]
    NotConnected,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DisplayError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn refused(msg: impl Into<String>) -> Self {
        Self::Refused(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether a connection attempt failing with this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Refused(_))
    }
}
