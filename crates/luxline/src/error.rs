//! Error types for the DMX output engine
use thiserror::Error;

/// DMX engine errors
#[derive(Error, Debug)]
pub enum DmxError {
    /// Channel index outside the addressable range
    #[error("DMX channel {0} is out of range (1..=512)")]
    ChannelOutOfRange(u16),

    /// Supplied frame buffer has the wrong length
    #[error("DMX frame must be exactly 513 bytes, got {0}")]
    InvalidFrameLength(usize),

    /// The serial line rejected the DMX512 settings
    #[error("serial configuration error: {0}")]
    Configuration(String),

    /// Break assertion or frame write failed on the open line
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Result type for DMX operations
pub type Result<T> = std::result::Result<T, DmxError>;
