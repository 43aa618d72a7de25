//! Error types for helilink frames

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Codec error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Frame payload too large
    #[error("payload too large: {0} bytes (max 253)")]
    PayloadTooLarge(usize),

    /// Buffer too small to hold the expected data
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// Command id outside the registered enumeration
    #[error("unknown command: 0x{0:02x}")]
    UnknownCommand(u8),

    /// Action id outside the registered enumeration
    #[error("unknown action: 0x{0:02x}")]
    UnknownAction(u8),

    /// Single byte that is not a boolean acknowledgement
    #[error("invalid acknowledgement byte: 0x{0:02x}")]
    InvalidAck(u8),
}
