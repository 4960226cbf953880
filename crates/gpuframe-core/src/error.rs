//! Error types for video value types.

use thiserror::Error;

/// Errors raised while describing or laying out frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VideoError {
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("plane {plane} out of range for {format}")]
    PlaneOutOfRange { format: &'static str, plane: usize },

    #[error("buffer too small: expected {expected} bytes, got {got}")]
    BufferTooSmall { expected: usize, got: usize },

    #[error("format mismatch: expected {expected}, got {got}")]
    FormatMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type alias for video value operations.
pub type Result<T> = std::result::Result<T, VideoError>;
