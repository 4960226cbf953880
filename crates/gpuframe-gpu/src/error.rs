//! Error types for the GPU layer.

use gpuframe_color::ColorError;
use gpuframe_core::VideoError;
use thiserror::Error;

/// Backend-neutral translation of a native error code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NativeError {
    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid call: {0}")]
    InvalidCall(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("device removed: {0}")]
    DeviceRemoved(String),

    #[error("shader compilation failed: {0}")]
    Compile(String),

    #[error("wait timed out")]
    Timeout,

    #[error("{0}")]
    Backend(String),
}

impl NativeError {
    /// Stable numeric code, in the HRESULT space, for log lines.
    pub fn code(&self) -> u32 {
        match self {
            Self::OutOfMemory => 0x8007_000E,
            Self::InvalidCall(_) => 0x887A_0001,
            Self::Unsupported(_) => 0x887A_0004,
            Self::DeviceRemoved(_) => 0x887A_0005,
            Self::Compile(_) => 0x8000_4005,
            Self::Timeout => 0x887A_0027,
            Self::Backend(_) => 0x8000_FFFF,
        }
    }
}

/// Main error type for GPU frame operations.
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("No adapter matches {0}")]
    AdapterNotFound(String),

    #[error("Device creation failed: {0}")]
    DeviceCreation(NativeError),

    #[error("{call} failed (0x{:08x}): {source}", .source.code())]
    Native {
        call: &'static str,
        #[source]
        source: NativeError,
    },

    #[error("Device removed: {0}")]
    DeviceRemoved(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Shader {entry_point} failed to compile: {message}")]
    ShaderCompile { entry_point: String, message: String },

    #[error("Pool exhausted")]
    Exhausted,

    #[error("Pool is flushing")]
    Flushing,

    #[error(transparent)]
    Color(#[from] ColorError),

    #[error(transparent)]
    Video(#[from] VideoError),
}

impl GpuError {
    pub fn native(call: &'static str, source: NativeError) -> Self {
        Self::Native { call, source }
    }

    /// Transient pool conditions that callers branch on instead of failing.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Exhausted | Self::Flushing)
    }
}

/// Result type alias for GPU operations.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Result of a call on a native device.
pub type NativeResult<T> = std::result::Result<T, NativeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_codes_are_distinct() {
        let errors = [
            NativeError::OutOfMemory,
            NativeError::InvalidCall(String::new()),
            NativeError::Unsupported(String::new()),
            NativeError::DeviceRemoved(String::new()),
            NativeError::Compile(String::new()),
            NativeError::Timeout,
            NativeError::Backend(String::new()),
        ];
        let mut codes: Vec<u32> = errors.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_native_error_message_carries_code() {
        let err = GpuError::native("CreateTexture2D", NativeError::OutOfMemory);
        assert_eq!(err.to_string(), "CreateTexture2D failed (0x8007000e): out of memory");
        assert!(!err.is_transient());
        assert!(GpuError::Flushing.is_transient());
    }
}
