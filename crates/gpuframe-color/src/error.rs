//! Color subsystem errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorError {
    #[error("unsupported matrix: {0}")]
    UnsupportedMatrix(String),
    #[error("unsupported color space: {0}")]
    UnsupportedSpace(String),
    #[error("singular matrix")]
    SingularMatrix,
    #[error("parse error: {0}")]
    Parse(String),
}
