//! gpuframe core - foundation types shared by the GPU frame engine
//!
//! This crate provides the value types used throughout gpuframe:
//! - Abstract pixel formats and their plane layout
//! - Colorimetry (range, matrix coefficients, transfer, primaries)
//! - Video info, rectangles and orientation
//! - CPU-memory frames

pub mod color;
pub mod error;
pub mod format;
pub mod frame;
pub mod geometry;
pub mod info;

pub use color::{ColorPrimaries, ColorRange, Colorimetry, MatrixCoefficients, TransferFunction};
pub use error::{Result, VideoError};
pub use format::{ColorFamily, FormatInfo, PlaneInfo, VideoFormat};
pub use frame::SystemFrame;
pub use geometry::{Rect, VideoDirection};
pub use info::VideoInfo;

/// Upper bound on either dimension of a frame.
pub const MAX_DIMENSION: u32 = 16384;
