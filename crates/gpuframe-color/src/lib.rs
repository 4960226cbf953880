//! gpuframe color - colorspace matrix derivation, gamma tables and HDR metadata.

pub mod error;
pub mod gamma;
pub mod hdr;
pub mod matrix;
pub mod primaries;

pub use error::ColorError;
pub use gamma::{gamma_lut, GammaLut, LutDirection, GAMMA_LUT_SIZE};
pub use hdr::{ContentLightLevel, HdrMetadata, MasteringDisplayInfo};
pub use matrix::{ColorMatrix, ColorSpec, ComponentRange};
pub use primaries::{convert_3x3, primaries_matrix};
