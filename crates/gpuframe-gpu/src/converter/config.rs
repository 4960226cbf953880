//! Construction-time converter configuration.

use crate::error::{GpuError, Result};
use crate::native::SamplerFilter;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Backends a converter may use.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ConverterBackends: u32 {
        const SHADER = 1 << 0;
        const VIDEO_PROCESSOR = 1 << 1;
    }
}

impl Default for ConverterBackends {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GammaMode {
    /// Transfer functions are ignored.
    #[default]
    None,
    /// Decode the input transfer and re-encode with the output transfer.
    Apply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimariesMode {
    /// Primaries are ignored.
    #[default]
    None,
    /// Adapt colors between input and output primaries. Implies gamma.
    Apply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlphaMode {
    /// Treated as straight alpha.
    #[default]
    Unspecified,
    Premultiplied,
    Straight,
}

impl AlphaMode {
    pub fn is_premultiplied(self) -> bool {
        self == Self::Premultiplied
    }
}

/// Options fixed when a [`Converter`](super::Converter) is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub backends: ConverterBackends,
    pub gamma_mode: GammaMode,
    pub primaries_mode: PrimariesMode,
    pub sampler_filter: SamplerFilter,
    pub src_alpha_mode: AlphaMode,
    pub dest_alpha_mode: AlphaMode,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            backends: ConverterBackends::default(),
            gamma_mode: GammaMode::None,
            primaries_mode: PrimariesMode::None,
            sampler_filter: SamplerFilter::Linear,
            src_alpha_mode: AlphaMode::Unspecified,
            dest_alpha_mode: AlphaMode::Unspecified,
        }
    }
}

impl ConverterConfig {
    /// Parse a JSON object; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| GpuError::InvalidArgument(format!("converter config: {}", e)))
    }

    pub fn shader_only() -> Self {
        Self {
            backends: ConverterBackends::SHADER,
            ..Self::default()
        }
    }

    pub fn processor_only() -> Self {
        Self {
            backends: ConverterBackends::VIDEO_PROCESSOR,
            ..Self::default()
        }
    }
}
