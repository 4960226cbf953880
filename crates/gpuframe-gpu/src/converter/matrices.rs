//! Conversion classes and the colorspace matrices each one needs.

use super::config::{ConverterConfig, GammaMode, PrimariesMode};
use crate::error::Result;
use crate::shader::layout::PsConstants;
use crate::shader::program::ConvertProgram;
use gpuframe_color::matrix::{conversion_matrix, range_matrix};
use gpuframe_color::{gamma_lut, primaries_matrix, ColorMatrix, ColorSpec, GammaLut, LutDirection};
use gpuframe_core::VideoInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const IDENTITY_EPSILON: f64 = 1e-6;

/// How much color work a conversion does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionClass {
    /// Same encoding on both sides.
    Identity,
    /// RGB and YUV, or YUV with different matrix coefficients.
    Simple,
    /// Same family, different range or depth normalization.
    Range,
    /// Transfer function change through linear light.
    Gamma,
    /// Transfer function and primaries change through linear light.
    Primary,
}

impl ConversionClass {
    /// Classify the conversion from `input` to `output`.
    ///
    /// Gamma and primaries are only considered when the config asks for
    /// them; primaries correction always linearizes.
    pub fn classify(input: &VideoInfo, output: &VideoInfo, config: &ConverterConfig) -> Self {
        let (ci, co) = (&input.colorimetry, &output.colorimetry);
        let primaries = config.primaries_mode == PrimariesMode::Apply;
        let gamma = primaries || config.gamma_mode == GammaMode::Apply;
        if primaries && !ci.primaries.is_equivalent(co.primaries) {
            return Self::Primary;
        }
        if gamma && !ci.transfer.is_equivalent(co.transfer) {
            return Self::Gamma;
        }

        let (si, so) = (ColorSpec::from_info(input), ColorSpec::from_info(output));
        let gray = input.format.is_gray() || output.format.is_gray();
        if si.yuv != so.yuv || (si.yuv && !gray && ci.matrix != co.matrix) {
            return Self::Simple;
        }
        if !range_matrix(&si, &so).is_identity(IDENTITY_EPSILON) {
            return Self::Range;
        }
        Self::Identity
    }

    pub fn program(self) -> ConvertProgram {
        match self {
            Self::Identity => ConvertProgram::Identity,
            Self::Simple | Self::Range => ConvertProgram::Matrix,
            Self::Gamma => ConvertProgram::Gamma,
            Self::Primary => ConvertProgram::Primary,
        }
    }

    /// Whether the conversion goes through linear light.
    pub fn is_linear(self) -> bool {
        matches!(self, Self::Gamma | Self::Primary)
    }
}

impl fmt::Display for ConversionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Identity => "identity",
            Self::Simple => "simple",
            Self::Range => "range",
            Self::Gamma => "gamma",
            Self::Primary => "primary",
        };
        f.write_str(name)
    }
}

/// Single matrix between two encodings. Gray carries no chroma, so only
/// its range and depth matter against another luma/chroma encoding.
fn encoding_matrix(input: &VideoInfo, output: &VideoInfo) -> Result<ColorMatrix> {
    let (si, so) = (ColorSpec::from_info(input), ColorSpec::from_info(output));
    if si.yuv && so.yuv && (input.format.is_gray() || output.format.is_gray()) {
        return Ok(range_matrix(&si, &so));
    }
    Ok(conversion_matrix(&si, &so)?)
}

/// Pre, primaries and post matrices plus gamma tables of one conversion.
#[derive(Debug, Clone)]
pub struct ConversionMatrices {
    pub class: ConversionClass,
    /// Input code values to non-linear full-range RGB.
    pub pre: ColorMatrix,
    pub primaries: ColorMatrix,
    /// Into output code values. The only stage of `Simple` and `Range`.
    pub post: ColorMatrix,
    /// Decode table of the input transfer and encode table of the output
    /// transfer, for linear-light classes.
    pub luts: Option<[Arc<GammaLut>; 2]>,
}

impl ConversionMatrices {
    pub fn derive(class: ConversionClass, input: &VideoInfo, output: &VideoInfo) -> Result<Self> {
        let identity = Self {
            class,
            pre: ColorMatrix::IDENTITY,
            primaries: ColorMatrix::IDENTITY,
            post: ColorMatrix::IDENTITY,
            luts: None,
        };
        match class {
            ConversionClass::Identity => Ok(identity),
            ConversionClass::Simple | ConversionClass::Range => Ok(Self {
                post: encoding_matrix(input, output)?,
                ..identity
            }),
            ConversionClass::Gamma | ConversionClass::Primary => {
                let (si, so) = (ColorSpec::from_info(input), ColorSpec::from_info(output));
                let primaries = if class == ConversionClass::Primary {
                    primaries_matrix(input.colorimetry.primaries, output.colorimetry.primaries)?
                } else {
                    ColorMatrix::IDENTITY
                };
                Ok(Self {
                    class,
                    pre: conversion_matrix(&si, &si.to_full_rgb())?,
                    primaries,
                    post: conversion_matrix(&so.to_full_rgb(), &so)?,
                    luts: Some([
                        gamma_lut(input.colorimetry.transfer, LutDirection::Decode),
                        gamma_lut(output.colorimetry.transfer, LutDirection::Encode),
                    ]),
                })
            }
        }
    }

    /// Pixel shader constants with the given alpha multiplier.
    pub fn constants(&self, alpha: f32) -> PsConstants {
        PsConstants {
            pre: (&self.pre).into(),
            primaries: (&self.primaries).into(),
            post: (&self.post).into(),
            alpha: [alpha, 0.0, 0.0, 0.0],
        }
    }

    /// Run one color through the same stages the shader runs.
    pub fn apply(&self, c: [f64; 3]) -> [f64; 3] {
        match (self.class, &self.luts) {
            (ConversionClass::Identity, _) => c,
            (_, Some([decode, encode])) => {
                let linear = self.pre.apply(c).map(|v| decode.lookup(v as f32) as f64);
                let adapted = self.primaries.apply(linear);
                self.post.apply(adapted.map(|v| encode.lookup(v as f32) as f64))
            }
            (_, None) => self.post.apply(c),
        }
    }
}

/// Split an ARGB64 value into normalized `[r, g, b, a]`.
pub fn argb64_components(argb: u64) -> [f64; 4] {
    let channel = |shift: u32| ((argb >> shift) & 0xffff) as f64 / 65535.0;
    [channel(32), channel(16), channel(0), channel(48)]
}

/// Code values of an ARGB64 color, given as full-range RGB in the output's
/// transfer and primaries, encoded for `output`.
pub fn border_code_values(argb: u64, output: &VideoInfo) -> Result<[f32; 4]> {
    let [r, g, b, a] = argb64_components(argb);
    let spec = ColorSpec::from_info(output);
    let m = conversion_matrix(&spec.to_full_rgb(), &spec)?;
    let c = m.apply([r, g, b]);
    Ok([c[0] as f32, c[1] as f32, c[2] as f32, a as f32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuframe_core::{ColorPrimaries, ColorRange, Colorimetry, TransferFunction, VideoFormat};

    fn rgba(w: u32, h: u32) -> VideoInfo {
        VideoInfo::new(VideoFormat::Rgba, w, h).with_colorimetry(Colorimetry::SRGB)
    }

    fn nv12(range: ColorRange) -> VideoInfo {
        VideoInfo::new(VideoFormat::Nv12, 64, 64).with_colorimetry(Colorimetry::BT709.with_range(range))
    }

    #[test]
    fn test_classify_identity() {
        let config = ConverterConfig::default();
        assert_eq!(
            ConversionClass::classify(&rgba(16, 16), &rgba(32, 32), &config),
            ConversionClass::Identity
        );
        let bgra = VideoInfo::new(VideoFormat::Bgra, 16, 16).with_colorimetry(Colorimetry::SRGB);
        assert_eq!(ConversionClass::classify(&rgba(16, 16), &bgra, &config), ConversionClass::Identity);
    }

    #[test]
    fn test_classify_simple_and_range() {
        let config = ConverterConfig::default();
        let limited = nv12(ColorRange::Limited);
        let full = nv12(ColorRange::Full);
        assert_eq!(ConversionClass::classify(&limited, &rgba(64, 64), &config), ConversionClass::Simple);
        assert_eq!(ConversionClass::classify(&limited, &full, &config), ConversionClass::Range);

        let bt601 = VideoInfo::new(VideoFormat::Nv12, 64, 64).with_colorimetry(Colorimetry::BT601);
        assert_eq!(ConversionClass::classify(&limited, &bt601, &config), ConversionClass::Simple);
    }

    #[test]
    fn test_gray_ignores_matrix() {
        let config = ConverterConfig::default();
        let gray = VideoInfo::new(VideoFormat::Gray8, 64, 64).with_colorimetry(Colorimetry::BT601);
        let full = nv12(ColorRange::Full);
        let class = ConversionClass::classify(&gray, &full, &config);
        assert_eq!(class, ConversionClass::Range);
        let m = ConversionMatrices::derive(class, &gray, &full).unwrap();
        let neutral = 128.0 / 255.0;
        let out = m.apply([16.0 / 255.0, neutral, neutral]);
        assert!(out[0].abs() < 1e-6);
        assert!((out[1] - neutral).abs() < 1e-6);
        assert!((out[2] - neutral).abs() < 1e-6);
    }

    #[test]
    fn test_gamma_only_when_requested() {
        let src = rgba(16, 16);
        let dst = rgba(16, 16).with_colorimetry(Colorimetry::new(
            ColorRange::Full,
            gpuframe_core::MatrixCoefficients::Rgb,
            TransferFunction::Linear,
            ColorPrimaries::Bt709,
        ));
        assert_eq!(
            ConversionClass::classify(&src, &dst, &ConverterConfig::default()),
            ConversionClass::Identity
        );
        let config = ConverterConfig {
            gamma_mode: GammaMode::Apply,
            ..ConverterConfig::default()
        };
        assert_eq!(ConversionClass::classify(&src, &dst, &config), ConversionClass::Gamma);
    }

    #[test]
    fn test_primaries_imply_linearization() {
        let src = nv12(ColorRange::Limited);
        let dst = VideoInfo::new(VideoFormat::P010, 64, 64).with_colorimetry(Colorimetry::BT2020);
        let config = ConverterConfig {
            primaries_mode: PrimariesMode::Apply,
            ..ConverterConfig::default()
        };
        let class = ConversionClass::classify(&src, &dst, &config);
        assert_eq!(class, ConversionClass::Primary);
        assert_eq!(class.program(), ConvertProgram::Primary);
        let m = ConversionMatrices::derive(class, &src, &dst).unwrap();
        assert!(m.luts.is_some());
        assert!(!m.primaries.is_identity(1e-3));
    }

    #[test]
    fn test_gamma_matrices_keep_black() {
        let src = nv12(ColorRange::Limited);
        let dst = rgba(64, 64).with_colorimetry(Colorimetry::new(
            ColorRange::Full,
            gpuframe_core::MatrixCoefficients::Rgb,
            TransferFunction::Linear,
            ColorPrimaries::Bt709,
        ));
        let m = ConversionMatrices::derive(ConversionClass::Gamma, &src, &dst).unwrap();
        let black = m.apply([16.0 / 255.0, 128.0 / 255.0, 128.0 / 255.0]);
        for v in black {
            assert!(v.abs() < 1e-3, "{:?}", black);
        }
    }

    #[test]
    fn test_constants_carry_alpha() {
        let m = ConversionMatrices::derive(ConversionClass::Identity, &rgba(4, 4), &rgba(4, 4)).unwrap();
        assert_eq!(m.constants(0.25).alpha[0], 0.25);
    }

    #[test]
    fn test_argb64_components() {
        let [r, g, b, a] = argb64_components(0xffff_8000_0000_ffff);
        assert_eq!(a, 1.0);
        assert!((r - 0.5).abs() < 1e-4);
        assert_eq!(g, 0.0);
        assert_eq!(b, 1.0);
    }

    #[test]
    fn test_border_red_limited_bt709() {
        let out = border_code_values(0xffff_ffff_0000_0000, &nv12(ColorRange::Limited)).unwrap();
        let code = out.map(|v| (v * 255.0).round());
        assert_eq!(code[0], 63.0);
        assert_eq!(code[1], 102.0);
        assert_eq!(code[2], 240.0);
        assert_eq!(out[3], 1.0);
    }

    #[test]
    fn test_border_default_is_black() {
        let out = border_code_values(0xffff_0000_0000_0000, &rgba(8, 8)).unwrap();
        assert_eq!(out, [0.0, 0.0, 0.0, 1.0]);
    }
}
