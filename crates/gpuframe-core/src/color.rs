//! Colorimetry description: range, matrix coefficients, transfer function
//! and primaries.
#![allow(clippy::excessive_precision)]

use serde::{Deserialize, Serialize};

/// Quantization range of the samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorRange {
    /// 0..=2^n-1
    Full,
    /// Studio swing, 16..=235 (luma) and 16..=240 (chroma) scaled to the depth
    Limited,
}

/// YUV matrix coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixCoefficients {
    /// Identity, used for RGB formats
    Rgb,
    Fcc,
    Bt709,
    Bt601,
    Smpte240m,
    Bt2020,
}

impl MatrixCoefficients {
    /// Kr and Kb luma weights, `None` for the identity matrix.
    pub fn kr_kb(self) -> Option<(f64, f64)> {
        match self {
            Self::Rgb => None,
            Self::Fcc => Some((0.30, 0.11)),
            Self::Bt709 => Some((0.2126, 0.0722)),
            Self::Bt601 => Some((0.2990, 0.1140)),
            Self::Smpte240m => Some((0.212, 0.087)),
            Self::Bt2020 => Some((0.2627, 0.0593)),
        }
    }
}

/// Transfer function (OETF/EOTF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferFunction {
    Linear,
    Gamma18,
    Gamma20,
    Gamma22,
    Gamma28,
    Bt709,
    Bt601,
    Bt2020Bit10,
    Bt2020Bit12,
    Smpte240m,
    Srgb,
    /// Logarithmic, 100:1 range
    Log100,
    /// Logarithmic, 100 * sqrt(10):1 range
    Log316,
    AdobeRgb,
    /// SMPTE ST 2084, 1.0 is 10000 cd/m²
    Pq,
    /// ARIB STD-B67
    Hlg,
}

// PQ (ST.2084) constants
const PQ_M1: f64 = 0.1593017578125;
const PQ_M2: f64 = 78.84375;
const PQ_C1: f64 = 0.8359375;
const PQ_C2: f64 = 18.8515625;
const PQ_C3: f64 = 18.6875;

// HLG constants
const HLG_A: f64 = 0.17883277;
const HLG_B: f64 = 0.28466892;
const HLG_C: f64 = 0.55991073;

impl TransferFunction {
    /// Convert from non-linear (encoded) to linear light.
    pub fn to_linear(self, v: f64) -> f64 {
        match self {
            Self::Linear => v,
            Self::Gamma18 => gamma_decode(v, 1.8),
            Self::Gamma20 => gamma_decode(v, 2.0),
            Self::Gamma22 => gamma_decode(v, 2.2),
            Self::Gamma28 => gamma_decode(v, 2.8),
            Self::AdobeRgb => gamma_decode(v, 2.19921875),
            Self::Bt709 | Self::Bt601 | Self::Bt2020Bit10 => {
                if v < 0.081 {
                    v / 4.5
                } else {
                    ((v + 0.099) / 1.099).powf(1.0 / 0.45)
                }
            }
            Self::Bt2020Bit12 => {
                let alpha = 1.09929682680944;
                let beta = 0.018053968510807;
                if v < 4.5 * beta {
                    v / 4.5
                } else {
                    ((v + alpha - 1.0) / alpha).powf(1.0 / 0.45)
                }
            }
            Self::Smpte240m => {
                if v < 0.0913 {
                    v / 4.0
                } else {
                    ((v + 0.1115) / 1.1115).powf(1.0 / 0.45)
                }
            }
            Self::Srgb => {
                if v <= 0.04045 {
                    v / 12.92
                } else {
                    ((v + 0.055) / 1.055).powf(2.4)
                }
            }
            Self::Log100 => {
                if v <= 0.0 {
                    0.0
                } else {
                    10f64.powf(2.0 * (v - 1.0))
                }
            }
            Self::Log316 => {
                if v <= 0.0 {
                    0.0
                } else {
                    10f64.powf(2.5 * (v - 1.0))
                }
            }
            Self::Pq => {
                let p = v.max(0.0).powf(1.0 / PQ_M2);
                let num = (p - PQ_C1).max(0.0);
                let den = PQ_C2 - PQ_C3 * p;
                if den.abs() < 1e-10 {
                    0.0
                } else {
                    (num / den).powf(1.0 / PQ_M1)
                }
            }
            Self::Hlg => {
                let e = v.max(0.0);
                if e <= 0.5 {
                    e * e / 3.0
                } else {
                    (((e - HLG_C) / HLG_A).exp() + HLG_B) / 12.0
                }
            }
        }
    }

    /// Convert from linear light to non-linear (encoded).
    pub fn from_linear(self, v: f64) -> f64 {
        match self {
            Self::Linear => v,
            Self::Gamma18 => gamma_encode(v, 1.8),
            Self::Gamma20 => gamma_encode(v, 2.0),
            Self::Gamma22 => gamma_encode(v, 2.2),
            Self::Gamma28 => gamma_encode(v, 2.8),
            Self::AdobeRgb => gamma_encode(v, 2.19921875),
            Self::Bt709 | Self::Bt601 | Self::Bt2020Bit10 => {
                if v < 0.018 {
                    v * 4.5
                } else {
                    1.099 * v.powf(0.45) - 0.099
                }
            }
            Self::Bt2020Bit12 => {
                let alpha = 1.09929682680944;
                let beta = 0.018053968510807;
                if v < beta {
                    v * 4.5
                } else {
                    alpha * v.powf(0.45) - (alpha - 1.0)
                }
            }
            Self::Smpte240m => {
                if v < 0.0228 {
                    v * 4.0
                } else {
                    1.1115 * v.powf(0.45) - 0.1115
                }
            }
            Self::Srgb => {
                if v <= 0.0031308 {
                    v * 12.92
                } else {
                    1.055 * v.powf(1.0 / 2.4) - 0.055
                }
            }
            Self::Log100 => {
                if v < 0.01 {
                    0.0
                } else {
                    1.0 + v.log10() / 2.0
                }
            }
            Self::Log316 => {
                if v < 0.0031622777 {
                    0.0
                } else {
                    1.0 + v.log10() / 2.5
                }
            }
            Self::Pq => {
                let ym1 = v.max(0.0).powf(PQ_M1);
                let num = PQ_C1 + PQ_C2 * ym1;
                let den = 1.0 + PQ_C3 * ym1;
                (num / den).powf(PQ_M2)
            }
            Self::Hlg => {
                let e = v.max(0.0);
                if e <= 1.0 / 12.0 {
                    (3.0 * e).sqrt()
                } else {
                    HLG_A * (12.0 * e - HLG_B).ln() + HLG_C
                }
            }
        }
    }

    /// Curves that only differ by name are treated as equal.
    pub fn is_equivalent(self, other: Self) -> bool {
        use TransferFunction::*;
        let class = |t: Self| match t {
            Bt709 | Bt601 | Bt2020Bit10 => Bt709,
            other => other,
        };
        class(self) == class(other)
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Gamma18 => "gamma 1.8",
            Self::Gamma20 => "gamma 2.0",
            Self::Gamma22 => "gamma 2.2",
            Self::Gamma28 => "gamma 2.8",
            Self::Bt709 => "BT.709",
            Self::Bt601 => "BT.601",
            Self::Bt2020Bit10 => "BT.2020 10-bit",
            Self::Bt2020Bit12 => "BT.2020 12-bit",
            Self::Smpte240m => "SMPTE 240M",
            Self::Srgb => "sRGB",
            Self::Log100 => "log 100:1",
            Self::Log316 => "log 316:1",
            Self::AdobeRgb => "Adobe RGB",
            Self::Pq => "PQ (ST.2084)",
            Self::Hlg => "HLG (ARIB STD-B67)",
        }
    }
}

fn gamma_decode(v: f64, gamma: f64) -> f64 {
    if v <= 0.0 {
        0.0
    } else {
        v.powf(gamma)
    }
}

fn gamma_encode(v: f64, gamma: f64) -> f64 {
    if v <= 0.0 {
        0.0
    } else {
        v.powf(1.0 / gamma)
    }
}

/// Color primaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorPrimaries {
    Bt709,
    Bt470m,
    Bt470bg,
    Smpte170m,
    Smpte240m,
    Film,
    Bt2020,
    /// CIE 1931 XYZ
    Smpte428,
    /// DCI-P3
    Smpte431,
    /// Display P3
    Smpte432,
    Ebu3213,
}

impl ColorPrimaries {
    /// Red, green, blue and white CIE xy chromaticities.
    pub fn chromaticities(self) -> [[f64; 2]; 4] {
        match self {
            Self::Bt709 => [[0.64, 0.33], [0.30, 0.60], [0.15, 0.06], [0.3127, 0.3290]],
            Self::Bt470m => [[0.67, 0.33], [0.21, 0.71], [0.14, 0.08], [0.3100, 0.3160]],
            Self::Bt470bg => [[0.64, 0.33], [0.29, 0.60], [0.15, 0.06], [0.3127, 0.3290]],
            Self::Smpte170m | Self::Smpte240m => {
                [[0.63, 0.34], [0.31, 0.595], [0.155, 0.07], [0.3127, 0.3290]]
            }
            Self::Film => [[0.681, 0.319], [0.243, 0.692], [0.145, 0.049], [0.3100, 0.3160]],
            Self::Bt2020 => [[0.708, 0.292], [0.170, 0.797], [0.131, 0.046], [0.3127, 0.3290]],
            Self::Smpte428 => [[1.0, 0.0], [0.0, 1.0], [0.0, 0.0], [1.0 / 3.0, 1.0 / 3.0]],
            Self::Smpte431 => [[0.680, 0.320], [0.265, 0.690], [0.150, 0.060], [0.314, 0.351]],
            Self::Smpte432 => [[0.680, 0.320], [0.265, 0.690], [0.150, 0.060], [0.3127, 0.3290]],
            Self::Ebu3213 => [[0.630, 0.340], [0.295, 0.605], [0.155, 0.077], [0.3127, 0.3290]],
        }
    }

    /// CIE xy white point.
    pub fn white_point(self) -> [f64; 2] {
        self.chromaticities()[3]
    }

    /// Primaries sets with identical chromaticities compare equal.
    pub fn is_equivalent(self, other: Self) -> bool {
        self.chromaticities() == other.chromaticities()
    }
}

/// Combined colorimetry of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Colorimetry {
    pub range: ColorRange,
    pub matrix: MatrixCoefficients,
    pub transfer: TransferFunction,
    pub primaries: ColorPrimaries,
}

impl Colorimetry {
    pub const fn new(
        range: ColorRange,
        matrix: MatrixCoefficients,
        transfer: TransferFunction,
        primaries: ColorPrimaries,
    ) -> Self {
        Self {
            range,
            matrix,
            transfer,
            primaries,
        }
    }

    /// Full-range sRGB.
    pub const SRGB: Self = Self::new(
        ColorRange::Full,
        MatrixCoefficients::Rgb,
        TransferFunction::Srgb,
        ColorPrimaries::Bt709,
    );

    /// Studio-range BT.601 (SD).
    pub const BT601: Self = Self::new(
        ColorRange::Limited,
        MatrixCoefficients::Bt601,
        TransferFunction::Bt601,
        ColorPrimaries::Smpte170m,
    );

    /// Studio-range BT.709 (HD).
    pub const BT709: Self = Self::new(
        ColorRange::Limited,
        MatrixCoefficients::Bt709,
        TransferFunction::Bt709,
        ColorPrimaries::Bt709,
    );

    /// Studio-range BT.2020 (UHD, SDR).
    pub const BT2020: Self = Self::new(
        ColorRange::Limited,
        MatrixCoefficients::Bt2020,
        TransferFunction::Bt2020Bit10,
        ColorPrimaries::Bt2020,
    );

    /// BT.2100 with the PQ transfer.
    pub const BT2100_PQ: Self = Self::new(
        ColorRange::Limited,
        MatrixCoefficients::Bt2020,
        TransferFunction::Pq,
        ColorPrimaries::Bt2020,
    );

    /// BT.2100 with the HLG transfer.
    pub const BT2100_HLG: Self = Self::new(
        ColorRange::Limited,
        MatrixCoefficients::Bt2020,
        TransferFunction::Hlg,
        ColorPrimaries::Bt2020,
    );

    pub fn with_range(mut self, range: ColorRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_matrix(mut self, matrix: MatrixCoefficients) -> Self {
        self.matrix = matrix;
        self
    }

    pub fn with_transfer(mut self, transfer: TransferFunction) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_primaries(mut self, primaries: ColorPrimaries) -> Self {
        self.primaries = primaries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TRANSFERS: [TransferFunction; 16] = [
        TransferFunction::Linear,
        TransferFunction::Gamma18,
        TransferFunction::Gamma20,
        TransferFunction::Gamma22,
        TransferFunction::Gamma28,
        TransferFunction::Bt709,
        TransferFunction::Bt601,
        TransferFunction::Bt2020Bit10,
        TransferFunction::Bt2020Bit12,
        TransferFunction::Smpte240m,
        TransferFunction::Srgb,
        TransferFunction::Log100,
        TransferFunction::Log316,
        TransferFunction::AdobeRgb,
        TransferFunction::Pq,
        TransferFunction::Hlg,
    ];

    #[test]
    fn test_srgb_roundtrip() {
        let tf = TransferFunction::Srgb;
        for &v in &[0.0, 0.04, 0.1, 0.5, 0.9, 1.0] {
            let back = tf.from_linear(tf.to_linear(v));
            assert!((back - v).abs() < 1e-9, "sRGB roundtrip failed for {}", v);
        }
    }

    #[test]
    fn test_all_transfers_roundtrip() {
        for tf in ALL_TRANSFERS {
            for &v in &[0.2, 0.5, 0.8, 1.0] {
                let back = tf.from_linear(tf.to_linear(v));
                assert!(
                    (back - v).abs() < 1e-6,
                    "{} roundtrip failed for {}: got {}",
                    tf.name(),
                    v,
                    back
                );
            }
        }
    }

    #[test]
    fn test_endpoints_are_fixed() {
        for tf in ALL_TRANSFERS {
            if matches!(tf, TransferFunction::Hlg) {
                continue;
            }
            assert!(tf.to_linear(1.0) > 0.999, "{} maps 1.0 below 1", tf.name());
            assert!(tf.to_linear(0.0).abs() < 1e-3, "{} maps 0.0 above 0", tf.name());
        }
    }

    #[test]
    fn test_pq_peak() {
        assert!((TransferFunction::Pq.from_linear(1.0) - 1.0).abs() < 1e-9);
        // 100 nits sits near code value 0.508
        let sdr_white = TransferFunction::Pq.from_linear(0.01);
        assert!((sdr_white - 0.508).abs() < 0.001);
    }

    #[test]
    fn test_bt601_names_same_curve() {
        assert!(TransferFunction::Bt601.is_equivalent(TransferFunction::Bt709));
        assert!(!TransferFunction::Srgb.is_equivalent(TransferFunction::Bt709));
    }

    #[test]
    fn test_primaries_equivalence() {
        assert!(ColorPrimaries::Smpte170m.is_equivalent(ColorPrimaries::Smpte240m));
        assert!(!ColorPrimaries::Bt709.is_equivalent(ColorPrimaries::Bt2020));
    }
}
