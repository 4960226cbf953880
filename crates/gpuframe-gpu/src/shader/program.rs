//! Structural description of conversion pixel shaders.
//!
//! A [`PixelProgram`] has three stages: sampling the input planes into one
//! logical color (R, G, B, A or Y, U, V, A), the color conversion body, and
//! writing that color to the output planes. The same description renders to
//! WGSL for the wgpu backend and is evaluated directly by the software
//! backend.

use super::layout::PsConstants;
use gpuframe_color::GAMMA_LUT_SIZE;
use gpuframe_core::VideoFormat;
use smallvec::{smallvec, SmallVec};

/// Texture channel feeding each logical component.
pub type Swizzle = [u8; 4];

pub const IDENTITY_SWIZZLE: Swizzle = [0, 1, 2, 3];

/// Scale from 10-bit LSB-aligned code values to 16-bit normalization.
pub const LSB10_SCALE: f32 = 65535.0 / 1023.0;

/// Colors written per render target.
pub type TargetColors = SmallVec<[[f32; 4]; 4]>;

fn inverse(s: Swizzle) -> Swizzle {
    let mut out = [0u8; 4];
    for (i, &c) in s.iter().enumerate() {
        out[c as usize] = i as u8;
    }
    out
}

fn swizzle_name(s: Swizzle) -> String {
    s.iter().map(|&c| b"rgba"[c as usize] as char).collect()
}

fn apply_swizzle(s: Swizzle, v: [f32; 4]) -> [f32; 4] {
    [v[s[0] as usize], v[s[1] as usize], v[s[2] as usize], v[s[3] as usize]]
}

// ── Stages ─────────────────────────────────────────────────────

/// How the input planes combine into one color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleProgram {
    /// One texture holding every component.
    Packed { swizzle: Swizzle, opaque: bool },
    /// Luma only; chroma is neutral for the given depth.
    Gray { depth: u8 },
    /// Luma texture and interleaved chroma texture.
    SemiPlanar { swap_uv: bool },
    /// Y, U and V textures.
    Planar { swap_uv: bool, lsb10: bool },
    /// G, B, R and optionally A textures.
    PlanarRgb { alpha: bool },
}

/// Color conversion body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvertProgram {
    Identity,
    /// Post-matrix only.
    Matrix,
    /// Pre-matrix, gamma decode, primaries matrix, gamma encode, post-matrix.
    Gamma,
    /// Same body as `Gamma`, with a non-identity primaries matrix.
    Primary,
}

/// How one color is written to one or more render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputProgram {
    Packed { swizzle: Swizzle, opaque: bool },
    Luma { lsb10: bool },
    /// Interleaved chroma target.
    Chroma { swap_uv: bool },
    /// Separate U and V targets.
    ChromaPlanar { swap_uv: bool, lsb10: bool },
    /// Y, U and V targets at full resolution.
    Planar,
    /// G, B, R and optionally A targets.
    PlanarRgb { alpha: bool },
}

impl SampleProgram {
    pub fn input_count(&self) -> usize {
        match self {
            Self::Packed { .. } | Self::Gray { .. } => 1,
            Self::SemiPlanar { .. } => 2,
            Self::Planar { .. } => 3,
            Self::PlanarRgb { alpha } => 3 + *alpha as usize,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Packed { swizzle, opaque } => {
                format!("packed_{}{}", swizzle_name(*swizzle), if *opaque { "_opaque" } else { "" })
            }
            Self::Gray { depth } => format!("gray{}", depth),
            Self::SemiPlanar { swap_uv } => {
                if *swap_uv { "semi_planar_vu" } else { "semi_planar" }.to_string()
            }
            Self::Planar { swap_uv, lsb10 } => format!(
                "planar{}{}",
                if *swap_uv { "_vu" } else { "" },
                if *lsb10 { "_10" } else { "" }
            ),
            Self::PlanarRgb { alpha } => {
                if *alpha { "planar_rgba" } else { "planar_rgb" }.to_string()
            }
        }
    }

    /// Combine sampled texels; `fetch(i)` samples input `i`.
    pub fn evaluate(&self, fetch: impl Fn(usize) -> [f32; 4]) -> [f32; 4] {
        match *self {
            Self::Packed { swizzle, opaque } => {
                let mut c = apply_swizzle(swizzle, fetch(0));
                if opaque {
                    c[3] = 1.0;
                }
                c
            }
            Self::Gray { depth } => {
                let neutral = gray_neutral(depth);
                [fetch(0)[0], neutral, neutral, 1.0]
            }
            Self::SemiPlanar { swap_uv } => {
                let y = fetch(0)[0];
                let uv = fetch(1);
                let (u, v) = if swap_uv { (uv[1], uv[0]) } else { (uv[0], uv[1]) };
                [y, u, v, 1.0]
            }
            Self::Planar { swap_uv, lsb10 } => {
                let scale = if lsb10 { LSB10_SCALE } else { 1.0 };
                let (ui, vi) = if swap_uv { (2, 1) } else { (1, 2) };
                [
                    fetch(0)[0] * scale,
                    fetch(ui)[0] * scale,
                    fetch(vi)[0] * scale,
                    1.0,
                ]
            }
            Self::PlanarRgb { alpha } => [
                fetch(2)[0],
                fetch(0)[0],
                fetch(1)[0],
                if alpha { fetch(3)[0] } else { 1.0 },
            ],
        }
    }
}

fn gray_neutral(depth: u8) -> f32 {
    let depth = depth.clamp(8, 16) as u32;
    (1u32 << (depth - 1)) as f32 / ((1u32 << depth) - 1) as f32
}

impl ConvertProgram {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Matrix => "matrix",
            Self::Gamma => "gamma",
            Self::Primary => "primary",
        }
    }

    pub fn uses_luts(&self) -> bool {
        matches!(self, Self::Gamma | Self::Primary)
    }
}

impl OutputProgram {
    pub fn target_count(&self) -> usize {
        match self {
            Self::Packed { .. } | Self::Luma { .. } | Self::Chroma { .. } => 1,
            Self::ChromaPlanar { .. } => 2,
            Self::Planar => 3,
            Self::PlanarRgb { alpha } => 3 + *alpha as usize,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Packed { swizzle, opaque } => {
                format!("packed_{}{}", swizzle_name(*swizzle), if *opaque { "_opaque" } else { "" })
            }
            Self::Luma { lsb10 } => format!("luma{}", if *lsb10 { "_10" } else { "" }),
            Self::Chroma { swap_uv } => {
                if *swap_uv { "chroma_vu" } else { "chroma" }.to_string()
            }
            Self::ChromaPlanar { swap_uv, lsb10 } => format!(
                "chroma_planar{}{}",
                if *swap_uv { "_vu" } else { "" },
                if *lsb10 { "_10" } else { "" }
            ),
            Self::Planar => "planar".to_string(),
            Self::PlanarRgb { alpha } => {
                if *alpha { "planar_rgba" } else { "planar_rgb" }.to_string()
            }
        }
    }

    /// Values written to each target for one logical color.
    pub fn evaluate(&self, c: [f32; 4]) -> TargetColors {
        let single = |v: f32| [v, 0.0, 0.0, 1.0];
        match *self {
            Self::Packed { swizzle, opaque } => {
                let mut c = c;
                if opaque {
                    c[3] = 1.0;
                }
                smallvec![apply_swizzle(swizzle, c)]
            }
            Self::Luma { lsb10 } => {
                let scale = if lsb10 { 1.0 / LSB10_SCALE } else { 1.0 };
                smallvec![single(c[0] * scale)]
            }
            Self::Chroma { swap_uv } => {
                let (a, b) = if swap_uv { (c[2], c[1]) } else { (c[1], c[2]) };
                smallvec![[a, b, 0.0, 1.0]]
            }
            Self::ChromaPlanar { swap_uv, lsb10 } => {
                let scale = if lsb10 { 1.0 / LSB10_SCALE } else { 1.0 };
                let (a, b) = if swap_uv { (c[2], c[1]) } else { (c[1], c[2]) };
                smallvec![single(a * scale), single(b * scale)]
            }
            Self::Planar => smallvec![single(c[0]), single(c[1]), single(c[2])],
            Self::PlanarRgb { alpha } => {
                let mut out: TargetColors = smallvec![single(c[1]), single(c[2]), single(c[0])];
                if alpha {
                    out.push(single(c[3]));
                }
                out
            }
        }
    }
}

// ── Whole program ──────────────────────────────────────────────

/// One pixel shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelProgram {
    pub sample: SampleProgram,
    pub convert: ConvertProgram,
    pub output: OutputProgram,
    /// Input alpha is premultiplied and is divided out before conversion.
    pub premul_in: bool,
    /// Output is premultiplied after conversion.
    pub premul_out: bool,
}

/// Gamma tables bound to a program, as raw 4096-entry slices.
#[derive(Debug, Clone, Copy)]
pub struct LutTables<'a> {
    pub decode: &'a [f32],
    pub encode: &'a [f32],
}

/// Linear interpolation into a uniformly sampled 0..=1 table.
pub fn lut_lookup(table: &[f32], v: f32) -> f32 {
    let Some(last) = table.len().checked_sub(1) else {
        return v;
    };
    let pos = v.clamp(0.0, 1.0) * last as f32;
    let lo = (pos.floor() as usize).min(last);
    let hi = (lo + 1).min(last);
    let frac = pos - lo as f32;
    table[lo] + (table[hi] - table[lo]) * frac
}

impl PixelProgram {
    pub fn entry_point(&self) -> String {
        format!(
            "fs_{}_{}_{}{}{}",
            self.sample.name(),
            self.convert.name(),
            self.output.name(),
            if self.premul_in { "_premul_in" } else { "" },
            if self.premul_out { "_premul_out" } else { "" }
        )
    }

    /// Convert one color through the body of the program.
    pub fn convert_color(&self, c: [f32; 3], constants: &PsConstants, luts: Option<LutTables<'_>>) -> [f32; 3] {
        match self.convert {
            ConvertProgram::Identity => c,
            ConvertProgram::Matrix => constants.post.apply(c),
            ConvertProgram::Gamma | ConvertProgram::Primary => {
                let rgb = constants.pre.apply(c);
                let rgb = match luts {
                    Some(l) => rgb.map(|v| lut_lookup(l.decode, v)),
                    None => rgb,
                };
                let rgb = constants.primaries.apply(rgb);
                let rgb = match luts {
                    Some(l) => rgb.map(|v| lut_lookup(l.encode, v)),
                    None => rgb,
                };
                constants.post.apply(rgb)
            }
        }
    }

    /// Run the whole program for one pixel.
    pub fn shade(
        &self,
        fetch: impl Fn(usize) -> [f32; 4],
        constants: &PsConstants,
        luts: Option<LutTables<'_>>,
    ) -> TargetColors {
        let mut c = self.sample.evaluate(fetch);
        if self.premul_in && c[3] > 0.0 {
            c = [c[0] / c[3], c[1] / c[3], c[2] / c[3], c[3]];
        }
        let rgb = self.convert_color([c[0], c[1], c[2]], constants, luts);
        let mut out = [rgb[0], rgb[1], rgb[2], c[3] * constants.alpha[0]];
        if self.premul_out {
            out = [out[0] * out[3], out[1] * out[3], out[2] * out[3], out[3]];
        }
        self.output.evaluate(out)
    }
}

// ── Per-format programs ────────────────────────────────────────

/// Formats sampled through the shader path need a sample stage; packed
/// 4:2:2 has none and is repacked on the CPU first.
pub fn sample_program(format: VideoFormat) -> Option<SampleProgram> {
    use VideoFormat::*;
    let packed = |swizzle, opaque| Some(SampleProgram::Packed { swizzle, opaque });
    match format {
        Bgra | Rgba | Rgb10a2 | Rgba64 => packed(IDENTITY_SWIZZLE, false),
        Bgrx | Rgbx => packed(IDENTITY_SWIZZLE, true),
        Argb | Ayuv | Ayuv64 => packed([1, 2, 3, 0], false),
        Abgr => packed([3, 2, 1, 0], false),
        Vuya => packed([2, 1, 0, 3], false),
        Y410 => packed([1, 0, 2, 3], false),
        Nv12 | P010 | P016 => Some(SampleProgram::SemiPlanar { swap_uv: false }),
        Nv21 => Some(SampleProgram::SemiPlanar { swap_uv: true }),
        I420 | Y42b | Y444 | Y444P16 => Some(SampleProgram::Planar {
            swap_uv: false,
            lsb10: false,
        }),
        Yv12 => Some(SampleProgram::Planar {
            swap_uv: true,
            lsb10: false,
        }),
        I420P10 | I422P10 => Some(SampleProgram::Planar {
            swap_uv: false,
            lsb10: true,
        }),
        Gray8 => Some(SampleProgram::Gray { depth: 8 }),
        Gray16 => Some(SampleProgram::Gray { depth: 16 }),
        Gbr => Some(SampleProgram::PlanarRgb { alpha: false }),
        Gbra => Some(SampleProgram::PlanarRgb { alpha: true }),
        Yuy2 | Uyvy | Y210 => None,
    }
}

/// One draw of an output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputPass {
    pub program: OutputProgram,
    /// First output plane written.
    pub first_plane: usize,
    pub plane_count: usize,
}

/// Passes needed to write a format, in draw order.
pub fn output_passes(format: VideoFormat) -> Option<SmallVec<[OutputPass; 2]>> {
    use VideoFormat::*;
    let pass = |program: OutputProgram, first_plane| OutputPass {
        program,
        first_plane,
        plane_count: program.target_count(),
    };
    let packed = |swizzle: Swizzle, opaque| {
        Some(smallvec![pass(
            OutputProgram::Packed {
                swizzle: inverse(swizzle),
                opaque
            },
            0
        )])
    };
    match format {
        Bgra | Rgba | Rgb10a2 | Rgba64 => packed(IDENTITY_SWIZZLE, false),
        Bgrx | Rgbx => packed(IDENTITY_SWIZZLE, true),
        Argb | Ayuv | Ayuv64 => packed([1, 2, 3, 0], false),
        Abgr => packed([3, 2, 1, 0], false),
        Vuya => packed([2, 1, 0, 3], false),
        Y410 => packed([1, 0, 2, 3], false),
        Nv12 | Nv21 | P010 | P016 => Some(smallvec![
            pass(OutputProgram::Luma { lsb10: false }, 0),
            pass(
                OutputProgram::Chroma {
                    swap_uv: format == Nv21
                },
                1
            ),
        ]),
        I420 | Yv12 | I420P10 | Y42b | I422P10 => {
            let lsb10 = format.is_lsb_aligned();
            Some(smallvec![
                pass(OutputProgram::Luma { lsb10 }, 0),
                pass(
                    OutputProgram::ChromaPlanar {
                        swap_uv: format == Yv12,
                        lsb10
                    },
                    1
                ),
            ])
        }
        Y444 | Y444P16 => Some(smallvec![pass(OutputProgram::Planar, 0)]),
        Gray8 | Gray16 => Some(smallvec![pass(OutputProgram::Luma { lsb10: false }, 0)]),
        Gbr => Some(smallvec![pass(OutputProgram::PlanarRgb { alpha: false }, 0)]),
        Gbra => Some(smallvec![pass(OutputProgram::PlanarRgb { alpha: true }, 0)]),
        Yuy2 | Uyvy | Y210 => None,
    }
}

/// Per-plane clear colors that make every pixel of `format` equal `color`.
///
/// `color` is a logical color in the format's own code values.
pub fn output_clear_colors(format: VideoFormat, color: [f32; 4]) -> Option<TargetColors> {
    let passes = output_passes(format)?;
    let mut colors: TargetColors = smallvec![[0.0; 4]; format.n_planes()];
    for pass in passes {
        for (i, value) in pass.program.evaluate(color).into_iter().enumerate() {
            if let Some(slot) = colors.get_mut(pass.first_plane + i) {
                *slot = value;
            }
        }
    }
    Some(colors)
}

/// Size of a gamma table texture.
pub const LUT_WIDTH: u32 = GAMMA_LUT_SIZE as u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swizzle_inverse_roundtrip() {
        for format in VideoFormat::ALL {
            let (Some(sample), Some(passes)) = (sample_program(format), output_passes(format)) else {
                continue;
            };
            if let (SampleProgram::Packed { .. }, OutputProgram::Packed { .. }) = (sample, passes[0].program) {
                let logical = [0.1, 0.2, 0.3, 1.0];
                let stored = passes[0].program.evaluate(logical)[0];
                let back = sample.evaluate(|_| stored);
                assert_eq!(back, logical, "{}", format);
            }
        }
    }

    #[test]
    fn test_argb_layout() {
        // ARGB bytes are A, R, G, B, seen by an RGBA8 view as r=A ... a=B
        let sample = sample_program(VideoFormat::Argb).unwrap();
        let c = sample.evaluate(|_| [1.0, 0.2, 0.4, 0.6]);
        assert_eq!(c, [0.2, 0.4, 0.6, 1.0]);
    }

    #[test]
    fn test_entry_point_names() {
        let program = PixelProgram {
            sample: sample_program(VideoFormat::Nv12).unwrap(),
            convert: ConvertProgram::Matrix,
            output: output_passes(VideoFormat::Rgba).unwrap()[0].program,
            premul_in: false,
            premul_out: true,
        };
        assert_eq!(program.entry_point(), "fs_semi_planar_matrix_packed_rgba_premul_out");
    }

    #[test]
    fn test_pass_layouts() {
        assert_eq!(output_passes(VideoFormat::Rgba).unwrap().len(), 1);
        let nv12 = output_passes(VideoFormat::Nv12).unwrap();
        assert_eq!(nv12.len(), 2);
        assert_eq!(nv12[1].first_plane, 1);
        let i420 = output_passes(VideoFormat::I420).unwrap();
        assert_eq!(i420[1].plane_count, 2);
        assert_eq!(output_passes(VideoFormat::Y444).unwrap()[0].plane_count, 3);
        assert_eq!(output_passes(VideoFormat::Gbra).unwrap()[0].plane_count, 4);
        assert!(output_passes(VideoFormat::Yuy2).is_none());
        assert!(sample_program(VideoFormat::Uyvy).is_none());
    }

    #[test]
    fn test_clear_colors_for_semi_planar() {
        let colors = output_clear_colors(VideoFormat::Nv21, [0.0625, 0.25, 0.75, 1.0]).unwrap();
        assert_eq!(colors.len(), 2);
        assert_eq!(colors[0][0], 0.0625);
        assert_eq!(&colors[1][..2], &[0.75, 0.25]);
    }

    #[test]
    fn test_lsb10_output_scales_down() {
        let colors = output_clear_colors(VideoFormat::I420P10, [1.0, 0.5, 0.5, 1.0]).unwrap();
        assert!((colors[0][0] - 1023.0 / 65535.0).abs() < 1e-7);
    }

    #[test]
    fn test_gray_neutral_chroma() {
        let c = sample_program(VideoFormat::Gray8).unwrap().evaluate(|_| [0.5, 0.0, 0.0, 1.0]);
        assert!((c[1] - 128.0 / 255.0).abs() < 1e-7);
    }

    #[test]
    fn test_premultiplied_roundtrip() {
        let program = PixelProgram {
            sample: SampleProgram::Packed {
                swizzle: IDENTITY_SWIZZLE,
                opaque: false,
            },
            convert: ConvertProgram::Identity,
            output: OutputProgram::Packed {
                swizzle: IDENTITY_SWIZZLE,
                opaque: false,
            },
            premul_in: true,
            premul_out: false,
        };
        let out = program.shade(|_| [0.25, 0.1, 0.0, 0.5], &PsConstants::default(), None);
        assert_eq!(out[0], [0.5, 0.2, 0.0, 0.5]);
    }

    #[test]
    fn test_lut_lookup_interpolates() {
        let table = [0.0, 1.0, 4.0];
        assert_eq!(lut_lookup(&table, 0.25), 0.5);
        assert_eq!(lut_lookup(&table, 0.75), 2.5);
        assert_eq!(lut_lookup(&table, 2.0), 4.0);
    }
}
