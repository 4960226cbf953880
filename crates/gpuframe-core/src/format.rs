//! Abstract pixel formats and their plane layout.
//!
//! The layout described here is the logical one: how many planes a format
//! has, how each plane is subsampled and how many bytes a texel occupies.
//! How a format maps onto native GPU surfaces lives in the GPU crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Abstract pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoFormat {
    /// 8-bit B, G, R, A
    Bgra,
    /// 8-bit R, G, B, A
    Rgba,
    /// 8-bit B, G, R, padding
    Bgrx,
    /// 8-bit R, G, B, padding
    Rgbx,
    /// 8-bit A, R, G, B
    Argb,
    /// 8-bit A, B, G, R
    Abgr,
    /// 10-bit R, G, B with 2-bit alpha, little endian
    Rgb10a2,
    /// 16-bit R, G, B, A, little endian
    Rgba64,
    /// 8-bit 4:2:0, Y plane + interleaved UV plane
    Nv12,
    /// 8-bit 4:2:0, Y plane + interleaved VU plane
    Nv21,
    /// 10-bit 4:2:0 semi-planar, MSB aligned in 16 bits
    P010,
    /// 16-bit 4:2:0 semi-planar
    P016,
    /// 8-bit 4:2:0 planar Y, U, V
    I420,
    /// 8-bit 4:2:0 planar Y, V, U
    Yv12,
    /// 10-bit 4:2:0 planar, LSB aligned in 16 bits
    I420P10,
    /// 8-bit 4:2:2 planar
    Y42b,
    /// 10-bit 4:2:2 planar, LSB aligned in 16 bits
    I422P10,
    /// 8-bit 4:4:4 planar
    Y444,
    /// 16-bit 4:4:4 planar
    Y444P16,
    /// 8-bit packed A, Y, U, V
    Ayuv,
    /// 8-bit packed V, U, Y, A
    Vuya,
    /// 16-bit packed A, Y, U, V
    Ayuv64,
    /// 10-bit packed U, Y, V with 2-bit alpha
    Y410,
    /// 8-bit packed 4:2:2 Y0, U, Y1, V
    Yuy2,
    /// 8-bit packed 4:2:2 U, Y0, V, Y1
    Uyvy,
    /// 10-bit packed 4:2:2 Y0, U, Y1, V, MSB aligned in 16 bits
    Y210,
    /// 8-bit luma only
    Gray8,
    /// 16-bit luma only
    Gray16,
    /// 8-bit planar G, B, R
    Gbr,
    /// 8-bit planar G, B, R, A
    Gbra,
}

/// Color family of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorFamily {
    Rgb,
    Yuv,
    Gray,
}

/// Layout of a single plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneInfo {
    /// log2 of the horizontal subsampling factor.
    pub w_sub: u8,
    /// log2 of the vertical subsampling factor.
    pub h_sub: u8,
    /// Bytes per texel.
    pub texel_size: u8,
    /// Pixels covered horizontally by one texel (2 for packed 4:2:2).
    pub texel_width: u8,
}

impl PlaneInfo {
    const fn new(w_sub: u8, h_sub: u8, texel_size: u8, texel_width: u8) -> Self {
        Self {
            w_sub,
            h_sub,
            texel_size,
            texel_width,
        }
    }

    /// Plane width in texels for a frame of the given pixel width.
    #[inline]
    pub fn width(&self, width: u32) -> u32 {
        subsample(width, self.w_sub).div_ceil(self.texel_width as u32)
    }

    /// Plane height in rows for a frame of the given pixel height.
    #[inline]
    pub fn height(&self, height: u32) -> u32 {
        subsample(height, self.h_sub)
    }

    /// Tightly packed row size in bytes.
    #[inline]
    pub fn row_bytes(&self, width: u32) -> usize {
        self.width(width) as usize * self.texel_size as usize
    }
}

/// Ceil-divide by a power of two.
#[inline]
pub fn subsample(value: u32, shift: u8) -> u32 {
    (value + (1 << shift) - 1) >> shift
}

/// Static description of a format.
#[derive(Debug, PartialEq, Eq)]
pub struct FormatInfo {
    pub format: VideoFormat,
    pub name: &'static str,
    pub family: ColorFamily,
    /// Depth used when normalizing sample values (16 for MSB-aligned formats).
    pub depth: u32,
    /// Significant bits per component.
    pub bits: u32,
    pub has_alpha: bool,
    pub planes: &'static [PlaneInfo],
}

// ── Plane layouts ──────────────────────────────────────────────

const PACKED_32: &[PlaneInfo] = &[PlaneInfo::new(0, 0, 4, 1)];
const PACKED_64: &[PlaneInfo] = &[PlaneInfo::new(0, 0, 8, 1)];
const SEMI_PLANAR_8: &[PlaneInfo] = &[PlaneInfo::new(0, 0, 1, 1), PlaneInfo::new(1, 1, 2, 1)];
const SEMI_PLANAR_16: &[PlaneInfo] = &[PlaneInfo::new(0, 0, 2, 1), PlaneInfo::new(1, 1, 4, 1)];
const PLANAR_420_8: &[PlaneInfo] = &[
    PlaneInfo::new(0, 0, 1, 1),
    PlaneInfo::new(1, 1, 1, 1),
    PlaneInfo::new(1, 1, 1, 1),
];
const PLANAR_420_16: &[PlaneInfo] = &[
    PlaneInfo::new(0, 0, 2, 1),
    PlaneInfo::new(1, 1, 2, 1),
    PlaneInfo::new(1, 1, 2, 1),
];
const PLANAR_422_8: &[PlaneInfo] = &[
    PlaneInfo::new(0, 0, 1, 1),
    PlaneInfo::new(1, 0, 1, 1),
    PlaneInfo::new(1, 0, 1, 1),
];
const PLANAR_422_16: &[PlaneInfo] = &[
    PlaneInfo::new(0, 0, 2, 1),
    PlaneInfo::new(1, 0, 2, 1),
    PlaneInfo::new(1, 0, 2, 1),
];
const PLANAR_444_8: &[PlaneInfo] = &[
    PlaneInfo::new(0, 0, 1, 1),
    PlaneInfo::new(0, 0, 1, 1),
    PlaneInfo::new(0, 0, 1, 1),
];
const PLANAR_444_16: &[PlaneInfo] = &[
    PlaneInfo::new(0, 0, 2, 1),
    PlaneInfo::new(0, 0, 2, 1),
    PlaneInfo::new(0, 0, 2, 1),
];
const PLANAR_4444_8: &[PlaneInfo] = &[
    PlaneInfo::new(0, 0, 1, 1),
    PlaneInfo::new(0, 0, 1, 1),
    PlaneInfo::new(0, 0, 1, 1),
    PlaneInfo::new(0, 0, 1, 1),
];
const PACKED_422_8: &[PlaneInfo] = &[PlaneInfo::new(0, 0, 4, 2)];
const PACKED_422_16: &[PlaneInfo] = &[PlaneInfo::new(0, 0, 8, 2)];
const GRAY_8: &[PlaneInfo] = &[PlaneInfo::new(0, 0, 1, 1)];
const GRAY_16: &[PlaneInfo] = &[PlaneInfo::new(0, 0, 2, 1)];

macro_rules! format_info {
    ($format:ident, $name:literal, $family:ident, $depth:literal, $bits:literal, $alpha:literal, $planes:ident) => {
        FormatInfo {
            format: VideoFormat::$format,
            name: $name,
            family: ColorFamily::$family,
            depth: $depth,
            bits: $bits,
            has_alpha: $alpha,
            planes: $planes,
        }
    };
}

/// Indexed by `VideoFormat as usize`.
static FORMAT_INFO: [FormatInfo; 30] = [
    format_info!(Bgra, "BGRA", Rgb, 8, 8, true, PACKED_32),
    format_info!(Rgba, "RGBA", Rgb, 8, 8, true, PACKED_32),
    format_info!(Bgrx, "BGRx", Rgb, 8, 8, false, PACKED_32),
    format_info!(Rgbx, "RGBx", Rgb, 8, 8, false, PACKED_32),
    format_info!(Argb, "ARGB", Rgb, 8, 8, true, PACKED_32),
    format_info!(Abgr, "ABGR", Rgb, 8, 8, true, PACKED_32),
    format_info!(Rgb10a2, "RGB10A2_LE", Rgb, 10, 10, true, PACKED_32),
    format_info!(Rgba64, "RGBA64_LE", Rgb, 16, 16, true, PACKED_64),
    format_info!(Nv12, "NV12", Yuv, 8, 8, false, SEMI_PLANAR_8),
    format_info!(Nv21, "NV21", Yuv, 8, 8, false, SEMI_PLANAR_8),
    format_info!(P010, "P010_10LE", Yuv, 16, 10, false, SEMI_PLANAR_16),
    format_info!(P016, "P016_LE", Yuv, 16, 16, false, SEMI_PLANAR_16),
    format_info!(I420, "I420", Yuv, 8, 8, false, PLANAR_420_8),
    format_info!(Yv12, "YV12", Yuv, 8, 8, false, PLANAR_420_8),
    format_info!(I420P10, "I420_10LE", Yuv, 10, 10, false, PLANAR_420_16),
    format_info!(Y42b, "Y42B", Yuv, 8, 8, false, PLANAR_422_8),
    format_info!(I422P10, "I422_10LE", Yuv, 10, 10, false, PLANAR_422_16),
    format_info!(Y444, "Y444", Yuv, 8, 8, false, PLANAR_444_8),
    format_info!(Y444P16, "Y444_16LE", Yuv, 16, 16, false, PLANAR_444_16),
    format_info!(Ayuv, "AYUV", Yuv, 8, 8, true, PACKED_32),
    format_info!(Vuya, "VUYA", Yuv, 8, 8, true, PACKED_32),
    format_info!(Ayuv64, "AYUV64", Yuv, 16, 16, true, PACKED_64),
    format_info!(Y410, "Y410", Yuv, 10, 10, true, PACKED_32),
    format_info!(Yuy2, "YUY2", Yuv, 8, 8, false, PACKED_422_8),
    format_info!(Uyvy, "UYVY", Yuv, 8, 8, false, PACKED_422_8),
    format_info!(Y210, "Y210", Yuv, 16, 10, false, PACKED_422_16),
    format_info!(Gray8, "GRAY8", Gray, 8, 8, false, GRAY_8),
    format_info!(Gray16, "GRAY16_LE", Gray, 16, 16, false, GRAY_16),
    format_info!(Gbr, "GBR", Rgb, 8, 8, false, PLANAR_444_8),
    format_info!(Gbra, "GBRA", Rgb, 8, 8, true, PLANAR_4444_8),
];

impl VideoFormat {
    /// Every format, in declaration order.
    pub const ALL: [VideoFormat; 30] = [
        Self::Bgra,
        Self::Rgba,
        Self::Bgrx,
        Self::Rgbx,
        Self::Argb,
        Self::Abgr,
        Self::Rgb10a2,
        Self::Rgba64,
        Self::Nv12,
        Self::Nv21,
        Self::P010,
        Self::P016,
        Self::I420,
        Self::Yv12,
        Self::I420P10,
        Self::Y42b,
        Self::I422P10,
        Self::Y444,
        Self::Y444P16,
        Self::Ayuv,
        Self::Vuya,
        Self::Ayuv64,
        Self::Y410,
        Self::Yuy2,
        Self::Uyvy,
        Self::Y210,
        Self::Gray8,
        Self::Gray16,
        Self::Gbr,
        Self::Gbra,
    ];

    /// Static description of this format.
    #[inline]
    pub fn info(self) -> &'static FormatInfo {
        &FORMAT_INFO[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn family(self) -> ColorFamily {
        self.info().family
    }

    /// YUV and gray formats are both encoded with a luma/chroma matrix.
    pub fn is_yuv(self) -> bool {
        !matches!(self.family(), ColorFamily::Rgb)
    }

    pub fn is_rgb(self) -> bool {
        matches!(self.family(), ColorFamily::Rgb)
    }

    pub fn is_gray(self) -> bool {
        matches!(self.family(), ColorFamily::Gray)
    }

    pub fn has_alpha(self) -> bool {
        self.info().has_alpha
    }

    pub fn n_planes(self) -> usize {
        self.info().planes.len()
    }

    /// Layout of plane `index`, if it exists.
    pub fn plane(self, index: usize) -> Option<PlaneInfo> {
        self.info().planes.get(index).copied()
    }

    /// Normalization depth in bits.
    pub fn depth(self) -> u32 {
        self.info().depth
    }

    /// Packed 4:2:2 formats where two pixels share one texel.
    pub fn is_packed_422(self) -> bool {
        matches!(self, Self::Yuy2 | Self::Uyvy | Self::Y210)
    }

    /// 10-bit samples stored in the low bits of 16-bit words.
    pub fn is_lsb_aligned(self) -> bool {
        matches!(self, Self::I420P10 | Self::I422P10)
    }

    /// Look up a format by its canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order_matches_enum() {
        for format in VideoFormat::ALL {
            assert_eq!(format.info().format, format, "table out of order at {:?}", format);
        }
    }

    #[test]
    fn test_nv12_plane_sizes() {
        let uv = VideoFormat::Nv12.plane(1).unwrap();
        assert_eq!(uv.width(1920), 960);
        assert_eq!(uv.height(1080), 540);
        assert_eq!(uv.row_bytes(1920), 1920);
    }

    #[test]
    fn test_odd_dimensions_round_up() {
        let u = VideoFormat::I420.plane(1).unwrap();
        assert_eq!(u.width(65), 33);
        assert_eq!(u.height(33), 17);
    }

    #[test]
    fn test_packed_422_texels() {
        let plane = VideoFormat::Yuy2.plane(0).unwrap();
        assert_eq!(plane.width(64), 32);
        assert_eq!(plane.row_bytes(64), 128);
        assert!(VideoFormat::Y210.is_packed_422());
    }

    #[test]
    fn test_from_name() {
        assert_eq!(VideoFormat::from_name("nv12"), Some(VideoFormat::Nv12));
        assert_eq!(VideoFormat::from_name("P010_10LE"), Some(VideoFormat::P010));
        assert_eq!(VideoFormat::from_name("bogus"), None);
    }

    #[test]
    fn test_families() {
        assert!(VideoFormat::Gbra.is_rgb());
        assert!(VideoFormat::Gray8.is_yuv());
        assert!(VideoFormat::Vuya.has_alpha());
        assert!(!VideoFormat::Bgrx.has_alpha());
    }
}
