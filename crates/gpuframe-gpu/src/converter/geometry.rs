//! Per-call converter properties: crop, placement, orientation, alpha,
//! blending, border fill and HDR metadata.

use crate::native::{BlendDesc, ProcessorRotation};
use crate::shader::layout::{orientation_transform, VsConstants};
use gpuframe_color::HdrMetadata;
use gpuframe_core::{Rect, VideoDirection};

/// Opaque black.
pub const DEFAULT_BORDER_COLOR: u64 = 0xffff_0000_0000_0000;

/// How the input is oriented in the destination rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Orientation {
    Direction(VideoDirection),
    /// Column-major 4x4 transform of clip-space positions.
    Matrix([[f32; 4]; 4]),
}

impl Default for Orientation {
    fn default() -> Self {
        Self::Direction(VideoDirection::Identity)
    }
}

impl Orientation {
    pub fn vs_constants(&self) -> VsConstants {
        match self {
            Self::Direction(direction) => orientation_transform(direction.ndc_matrix()),
            Self::Matrix(transform) => VsConstants { transform: *transform },
        }
    }

    /// Processor rotation and mirror flags, `None` for custom matrices.
    pub fn processor_flags(&self) -> Option<(ProcessorRotation, bool, bool)> {
        let Self::Direction(direction) = self else {
            return None;
        };
        Some(match direction {
            VideoDirection::Identity => (ProcessorRotation::Identity, false, false),
            VideoDirection::Rotate90R => (ProcessorRotation::Rotate90, false, false),
            VideoDirection::Rotate180 => (ProcessorRotation::Rotate180, false, false),
            VideoDirection::Rotate90L => (ProcessorRotation::Rotate270, false, false),
            VideoDirection::HorizontalFlip => (ProcessorRotation::Identity, true, false),
            VideoDirection::VerticalFlip => (ProcessorRotation::Identity, false, true),
            VideoDirection::UpperLeftLowerRight => (ProcessorRotation::Rotate90, true, false),
            VideoDirection::UpperRightLowerLeft => (ProcessorRotation::Rotate90, false, true),
        })
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Direction(VideoDirection::Identity))
    }
}

/// Blend state applied when drawing into the output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blend {
    pub desc: BlendDesc,
    pub factor: [f32; 4],
    pub sample_mask: u32,
}

/// Mutable per-call state of a converter.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertGeometry {
    /// Crop of the input; full frame when unset.
    pub src_rect: Option<Rect>,
    /// Placement in the output; full frame when unset.
    pub dest_rect: Option<Rect>,
    pub orientation: Orientation,
    /// Multiplies output alpha.
    pub alpha: f32,
    pub blend: Option<Blend>,
    pub fill_border: bool,
    /// ARGB64 border color.
    pub border_color: u64,
    pub src_hdr: Option<HdrMetadata>,
    pub dest_hdr: Option<HdrMetadata>,
}

impl Default for ConvertGeometry {
    fn default() -> Self {
        Self {
            src_rect: None,
            dest_rect: None,
            orientation: Orientation::default(),
            alpha: 1.0,
            blend: None,
            fill_border: false,
            border_color: DEFAULT_BORDER_COLOR,
            src_hdr: None,
            dest_hdr: None,
        }
    }
}

impl ConvertGeometry {
    pub fn src_rect_or(&self, width: u32, height: u32) -> Rect {
        self.src_rect.unwrap_or(Rect::full(width, height))
    }

    pub fn dest_rect_or(&self, width: u32, height: u32) -> Rect {
        self.dest_rect.unwrap_or(Rect::full(width, height))
    }

    /// Whether a border has to be drawn around `dest` in a `width` x `height`
    /// output.
    pub fn needs_border(&self, width: u32, height: u32) -> bool {
        self.fill_border && !self.dest_rect_or(width, height).covers(width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_flags_match_direction_matrix() {
        // rotation then mirror, as the processor applies them
        for direction in VideoDirection::ALL {
            let (rotation, flip_h, flip_v) = Orientation::Direction(direction).processor_flags().unwrap();
            let mut m = match rotation {
                ProcessorRotation::Identity => [[1.0, 0.0], [0.0, 1.0]],
                ProcessorRotation::Rotate90 => [[0.0, -1.0], [1.0, 0.0]],
                ProcessorRotation::Rotate180 => [[-1.0, 0.0], [0.0, -1.0]],
                ProcessorRotation::Rotate270 => [[0.0, 1.0], [-1.0, 0.0]],
            };
            for col in &mut m {
                if flip_h {
                    col[0] = -col[0];
                }
                if flip_v {
                    col[1] = -col[1];
                }
            }
            assert_eq!(m, direction.ndc_matrix(), "{:?}", direction);
        }
    }

    #[test]
    fn test_custom_matrix_has_no_processor_flags() {
        let m = Orientation::Matrix(glam::Mat4::from_scale(glam::Vec3::new(0.5, 0.5, 1.0)).to_cols_array_2d());
        assert!(m.processor_flags().is_none());
        assert_eq!(m.vs_constants().transform[0][0], 0.5);
        assert!(!m.is_identity());
    }

    #[test]
    fn test_identity_vs_constants() {
        assert_eq!(Orientation::default().vs_constants(), VsConstants::default());
    }

    #[test]
    fn test_needs_border() {
        let mut g = ConvertGeometry::default();
        assert!(!g.needs_border(64, 64));
        g.fill_border = true;
        assert!(!g.needs_border(64, 64));
        g.dest_rect = Some(Rect::new(8, 8, 48, 48));
        assert!(g.needs_border(64, 64));
        g.dest_rect = Some(Rect::full(64, 64));
        assert!(!g.needs_border(64, 64));
    }
}
