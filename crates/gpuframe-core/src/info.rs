//! Video stream description.

use crate::color::{ColorRange, Colorimetry};
use crate::error::{Result, VideoError};
use crate::format::{ColorFamily, VideoFormat};
use crate::MAX_DIMENSION;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Format, dimensions and colorimetry of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoInfo {
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    pub colorimetry: Colorimetry,
}

/// Byte layout of a frame in CPU memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneLayout {
    pub strides: SmallVec<[usize; 4]>,
    pub offsets: SmallVec<[usize; 4]>,
    pub size: usize,
}

impl VideoInfo {
    /// Describe a stream using the default colorimetry for its format and size.
    pub fn new(format: VideoFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            colorimetry: default_colorimetry(format, height),
        }
    }

    pub fn with_colorimetry(mut self, colorimetry: Colorimetry) -> Self {
        self.colorimetry = colorimetry;
        self
    }

    pub fn with_range(mut self, range: ColorRange) -> Self {
        self.colorimetry.range = range;
        self
    }

    /// Check the dimensions are usable.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0
            || self.height == 0
            || self.width > MAX_DIMENSION
            || self.height > MAX_DIMENSION
        {
            return Err(VideoError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    pub fn n_planes(&self) -> usize {
        self.format.n_planes()
    }

    /// Plane width in texels.
    pub fn plane_width(&self, plane: usize) -> u32 {
        self.format
            .plane(plane)
            .map(|p| p.width(self.width))
            .unwrap_or(0)
    }

    /// Plane height in rows.
    pub fn plane_height(&self, plane: usize) -> u32 {
        self.format
            .plane(plane)
            .map(|p| p.height(self.height))
            .unwrap_or(0)
    }

    /// CPU layout with rows aligned to 4 bytes and planes packed back to back.
    pub fn layout(&self) -> PlaneLayout {
        let mut strides = SmallVec::new();
        let mut offsets = SmallVec::new();
        let mut size = 0usize;
        for plane in self.format.info().planes {
            let stride = (plane.row_bytes(self.width) + 3) & !3;
            strides.push(stride);
            offsets.push(size);
            size += stride * plane.height(self.height) as usize;
        }
        PlaneLayout {
            strides,
            offsets,
            size,
        }
    }
}

fn default_colorimetry(format: VideoFormat, height: u32) -> Colorimetry {
    match format.family() {
        ColorFamily::Rgb => Colorimetry::SRGB,
        ColorFamily::Yuv | ColorFamily::Gray => {
            if height >= 2160 && format.info().bits > 8 {
                Colorimetry::BT2020
            } else if height > 576 {
                Colorimetry::BT709
            } else {
                Colorimetry::BT601
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_colorimetry() {
        assert_eq!(VideoInfo::new(VideoFormat::Rgba, 64, 64).colorimetry, Colorimetry::SRGB);
        assert_eq!(VideoInfo::new(VideoFormat::Nv12, 720, 480).colorimetry, Colorimetry::BT601);
        assert_eq!(VideoInfo::new(VideoFormat::Nv12, 1920, 1080).colorimetry, Colorimetry::BT709);
        assert_eq!(VideoInfo::new(VideoFormat::P010, 3840, 2160).colorimetry, Colorimetry::BT2020);
    }

    #[test]
    fn test_i420_layout() {
        let info = VideoInfo::new(VideoFormat::I420, 64, 32);
        let layout = info.layout();
        assert_eq!(layout.strides.as_slice(), &[64, 32, 32]);
        assert_eq!(layout.offsets.as_slice(), &[0, 2048, 2560]);
        assert_eq!(layout.size, 3072);
    }

    #[test]
    fn test_rows_are_aligned() {
        let info = VideoInfo::new(VideoFormat::Gray8, 13, 2);
        assert_eq!(info.layout().strides[0], 16);
    }

    #[test]
    fn test_validate() {
        assert!(VideoInfo::new(VideoFormat::Bgra, 0, 16).validate().is_err());
        assert!(VideoInfo::new(VideoFormat::Bgra, 16, 16).validate().is_ok());
        assert!(VideoInfo::new(VideoFormat::Bgra, MAX_DIMENSION + 1, 16).validate().is_err());
    }
}
