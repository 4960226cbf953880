//! Allocation parameters and the surfaces they describe.

use crate::error::{GpuError, Result};
use crate::format::FormatDescriptor;
use crate::native::{BindFlags, MiscFlags, NativeFormat, TextureDesc};
use gpuframe_core::{VideoFormat, VideoInfo, MAX_DIMENSION};
use smallvec::SmallVec;
use std::ops::Range;

/// What to allocate for one frame: format, size and binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationParams {
    pub info: VideoInfo,
    /// GPU size, at least the logical size.
    pub aligned_width: u32,
    pub aligned_height: u32,
    pub bind: BindFlags,
    pub misc: MiscFlags,
    pub array_size: u32,
    pub sample_count: u32,
    pub sample_quality: u32,
}

impl AllocationParams {
    pub fn new(info: VideoInfo, bind: BindFlags) -> Self {
        Self {
            info,
            aligned_width: info.width,
            aligned_height: info.height,
            bind,
            misc: MiscFlags::empty(),
            array_size: 1,
            sample_count: 1,
            sample_quality: 0,
        }
    }

    /// Pad the GPU surface to `width` x `height`, e.g. for decoder output.
    pub fn aligned(mut self, width: u32, height: u32) -> Result<Self> {
        if width < self.info.width || height < self.info.height || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(GpuError::InvalidArgument(format!(
                "aligned size {}x{} does not hold {}x{}",
                width, height, self.info.width, self.info.height
            )));
        }
        self.aligned_width = width;
        self.aligned_height = height;
        Ok(self)
    }

    pub fn with_misc(mut self, misc: MiscFlags) -> Self {
        self.misc = misc;
        self
    }

    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size.max(1);
        self
    }

    pub fn format(&self) -> VideoFormat {
        self.info.format
    }

    /// One surface per native texture of a frame, in plane order.
    pub fn surface_descs(&self, desc: &FormatDescriptor) -> SmallVec<[SurfaceDesc; 4]> {
        let format = self.info.format;
        desc.surfaces()
            .iter()
            .enumerate()
            .map(|(i, &native)| {
                let planes = desc.surface_planes(i);
                let (width, height, aligned) = if desc.uses_combined {
                    (
                        self.info.width,
                        self.info.height,
                        (self.aligned_width, self.aligned_height),
                    )
                } else {
                    let plane = format.plane(i).unwrap_or(gpuframe_core::PlaneInfo {
                        w_sub: 0,
                        h_sub: 0,
                        texel_size: native.texel_size() as u8,
                        texel_width: 1,
                    });
                    (
                        plane.width(self.info.width),
                        plane.height(self.info.height),
                        (plane.width(self.aligned_width), plane.height(self.aligned_height)),
                    )
                };
                let texture = TextureDesc {
                    sample_count: self.sample_count,
                    sample_quality: self.sample_quality,
                    ..TextureDesc::new(aligned.0, aligned.1, native)
                        .with_bind(self.bind)
                        .with_misc(self.misc)
                        .with_array_size(self.array_size)
                };
                SurfaceDesc {
                    texture,
                    info: self.info,
                    planes,
                    width,
                    height,
                }
            })
            .collect()
    }
}

/// One native surface of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SurfaceDesc {
    pub texture: TextureDesc,
    /// The frame this surface belongs to.
    pub info: VideoInfo,
    /// Logical planes of `info.format` held by this surface.
    pub planes: Range<usize>,
    /// Logical size of the surface's first plane.
    pub width: u32,
    pub height: u32,
}

impl SurfaceDesc {
    /// Describe a surface that holds a whole frame on its own.
    pub fn whole(info: VideoInfo, texture: TextureDesc) -> Self {
        Self {
            texture,
            info,
            planes: 0..info.format.n_planes(),
            width: info.width,
            height: info.height,
        }
    }

    pub fn native_format(&self) -> NativeFormat {
        self.texture.format
    }

    /// YUV content has no all-zero black, so new render targets are cleared.
    pub fn needs_clear(&self) -> bool {
        self.texture.bind.contains(BindFlags::RENDER_TARGET)
            && self.info.format.is_yuv()
            && !self.info.format.is_gray()
    }

    /// Same native shape, so a sub-resource copy between the two is valid.
    pub fn same_shape(&self, other: &SurfaceDesc) -> bool {
        self.texture.width == other.texture.width
            && self.texture.height == other.texture.height
            && self.texture.format == other.texture.format
    }
}
