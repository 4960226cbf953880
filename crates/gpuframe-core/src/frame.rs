//! Video frames in CPU memory.

use crate::error::{Result, VideoError};
use crate::format::VideoFormat;
use crate::info::VideoInfo;
use smallvec::SmallVec;

/// A video frame in CPU memory, all planes in one contiguous buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFrame {
    info: VideoInfo,
    data: Vec<u8>,
    strides: SmallVec<[usize; 4]>,
    offsets: SmallVec<[usize; 4]>,
}

impl SystemFrame {
    /// Allocate a zeroed frame with the default layout for `info`.
    pub fn new(info: VideoInfo) -> Result<Self> {
        info.validate()?;
        let layout = info.layout();
        Ok(Self {
            info,
            data: vec![0u8; layout.size],
            strides: layout.strides,
            offsets: layout.offsets,
        })
    }

    /// Wrap existing bytes with explicit per-plane strides and offsets.
    pub fn from_parts(
        info: VideoInfo,
        data: Vec<u8>,
        strides: &[usize],
        offsets: &[usize],
    ) -> Result<Self> {
        info.validate()?;
        let n_planes = info.n_planes();
        if strides.len() < n_planes || offsets.len() < n_planes {
            return Err(VideoError::InvalidParameter(format!(
                "{} needs {} planes",
                info.format, n_planes
            )));
        }
        for plane in 0..n_planes {
            let rows = info.plane_height(plane) as usize;
            let row_bytes = info
                .format
                .plane(plane)
                .map(|p| p.row_bytes(info.width))
                .unwrap_or(0);
            if strides[plane] < row_bytes {
                return Err(VideoError::InvalidParameter(format!(
                    "stride {} of plane {} is smaller than a row ({} bytes)",
                    strides[plane], plane, row_bytes
                )));
            }
            let end = offsets[plane] + strides[plane] * (rows - 1) + row_bytes;
            if end > data.len() {
                return Err(VideoError::BufferTooSmall {
                    expected: end,
                    got: data.len(),
                });
            }
        }
        Ok(Self {
            info,
            data,
            strides: strides[..n_planes].iter().copied().collect(),
            offsets: offsets[..n_planes].iter().copied().collect(),
        })
    }

    #[inline]
    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    #[inline]
    pub fn format(&self) -> VideoFormat {
        self.info.format
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.info.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.info.height
    }

    #[inline]
    pub fn stride(&self, plane: usize) -> usize {
        self.strides[plane]
    }

    #[inline]
    pub fn offset(&self, plane: usize) -> usize {
        self.offsets[plane]
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Total memory usage of this frame in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len()
    }

    fn plane_range(&self, plane: usize) -> Result<std::ops::Range<usize>> {
        if plane >= self.info.n_planes() {
            return Err(VideoError::PlaneOutOfRange {
                format: self.info.format.name(),
                plane,
            });
        }
        let start = self.offsets[plane];
        let len = self.strides[plane] * self.info.plane_height(plane) as usize;
        Ok(start..(start + len).min(self.data.len()))
    }

    /// Bytes of plane `plane`, including row padding.
    pub fn plane(&self, plane: usize) -> Result<&[u8]> {
        let range = self.plane_range(plane)?;
        Ok(&self.data[range])
    }

    /// Mutable bytes of plane `plane`, including row padding.
    pub fn plane_mut(&mut self, plane: usize) -> Result<&mut [u8]> {
        let range = self.plane_range(plane)?;
        Ok(&mut self.data[range])
    }

    /// Get a row of plane data, without padding.
    pub fn row(&self, plane: usize, y: u32) -> &[u8] {
        let row_bytes = self.row_bytes(plane);
        let start = self.offsets[plane] + y as usize * self.strides[plane];
        &self.data[start..start + row_bytes]
    }

    /// Get a mutable row of plane data, without padding.
    pub fn row_mut(&mut self, plane: usize, y: u32) -> &mut [u8] {
        let row_bytes = self.row_bytes(plane);
        let start = self.offsets[plane] + y as usize * self.strides[plane];
        &mut self.data[start..start + row_bytes]
    }

    /// Tightly packed row size of `plane`.
    pub fn row_bytes(&self, plane: usize) -> usize {
        self.info
            .format
            .plane(plane)
            .map(|p| p.row_bytes(self.info.width))
            .unwrap_or(0)
    }

    /// Fill every texel of a plane with the same bytes.
    pub fn fill_plane(&mut self, plane: usize, texel: &[u8]) -> Result<()> {
        let info = self.info.format.plane(plane).ok_or(VideoError::PlaneOutOfRange {
            format: self.info.format.name(),
            plane,
        })?;
        if texel.len() != info.texel_size as usize {
            return Err(VideoError::InvalidParameter(format!(
                "texel of plane {} is {} bytes, got {}",
                plane,
                info.texel_size,
                texel.len()
            )));
        }
        for y in 0..self.info.plane_height(plane) {
            for chunk in self.row_mut(plane, y).chunks_exact_mut(texel.len()) {
                chunk.copy_from_slice(texel);
            }
        }
        Ok(())
    }

    /// Create an RGBA color bars frame.
    pub fn test_pattern(width: u32, height: u32) -> Result<Self> {
        let mut frame = Self::new(VideoInfo::new(VideoFormat::Rgba, width, height))?;
        let colors: [[u8; 4]; 8] = [
            [255, 255, 255, 255], // White
            [255, 255, 0, 255],   // Yellow
            [0, 255, 255, 255],   // Cyan
            [0, 255, 0, 255],     // Green
            [255, 0, 255, 255],   // Magenta
            [255, 0, 0, 255],     // Red
            [0, 0, 255, 255],     // Blue
            [0, 0, 0, 255],       // Black
        ];
        for y in 0..height {
            let row = frame.row_mut(0, y);
            for x in 0..width {
                let i = (x * 4) as usize;
                let bar = (x * 8 / width) as usize;
                row[i..i + 4].copy_from_slice(&colors[bar]);
            }
        }
        Ok(frame)
    }
}
