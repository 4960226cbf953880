//! Multi-plane frames and the pool that hands them out.
//!
//! A [`BufferPool`] runs one [`PoolAllocator`] per native surface of the
//! frame format: one for a combined surface, or one per plane when the
//! device stores planes as separate resources. The CPU layout of a frame
//! (row pitch and plane offset within each surface) is derived once, by
//! mapping the first frame the pool produces.

use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::memory::{Allocation, AllocationParams, MapMode, MappedAllocation};
use crate::native::ViewHandle;
use crate::pool::{PoolAllocator, PooledAllocation};
use gpuframe_core::{SystemFrame, VideoInfo};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Buffer pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Frames provisioned by `start`.
    pub min_buffers: usize,
    /// Frames kept for reuse; the fixed capacity of texture array pools.
    /// 0 means unbounded for plain pools.
    pub max_buffers: usize,
    /// Cut every surface out of one texture array per plane.
    pub use_texture_array: bool,
}

/// Row pitch and offset of each logical plane within its surface's mapped memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    pub strides: SmallVec<[usize; 4]>,
    pub offsets: SmallVec<[usize; 4]>,
}

impl FrameLayout {
    /// Map each surface once and record where its planes live.
    fn probe<'a>(info: &VideoInfo, surfaces: impl IntoIterator<Item = &'a Allocation>) -> Result<Self> {
        let mut strides = SmallVec::new();
        let mut offsets = SmallVec::new();
        for surface in surfaces {
            let map = surface.map(MapMode::Read)?;
            let pitch = map
                .row_pitch()
                .ok_or_else(|| GpuError::InvalidArgument("surface has no CPU layout".into()))?;
            for (native, _) in surface.planes().enumerate() {
                strides.push(pitch);
                offsets.push(map.plane_offset(native).unwrap_or(0));
            }
        }
        if strides.len() != info.n_planes() {
            return Err(GpuError::InvalidArgument(format!(
                "{} surfaces hold {} planes, expected {}",
                info.format,
                strides.len(),
                info.n_planes()
            )));
        }
        Ok(Self { strides, offsets })
    }
}

// ── Frame ──────────────────────────────────────────────────────

/// A video frame on the GPU: its surfaces in plane order plus CPU layout.
pub struct Frame {
    info: VideoInfo,
    surfaces: SmallVec<[PooledAllocation; 4]>,
    layout: Arc<FrameLayout>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("info", &self.info)
            .field("surfaces", &self.surfaces)
            .field("layout", &self.layout)
            .finish()
    }
}

impl Frame {
    /// Assemble a frame from its surfaces, deriving the layout by mapping them.
    pub fn from_allocations(info: VideoInfo, surfaces: impl IntoIterator<Item = PooledAllocation>) -> Result<Self> {
        let surfaces: SmallVec<[PooledAllocation; 4]> = surfaces.into_iter().collect();
        let layout = FrameLayout::probe(&info, surfaces.iter().map(|s| &**s))?;
        Self::new(info, surfaces, Arc::new(layout))
    }

    fn new(info: VideoInfo, surfaces: SmallVec<[PooledAllocation; 4]>, layout: Arc<FrameLayout>) -> Result<Self> {
        let Some(first) = surfaces.first() else {
            return Err(GpuError::InvalidArgument("frame without surfaces".into()));
        };
        if surfaces.iter().any(|s| !s.device().is_same(first.device())) {
            return Err(GpuError::InvalidArgument("frame surfaces span devices".into()));
        }
        Ok(Self {
            info,
            surfaces,
            layout,
        })
    }

    /// Allocate a standalone frame outside any pool.
    pub fn allocate(device: &Device, params: &AllocationParams) -> Result<Self> {
        let desc = device
            .format(params.format())
            .ok_or_else(|| GpuError::Unsupported(format!("{} on this device", params.format())))?;
        let surfaces = params
            .surface_descs(desc)
            .iter()
            .map(|d| Allocation::new(device, d).map(PooledAllocation::detached))
            .collect::<Result<SmallVec<[_; 4]>>>()?;
        Self::from_allocations(params.info, surfaces)
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    pub fn device(&self) -> &Device {
        self.surfaces[0].device()
    }

    /// Native surfaces backing the frame.
    pub fn surfaces(&self) -> impl Iterator<Item = &Allocation> {
        self.surfaces.iter().map(|s| &**s)
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    pub fn n_planes(&self) -> usize {
        self.info.n_planes()
    }

    /// Surface holding `plane` and the plane's view index within it.
    pub fn plane(&self, plane: usize) -> Option<(&Allocation, usize)> {
        self.surfaces
            .iter()
            .find(|s| s.planes().contains(&plane))
            .map(|s| (&**s, plane - s.planes().start))
    }

    pub fn strides(&self) -> &[usize] {
        &self.layout.strides
    }

    pub fn offsets(&self) -> &[usize] {
        &self.layout.offsets
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Shader resource views of every plane, in plane order.
    pub fn shader_resource_views(&self) -> Option<SmallVec<[ViewHandle; 4]>> {
        let mut views = SmallVec::new();
        for surface in &self.surfaces {
            views.extend(surface.shader_resource_views()?);
        }
        Some(views)
    }

    /// Render target views of every plane, in plane order.
    pub fn render_target_views(&self) -> Option<SmallVec<[ViewHandle; 4]>> {
        let mut views = SmallVec::new();
        for surface in &self.surfaces {
            views.extend(surface.render_target_views()?);
        }
        Some(views)
    }

    /// Map every surface for native GPU access.
    pub fn map_gpu(&self, mode: MapMode) -> Result<SmallVec<[MappedAllocation<'_>; 4]>> {
        if mode.is_cpu() {
            return Err(GpuError::InvalidArgument(format!("{:?} is not a GPU map", mode)));
        }
        self.surfaces.iter().map(|s| s.map(mode)).collect()
    }

    fn check_shape(&self, other: &VideoInfo) -> Result<()> {
        if other.format != self.info.format || other.width != self.info.width || other.height != self.info.height {
            return Err(GpuError::InvalidArgument(format!(
                "{} {}x{} frame does not match {} {}x{}",
                other.format, other.width, other.height, self.info.format, self.info.width, self.info.height
            )));
        }
        Ok(())
    }

    /// Copy a CPU frame of the same format and size into this frame.
    pub fn upload_from(&self, src: &SystemFrame) -> Result<()> {
        self.check_shape(src.info())?;
        let _ctx = self.device().lock();
        for surface in &self.surfaces {
            let map = surface.map(MapMode::Write)?;
            let mut bytes = map.bytes_mut()?;
            for plane in surface.planes() {
                let (stride, offset) = (self.layout.strides[plane], self.layout.offsets[plane]);
                let row_bytes = src.row_bytes(plane);
                for y in 0..self.info.plane_height(plane) {
                    let at = offset + y as usize * stride;
                    bytes
                        .get_mut(at..at + row_bytes)
                        .ok_or_else(|| GpuError::InvalidArgument(format!("plane {} row {} out of range", plane, y)))?
                        .copy_from_slice(src.row(plane, y));
                }
            }
        }
        Ok(())
    }

    /// Copy this frame into a CPU frame of the same format and size.
    pub fn download_to(&self, dst: &mut SystemFrame) -> Result<()> {
        self.check_shape(dst.info())?;
        let _ctx = self.device().lock();
        for surface in &self.surfaces {
            let map = surface.map(MapMode::Read)?;
            let bytes = map.bytes()?;
            for plane in surface.planes() {
                let (stride, offset) = (self.layout.strides[plane], self.layout.offsets[plane]);
                let row_bytes = dst.row_bytes(plane);
                for y in 0..self.info.plane_height(plane) {
                    let at = offset + y as usize * stride;
                    let row = bytes
                        .get(at..at + row_bytes)
                        .ok_or_else(|| GpuError::InvalidArgument(format!("plane {} row {} out of range", plane, y)))?;
                    dst.row_mut(plane, y).copy_from_slice(row);
                }
            }
        }
        Ok(())
    }

    /// Read the frame back into a new CPU frame.
    pub fn to_system(&self) -> Result<SystemFrame> {
        let mut frame = SystemFrame::new(self.info)?;
        self.download_to(&mut frame)?;
        Ok(frame)
    }
}

// ── Buffer pool ────────────────────────────────────────────────

/// Pool of whole frames of one format and size.
pub struct BufferPool {
    device: Device,
    params: AllocationParams,
    config: BufferPoolConfig,
    pools: SmallVec<[PoolAllocator; 4]>,
    layout: Mutex<Option<Arc<FrameLayout>>>,
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("info", &self.params.info)
            .field("config", &self.config)
            .field("pools", &self.pools)
            .finish()
    }
}

impl BufferPool {
    pub fn new(device: &Device, params: AllocationParams, config: BufferPoolConfig) -> Result<Self> {
        params.info.validate()?;
        let format = device
            .format(params.format())
            .ok_or_else(|| GpuError::Unsupported(format!("{} on this device", params.format())))?;
        if config.use_texture_array && config.max_buffers == 0 {
            return Err(GpuError::InvalidArgument("texture array pool needs max_buffers".into()));
        }
        let pools = params
            .surface_descs(format)
            .into_iter()
            .map(|desc| {
                if config.use_texture_array {
                    PoolAllocator::new_array(device, desc, config.max_buffers as u32)
                } else {
                    Ok(PoolAllocator::new(device, desc, config.min_buffers, config.max_buffers))
                }
            })
            .collect::<Result<SmallVec<[_; 4]>>>()?;
        debug!(
            "Buffer pool for {} {}x{}: {} surface pool(s)",
            params.info.format,
            params.info.width,
            params.info.height,
            pools.len()
        );
        Ok(Self {
            device: device.clone(),
            params,
            config,
            pools,
            layout: Mutex::new(None),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn info(&self) -> &VideoInfo {
        &self.params.info
    }

    pub fn params(&self) -> &AllocationParams {
        &self.params
    }

    pub fn config(&self) -> &BufferPoolConfig {
        &self.config
    }

    /// Per-surface pools, in plane order.
    pub fn pools(&self) -> &[PoolAllocator] {
        &self.pools
    }

    pub fn start(&self) -> Result<()> {
        self.pools.iter().try_for_each(PoolAllocator::start)
    }

    pub fn set_active(&self, active: bool) -> Result<()> {
        self.pools.iter().try_for_each(|p| p.set_active(active))
    }

    pub fn is_active(&self) -> bool {
        self.pools.iter().all(PoolAllocator::is_active)
    }

    pub fn stop(&self) -> Result<()> {
        self.set_active(false)
    }

    /// Take a frame, blocking while a texture array pool is exhausted.
    pub fn acquire(&self) -> Result<Frame> {
        self.assemble(PoolAllocator::acquire)
    }

    /// Take a frame; `Exhausted` if a texture array pool has none free.
    pub fn try_acquire(&self) -> Result<Frame> {
        self.assemble(PoolAllocator::try_acquire)
    }

    fn assemble(&self, take: impl Fn(&PoolAllocator) -> Result<PooledAllocation>) -> Result<Frame> {
        let surfaces = self.pools.iter().map(take).collect::<Result<SmallVec<[_; 4]>>>()?;
        let layout = {
            let mut cached = self.layout.lock();
            match &*cached {
                Some(layout) => layout.clone(),
                None => {
                    let layout = Arc::new(FrameLayout::probe(&self.params.info, surfaces.iter().map(|s| &**s))?);
                    *cached = Some(layout.clone());
                    layout
                }
            }
        };
        Frame::new(self.params.info, surfaces, layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::software::SoftwareOptions;
    use crate::native::{BindFlags, NativeFormat};
    use gpuframe_core::VideoFormat;

    fn device() -> Device {
        Device::create_software(SoftwareOptions::default(), false).unwrap()
    }

    fn params(format: VideoFormat) -> AllocationParams {
        AllocationParams::new(
            VideoInfo::new(format, 48, 32),
            BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET,
        )
    }

    #[test]
    fn test_combined_frame_layout() {
        let device = device();
        let pool = BufferPool::new(&device, params(VideoFormat::Nv12), BufferPoolConfig::default()).unwrap();
        pool.set_active(true).unwrap();
        let frame = pool.acquire().unwrap();
        assert_eq!(frame.surface_count(), 1);
        assert_eq!(frame.strides(), &[64, 64]);
        assert_eq!(frame.offsets(), &[0, 64 * 32]);
        assert_eq!(frame.shader_resource_views().unwrap().len(), 2);
        let (surface, index) = frame.plane(1).unwrap();
        assert_eq!(index, 1);
        assert_eq!(surface.native_format(), NativeFormat::Nv12);
    }

    #[test]
    fn test_per_plane_frame() {
        let device = device();
        let pool = BufferPool::new(&device, params(VideoFormat::I420), BufferPoolConfig::default()).unwrap();
        pool.set_active(true).unwrap();
        let frame = pool.acquire().unwrap();
        assert_eq!(frame.surface_count(), 3);
        assert_eq!(frame.offsets(), &[0, 0, 0]);
        assert_eq!(frame.render_target_views().unwrap().len(), 3);
        assert_eq!(frame.plane(2).unwrap().1, 0);
    }

    #[test]
    fn test_upload_download() {
        let device = device();
        let frame = Frame::allocate(&device, &params(VideoFormat::I420)).unwrap();
        let mut src = SystemFrame::new(*frame.info()).unwrap();
        src.fill_plane(0, &[200]).unwrap();
        src.fill_plane(1, &[50]).unwrap();
        src.fill_plane(2, &[90]).unwrap();
        frame.upload_from(&src).unwrap();
        assert_eq!(frame.to_system().unwrap(), src);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let device = device();
        let frame = Frame::allocate(&device, &params(VideoFormat::Rgba)).unwrap();
        let other = SystemFrame::new(VideoInfo::new(VideoFormat::Rgba, 16, 16)).unwrap();
        assert!(frame.upload_from(&other).is_err());
    }

    #[test]
    fn test_array_pool_config() {
        let device = device();
        let config = BufferPoolConfig {
            max_buffers: 2,
            use_texture_array: true,
            ..Default::default()
        };
        let pool = BufferPool::new(&device, params(VideoFormat::Nv12), config).unwrap();
        pool.set_active(true).unwrap();
        let _a = pool.try_acquire().unwrap();
        let _b = pool.try_acquire().unwrap();
        assert!(matches!(pool.try_acquire(), Err(GpuError::Exhausted)));

        let bad = BufferPoolConfig {
            use_texture_array: true,
            ..Default::default()
        };
        assert!(BufferPool::new(&device, params(VideoFormat::Nv12), bad).is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config: BufferPoolConfig = serde_json::from_str(r#"{"max_buffers": 4}"#).unwrap();
        assert_eq!(config.max_buffers, 4);
        assert!(!config.use_texture_array);
    }
}
