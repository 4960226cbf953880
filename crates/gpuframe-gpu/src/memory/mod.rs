//! GPU surfaces with lazily created views and CPU staging.
//!
//! An [`Allocation`] is one native surface, or one slice of a texture array.
//! Views are created on first request and memoized. CPU access goes through
//! a staging twin created on first map; [`TransferState`] decides when the
//! two copies have to be synchronized.

mod params;
mod transfer;

pub use params::{AllocationParams, SurfaceDesc};
pub use transfer::{StagingTransfer, TransferState};

use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::native::{
    BindFlags, MappedSubresource, MiscFlags, NativeFormat, NativeTexture, NativeView, SharedHandle, TextureHandle,
    ViewDesc, ViewHandle, ViewKind,
};
use crate::shader::program::output_clear_colors;
use gpuframe_color::ColorSpec;
use gpuframe_core::{VideoFormat, VideoInfo};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};

/// How an allocation is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapMode {
    Read,
    Write,
    ReadWrite,
    /// Native access for reading on the GPU.
    GpuRead,
    /// Native access for writing on the GPU.
    GpuWrite,
}

impl MapMode {
    pub fn is_cpu(self) -> bool {
        matches!(self, Self::Read | Self::Write | Self::ReadWrite)
    }

    pub fn writes_cpu(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    pub fn writes_gpu(self) -> bool {
        self == Self::GpuWrite
    }
}

// ── Transfers ──────────────────────────────────────────────────

struct NativeTransfer<'a> {
    device: &'a Device,
    texture: TextureHandle,
    slice: u32,
    staging: TextureHandle,
}

impl StagingTransfer for NativeTransfer<'_> {
    fn download(&mut self) -> Result<()> {
        trace!("Download {:?}[{}] to staging", self.texture, self.slice);
        self.device.check(
            "CopySubresourceRegion",
            self.device.native().copy_subresource(self.staging, 0, self.texture, self.slice),
        )
    }

    fn upload(&mut self) -> Result<()> {
        trace!("Upload staging to {:?}[{}]", self.texture, self.slice);
        self.device.check(
            "CopySubresourceRegion",
            self.device.native().copy_subresource(self.texture, self.slice, self.staging, 0),
        )
    }
}

#[derive(Default)]
struct MapState {
    transfer: TransferState,
    staging: Option<NativeTexture>,
    mapped: Option<MappedSubresource>,
    cpu_maps: u32,
    gpu_maps: u32,
}

// ── Allocation ─────────────────────────────────────────────────

/// One GPU surface, or one slice of a texture array.
pub struct Allocation {
    views: Mutex<HashMap<ViewDesc, NativeView>>,
    map: Mutex<MapState>,
    /// Handle exported by this allocation, closed on drop.
    exported: Mutex<Option<SharedHandle>>,
    /// Handle this allocation was opened from.
    opened: Option<SharedHandle>,
    texture: Arc<NativeTexture>,
    slice: u32,
    desc: SurfaceDesc,
    device: Device,
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("texture", &self.texture.handle())
            .field("slice", &self.slice)
            .field("format", &self.desc.info.format)
            .field("native", &self.desc.texture.format)
            .field("size", &(self.desc.texture.width, self.desc.texture.height))
            .finish()
    }
}

impl Allocation {
    /// Allocate one surface.
    ///
    /// Render targets of YUV formats are cleared to black before they are
    /// handed out.
    pub fn new(device: &Device, desc: &SurfaceDesc) -> Result<Self> {
        let desc = SurfaceDesc {
            texture: desc.texture.with_array_size(1),
            ..desc.clone()
        };
        let _ctx = device.lock();
        let texture = device.check("CreateTexture2D", NativeTexture::create(device.native(), &desc.texture))?;
        let allocation = Self::from_parts(device.clone(), Arc::new(texture), 0, desc, None);
        allocation.clear_to_black()?;
        Ok(allocation)
    }

    /// Allocate a texture array and cut it into one allocation per slice.
    ///
    /// The parent texture lives until the last slice is dropped.
    pub fn new_array(device: &Device, desc: &SurfaceDesc, slices: u32) -> Result<Vec<Self>> {
        if slices == 0 {
            return Err(GpuError::InvalidArgument("texture array without slices".into()));
        }
        let desc = SurfaceDesc {
            texture: desc.texture.with_array_size(slices),
            ..desc.clone()
        };
        let _ctx = device.lock();
        let texture = Arc::new(device.check(
            "CreateTexture2D",
            NativeTexture::create(device.native(), &desc.texture),
        )?);
        debug!(
            "Allocated {} x {:?} {}x{} array",
            slices, desc.texture.format, desc.texture.width, desc.texture.height
        );
        (0..slices)
            .map(|slice| {
                let allocation = Self::from_parts(device.clone(), texture.clone(), slice, desc.clone(), None);
                allocation.clear_to_black()?;
                Ok(allocation)
            })
            .collect()
    }

    /// Open a surface another device exported.
    pub fn open_shared(device: &Device, handle: SharedHandle, info: VideoInfo) -> Result<Self> {
        let _ctx = device.lock();
        let (texture, desc) = device.check("OpenSharedResource", device.native().open_shared_handle(handle))?;
        let texture = NativeTexture::from_raw(device.native().clone(), texture, desc);
        Ok(Self::from_parts(
            device.clone(),
            Arc::new(texture),
            0,
            SurfaceDesc::whole(info, desc),
            Some(handle),
        ))
    }

    fn from_parts(
        device: Device,
        texture: Arc<NativeTexture>,
        slice: u32,
        desc: SurfaceDesc,
        opened: Option<SharedHandle>,
    ) -> Self {
        Self {
            views: Mutex::new(HashMap::new()),
            map: Mutex::new(MapState::default()),
            exported: Mutex::new(None),
            opened,
            texture,
            slice,
            desc,
            device,
        }
    }

    fn clear_to_black(&self) -> Result<()> {
        if !self.desc.needs_clear() {
            return Ok(());
        }
        let black = ColorSpec::from_info(&self.desc.info).black();
        let Some(colors) = output_clear_colors(
            self.desc.info.format,
            [black[0] as f32, black[1] as f32, black[2] as f32, 1.0],
        ) else {
            return Ok(());
        };
        let views = self
            .render_target_views()
            .ok_or_else(|| GpuError::Unsupported(format!("{} render target views", self.desc.info.format)))?;
        let _ctx = self.device.lock();
        for (view, plane) in views.iter().zip(self.desc.planes.clone()) {
            let color = colors.get(plane).copied().unwrap_or([0.0, 0.0, 0.0, 1.0]);
            self.device.check(
                "ClearRenderTargetView",
                self.device.native().clear_render_target(*view, color),
            )?;
        }
        Ok(())
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn desc(&self) -> &SurfaceDesc {
        &self.desc
    }

    /// Native texture, shared by all slices of an array.
    pub fn texture(&self) -> TextureHandle {
        self.texture.handle()
    }

    /// Array slice of the native texture.
    pub fn subresource(&self) -> u32 {
        self.slice
    }

    pub fn is_array_slice(&self) -> bool {
        self.desc.texture.array_size > 1
    }

    pub fn format(&self) -> VideoFormat {
        self.desc.info.format
    }

    pub fn native_format(&self) -> NativeFormat {
        self.desc.texture.format
    }

    pub fn bind(&self) -> BindFlags {
        self.desc.texture.bind
    }

    /// Logical planes of the frame format held by this surface.
    pub fn planes(&self) -> Range<usize> {
        self.desc.planes.clone()
    }

    /// Logical size of the surface.
    pub fn size(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    /// Tightly packed size of the GPU surface in bytes.
    pub fn byte_size(&self) -> usize {
        let (w, h) = (self.desc.texture.width, self.desc.texture.height);
        self.native_format()
            .planes()
            .iter()
            .map(|p| p.row_bytes(w) * p.height(h) as usize)
            .sum()
    }

    pub fn transfer_state(&self) -> TransferState {
        self.map.lock().transfer
    }

    /// Outstanding maps, CPU and GPU.
    pub fn map_count(&self) -> u32 {
        let state = self.map.lock();
        state.cpu_maps + state.gpu_maps
    }

    // ── Views ──────────────────────────────────────────────────

    /// Number of plane views of this surface.
    pub fn view_count(&self) -> usize {
        self.native_format().plane_count()
    }

    fn view(&self, kind: ViewKind, plane: u32, required: BindFlags) -> Option<ViewHandle> {
        if !self.bind().contains(required) {
            return None;
        }
        let format = match kind {
            ViewKind::ShaderResource | ViewKind::RenderTarget => {
                self.native_format().planes().get(plane as usize)?.view_format
            }
            _ => self.native_format(),
        };
        let desc = ViewDesc {
            kind,
            format,
            plane,
            array_slice: self.slice,
        };
        let _ctx = self.device.lock();
        let mut views = self.views.lock();
        if let Some(view) = views.get(&desc) {
            return Some(view.handle());
        }
        let view = self
            .device
            .check("CreateView", NativeView::create(self.device.native(), self.texture.handle(), &desc))
            .ok()?;
        let handle = view.handle();
        views.insert(desc, view);
        Some(handle)
    }

    fn plane_views(&self, kind: ViewKind, required: BindFlags) -> Option<SmallVec<[ViewHandle; 4]>> {
        (0..self.view_count() as u32)
            .map(|plane| self.view(kind, plane, required))
            .collect()
    }

    pub fn shader_resource_view(&self, index: usize) -> Option<ViewHandle> {
        self.view(ViewKind::ShaderResource, index as u32, BindFlags::SHADER_RESOURCE)
    }

    /// Shader resource views of every plane, or none if any is unavailable.
    pub fn shader_resource_views(&self) -> Option<SmallVec<[ViewHandle; 4]>> {
        self.plane_views(ViewKind::ShaderResource, BindFlags::SHADER_RESOURCE)
    }

    pub fn render_target_view(&self, index: usize) -> Option<ViewHandle> {
        self.view(ViewKind::RenderTarget, index as u32, BindFlags::RENDER_TARGET)
    }

    pub fn render_target_views(&self) -> Option<SmallVec<[ViewHandle; 4]>> {
        self.plane_views(ViewKind::RenderTarget, BindFlags::RENDER_TARGET)
    }

    pub fn decoder_output_view(&self, profile: u32) -> Option<ViewHandle> {
        self.view(ViewKind::DecoderOutput { profile }, 0, BindFlags::DECODER)
    }

    pub fn processor_input_view(&self) -> Option<ViewHandle> {
        self.view(ViewKind::ProcessorInput, 0, BindFlags::empty())
    }

    pub fn processor_output_view(&self) -> Option<ViewHandle> {
        self.view(ViewKind::ProcessorOutput, 0, BindFlags::RENDER_TARGET)
    }

    // ── Mapping ────────────────────────────────────────────────

    fn staging(&self, state: &mut MapState) -> Result<TextureHandle> {
        if let Some(staging) = &state.staging {
            return Ok(staging.handle());
        }
        let desc = self.desc.texture.staging();
        let staging = self
            .device
            .check("CreateTexture2D", NativeTexture::create(self.device.native(), &desc))?;
        let handle = staging.handle();
        state.staging = Some(staging);
        state.transfer.staging_created();
        Ok(handle)
    }

    /// Map for CPU or GPU access. Maps nest; the guard unmaps on drop.
    ///
    /// CPU and GPU maps exclude each other.
    pub fn map(&self, mode: MapMode) -> Result<MappedAllocation<'_>> {
        let _ctx = self.device.lock();
        let mut state = self.map.lock();
        if mode.is_cpu() {
            if state.gpu_maps > 0 {
                return Err(GpuError::InvalidArgument("allocation is mapped for GPU access".into()));
            }
            let staging = self.staging(&mut state)?;
            let mut transfer = NativeTransfer {
                device: &self.device,
                texture: self.texture.handle(),
                slice: self.slice,
                staging,
            };
            state.transfer.begin_cpu(&mut transfer, mode)?;
            if state.cpu_maps == 0 {
                let mapped = self.device.check("Map", self.device.native().map_staging(staging))?;
                state.mapped = Some(mapped);
            }
            state.cpu_maps += 1;
            Ok(MappedAllocation {
                allocation: self,
                mode,
                mapped: state.mapped.clone(),
            })
        } else {
            if state.cpu_maps > 0 {
                return Err(GpuError::InvalidArgument("allocation is mapped for CPU access".into()));
            }
            match state.staging.as_ref().map(|s| s.handle()) {
                Some(staging) => {
                    let mut transfer = NativeTransfer {
                        device: &self.device,
                        texture: self.texture.handle(),
                        slice: self.slice,
                        staging,
                    };
                    state.transfer.begin_gpu(&mut transfer, mode)?;
                }
                None if mode.writes_gpu() => state.transfer.gpu_written(),
                None => {}
            }
            state.gpu_maps += 1;
            Ok(MappedAllocation {
                allocation: self,
                mode,
                mapped: None,
            })
        }
    }

    fn unmap(&self, mode: MapMode) {
        let _ctx = self.device.lock();
        let mut state = self.map.lock();
        if mode.is_cpu() {
            state.cpu_maps = state.cpu_maps.saturating_sub(1);
            if state.cpu_maps == 0 {
                state.mapped = None;
                if let Some(staging) = &state.staging {
                    self.device.native().unmap_staging(staging.handle());
                }
            }
        } else {
            state.gpu_maps = state.gpu_maps.saturating_sub(1);
        }
    }

    /// GPU copy of `src` into this allocation.
    pub fn copy_from(&self, src: &Allocation) -> Result<()> {
        if std::ptr::eq(self, src) {
            return Ok(());
        }
        if !self.device.is_same(&src.device) {
            return Err(GpuError::InvalidArgument("copy between allocations of different devices".into()));
        }
        if !self.desc.same_shape(&src.desc) {
            return Err(GpuError::InvalidArgument(format!(
                "copy from {:?} {}x{} to {:?} {}x{}",
                src.native_format(),
                src.desc.texture.width,
                src.desc.texture.height,
                self.native_format(),
                self.desc.texture.width,
                self.desc.texture.height
            )));
        }
        let _ctx = self.device.lock();
        let _src = src.map(MapMode::GpuRead)?;
        let _dst = self.map(MapMode::GpuWrite)?;
        self.device.check(
            "CopySubresourceRegion",
            self.device
                .native()
                .copy_subresource(self.texture.handle(), self.slice, src.texture.handle(), src.slice),
        )
    }

    // ── Sharing ────────────────────────────────────────────────

    /// Cross-device handle of this surface, created on first call.
    pub fn shareable_handle(&self) -> Result<SharedHandle> {
        if let Some(handle) = self.opened {
            return Ok(handle);
        }
        if !self
            .desc
            .texture
            .misc
            .intersects(MiscFlags::SHARED | MiscFlags::SHARED_KEYED_MUTEX | MiscFlags::SHARED_NT_HANDLE)
        {
            return Err(GpuError::InvalidArgument("allocation was not created shareable".into()));
        }
        let mut exported = self.exported.lock();
        if let Some(handle) = *exported {
            return Ok(handle);
        }
        let _ctx = self.device.lock();
        let handle = self.device.check(
            "CreateSharedHandle",
            self.device.native().export_shared_handle(self.texture.handle()),
        )?;
        *exported = Some(handle);
        Ok(handle)
    }

    /// Acquire the surface's keyed mutex with `key`, waiting up to `timeout`.
    pub fn acquire_keyed_mutex(&self, key: u64, timeout: Duration) -> Result<KeyedMutexGuard<'_>> {
        self.device.check(
            "AcquireSync",
            self.device
                .native()
                .acquire_keyed_mutex(self.texture.handle(), key, timeout),
        )?;
        Ok(KeyedMutexGuard {
            allocation: self,
            release_key: key,
        })
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if let Some(handle) = self.exported.get_mut().take() {
            self.device.native().close_shared_handle(handle);
        }
        let state = self.map.get_mut();
        if state.cpu_maps > 0 {
            if let Some(staging) = &state.staging {
                self.device.native().unmap_staging(staging.handle());
            }
        }
    }
}

// ── Guards ─────────────────────────────────────────────────────

/// A live map of an allocation; unmaps on drop.
pub struct MappedAllocation<'a> {
    allocation: &'a Allocation,
    mode: MapMode,
    mapped: Option<MappedSubresource>,
}

impl fmt::Debug for MappedAllocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedAllocation")
            .field("allocation", self.allocation)
            .field("mode", &self.mode)
            .finish()
    }
}

impl<'a> MappedAllocation<'a> {
    pub fn mode(&self) -> MapMode {
        self.mode
    }

    pub fn allocation(&self) -> &'a Allocation {
        self.allocation
    }

    fn cpu(&self) -> Result<&MappedSubresource> {
        self.mapped
            .as_ref()
            .ok_or_else(|| GpuError::InvalidArgument("allocation is not mapped for CPU access".into()))
    }

    /// Staging memory of the mapped slice.
    pub fn bytes(&self) -> Result<MappedMutexGuard<'_, [u8]>> {
        let mapped = self.cpu()?;
        Ok(MutexGuard::map(mapped.memory.lock(), |v| v.as_mut_slice()))
    }

    /// Writable staging memory; only for write modes.
    pub fn bytes_mut(&self) -> Result<MappedMutexGuard<'_, [u8]>> {
        if !self.mode.writes_cpu() {
            return Err(GpuError::InvalidArgument(format!("{:?} map is read-only", self.mode)));
        }
        self.bytes()
    }

    pub fn row_pitch(&self) -> Option<usize> {
        self.mapped.as_ref().map(|m| m.row_pitch)
    }

    /// Byte offset of a native plane within the mapped memory.
    pub fn plane_offset(&self, plane: usize) -> Option<usize> {
        self.mapped.as_ref()?.plane_offsets.get(plane).copied()
    }

    /// Native texture and array slice, for GPU maps.
    pub fn native(&self) -> Option<(TextureHandle, u32)> {
        (!self.mode.is_cpu()).then(|| (self.allocation.texture(), self.allocation.subresource()))
    }
}

impl Drop for MappedAllocation<'_> {
    fn drop(&mut self) {
        self.allocation.unmap(self.mode);
    }
}

/// Held keyed mutex of a shared allocation; released on drop.
pub struct KeyedMutexGuard<'a> {
    allocation: &'a Allocation,
    release_key: u64,
}

impl KeyedMutexGuard<'_> {
    /// Release with `key` instead of the acquire key.
    pub fn release_with(mut self, key: u64) {
        self.release_key = key;
    }
}

impl Drop for KeyedMutexGuard<'_> {
    fn drop(&mut self) {
        let device = self.allocation.device();
        if let Err(e) = device
            .native()
            .release_keyed_mutex(self.allocation.texture(), self.release_key)
        {
            error!("ReleaseSync failed (0x{:08x}): {}", e.code(), e);
        }
    }
}
