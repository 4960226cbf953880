//! CPU reference device.
//!
//! Implements the full [`NativeDevice`] contract in host memory: textures
//! are byte slices laid out exactly like mapped staging surfaces, draws run
//! the pixel programs through a rasterizer, and the video processor is a
//! fixed-function wrapper around the same rasterizer.

mod processor;
pub mod raster;
pub mod shared;
pub mod texel;

use self::processor::SoftwareProcessor;
use self::raster::{PlaneSurface, RasterJob};
use self::shared::{KeyedMutex, SharedEntry};
use crate::error::{NativeError, NativeResult};
use crate::native::{
    AdapterInfo, BindFlags, BufferHandle, BufferKind, DeviceStats, DrawPass, FormatSupport, MappedSubresource,
    MiscFlags, NativeDevice, NativeFormat, NativeVideoProcessor, ProcessorDesc, SamplerFilter, SamplerHandle,
    ShaderHandle, SharedHandle, SliceLayout, StagingMemory, StatsCounters, TextureDesc, TextureHandle, TextureUsage,
    ViewDesc, ViewHandle, ViewKind,
};
use crate::shader::layout::{PsConstants, Vertex, VsConstants};
use crate::shader::program::PixelProgram;
use crate::shader::{ShaderBlob, ShaderStage};
use gpuframe_core::MAX_DIMENSION;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Adapter LUID reported by every software device.
pub const SOFTWARE_LUID: u64 = 0x5346_0000_0001;

/// Row alignment of texture memory.
pub const ROW_ALIGNMENT: usize = 64;

/// Knobs for exercising fallback paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftwareOptions {
    /// Formats reported as entirely unsupported.
    pub disabled_formats: Vec<NativeFormat>,
    /// Refuse to create video processors.
    pub disable_processor: bool,
    /// Processors are created but every blit fails.
    pub fail_processor_blits: bool,
    /// Fail creation when the debug layer is requested.
    pub reject_debug: bool,
}

// ── Resources ──────────────────────────────────────────────────

#[derive(Debug)]
struct TextureEntry {
    desc: TextureDesc,
    layout: SliceLayout,
    slices: Vec<StagingMemory>,
    keyed_mutex: Option<Arc<KeyedMutex>>,
    shared: Option<SharedHandle>,
}

#[derive(Debug, Clone, Copy)]
struct ViewEntry {
    texture: TextureHandle,
    desc: ViewDesc,
}

#[derive(Debug)]
struct ShaderEntry {
    stage: ShaderStage,
    program: Option<PixelProgram>,
}

#[derive(Debug, Default)]
struct Resources {
    textures: HashMap<TextureHandle, TextureEntry>,
    views: HashMap<ViewHandle, ViewEntry>,
    buffers: HashMap<BufferHandle, (BufferKind, Vec<u8>)>,
    shaders: HashMap<ShaderHandle, ShaderEntry>,
    samplers: HashMap<SamplerHandle, SamplerFilter>,
    mapped: HashSet<TextureHandle>,
}

fn invalid(msg: impl Into<String>) -> NativeError {
    NativeError::InvalidCall(msg.into())
}

impl Resources {
    fn texture(&self, handle: TextureHandle) -> NativeResult<&TextureEntry> {
        self.textures
            .get(&handle)
            .ok_or_else(|| invalid(format!("unknown texture {:?}", handle)))
    }

    fn view(&self, handle: ViewHandle) -> NativeResult<ViewEntry> {
        self.views
            .get(&handle)
            .copied()
            .ok_or_else(|| invalid(format!("unknown view {:?}", handle)))
    }

    fn buffer(&self, handle: BufferHandle) -> NativeResult<&[u8]> {
        self.buffers
            .get(&handle)
            .map(|(_, data)| data.as_slice())
            .ok_or_else(|| invalid(format!("unknown buffer {:?}", handle)))
    }

    /// One plane of one slice.
    fn surface(&self, texture: TextureHandle, slice: u32, plane: usize) -> NativeResult<PlaneSurface> {
        let entry = self.texture(texture)?;
        let info = entry
            .desc
            .format
            .planes()
            .get(plane)
            .ok_or_else(|| invalid(format!("plane {} out of range", plane)))?;
        let memory = entry
            .slices
            .get(slice as usize)
            .ok_or_else(|| invalid(format!("array slice {} out of range", slice)))?;
        Ok(PlaneSurface {
            memory: memory.clone(),
            offset: entry.layout.offsets[plane],
            pitch: entry.layout.pitch,
            width: info.width(entry.desc.width),
            height: info.height(entry.desc.height),
            format: info.view_format,
        })
    }

    fn view_surface(&self, view: ViewHandle, kind: ViewKind) -> NativeResult<PlaneSurface> {
        let entry = self.view(view)?;
        if entry.desc.kind != kind {
            return Err(invalid(format!("{:?} is not a {:?} view", view, kind)));
        }
        self.surface(entry.texture, entry.desc.array_slice, entry.desc.plane as usize)
    }

    /// Every plane of the slice a whole-texture view refers to.
    fn view_planes(&self, view: ViewHandle, kind: ViewKind) -> NativeResult<SmallVec<[PlaneSurface; 4]>> {
        let entry = self.view(view)?;
        if entry.desc.kind != kind {
            return Err(invalid(format!("{:?} is not a {:?} view", view, kind)));
        }
        let count = self.texture(entry.texture)?.desc.format.plane_count();
        (0..count)
            .map(|p| self.surface(entry.texture, entry.desc.array_slice, p))
            .collect()
    }

    fn lut_table(&self, view: ViewHandle) -> NativeResult<Vec<f32>> {
        let surface = self.view_surface(view, ViewKind::ShaderResource)?;
        if surface.format != NativeFormat::R32Float {
            return Err(invalid("gamma table must be R32Float"));
        }
        let bytes = surface.memory.lock();
        Ok((0..surface.width as usize)
            .map(|x| texel::read_texel(NativeFormat::R32Float, &bytes[surface.offset + x * 4..])[0])
            .collect())
    }
}

// ── Device ─────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct State {
    info: AdapterInfo,
    options: SoftwareOptions,
    resources: Mutex<Resources>,
    next_id: AtomicU64,
    stats: StatsCounters,
    removed: Mutex<Option<NativeError>>,
}

impl State {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn alive(&self) -> NativeResult<()> {
        match &*self.removed.lock() {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }
}

/// Host-memory implementation of [`NativeDevice`].
#[derive(Debug)]
pub struct SoftwareDevice {
    state: Arc<State>,
}

impl SoftwareDevice {
    pub fn new(options: SoftwareOptions) -> Self {
        Self {
            state: Arc::new(State {
                info: AdapterInfo {
                    index: 0,
                    luid: SOFTWARE_LUID,
                    vendor_id: 0x1414,
                    device_id: 0x008c,
                    software: true,
                    feature_level: 0xb100,
                    description: "gpuframe software rasterizer".to_string(),
                    backend: "software",
                },
                options,
                resources: Mutex::new(Resources::default()),
                next_id: AtomicU64::new(1),
                stats: StatsCounters::default(),
                removed: Mutex::new(None),
            }),
        }
    }

    /// Create a device, honoring the debug-layer request.
    pub fn create(options: SoftwareOptions, debug: bool) -> NativeResult<Self> {
        if debug && options.reject_debug {
            return Err(NativeError::Unsupported("debug layer is not installed".into()));
        }
        Ok(Self::new(options))
    }

    pub fn options(&self) -> &SoftwareOptions {
        &self.state.options
    }

    /// Put the device into the removed state, as a driver reset would.
    pub fn simulate_removal(&self, reason: &str) {
        warn!("Software device removed: {}", reason);
        *self.state.removed.lock() = Some(NativeError::DeviceRemoved(reason.to_string()));
    }

    fn base_support(format: NativeFormat) -> FormatSupport {
        use NativeFormat::*;
        let plain = FormatSupport::TEXTURE2D
            | FormatSupport::SHADER_SAMPLE
            | FormatSupport::RENDER_TARGET
            | FormatSupport::SHAREABLE
            | FormatSupport::CPU_ACCESS;
        let processor = FormatSupport::VIDEO_PROCESSOR_INPUT | FormatSupport::VIDEO_PROCESSOR_OUTPUT;
        match format {
            R8Unorm | Rg8Unorm | R16Unorm | Rg16Unorm => plain,
            Rgba8Unorm | Bgra8Unorm | Rgba16Unorm | Rgb10a2Unorm => plain | processor,
            R32Float => FormatSupport::TEXTURE2D | FormatSupport::SHADER_SAMPLE | FormatSupport::CPU_ACCESS,
            Nv12 | P010 | P016 | Ayuv | Y410 => plain | processor | FormatSupport::DECODER_OUTPUT,
            Yuy2 | Y210 => {
                FormatSupport::TEXTURE2D
                    | FormatSupport::DECODER_OUTPUT
                    | FormatSupport::VIDEO_PROCESSOR_INPUT
                    | FormatSupport::SHAREABLE
                    | FormatSupport::CPU_ACCESS
            }
        }
    }

    fn allocate_entry(&self, desc: &TextureDesc) -> TextureEntry {
        let layout = desc.format.slice_layout(desc.width, desc.height, ROW_ALIGNMENT);
        let slices = (0..desc.array_size.max(1))
            .map(|_| Arc::new(Mutex::new(vec![0u8; layout.size])))
            .collect();
        let keyed_mutex = desc
            .misc
            .contains(MiscFlags::SHARED_KEYED_MUTEX)
            .then(|| Arc::new(KeyedMutex::default()));
        TextureEntry {
            desc: *desc,
            layout,
            slices,
            keyed_mutex,
            shared: None,
        }
    }

    fn keyed_mutex(&self, texture: TextureHandle) -> NativeResult<Arc<KeyedMutex>> {
        let resources = self.state.resources.lock();
        resources
            .texture(texture)?
            .keyed_mutex
            .clone()
            .ok_or_else(|| invalid("texture has no keyed mutex"))
    }

    fn build_job(&self, resources: &Resources, pass: &DrawPass) -> NativeResult<RasterJob> {
        match resources.shaders.get(&pass.vertex_shader) {
            Some(ShaderEntry {
                stage: ShaderStage::Vertex,
                ..
            }) => {}
            _ => return Err(invalid("vertex shader not bound")),
        }
        let program = match resources.shaders.get(&pass.pixel_shader) {
            Some(ShaderEntry {
                stage: ShaderStage::Pixel,
                program: Some(program),
            }) => *program,
            _ => return Err(invalid("pixel shader not bound")),
        };

        let vertices: Vec<Vertex> = resources
            .buffer(pass.vertex_buffer)?
            .chunks_exact(std::mem::size_of::<Vertex>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        let indices: Vec<u16> = resources
            .buffer(pass.index_buffer)?
            .chunks_exact(2)
            .take(pass.index_count as usize)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        let vs_bytes = resources.buffer(pass.vs_constants)?;
        let ps_bytes = resources.buffer(pass.ps_constants)?;
        if vs_bytes.len() < std::mem::size_of::<VsConstants>() || ps_bytes.len() < std::mem::size_of::<PsConstants>() {
            return Err(invalid("constant buffer too small"));
        }
        let vs: VsConstants = bytemuck::pod_read_unaligned(&vs_bytes[..std::mem::size_of::<VsConstants>()]);
        let constants: PsConstants = bytemuck::pod_read_unaligned(&ps_bytes[..std::mem::size_of::<PsConstants>()]);

        let inputs = program.sample.input_count();
        if pass.shader_resources.len() < inputs {
            return Err(invalid(format!(
                "{} expects {} inputs, {} bound",
                program.entry_point(),
                inputs,
                pass.shader_resources.len()
            )));
        }
        let sources = pass.shader_resources[..inputs]
            .iter()
            .map(|&v| resources.view_surface(v, ViewKind::ShaderResource))
            .collect::<NativeResult<_>>()?;

        let luts = if program.convert.uses_luts() {
            let [decode, encode] = pass.luts.ok_or_else(|| invalid("gamma tables not bound"))?;
            Some((resources.lut_table(decode)?, resources.lut_table(encode)?))
        } else {
            None
        };

        if pass.render_targets.len() != program.output.target_count() {
            return Err(invalid(format!(
                "{} writes {} targets, {} bound",
                program.entry_point(),
                program.output.target_count(),
                pass.render_targets.len()
            )));
        }
        let targets = pass
            .render_targets
            .iter()
            .map(|&v| resources.view_surface(v, ViewKind::RenderTarget))
            .collect::<NativeResult<_>>()?;

        let filter = *resources
            .samplers
            .get(&pass.sampler)
            .ok_or_else(|| invalid("sampler not bound"))?;

        Ok(RasterJob {
            program,
            constants,
            vertices,
            indices,
            transform: glam::Mat4::from_cols_array_2d(&vs.transform),
            sources,
            luts,
            targets,
            viewport: pass.viewport,
            filter,
            blend: pass.blend,
            blend_factor: pass.blend_factor,
            sample_mask: pass.sample_mask,
        })
    }
}

impl NativeDevice for SoftwareDevice {
    fn adapter_info(&self) -> &AdapterInfo {
        &self.state.info
    }

    fn format_support(&self, format: NativeFormat) -> FormatSupport {
        if self.state.options.disabled_formats.contains(&format) {
            return FormatSupport::empty();
        }
        Self::base_support(format)
    }

    fn create_texture(&self, desc: &TextureDesc) -> NativeResult<TextureHandle> {
        self.state.alive()?;
        if desc.width == 0 || desc.height == 0 || desc.width > MAX_DIMENSION || desc.height > MAX_DIMENSION {
            return Err(invalid(format!("invalid texture size {}x{}", desc.width, desc.height)));
        }
        if desc.sample_count != 1 || desc.mip_levels != 1 {
            return Err(NativeError::Unsupported("multisampled or mipmapped textures".into()));
        }
        let support = self.format_support(desc.format);
        let mut required = FormatSupport::TEXTURE2D;
        if desc.bind.contains(BindFlags::RENDER_TARGET) {
            required |= FormatSupport::RENDER_TARGET;
        }
        if desc.bind.contains(BindFlags::DECODER) {
            required |= FormatSupport::DECODER_OUTPUT;
        }
        if desc.usage == TextureUsage::Staging {
            required |= FormatSupport::CPU_ACCESS;
        }
        if !desc.misc.is_empty() {
            required |= FormatSupport::SHAREABLE;
        }
        if !support.contains(required) {
            return Err(NativeError::Unsupported(format!(
                "{:?} lacks {:?}",
                desc.format,
                required.difference(support)
            )));
        }

        let entry = self.allocate_entry(desc);
        let handle = TextureHandle(self.state.next_id());
        self.state.resources.lock().textures.insert(handle, entry);
        StatsCounters::bump(&self.state.stats.textures_created);
        Ok(handle)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let mut resources = self.state.resources.lock();
        if resources.textures.remove(&texture).is_some() {
            resources.mapped.remove(&texture);
            StatsCounters::bump(&self.state.stats.textures_destroyed);
        }
    }

    fn create_view(&self, texture: TextureHandle, desc: &ViewDesc) -> NativeResult<ViewHandle> {
        self.state.alive()?;
        let mut resources = self.state.resources.lock();
        let entry = resources.texture(texture)?;
        let tex = entry.desc;
        if desc.array_slice >= tex.array_size {
            return Err(invalid(format!("array slice {} of {}", desc.array_slice, tex.array_size)));
        }
        let support = self.format_support(tex.format);
        let plane_format = tex.format.planes().get(desc.plane as usize).map(|p| p.view_format);
        let ok = match desc.kind {
            ViewKind::ShaderResource => {
                tex.bind.contains(BindFlags::SHADER_RESOURCE)
                    && support.contains(FormatSupport::SHADER_SAMPLE)
                    && plane_format == Some(desc.format)
            }
            ViewKind::RenderTarget => {
                tex.bind.contains(BindFlags::RENDER_TARGET)
                    && support.contains(FormatSupport::RENDER_TARGET)
                    && plane_format == Some(desc.format)
            }
            ViewKind::DecoderOutput { .. } => tex.bind.contains(BindFlags::DECODER) && desc.format == tex.format,
            ViewKind::ProcessorInput => {
                support.contains(FormatSupport::VIDEO_PROCESSOR_INPUT) && desc.format == tex.format
            }
            ViewKind::ProcessorOutput => {
                tex.bind.contains(BindFlags::RENDER_TARGET)
                    && support.contains(FormatSupport::VIDEO_PROCESSOR_OUTPUT)
                    && desc.format == tex.format
            }
        };
        if !ok {
            return Err(invalid(format!("cannot create {:?} view of {:?}", desc.kind, tex.format)));
        }
        let handle = ViewHandle(self.state.next_id());
        resources.views.insert(
            handle,
            ViewEntry {
                texture,
                desc: *desc,
            },
        );
        StatsCounters::bump(&self.state.stats.views_created);
        Ok(handle)
    }

    fn destroy_view(&self, view: ViewHandle) {
        self.state.resources.lock().views.remove(&view);
    }

    fn copy_subresource(
        &self,
        dst: TextureHandle,
        dst_slice: u32,
        src: TextureHandle,
        src_slice: u32,
    ) -> NativeResult<()> {
        self.state.alive()?;
        let resources = self.state.resources.lock();
        if resources.mapped.contains(&dst) || resources.mapped.contains(&src) {
            return Err(invalid("copy involving a mapped texture"));
        }
        let d = resources.texture(dst)?;
        let s = resources.texture(src)?;
        if d.desc.width != s.desc.width || d.desc.height != s.desc.height || d.desc.format != s.desc.format {
            return Err(invalid("copy between differently shaped textures"));
        }
        let dst_mem = d
            .slices
            .get(dst_slice as usize)
            .ok_or_else(|| invalid("destination slice out of range"))?;
        let src_mem = s
            .slices
            .get(src_slice as usize)
            .ok_or_else(|| invalid("source slice out of range"))?;
        if !Arc::ptr_eq(dst_mem, src_mem) {
            let data = src_mem.lock().clone();
            dst_mem.lock().copy_from_slice(&data);
        }
        let counter = match (s.desc.usage, d.desc.usage) {
            (TextureUsage::Default, TextureUsage::Staging) => &self.state.stats.downloads,
            (TextureUsage::Staging, TextureUsage::Default) => &self.state.stats.uploads,
            _ => &self.state.stats.copies,
        };
        StatsCounters::bump(counter);
        Ok(())
    }

    fn update_texture(&self, texture: TextureHandle, slice: u32, data: &[u8], row_pitch: usize) -> NativeResult<()> {
        self.state.alive()?;
        let resources = self.state.resources.lock();
        let entry = resources.texture(texture)?;
        let memory = entry
            .slices
            .get(slice as usize)
            .ok_or_else(|| invalid("slice out of range"))?;
        let mut bytes = memory.lock();
        let mut src_offset = 0;
        for (plane, info) in entry.desc.format.planes().iter().enumerate() {
            let row_bytes = info.row_bytes(entry.desc.width);
            if row_pitch < row_bytes {
                return Err(invalid("row pitch smaller than a row"));
            }
            for y in 0..info.height(entry.desc.height) as usize {
                let src = data
                    .get(src_offset..src_offset + row_bytes)
                    .ok_or_else(|| invalid("update data too small"))?;
                let dst = entry.layout.offsets[plane] + y * entry.layout.pitch;
                bytes[dst..dst + row_bytes].copy_from_slice(src);
                src_offset += row_pitch;
            }
        }
        StatsCounters::bump(&self.state.stats.uploads);
        Ok(())
    }

    fn map_staging(&self, staging: TextureHandle) -> NativeResult<MappedSubresource> {
        self.state.alive()?;
        let mut resources = self.state.resources.lock();
        let entry = resources.texture(staging)?;
        if entry.desc.usage != TextureUsage::Staging {
            return Err(invalid("only staging textures can be mapped"));
        }
        let mapped = MappedSubresource {
            row_pitch: entry.layout.pitch,
            plane_offsets: entry.layout.offsets.clone(),
            memory: entry.slices[0].clone(),
        };
        if !resources.mapped.insert(staging) {
            return Err(invalid("texture is already mapped"));
        }
        StatsCounters::bump(&self.state.stats.maps);
        Ok(mapped)
    }

    fn unmap_staging(&self, staging: TextureHandle) {
        if self.state.resources.lock().mapped.remove(&staging) {
            StatsCounters::bump(&self.state.stats.unmaps);
        }
    }

    fn clear_render_target(&self, view: ViewHandle, color: [f32; 4]) -> NativeResult<()> {
        self.state.alive()?;
        let surface = self.state.resources.lock().view_surface(view, ViewKind::RenderTarget)?;
        raster::clear(&surface, color);
        StatsCounters::bump(&self.state.stats.clears);
        Ok(())
    }

    fn create_buffer(&self, kind: BufferKind, data: &[u8]) -> NativeResult<BufferHandle> {
        self.state.alive()?;
        let handle = BufferHandle(self.state.next_id());
        self.state.resources.lock().buffers.insert(handle, (kind, data.to_vec()));
        Ok(handle)
    }

    fn update_buffer(&self, buffer: BufferHandle, data: &[u8]) -> NativeResult<()> {
        self.state.alive()?;
        let mut resources = self.state.resources.lock();
        let (_, contents) = resources
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| invalid("unknown buffer"))?;
        contents.clear();
        contents.extend_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.state.resources.lock().buffers.remove(&buffer);
    }

    fn create_vertex_shader(&self, blob: &ShaderBlob) -> NativeResult<ShaderHandle> {
        self.state.alive()?;
        if blob.stage != ShaderStage::Vertex {
            return Err(invalid(format!("{} is not a vertex shader", blob.entry_point)));
        }
        let handle = ShaderHandle(self.state.next_id());
        self.state.resources.lock().shaders.insert(
            handle,
            ShaderEntry {
                stage: ShaderStage::Vertex,
                program: None,
            },
        );
        Ok(handle)
    }

    fn create_pixel_shader(&self, blob: &ShaderBlob) -> NativeResult<ShaderHandle> {
        self.state.alive()?;
        let program = match (blob.stage, blob.program) {
            (ShaderStage::Pixel, Some(program)) => program,
            _ => {
                return Err(NativeError::Compile(format!(
                    "{} has no interpretable pixel program",
                    blob.entry_point
                )))
            }
        };
        let handle = ShaderHandle(self.state.next_id());
        self.state.resources.lock().shaders.insert(
            handle,
            ShaderEntry {
                stage: ShaderStage::Pixel,
                program: Some(program),
            },
        );
        Ok(handle)
    }

    fn destroy_shader(&self, shader: ShaderHandle) {
        self.state.resources.lock().shaders.remove(&shader);
    }

    fn create_sampler(&self, filter: SamplerFilter) -> NativeResult<SamplerHandle> {
        self.state.alive()?;
        let handle = SamplerHandle(self.state.next_id());
        self.state.resources.lock().samplers.insert(handle, filter);
        Ok(handle)
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.state.resources.lock().samplers.remove(&sampler);
    }

    fn draw(&self, pass: &DrawPass) -> NativeResult<()> {
        self.state.alive()?;
        let job = {
            let resources = self.state.resources.lock();
            self.build_job(&resources, pass)?
        };
        raster::execute(&job)?;
        StatsCounters::bump(&self.state.stats.draws);
        Ok(())
    }

    fn create_video_processor(&self, desc: &ProcessorDesc) -> NativeResult<Box<dyn NativeVideoProcessor>> {
        self.state.alive()?;
        if self.state.options.disable_processor {
            return Err(NativeError::Unsupported("video processor disabled".into()));
        }
        if !self.format_support(desc.input_format).contains(FormatSupport::VIDEO_PROCESSOR_INPUT)
            || !self.format_support(desc.output_format).contains(FormatSupport::VIDEO_PROCESSOR_OUTPUT)
        {
            return Err(NativeError::Unsupported(format!(
                "no processor path {:?} -> {:?}",
                desc.input_format, desc.output_format
            )));
        }
        let processor = SoftwareProcessor::new(self.state.clone(), desc)?;
        debug!(
            "Created software video processor {} -> {}",
            desc.input.format, desc.output.format
        );
        Ok(Box::new(processor))
    }

    fn export_shared_handle(&self, texture: TextureHandle) -> NativeResult<SharedHandle> {
        self.state.alive()?;
        let mut resources = self.state.resources.lock();
        let entry = resources
            .textures
            .get_mut(&texture)
            .ok_or_else(|| invalid("unknown texture"))?;
        if !entry
            .desc
            .misc
            .intersects(MiscFlags::SHARED | MiscFlags::SHARED_KEYED_MUTEX)
        {
            return Err(invalid("texture was not created shareable"));
        }
        if let Some(handle) = entry.shared {
            return Ok(handle);
        }
        let handle = shared::publish(SharedEntry {
            luid: self.state.info.luid,
            desc: entry.desc,
            slices: entry.slices.clone(),
            keyed_mutex: entry.keyed_mutex.clone(),
        });
        entry.shared = Some(handle);
        Ok(handle)
    }

    fn open_shared_handle(&self, handle: SharedHandle) -> NativeResult<(TextureHandle, TextureDesc)> {
        self.state.alive()?;
        let shared = shared::lookup(handle).ok_or_else(|| invalid(format!("unknown shared handle {:?}", handle)))?;
        if shared.luid != self.state.info.luid {
            return Err(invalid("shared handle belongs to another adapter"));
        }
        let layout = shared
            .desc
            .format
            .slice_layout(shared.desc.width, shared.desc.height, ROW_ALIGNMENT);
        let texture = TextureHandle(self.state.next_id());
        self.state.resources.lock().textures.insert(
            texture,
            TextureEntry {
                desc: shared.desc,
                layout,
                slices: shared.slices,
                keyed_mutex: shared.keyed_mutex,
                shared: Some(handle),
            },
        );
        StatsCounters::bump(&self.state.stats.textures_created);
        Ok((texture, shared.desc))
    }

    fn close_shared_handle(&self, handle: SharedHandle) {
        shared::close(handle);
    }

    fn acquire_keyed_mutex(&self, texture: TextureHandle, key: u64, timeout: Duration) -> NativeResult<()> {
        self.keyed_mutex(texture)?.acquire(key, timeout)
    }

    fn release_keyed_mutex(&self, texture: TextureHandle, key: u64) -> NativeResult<()> {
        self.keyed_mutex(texture)?.release(key)
    }

    fn removed_reason(&self) -> Option<NativeError> {
        self.state.removed.lock().clone()
    }

    fn flush(&self) {}

    fn stats(&self) -> DeviceStats {
        self.state.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba(width: u32, height: u32) -> TextureDesc {
        TextureDesc::new(width, height, NativeFormat::Rgba8Unorm)
            .with_bind(BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET)
    }

    #[test]
    fn test_staging_roundtrip_counts_transfers() {
        let dev = SoftwareDevice::new(SoftwareOptions::default());
        let desc = rgba(8, 4);
        let tex = dev.create_texture(&desc).unwrap();
        let staging = dev.create_texture(&desc.staging()).unwrap();

        let rtv = dev
            .create_view(
                tex,
                &ViewDesc {
                    kind: ViewKind::RenderTarget,
                    format: NativeFormat::Rgba8Unorm,
                    plane: 0,
                    array_slice: 0,
                },
            )
            .unwrap();
        dev.clear_render_target(rtv, [1.0, 0.0, 0.0, 1.0]).unwrap();
        dev.copy_subresource(staging, 0, tex, 0).unwrap();

        let mapped = dev.map_staging(staging).unwrap();
        assert_eq!(mapped.row_pitch, ROW_ALIGNMENT);
        assert_eq!(&mapped.memory.lock()[..4], &[255, 0, 0, 255]);
        assert!(dev.copy_subresource(tex, 0, staging, 0).is_err());
        dev.unmap_staging(staging);

        let stats = dev.stats();
        assert_eq!(stats.downloads, 1);
        assert_eq!(stats.maps, 1);
        assert_eq!(stats.unmaps, 1);
        assert_eq!(stats.clears, 1);
    }

    #[test]
    fn test_disabled_format_is_unsupported() {
        let dev = SoftwareDevice::new(SoftwareOptions {
            disabled_formats: vec![NativeFormat::Nv12],
            ..Default::default()
        });
        assert!(dev.format_support(NativeFormat::Nv12).is_empty());
        assert!(matches!(
            dev.create_texture(&TextureDesc::new(16, 16, NativeFormat::Nv12)),
            Err(NativeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_packed_422_is_not_renderable() {
        let dev = SoftwareDevice::new(SoftwareOptions::default());
        let desc = TextureDesc::new(16, 16, NativeFormat::Yuy2).with_bind(BindFlags::RENDER_TARGET);
        assert!(dev.create_texture(&desc).is_err());
    }

    #[test]
    fn test_debug_rejection() {
        let options = SoftwareOptions {
            reject_debug: true,
            ..Default::default()
        };
        assert!(SoftwareDevice::create(options.clone(), true).is_err());
        assert!(SoftwareDevice::create(options, false).is_ok());
    }

    #[test]
    fn test_removed_device_fails_calls() {
        let dev = SoftwareDevice::new(SoftwareOptions::default());
        dev.simulate_removal("hung");
        assert!(matches!(
            dev.create_texture(&rgba(4, 4)),
            Err(NativeError::DeviceRemoved(_))
        ));
        assert!(dev.removed_reason().is_some());
    }

    #[test]
    fn test_shared_texture_is_visible_to_other_device() {
        let a = SoftwareDevice::new(SoftwareOptions::default());
        let b = SoftwareDevice::new(SoftwareOptions::default());
        let desc = rgba(4, 4).with_misc(MiscFlags::SHARED_KEYED_MUTEX);
        let tex = a.create_texture(&desc).unwrap();
        let handle = a.export_shared_handle(tex).unwrap();
        assert_eq!(a.export_shared_handle(tex).unwrap(), handle);

        let (opened, opened_desc) = b.open_shared_handle(handle).unwrap();
        assert_eq!(opened_desc, desc);
        a.update_texture(tex, 0, &[7u8; 16 * 4], 16).unwrap();

        let staging = b.create_texture(&desc.staging()).unwrap();
        b.copy_subresource(staging, 0, opened, 0).unwrap();
        assert_eq!(b.map_staging(staging).unwrap().memory.lock()[0], 7);

        a.acquire_keyed_mutex(tex, 0, Duration::from_millis(10)).unwrap();
        assert_eq!(
            b.acquire_keyed_mutex(opened, 0, Duration::from_millis(10)),
            Err(NativeError::Timeout)
        );
        a.release_keyed_mutex(tex, 1).unwrap();
        b.acquire_keyed_mutex(opened, 1, Duration::from_millis(10)).unwrap();
        a.close_shared_handle(handle);
    }
}
