//! Hardware device on top of wgpu.
//!
//! wgpu has no CPU-visible textures, so staging surfaces are host memory
//! with a 256-byte row pitch: downloads read back through a mapped buffer,
//! uploads go through `Queue::write_texture`. Multi-planar and packed video
//! surfaces are not exposed; those formats resolve to per-plane textures.
//! The video processor only performs same-format copies.

mod pipeline;

use self::pipeline::{BindingShape, PipelineBuilder, PipelineKey, PipelineLayouts};
use crate::device::AdapterSelector;
use crate::error::{NativeError, NativeResult};
use crate::native::{
    AdapterInfo, BindFlags, BufferHandle, BufferKind, DeviceStats, DrawPass, FormatSupport, MappedSubresource,
    NativeDevice, NativeFormat, NativeVideoProcessor, ProcessorBlit, ProcessorCaps, ProcessorDesc, ProcessorRotation,
    SamplerFilter, SamplerHandle, ShaderHandle, SharedHandle, SliceLayout, StagingMemory, StatsCounters, TextureDesc,
    TextureHandle, TextureUsage, ViewDesc, ViewHandle, ViewKind,
};
use crate::shader::program::PixelProgram;
use crate::shader::{ShaderBlob, ShaderStage};
use gpuframe_color::HdrMetadata;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use wgpu::util::DeviceExt;

/// Row pitch alignment of staging memory.
pub const ROW_ALIGNMENT: usize = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;

fn invalid(msg: impl Into<String>) -> NativeError {
    NativeError::InvalidCall(msg.into())
}

fn texture_format(format: NativeFormat) -> Option<wgpu::TextureFormat> {
    use NativeFormat::*;
    Some(match format {
        R8Unorm => wgpu::TextureFormat::R8Unorm,
        Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        R16Unorm => wgpu::TextureFormat::R16Unorm,
        Rg16Unorm => wgpu::TextureFormat::Rg16Unorm,
        Rgba16Unorm => wgpu::TextureFormat::Rgba16Unorm,
        Rgb10a2Unorm => wgpu::TextureFormat::Rgb10a2Unorm,
        R32Float => wgpu::TextureFormat::R32Float,
        Nv12 | P010 | P016 | Yuy2 | Y210 | Y410 | Ayuv => return None,
    })
}

const PLAIN_FORMATS: [NativeFormat; 9] = [
    NativeFormat::R8Unorm,
    NativeFormat::Rg8Unorm,
    NativeFormat::Rgba8Unorm,
    NativeFormat::Bgra8Unorm,
    NativeFormat::R16Unorm,
    NativeFormat::Rg16Unorm,
    NativeFormat::Rgba16Unorm,
    NativeFormat::Rgb10a2Unorm,
    NativeFormat::R32Float,
];

fn query_support(adapter: &wgpu::Adapter, features: wgpu::Features) -> HashMap<NativeFormat, FormatSupport> {
    let mut table = HashMap::new();
    for format in PLAIN_FORMATS {
        let Some(wgpu_format) = texture_format(format) else {
            continue;
        };
        if !features.contains(wgpu_format.required_features()) {
            continue;
        }
        let caps = adapter.get_texture_format_features(wgpu_format);
        let usages = caps.allowed_usages;
        let mut support = FormatSupport::empty();
        if usages.contains(wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST) {
            support |= FormatSupport::TEXTURE2D;
        }
        if usages.contains(wgpu::TextureUsages::TEXTURE_BINDING)
            && (caps.flags.contains(wgpu::TextureFormatFeatureFlags::FILTERABLE) || format == NativeFormat::R32Float)
        {
            support |= FormatSupport::SHADER_SAMPLE;
        }
        if usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT) {
            support |= FormatSupport::RENDER_TARGET;
        }
        if usages.contains(wgpu::TextureUsages::COPY_SRC) {
            support |= FormatSupport::CPU_ACCESS;
        }
        if matches!(format, NativeFormat::Rgba8Unorm | NativeFormat::Bgra8Unorm)
            && usages.contains(wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST)
        {
            support |= FormatSupport::VIDEO_PROCESSOR_INPUT | FormatSupport::VIDEO_PROCESSOR_OUTPUT;
        }
        table.insert(format, support);
    }
    table
}

// ── Resources ──────────────────────────────────────────────────

struct TextureEntry {
    desc: TextureDesc,
    texture: Option<wgpu::Texture>,
    /// Host memory of a staging surface.
    shadow: Option<(SliceLayout, StagingMemory)>,
}

struct ViewEntry {
    texture: TextureHandle,
    desc: ViewDesc,
    view: wgpu::TextureView,
}

struct ShaderEntry {
    stage: ShaderStage,
    module: wgpu::ShaderModule,
    program: Option<PixelProgram>,
}

#[derive(Default)]
struct Resources {
    textures: HashMap<TextureHandle, TextureEntry>,
    views: HashMap<ViewHandle, ViewEntry>,
    buffers: HashMap<BufferHandle, (BufferKind, wgpu::Buffer)>,
    shaders: HashMap<ShaderHandle, ShaderEntry>,
    samplers: HashMap<SamplerHandle, wgpu::Sampler>,
}

impl Resources {
    fn texture(&self, handle: TextureHandle) -> NativeResult<&TextureEntry> {
        self.textures
            .get(&handle)
            .ok_or_else(|| invalid(format!("unknown texture {:?}", handle)))
    }

    fn gpu_texture(&self, handle: TextureHandle) -> NativeResult<&wgpu::Texture> {
        self.texture(handle)?
            .texture
            .as_ref()
            .ok_or_else(|| invalid("staging texture used as a GPU resource"))
    }

    fn view(&self, handle: ViewHandle, kind: ViewKind) -> NativeResult<&ViewEntry> {
        let view = self
            .views
            .get(&handle)
            .ok_or_else(|| invalid(format!("unknown view {:?}", handle)))?;
        if view.desc.kind != kind {
            return Err(invalid(format!("{:?} is not a {:?} view", handle, kind)));
        }
        Ok(view)
    }

    fn buffer(&self, handle: BufferHandle) -> NativeResult<&wgpu::Buffer> {
        self.buffers
            .get(&handle)
            .map(|(_, b)| b)
            .ok_or_else(|| invalid(format!("unknown buffer {:?}", handle)))
    }
}

// ── Device ─────────────────────────────────────────────────────

struct State {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: AdapterInfo,
    support: HashMap<NativeFormat, FormatSupport>,
    resources: Mutex<Resources>,
    layouts: Mutex<HashMap<BindingShape, Arc<PipelineLayouts>>>,
    pipelines: Mutex<HashMap<PipelineKey, Arc<wgpu::RenderPipeline>>>,
    next_id: AtomicU64,
    stats: StatsCounters,
    removed: Arc<Mutex<Option<NativeError>>>,
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

    /// Run `f` inside validation and out-of-memory error scopes.
    fn scoped<T>(&self, f: impl FnOnce() -> T) -> NativeResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if oom.is_some() {
            return Err(NativeError::OutOfMemory);
        }
        match validation {
            Some(e) => Err(NativeError::InvalidCall(e.to_string())),
            None => Ok(value),
        }
    }

    fn copy_texture(&self, resources: &Resources, dst: TextureHandle, dst_slice: u32, src: TextureHandle, src_slice: u32) -> NativeResult<()> {
        let src_tex = resources.gpu_texture(src)?;
        let dst_tex = resources.gpu_texture(dst)?;
        let desc = resources.texture(src)?.desc;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("copy") });
        encoder.copy_texture_to_texture(
            image_copy(src_tex, src_slice),
            image_copy(dst_tex, dst_slice),
            extent(&desc),
        );
        self.scoped(|| {
            self.queue.submit(Some(encoder.finish()));
        })
    }

    /// GPU slice to staging memory.
    fn download(&self, texture: &wgpu::Texture, slice: u32, desc: &TextureDesc, layout: &SliceLayout, memory: &StagingMemory) -> NativeResult<()> {
        let height = desc.height;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: (layout.pitch * height as usize) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_texture_to_buffer(
            image_copy(texture, slice),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(layout.pitch as u32),
                    rows_per_image: Some(height),
                },
            },
            extent(desc),
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| NativeError::Backend(format!("readback channel closed: {}", e)))?
            .map_err(|e| NativeError::Backend(format!("readback map failed: {}", e)))?;
        {
            let data = buffer_slice.get_mapped_range();
            memory.lock()[..data.len()].copy_from_slice(&data);
        }
        buffer.unmap();
        Ok(())
    }

    /// Staging memory to a GPU slice.
    fn upload(&self, texture: &wgpu::Texture, slice: u32, desc: &TextureDesc, data: &[u8], row_pitch: usize) {
        self.queue.write_texture(
            image_copy(texture, slice),
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(row_pitch as u32),
                rows_per_image: Some(desc.height),
            },
            extent(desc),
        );
    }
}

fn image_copy(texture: &wgpu::Texture, slice: u32) -> wgpu::ImageCopyTexture<'_> {
    wgpu::ImageCopyTexture {
        texture,
        mip_level: 0,
        origin: wgpu::Origin3d { x: 0, y: 0, z: slice },
        aspect: wgpu::TextureAspect::All,
    }
}

fn extent(desc: &TextureDesc) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: desc.width,
        height: desc.height,
        depth_or_array_layers: 1,
    }
}

/// wgpu implementation of [`NativeDevice`].
pub struct WgpuDevice {
    state: Arc<State>,
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice").field("adapter", &self.state.info).finish()
    }
}

fn select_adapter(instance: &wgpu::Instance, selector: &AdapterSelector) -> Option<(u32, wgpu::Adapter)> {
    let mut adapters = instance.enumerate_adapters(wgpu::Backends::all());
    match selector {
        AdapterSelector::Default | AdapterSelector::Software => {
            let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: *selector == AdapterSelector::Software,
            }))?;
            let info = adapter.get_info();
            let index = adapters
                .iter()
                .position(|a| a.get_info() == info)
                .unwrap_or(0) as u32;
            Some((index, adapter))
        }
        AdapterSelector::Index(index) => {
            let i = *index as usize;
            (i < adapters.len()).then(|| (*index, adapters.swap_remove(i)))
        }
        AdapterSelector::Vendor(vendor) => {
            let i = adapters.iter().position(|a| a.get_info().vendor == *vendor)?;
            Some((i as u32, adapters.swap_remove(i)))
        }
    }
}

impl WgpuDevice {
    pub async fn new(selector: &AdapterSelector, debug: bool) -> NativeResult<Self> {
        let flags = if debug {
            wgpu::InstanceFlags::DEBUG | wgpu::InstanceFlags::VALIDATION
        } else {
            wgpu::InstanceFlags::empty()
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags,
            ..Default::default()
        });

        let (index, adapter) = select_adapter(&instance, selector)
            .ok_or_else(|| NativeError::Unsupported(format!("no adapter matches {:?}", selector)))?;
        let adapter_info = adapter.get_info();
        info!("Using GPU adapter: {:?}", adapter_info);

        let features = adapter.features() & wgpu::Features::TEXTURE_FORMAT_16BIT_NORM;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("gpuframe device"),
                    required_features: features,
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| NativeError::Backend(format!("Failed to create device: {}", e)))?;

        let removed = Arc::new(Mutex::new(None));
        let lost = removed.clone();
        device.set_device_lost_callback(move |reason, message| {
            error!("GPU device lost ({:?}): {}", reason, message);
            *lost.lock() = Some(NativeError::DeviceRemoved(message));
        });
        device.on_uncaptured_error(Box::new(|e| {
            error!("Uncaptured GPU error: {}", e);
        }));

        let support = query_support(&adapter, features);
        let info = AdapterInfo {
            index,
            luid: (adapter_info.vendor as u64) << 32 | adapter_info.device as u64,
            vendor_id: adapter_info.vendor,
            device_id: adapter_info.device,
            software: adapter_info.device_type == wgpu::DeviceType::Cpu,
            feature_level: 0xb100,
            description: adapter_info.name.clone(),
            backend: adapter_info.backend.to_str(),
        };

        Ok(Self {
            state: Arc::new(State {
                device,
                queue,
                info,
                support,
                resources: Mutex::new(Resources::default()),
                layouts: Mutex::new(HashMap::new()),
                pipelines: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                stats: StatsCounters::default(),
                removed,
            }),
        })
    }

    /// Create a device (blocking version).
    pub fn new_blocking(selector: &AdapterSelector, debug: bool) -> NativeResult<Self> {
        pollster::block_on(Self::new(selector, debug))
    }

    fn layouts(&self, shape: BindingShape) -> Arc<PipelineLayouts> {
        self.state
            .layouts
            .lock()
            .entry(shape)
            .or_insert_with(|| PipelineLayouts::new(&self.state.device, shape))
            .clone()
    }
}

impl NativeDevice for WgpuDevice {
    fn adapter_info(&self) -> &AdapterInfo {
        &self.state.info
    }

    fn format_support(&self, format: NativeFormat) -> FormatSupport {
        self.state.support.get(&format).copied().unwrap_or_default()
    }

    fn create_texture(&self, desc: &TextureDesc) -> NativeResult<TextureHandle> {
        self.state.alive()?;
        let format = texture_format(desc.format)
            .filter(|_| self.format_support(desc.format).contains(FormatSupport::TEXTURE2D))
            .ok_or_else(|| NativeError::Unsupported(format!("{:?}", desc.format)))?;
        if !desc.misc.is_empty() {
            return Err(NativeError::Unsupported("shared textures".into()));
        }
        let entry = match desc.usage {
            TextureUsage::Staging => {
                let layout = desc.format.slice_layout(desc.width, desc.height, ROW_ALIGNMENT);
                let memory = Arc::new(Mutex::new(vec![0u8; layout.size]));
                TextureEntry {
                    desc: *desc,
                    texture: None,
                    shadow: Some((layout, memory)),
                }
            }
            TextureUsage::Default => {
                let mut usage = wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
                if desc.bind.contains(BindFlags::SHADER_RESOURCE) {
                    usage |= wgpu::TextureUsages::TEXTURE_BINDING;
                }
                if desc.bind.contains(BindFlags::RENDER_TARGET) {
                    usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
                }
                if desc.bind.contains(BindFlags::UNORDERED_ACCESS) {
                    usage |= wgpu::TextureUsages::STORAGE_BINDING;
                }
                let texture = self.state.scoped(|| {
                    self.state.device.create_texture(&wgpu::TextureDescriptor {
                        label: Some("gpuframe texture"),
                        size: wgpu::Extent3d {
                            width: desc.width,
                            height: desc.height,
                            depth_or_array_layers: desc.array_size.max(1),
                        },
                        mip_level_count: 1,
                        sample_count: desc.sample_count.max(1),
                        dimension: wgpu::TextureDimension::D2,
                        format,
                        usage,
                        view_formats: &[],
                    })
                })?;
                TextureEntry {
                    desc: *desc,
                    texture: Some(texture),
                    shadow: None,
                }
            }
        };
        let handle = TextureHandle(self.state.next_id());
        self.state.resources.lock().textures.insert(handle, entry);
        StatsCounters::bump(&self.state.stats.textures_created);
        Ok(handle)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        if let Some(entry) = self.state.resources.lock().textures.remove(&texture) {
            if let Some(t) = entry.texture {
                t.destroy();
            }
            StatsCounters::bump(&self.state.stats.textures_destroyed);
        }
    }

    fn create_view(&self, texture: TextureHandle, desc: &ViewDesc) -> NativeResult<ViewHandle> {
        self.state.alive()?;
        let mut resources = self.state.resources.lock();
        let entry = resources.texture(texture)?;
        let tex = entry.desc;
        let gpu = entry.texture.as_ref().ok_or_else(|| invalid("staging textures have no views"))?;
        let bind_ok = match desc.kind {
            ViewKind::ShaderResource => tex.bind.contains(BindFlags::SHADER_RESOURCE),
            ViewKind::RenderTarget | ViewKind::ProcessorOutput => tex.bind.contains(BindFlags::RENDER_TARGET),
            ViewKind::ProcessorInput => true,
            ViewKind::DecoderOutput { .. } => false,
        };
        if !bind_ok || desc.format != tex.format || desc.plane != 0 || desc.array_slice >= tex.array_size {
            return Err(invalid(format!("cannot create {:?} view of {:?}", desc.kind, tex.format)));
        }
        let view = gpu.create_view(&wgpu::TextureViewDescriptor {
            label: None,
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_array_layer: desc.array_slice,
            array_layer_count: Some(1),
            ..Default::default()
        });
        let handle = ViewHandle(self.state.next_id());
        resources.views.insert(
            handle,
            ViewEntry {
                texture,
                desc: *desc,
                view,
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
        let d = resources.texture(dst)?;
        let s = resources.texture(src)?;
        if d.desc.width != s.desc.width || d.desc.height != s.desc.height || d.desc.format != s.desc.format {
            return Err(invalid("copy between differently shaped textures"));
        }
        match (&s.texture, &s.shadow, &d.texture, &d.shadow) {
            (Some(texture), _, _, Some((layout, memory))) => {
                self.state.download(texture, src_slice, &s.desc, layout, memory)?;
                StatsCounters::bump(&self.state.stats.downloads);
            }
            (_, Some((layout, memory)), Some(texture), _) => {
                let data = memory.lock();
                self.state.upload(texture, dst_slice, &d.desc, &data, layout.pitch);
                StatsCounters::bump(&self.state.stats.uploads);
            }
            (_, Some((_, from)), _, Some((_, to))) => {
                if !Arc::ptr_eq(from, to) {
                    let data = from.lock().clone();
                    to.lock().copy_from_slice(&data);
                }
                StatsCounters::bump(&self.state.stats.copies);
            }
            _ => {
                self.state.copy_texture(&resources, dst, dst_slice, src, src_slice)?;
                StatsCounters::bump(&self.state.stats.copies);
            }
        }
        Ok(())
    }

    fn update_texture(&self, texture: TextureHandle, slice: u32, data: &[u8], row_pitch: usize) -> NativeResult<()> {
        self.state.alive()?;
        let resources = self.state.resources.lock();
        let entry = resources.texture(texture)?;
        match (&entry.texture, &entry.shadow) {
            (Some(t), _) => self.state.upload(t, slice, &entry.desc, data, row_pitch),
            (None, Some((layout, memory))) => {
                let row_bytes = entry.desc.format.planes()[0].row_bytes(entry.desc.width);
                let mut bytes = memory.lock();
                for y in 0..entry.desc.height as usize {
                    let src = data
                        .get(y * row_pitch..y * row_pitch + row_bytes)
                        .ok_or_else(|| invalid("update data too small"))?;
                    bytes[y * layout.pitch..y * layout.pitch + row_bytes].copy_from_slice(src);
                }
            }
            (None, None) => return Err(invalid("texture has no storage")),
        }
        StatsCounters::bump(&self.state.stats.uploads);
        Ok(())
    }

    fn map_staging(&self, staging: TextureHandle) -> NativeResult<MappedSubresource> {
        self.state.alive()?;
        let resources = self.state.resources.lock();
        let (layout, memory) = resources
            .texture(staging)?
            .shadow
            .as_ref()
            .ok_or_else(|| invalid("only staging textures can be mapped"))?;
        StatsCounters::bump(&self.state.stats.maps);
        Ok(MappedSubresource {
            row_pitch: layout.pitch,
            plane_offsets: layout.offsets.clone(),
            memory: memory.clone(),
        })
    }

    fn unmap_staging(&self, _staging: TextureHandle) {
        StatsCounters::bump(&self.state.stats.unmaps);
    }

    fn clear_render_target(&self, view: ViewHandle, color: [f32; 4]) -> NativeResult<()> {
        self.state.alive()?;
        let resources = self.state.resources.lock();
        let target = &resources.view(view, ViewKind::RenderTarget)?.view;
        let mut encoder = self
            .state
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("clear") });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: color[0] as f64,
                            g: color[1] as f64,
                            b: color[2] as f64,
                            a: color[3] as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.state.scoped(|| {
            self.state.queue.submit(Some(encoder.finish()));
        })?;
        StatsCounters::bump(&self.state.stats.clears);
        Ok(())
    }

    fn create_buffer(&self, kind: BufferKind, data: &[u8]) -> NativeResult<BufferHandle> {
        self.state.alive()?;
        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
            BufferKind::Constant => wgpu::BufferUsages::UNIFORM,
        } | wgpu::BufferUsages::COPY_DST;
        let buffer = self.state.scoped(|| {
            self.state.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("gpuframe buffer"),
                contents: data,
                usage,
            })
        })?;
        let handle = BufferHandle(self.state.next_id());
        self.state.resources.lock().buffers.insert(handle, (kind, buffer));
        Ok(handle)
    }

    fn update_buffer(&self, buffer: BufferHandle, data: &[u8]) -> NativeResult<()> {
        self.state.alive()?;
        let resources = self.state.resources.lock();
        let target = resources.buffer(buffer)?;
        if (data.len() as u64) > target.size() {
            return Err(invalid("buffer update larger than buffer"));
        }
        self.state.queue.write_buffer(target, 0, data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.state.resources.lock().buffers.remove(&buffer);
    }

    fn create_vertex_shader(&self, blob: &ShaderBlob) -> NativeResult<ShaderHandle> {
        self.create_shader(blob, ShaderStage::Vertex)
    }

    fn create_pixel_shader(&self, blob: &ShaderBlob) -> NativeResult<ShaderHandle> {
        self.create_shader(blob, ShaderStage::Pixel)
    }

    fn destroy_shader(&self, shader: ShaderHandle) {
        self.state.resources.lock().shaders.remove(&shader);
    }

    fn create_sampler(&self, filter: SamplerFilter) -> NativeResult<SamplerHandle> {
        self.state.alive()?;
        let mode = match filter {
            SamplerFilter::Point => wgpu::FilterMode::Nearest,
            SamplerFilter::Linear => wgpu::FilterMode::Linear,
        };
        let sampler = self.state.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("input sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: mode,
            min_filter: mode,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let handle = SamplerHandle(self.state.next_id());
        self.state.resources.lock().samplers.insert(handle, sampler);
        Ok(handle)
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.state.resources.lock().samplers.remove(&sampler);
    }

    fn draw(&self, pass: &DrawPass) -> NativeResult<()> {
        self.state.alive()?;
        let resources = self.state.resources.lock();
        let vs = resources
            .shaders
            .get(&pass.vertex_shader)
            .filter(|s| s.stage == ShaderStage::Vertex)
            .ok_or_else(|| invalid("vertex shader not bound"))?;
        let ps = resources
            .shaders
            .get(&pass.pixel_shader)
            .filter(|s| s.stage == ShaderStage::Pixel)
            .ok_or_else(|| invalid("pixel shader not bound"))?;
        let program = ps.program.ok_or_else(|| invalid("pixel shader without program"))?;
        let shape = BindingShape {
            textures: program.sample.input_count(),
            luts: program.convert.uses_luts(),
        };

        let targets = pass
            .render_targets
            .iter()
            .map(|&v| resources.view(v, ViewKind::RenderTarget))
            .collect::<NativeResult<SmallVec<[&ViewEntry; 4]>>>()?;
        let formats: SmallVec<[wgpu::TextureFormat; 4]> = targets
            .iter()
            .filter_map(|t| texture_format(t.desc.format))
            .collect();

        let layouts = self.layouts(shape);
        let key = PipelineKey {
            vertex_shader: pass.vertex_shader.0,
            pixel_shader: pass.pixel_shader.0,
            targets: formats.clone(),
            blend: pass.blend,
            sample_mask: pass.sample_mask,
        };
        let pipeline = {
            let mut cache = self.state.pipelines.lock();
            match cache.get(&key) {
                Some(p) => p.clone(),
                None => {
                    let entry_point = program.entry_point();
                    let built = self.state.scoped(|| {
                        PipelineBuilder::new(&self.state.device, &vs.module, &ps.module, &entry_point, &layouts.pipeline)
                            .with_targets(&formats, pass.blend)
                            .with_sample_mask(pass.sample_mask)
                            .build()
                    });
                    let built = Arc::new(built.map_err(|e| NativeError::Compile(e.to_string()))?);
                    debug!("Created pipeline {}", entry_point);
                    cache.insert(key, built.clone());
                    built
                }
            }
        };

        let vs_group = self.state.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("vs constants"),
            layout: &layouts.vertex,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: resources.buffer(pass.vs_constants)?.as_entire_binding(),
            }],
        });

        let sampler = resources
            .samplers
            .get(&pass.sampler)
            .ok_or_else(|| invalid("sampler not bound"))?;
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: resources.buffer(pass.ps_constants)?.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ];
        if pass.shader_resources.len() < shape.textures {
            return Err(invalid("too few shader resources bound"));
        }
        for (i, &view) in pass.shader_resources.iter().take(shape.textures).enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: crate::shader::render::FIRST_TEXTURE_BINDING + i as u32,
                resource: wgpu::BindingResource::TextureView(&resources.view(view, ViewKind::ShaderResource)?.view),
            });
        }
        if shape.luts {
            let [decode, encode] = pass.luts.ok_or_else(|| invalid("gamma tables not bound"))?;
            entries.push(wgpu::BindGroupEntry {
                binding: crate::shader::render::DECODE_LUT_BINDING,
                resource: wgpu::BindingResource::TextureView(&resources.view(decode, ViewKind::ShaderResource)?.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: crate::shader::render::ENCODE_LUT_BINDING,
                resource: wgpu::BindingResource::TextureView(&resources.view(encode, ViewKind::ShaderResource)?.view),
            });
        }
        let ps_group = self.state.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ps resources"),
            layout: &layouts.pixel,
            entries: &entries,
        });

        let attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = targets
            .iter()
            .map(|t| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &t.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();

        let mut encoder = self
            .state
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("draw") });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("convert"),
                color_attachments: &attachments,
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_pipeline(&pipeline);
            rpass.set_bind_group(0, &vs_group, &[]);
            rpass.set_bind_group(1, &ps_group, &[]);
            rpass.set_vertex_buffer(0, resources.buffer(pass.vertex_buffer)?.slice(..));
            rpass.set_index_buffer(resources.buffer(pass.index_buffer)?.slice(..), wgpu::IndexFormat::Uint16);
            let vp = pass.viewport;
            rpass.set_viewport(vp.x, vp.y, vp.width, vp.height, 0.0, 1.0);
            let f = pass.blend_factor;
            rpass.set_blend_constant(wgpu::Color {
                r: f[0] as f64,
                g: f[1] as f64,
                b: f[2] as f64,
                a: f[3] as f64,
            });
            rpass.draw_indexed(0..pass.index_count, 0, 0..1);
        }
        self.state.scoped(|| {
            self.state.queue.submit(Some(encoder.finish()));
        })?;
        StatsCounters::bump(&self.state.stats.draws);
        Ok(())
    }

    fn create_video_processor(&self, desc: &ProcessorDesc) -> NativeResult<Box<dyn NativeVideoProcessor>> {
        self.state.alive()?;
        let same_stream = desc.input_format == desc.output_format
            && desc.input.width == desc.output.width
            && desc.input.height == desc.output.height
            && desc.input_color_space == desc.output_color_space
            && self
                .format_support(desc.input_format)
                .contains(FormatSupport::VIDEO_PROCESSOR_INPUT | FormatSupport::VIDEO_PROCESSOR_OUTPUT);
        if !same_stream {
            return Err(NativeError::Unsupported("processor only copies between identical streams".into()));
        }
        Ok(Box::new(CopyProcessor {
            state: self.state.clone(),
        }))
    }

    fn export_shared_handle(&self, _texture: TextureHandle) -> NativeResult<SharedHandle> {
        Err(NativeError::Unsupported("shared handles".into()))
    }

    fn open_shared_handle(&self, _handle: SharedHandle) -> NativeResult<(TextureHandle, TextureDesc)> {
        Err(NativeError::Unsupported("shared handles".into()))
    }

    fn close_shared_handle(&self, _handle: SharedHandle) {}

    fn acquire_keyed_mutex(&self, _texture: TextureHandle, _key: u64, _timeout: Duration) -> NativeResult<()> {
        Err(NativeError::Unsupported("keyed mutexes".into()))
    }

    fn release_keyed_mutex(&self, _texture: TextureHandle, _key: u64) -> NativeResult<()> {
        Err(NativeError::Unsupported("keyed mutexes".into()))
    }

    fn removed_reason(&self) -> Option<NativeError> {
        self.state.removed.lock().clone()
    }

    fn flush(&self) {
        self.state.device.poll(wgpu::Maintain::Poll);
    }

    fn stats(&self) -> DeviceStats {
        self.state.stats.snapshot()
    }
}

impl WgpuDevice {
    fn create_shader(&self, blob: &ShaderBlob, stage: ShaderStage) -> NativeResult<ShaderHandle> {
        self.state.alive()?;
        if blob.stage != stage {
            return Err(invalid(format!("{} is not a {:?} shader", blob.entry_point, stage)));
        }
        let module = self
            .state
            .scoped(|| {
                self.state.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(blob.entry_point.as_str()),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&*blob.source)),
                })
            })
            .map_err(|e| {
                warn!("Shader {} failed to compile", blob.entry_point);
                NativeError::Compile(e.to_string())
            })?;
        let handle = ShaderHandle(self.state.next_id());
        self.state.resources.lock().shaders.insert(
            handle,
            ShaderEntry {
                stage,
                module,
                program: blob.program,
            },
        );
        Ok(handle)
    }
}

/// Same-format, same-size copy exposed as a video processor.
struct CopyProcessor {
    state: Arc<State>,
}

impl std::fmt::Debug for CopyProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyProcessor").finish()
    }
}

impl NativeVideoProcessor for CopyProcessor {
    fn caps(&self) -> ProcessorCaps {
        ProcessorCaps::empty()
    }

    fn set_hdr_metadata(&self, _input: Option<&HdrMetadata>, _output: Option<&HdrMetadata>) -> NativeResult<()> {
        Err(NativeError::Unsupported("HDR metadata".into()))
    }

    fn blit(&self, blit: &ProcessorBlit) -> NativeResult<()> {
        self.state.alive()?;
        if blit.rotation != ProcessorRotation::Identity || blit.flip_horizontal || blit.flip_vertical {
            return Err(NativeError::Unsupported("processor orientation".into()));
        }
        let resources = self.state.resources.lock();
        let input = resources.view(blit.input, ViewKind::ProcessorInput)?;
        let output = resources.view(blit.output, ViewKind::ProcessorOutput)?;
        let desc = resources.texture(input.texture)?.desc;
        if blit.src_rect != blit.dst_rect || !blit.src_rect.covers(desc.width, desc.height) {
            return Err(NativeError::Unsupported("processor scaling".into()));
        }
        self.state
            .copy_texture(&resources, output.texture, output.desc.array_slice, input.texture, input.desc.array_slice)?;
        StatsCounters::bump(&self.state.stats.processor_blits);
        Ok(())
    }
}
