//! Seam between the frame engine and a native GPU device.
//!
//! A [`NativeDevice`] is a device together with its immediate context.
//! Everything above this module talks to the GPU through it, so the same
//! engine runs on wgpu or on the CPU reference device used by the tests.
//! Handles are plain ids; ownership is expressed by the RAII wrappers at
//! the bottom of this file.

pub mod software;
pub mod wgpu_backend;

use crate::error::{NativeError, NativeResult};
use crate::shader::ShaderBlob;
use bitflags::bitflags;
use gpuframe_color::HdrMetadata;
use gpuframe_core::format::subsample;
use gpuframe_core::{ColorPrimaries, ColorRange, MatrixCoefficients, Rect, TransferFunction, VideoInfo};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Handles ────────────────────────────────────────────────────

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

native_handle!(
    /// A texture or staging surface.
    TextureHandle
);
native_handle!(
    /// A typed view onto one plane and slice of a texture.
    ViewHandle
);
native_handle!(
    /// A vertex, index or constant buffer.
    BufferHandle
);
native_handle!(
    /// A compiled vertex or pixel shader.
    ShaderHandle
);
native_handle!(SamplerHandle);
native_handle!(
    /// Cross-device handle to a shareable texture.
    SharedHandle
);

// ── Formats ────────────────────────────────────────────────────

/// Native surface format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Bgra8Unorm,
    R16Unorm,
    Rg16Unorm,
    Rgba16Unorm,
    Rgb10a2Unorm,
    R32Float,
    /// 8-bit 4:2:0, R8 luma plane + RG8 chroma plane
    Nv12,
    /// 10-bit 4:2:0 in 16-bit words
    P010,
    /// 16-bit 4:2:0
    P016,
    /// 8-bit packed 4:2:2
    Yuy2,
    /// 10-bit packed 4:2:2 in 16-bit words
    Y210,
    /// 10-bit packed 4:4:4 with 2-bit alpha, viewed as RGB10A2 (U, Y, V, A)
    Y410,
    /// 8-bit packed 4:4:4:4, viewed as RGBA8 (V, U, Y, A)
    Ayuv,
}

/// One plane of a native format, as seen through a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativePlane {
    pub view_format: NativeFormat,
    pub w_sub: u8,
    pub h_sub: u8,
}

impl NativePlane {
    const fn new(view_format: NativeFormat, w_sub: u8, h_sub: u8) -> Self {
        Self {
            view_format,
            w_sub,
            h_sub,
        }
    }

    pub fn width(&self, width: u32) -> u32 {
        subsample(width, self.w_sub)
    }

    pub fn height(&self, height: u32) -> u32 {
        subsample(height, self.h_sub)
    }

    pub fn row_bytes(&self, width: u32) -> usize {
        self.width(width) as usize * self.view_format.texel_size()
    }
}

const fn single(format: NativeFormat) -> [NativePlane; 1] {
    [NativePlane::new(format, 0, 0)]
}

const R8_PLANES: &[NativePlane] = &single(NativeFormat::R8Unorm);
const RG8_PLANES: &[NativePlane] = &single(NativeFormat::Rg8Unorm);
const RGBA8_PLANES: &[NativePlane] = &single(NativeFormat::Rgba8Unorm);
const BGRA8_PLANES: &[NativePlane] = &single(NativeFormat::Bgra8Unorm);
const R16_PLANES: &[NativePlane] = &single(NativeFormat::R16Unorm);
const RG16_PLANES: &[NativePlane] = &single(NativeFormat::Rg16Unorm);
const RGBA16_PLANES: &[NativePlane] = &single(NativeFormat::Rgba16Unorm);
const RGB10A2_PLANES: &[NativePlane] = &single(NativeFormat::Rgb10a2Unorm);
const R32F_PLANES: &[NativePlane] = &single(NativeFormat::R32Float);
const NV12_PLANES: &[NativePlane] = &[
    NativePlane::new(NativeFormat::R8Unorm, 0, 0),
    NativePlane::new(NativeFormat::Rg8Unorm, 1, 1),
];
const P01X_PLANES: &[NativePlane] = &[
    NativePlane::new(NativeFormat::R16Unorm, 0, 0),
    NativePlane::new(NativeFormat::Rg16Unorm, 1, 1),
];
// packed 4:2:2: one texel holds two horizontal pixels
const YUY2_PLANES: &[NativePlane] = &[NativePlane::new(NativeFormat::Rgba8Unorm, 1, 0)];
const Y210_PLANES: &[NativePlane] = &[NativePlane::new(NativeFormat::Rgba16Unorm, 1, 0)];

impl NativeFormat {
    /// Planes addressable through views, in view index order.
    pub fn planes(self) -> &'static [NativePlane] {
        use NativeFormat::*;
        match self {
            R8Unorm => R8_PLANES,
            Rg8Unorm => RG8_PLANES,
            Rgba8Unorm | Ayuv => RGBA8_PLANES,
            Bgra8Unorm => BGRA8_PLANES,
            R16Unorm => R16_PLANES,
            Rg16Unorm => RG16_PLANES,
            Rgba16Unorm => RGBA16_PLANES,
            Rgb10a2Unorm | Y410 => RGB10A2_PLANES,
            R32Float => R32F_PLANES,
            Nv12 => NV12_PLANES,
            P010 | P016 => P01X_PLANES,
            Yuy2 => YUY2_PLANES,
            Y210 => Y210_PLANES,
        }
    }

    pub fn plane_count(self) -> usize {
        self.planes().len()
    }

    /// Video surface formats that only exist as whole textures.
    pub fn is_video(self) -> bool {
        use NativeFormat::*;
        matches!(self, Nv12 | P010 | P016 | Yuy2 | Y210 | Y410 | Ayuv)
    }

    /// Bytes per texel of a plain (view) format.
    pub fn texel_size(self) -> usize {
        use NativeFormat::*;
        match self {
            R8Unorm => 1,
            Rg8Unorm | R16Unorm => 2,
            Rgba8Unorm | Bgra8Unorm | Rg16Unorm | Rgb10a2Unorm | R32Float => 4,
            Rgba16Unorm => 8,
            Nv12 => 1,
            P010 | P016 => 2,
            Yuy2 | Y410 | Ayuv => 4,
            Y210 => 8,
        }
    }

    /// Byte layout of one slice when mapped, with rows aligned to `pitch_align`.
    pub fn slice_layout(self, width: u32, height: u32, pitch_align: usize) -> SliceLayout {
        let planes = self.planes();
        let widest = planes.iter().map(|p| p.row_bytes(width)).max().unwrap_or(0);
        let pitch = widest.div_ceil(pitch_align) * pitch_align;
        let mut offsets = SmallVec::new();
        let mut size = 0;
        for plane in planes {
            offsets.push(size);
            size += pitch * plane.height(height) as usize;
        }
        SliceLayout {
            pitch,
            offsets,
            size,
        }
    }
}

/// Byte layout of a mapped slice: one shared row pitch, planes stacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceLayout {
    pub pitch: usize,
    pub offsets: SmallVec<[usize; 2]>,
    pub size: usize,
}

// ── Flags ──────────────────────────────────────────────────────

bitflags! {
    /// Pipeline stages a texture may be bound to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct BindFlags: u32 {
        const SHADER_RESOURCE = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const DECODER = 1 << 2;
        const VIDEO_ENCODER = 1 << 3;
        const UNORDERED_ACCESS = 1 << 4;
    }
}

bitflags! {
    /// Sharing options of a texture.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MiscFlags: u32 {
        const SHARED = 1 << 0;
        const SHARED_KEYED_MUTEX = 1 << 1;
        const SHARED_NT_HANDLE = 1 << 2;
    }
}

bitflags! {
    /// What a device can do with a native format.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FormatSupport: u32 {
        const TEXTURE2D = 1 << 0;
        const SHADER_SAMPLE = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DECODER_OUTPUT = 1 << 3;
        const VIDEO_PROCESSOR_INPUT = 1 << 4;
        const VIDEO_PROCESSOR_OUTPUT = 1 << 5;
        const SHAREABLE = 1 << 6;
        const CPU_ACCESS = 1 << 7;
    }
}

bitflags! {
    /// Optional features of a video processor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ProcessorCaps: u32 {
        const ROTATION = 1 << 0;
        const MIRROR = 1 << 1;
        const HDR_METADATA = 1 << 2;
        const SCALING = 1 << 3;
        const BACKGROUND = 1 << 4;
    }
}

// ── Descriptors ────────────────────────────────────────────────

/// GPU-only or CPU-mappable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureUsage {
    #[default]
    Default,
    Staging,
}

/// Native surface description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: NativeFormat,
    /// Always 1.
    pub mip_levels: u32,
    pub array_size: u32,
    pub sample_count: u32,
    pub sample_quality: u32,
    pub usage: TextureUsage,
    pub bind: BindFlags,
    pub misc: MiscFlags,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: NativeFormat) -> Self {
        Self {
            width,
            height,
            format,
            mip_levels: 1,
            array_size: 1,
            sample_count: 1,
            sample_quality: 0,
            usage: TextureUsage::Default,
            bind: BindFlags::SHADER_RESOURCE,
            misc: MiscFlags::empty(),
        }
    }

    pub fn with_bind(mut self, bind: BindFlags) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_misc(mut self, misc: MiscFlags) -> Self {
        self.misc = misc;
        self
    }

    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size.max(1);
        self
    }

    /// Single-slice CPU-mappable twin of this surface.
    pub fn staging(&self) -> Self {
        Self {
            array_size: 1,
            usage: TextureUsage::Staging,
            bind: BindFlags::empty(),
            misc: MiscFlags::empty(),
            ..*self
        }
    }
}

/// Pipeline stage a view binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    ShaderResource,
    RenderTarget,
    DecoderOutput { profile: u32 },
    ProcessorInput,
    ProcessorOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewDesc {
    pub kind: ViewKind,
    pub format: NativeFormat,
    pub plane: u32,
    pub array_slice: u32,
}

/// CPU memory backing one mapped staging slice.
pub type StagingMemory = Arc<Mutex<Vec<u8>>>;

/// Result of mapping a staging surface.
#[derive(Debug, Clone)]
pub struct MappedSubresource {
    pub row_pitch: usize,
    pub plane_offsets: SmallVec<[usize; 2]>,
    pub memory: StagingMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Constant,
}

/// Texture filtering used when sampling input planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerFilter {
    Point,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn from_rect(rect: Rect) -> Self {
        Self {
            x: rect.x as f32,
            y: rect.y as f32,
            width: rect.width as f32,
            height: rect.height as f32,
        }
    }
}

// ── Blending ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DstColor,
    InvDstColor,
    DstAlpha,
    InvDstAlpha,
    BlendFactor,
    InvBlendFactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendOp {
    Add,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

/// Output merger blend state for all render targets of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlendDesc {
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
}

impl BlendDesc {
    /// Source over destination with straight alpha.
    pub const ALPHA_OVER: Self = Self {
        src_color: BlendFactor::SrcAlpha,
        dst_color: BlendFactor::InvSrcAlpha,
        color_op: BlendOp::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::InvSrcAlpha,
        alpha_op: BlendOp::Add,
    };

    /// Source over destination with premultiplied alpha.
    pub const PREMULTIPLIED_OVER: Self = Self {
        src_color: BlendFactor::One,
        dst_color: BlendFactor::InvSrcAlpha,
        color_op: BlendOp::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::InvSrcAlpha,
        alpha_op: BlendOp::Add,
    };

    /// Output scaled by the blend factor over the destination.
    pub const CONSTANT: Self = Self {
        src_color: BlendFactor::BlendFactor,
        dst_color: BlendFactor::InvBlendFactor,
        color_op: BlendOp::Add,
        src_alpha: BlendFactor::BlendFactor,
        dst_alpha: BlendFactor::InvBlendFactor,
        alpha_op: BlendOp::Add,
    };
}

// ── Draw ───────────────────────────────────────────────────────

/// Everything one indexed draw call binds.
#[derive(Debug, Clone)]
pub struct DrawPass {
    pub vertex_shader: ShaderHandle,
    pub pixel_shader: ShaderHandle,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub vs_constants: BufferHandle,
    pub ps_constants: BufferHandle,
    pub shader_resources: SmallVec<[ViewHandle; 4]>,
    /// Gamma decode and encode tables, when the pixel shader uses them.
    pub luts: Option<[ViewHandle; 2]>,
    pub render_targets: SmallVec<[ViewHandle; 4]>,
    pub viewport: Viewport,
    pub sampler: SamplerHandle,
    pub blend: Option<BlendDesc>,
    pub blend_factor: [f32; 4],
    pub sample_mask: u32,
}

// ── Video processor ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorMatrix {
    Bt601,
    Bt709,
    Bt2020,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorTransfer {
    Sdr,
    Linear,
    Pq,
    Hlg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorPrimaries {
    Bt709,
    Bt2020,
}

/// Color space as a fixed-function video processor understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorColorSpace {
    pub yuv: bool,
    pub full_range: bool,
    pub matrix: Option<ProcessorMatrix>,
    pub transfer: ProcessorTransfer,
    pub primaries: ProcessorPrimaries,
}

impl ProcessorColorSpace {
    /// Map a stream's colorimetry, if a processor can express it.
    pub fn from_info(info: &VideoInfo) -> Option<Self> {
        let c = &info.colorimetry;
        let yuv = info.format.is_yuv();
        let matrix = match (yuv, c.matrix) {
            (false, _) => None,
            (true, MatrixCoefficients::Bt601) => Some(ProcessorMatrix::Bt601),
            (true, MatrixCoefficients::Bt709) => Some(ProcessorMatrix::Bt709),
            (true, MatrixCoefficients::Bt2020) => Some(ProcessorMatrix::Bt2020),
            (true, _) => return None,
        };
        let transfer = match c.transfer {
            TransferFunction::Linear if !yuv => ProcessorTransfer::Linear,
            TransferFunction::Pq => ProcessorTransfer::Pq,
            TransferFunction::Hlg if yuv => ProcessorTransfer::Hlg,
            TransferFunction::Bt709
            | TransferFunction::Bt601
            | TransferFunction::Bt2020Bit10
            | TransferFunction::Bt2020Bit12
            | TransferFunction::Srgb
            | TransferFunction::Gamma22 => ProcessorTransfer::Sdr,
            _ => return None,
        };
        let primaries = match c.primaries {
            ColorPrimaries::Bt709 | ColorPrimaries::Bt470bg | ColorPrimaries::Smpte170m => {
                ProcessorPrimaries::Bt709
            }
            ColorPrimaries::Bt2020 => ProcessorPrimaries::Bt2020,
            _ => return None,
        };
        Some(Self {
            yuv,
            full_range: c.range == ColorRange::Full,
            matrix,
            transfer,
            primaries,
        })
    }
}

/// What a video processor converts between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessorDesc {
    pub input: VideoInfo,
    pub output: VideoInfo,
    pub input_format: NativeFormat,
    pub output_format: NativeFormat,
    pub input_color_space: ProcessorColorSpace,
    pub output_color_space: ProcessorColorSpace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessorRotation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
}

/// One processor blit; mirroring applies after rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessorBlit {
    pub input: ViewHandle,
    pub output: ViewHandle,
    pub src_rect: Rect,
    pub dst_rect: Rect,
    pub rotation: ProcessorRotation,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    /// Fill for the area outside `dst_rect`, in output code values.
    pub background: Option<[f32; 4]>,
}

/// Fixed-function conversion engine of a device.
pub trait NativeVideoProcessor: Send + Sync + fmt::Debug {
    fn caps(&self) -> ProcessorCaps;

    fn set_hdr_metadata(
        &self,
        input: Option<&HdrMetadata>,
        output: Option<&HdrMetadata>,
    ) -> NativeResult<()>;

    fn blit(&self, blit: &ProcessorBlit) -> NativeResult<()>;
}

// ── Device ─────────────────────────────────────────────────────

/// Identity of the adapter behind a native device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub index: u32,
    pub luid: u64,
    pub vendor_id: u32,
    pub device_id: u32,
    pub software: bool,
    /// Encoded as major << 12 | minor << 8, e.g. 0xb100 for 11.1.
    pub feature_level: u32,
    pub description: String,
    pub backend: &'static str,
}

/// Counters of native work, for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStats {
    pub draws: u64,
    pub clears: u64,
    pub maps: u64,
    pub unmaps: u64,
    /// GPU to staging copies.
    pub downloads: u64,
    /// Staging to GPU copies.
    pub uploads: u64,
    /// GPU to GPU copies.
    pub copies: u64,
    pub textures_created: u64,
    pub textures_destroyed: u64,
    pub views_created: u64,
    pub processor_blits: u64,
}

/// Lock-free counters behind [`DeviceStats`].
#[derive(Debug, Default)]
pub struct StatsCounters {
    pub draws: AtomicU64,
    pub clears: AtomicU64,
    pub maps: AtomicU64,
    pub unmaps: AtomicU64,
    pub downloads: AtomicU64,
    pub uploads: AtomicU64,
    pub copies: AtomicU64,
    pub textures_created: AtomicU64,
    pub textures_destroyed: AtomicU64,
    pub views_created: AtomicU64,
    pub processor_blits: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeviceStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DeviceStats {
            draws: get(&self.draws),
            clears: get(&self.clears),
            maps: get(&self.maps),
            unmaps: get(&self.unmaps),
            downloads: get(&self.downloads),
            uploads: get(&self.uploads),
            copies: get(&self.copies),
            textures_created: get(&self.textures_created),
            textures_destroyed: get(&self.textures_destroyed),
            views_created: get(&self.views_created),
            processor_blits: get(&self.processor_blits),
        }
    }
}

/// A native device and its immediate context.
///
/// Implementations synchronize internally; callers additionally serialize
/// context work through the owning [`crate::Device`] lock.
pub trait NativeDevice: Send + Sync + fmt::Debug {
    fn adapter_info(&self) -> &AdapterInfo;

    fn format_support(&self, format: NativeFormat) -> FormatSupport;

    fn create_texture(&self, desc: &TextureDesc) -> NativeResult<TextureHandle>;

    fn destroy_texture(&self, texture: TextureHandle);

    fn create_view(&self, texture: TextureHandle, desc: &ViewDesc) -> NativeResult<ViewHandle>;

    fn destroy_view(&self, view: ViewHandle);

    /// Copy one slice into another of the same shape; either side may be staging.
    fn copy_subresource(
        &self,
        dst: TextureHandle,
        dst_slice: u32,
        src: TextureHandle,
        src_slice: u32,
    ) -> NativeResult<()>;

    /// Replace the contents of one slice from tightly described rows.
    fn update_texture(
        &self,
        texture: TextureHandle,
        slice: u32,
        data: &[u8],
        row_pitch: usize,
    ) -> NativeResult<()>;

    fn map_staging(&self, staging: TextureHandle) -> NativeResult<MappedSubresource>;

    fn unmap_staging(&self, staging: TextureHandle);

    fn clear_render_target(&self, view: ViewHandle, color: [f32; 4]) -> NativeResult<()>;

    fn create_buffer(&self, kind: BufferKind, data: &[u8]) -> NativeResult<BufferHandle>;

    fn update_buffer(&self, buffer: BufferHandle, data: &[u8]) -> NativeResult<()>;

    fn destroy_buffer(&self, buffer: BufferHandle);

    fn create_vertex_shader(&self, blob: &ShaderBlob) -> NativeResult<ShaderHandle>;

    fn create_pixel_shader(&self, blob: &ShaderBlob) -> NativeResult<ShaderHandle>;

    fn destroy_shader(&self, shader: ShaderHandle);

    fn create_sampler(&self, filter: SamplerFilter) -> NativeResult<SamplerHandle>;

    fn destroy_sampler(&self, sampler: SamplerHandle);

    fn draw(&self, pass: &DrawPass) -> NativeResult<()>;

    fn create_video_processor(
        &self,
        desc: &ProcessorDesc,
    ) -> NativeResult<Box<dyn NativeVideoProcessor>>;

    fn export_shared_handle(&self, texture: TextureHandle) -> NativeResult<SharedHandle>;

    /// Open a texture exported by any device on this adapter.
    fn open_shared_handle(&self, handle: SharedHandle) -> NativeResult<(TextureHandle, TextureDesc)>;

    fn close_shared_handle(&self, handle: SharedHandle);

    fn acquire_keyed_mutex(&self, texture: TextureHandle, key: u64, timeout: Duration) -> NativeResult<()>;

    fn release_keyed_mutex(&self, texture: TextureHandle, key: u64) -> NativeResult<()>;

    /// Why the device stopped working, if it did.
    fn removed_reason(&self) -> Option<NativeError>;

    fn flush(&self);

    fn stats(&self) -> DeviceStats;
}

// ── RAII wrappers ──────────────────────────────────────────────

/// Owned native texture, destroyed on drop.
#[derive(Debug)]
pub struct NativeTexture {
    native: Arc<dyn NativeDevice>,
    handle: TextureHandle,
    desc: TextureDesc,
}

impl NativeTexture {
    pub fn create(native: &Arc<dyn NativeDevice>, desc: &TextureDesc) -> NativeResult<Self> {
        let handle = native.create_texture(desc)?;
        Ok(Self::from_raw(native.clone(), handle, *desc))
    }

    /// Take ownership of an existing handle.
    pub fn from_raw(native: Arc<dyn NativeDevice>, handle: TextureHandle, desc: TextureDesc) -> Self {
        Self {
            native,
            handle,
            desc,
        }
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

impl Drop for NativeTexture {
    fn drop(&mut self) {
        self.native.destroy_texture(self.handle);
    }
}

/// Owned native buffer, destroyed on drop.
#[derive(Debug)]
pub struct NativeBuffer {
    native: Arc<dyn NativeDevice>,
    handle: BufferHandle,
    kind: BufferKind,
}

impl NativeBuffer {
    pub fn create(native: &Arc<dyn NativeDevice>, kind: BufferKind, data: &[u8]) -> NativeResult<Self> {
        let handle = native.create_buffer(kind, data)?;
        Ok(Self {
            native: native.clone(),
            handle,
            kind,
        })
    }

    pub fn update(&self, data: &[u8]) -> NativeResult<()> {
        self.native.update_buffer(self.handle, data)
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        self.native.destroy_buffer(self.handle);
    }
}

/// Owned native view, destroyed on drop.
#[derive(Debug)]
pub struct NativeView {
    native: Arc<dyn NativeDevice>,
    handle: ViewHandle,
}

impl NativeView {
    pub fn create(native: &Arc<dyn NativeDevice>, texture: TextureHandle, desc: &ViewDesc) -> NativeResult<Self> {
        let handle = native.create_view(texture, desc)?;
        Ok(Self {
            native: native.clone(),
            handle,
        })
    }

    pub fn handle(&self) -> ViewHandle {
        self.handle
    }
}

impl Drop for NativeView {
    fn drop(&mut self) {
        self.native.destroy_view(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv12_slice_layout() {
        let layout = NativeFormat::Nv12.slice_layout(64, 48, 64);
        assert_eq!(layout.pitch, 64);
        assert_eq!(layout.offsets.as_slice(), &[0, 64 * 48]);
        assert_eq!(layout.size, 64 * 48 + 64 * 24);
    }

    #[test]
    fn test_odd_width_chroma_fits_pitch() {
        // 33 luma bytes, 17 RG8 chroma texels = 34 bytes
        let layout = NativeFormat::Nv12.slice_layout(33, 3, 1);
        assert_eq!(layout.pitch, 34);
        assert_eq!(layout.size, 34 * 3 + 34 * 2);
    }

    #[test]
    fn test_packed_422_plane_is_half_width() {
        let plane = NativeFormat::Yuy2.planes()[0];
        assert_eq!(plane.view_format, NativeFormat::Rgba8Unorm);
        assert_eq!(plane.width(64), 32);
        assert_eq!(plane.row_bytes(64), 128);
    }

    #[test]
    fn test_plane_tables() {
        assert_eq!(NativeFormat::P016.planes(), NativeFormat::P010.planes());
        assert_eq!(NativeFormat::Nv12.plane_count(), 2);
        assert_eq!(NativeFormat::Nv12.planes()[1].height(33), 17);
        assert_eq!(NativeFormat::Ayuv.planes()[0].view_format, NativeFormat::Rgba8Unorm);
        assert_eq!(NativeFormat::Y410.planes()[0].view_format, NativeFormat::Rgb10a2Unorm);
        assert_eq!(NativeFormat::R32Float.plane_count(), 1);
    }

    #[test]
    fn test_staging_desc() {
        let desc = TextureDesc::new(16, 16, NativeFormat::P010)
            .with_bind(BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE)
            .with_array_size(8);
        let staging = desc.staging();
        assert_eq!(staging.array_size, 1);
        assert_eq!(staging.usage, TextureUsage::Staging);
        assert!(staging.bind.is_empty());
        assert_eq!(staging.format, NativeFormat::P010);
    }

    #[test]
    fn test_processor_color_space() {
        use gpuframe_core::{Colorimetry, VideoFormat};
        let nv12 = VideoInfo::new(VideoFormat::Nv12, 1920, 1080);
        let cs = ProcessorColorSpace::from_info(&nv12).unwrap();
        assert!(cs.yuv);
        assert!(!cs.full_range);
        assert_eq!(cs.matrix, Some(ProcessorMatrix::Bt709));

        let pq = VideoInfo::new(VideoFormat::P010, 3840, 2160).with_colorimetry(Colorimetry::BT2100_PQ);
        assert_eq!(ProcessorColorSpace::from_info(&pq).unwrap().transfer, ProcessorTransfer::Pq);

        let odd = nv12.with_colorimetry(Colorimetry::BT709.with_transfer(TransferFunction::Log100));
        assert!(ProcessorColorSpace::from_info(&odd).is_none());
    }
}
