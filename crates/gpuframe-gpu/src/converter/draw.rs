//! Shader conversion backend: one full-frame quad per output pass.

use super::geometry::ConvertGeometry;
use super::matrices::ConversionMatrices;
use crate::buffer_pool::Frame;
use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::memory::MapMode;
use crate::native::{
    BufferKind, DrawPass, NativeBuffer, NativeFormat, NativeTexture, NativeView, SamplerFilter, SamplerHandle,
    ShaderHandle, TextureDesc, ViewDesc, ViewKind, ViewHandle, Viewport,
};
use crate::shader::layout::{quad_vertices, PsConstants, Vertex, VsConstants, QUAD_INDICES};
use crate::shader::program::{TargetColors, LUT_WIDTH};
use crate::shader::{build_converter_shaders, ShaderPass};
use gpuframe_color::GammaLut;
use gpuframe_core::{Rect, VideoInfo};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, trace};

struct CompiledPass {
    pixel_shader: ShaderHandle,
    pass: ShaderPass,
}

/// Gamma tables resident on the device. Views drop before their textures.
struct LutTextures {
    views: [NativeView; 2],
    _textures: [NativeTexture; 2],
}

impl LutTextures {
    fn upload(device: &Device, luts: &[Arc<GammaLut>; 2]) -> Result<Self> {
        let native = device.native();
        let desc = TextureDesc::new(LUT_WIDTH, 1, NativeFormat::R32Float);
        let view_desc = ViewDesc {
            kind: ViewKind::ShaderResource,
            format: NativeFormat::R32Float,
            plane: 0,
            array_slice: 0,
        };
        let create = |lut: &GammaLut| -> Result<(NativeTexture, NativeView)> {
            let texture = device.check("CreateTexture2D", NativeTexture::create(native, &desc))?;
            let bytes: &[u8] = bytemuck::cast_slice(lut.table());
            device.check(
                "UpdateSubresource",
                native.update_texture(texture.handle(), 0, bytes, bytes.len()),
            )?;
            let view = device.check("CreateView", NativeView::create(native, texture.handle(), &view_desc))?;
            Ok((texture, view))
        };
        let (decode_texture, decode_view) = create(&luts[0])?;
        let (encode_texture, encode_view) = create(&luts[1])?;
        Ok(Self {
            views: [decode_view, encode_view],
            _textures: [decode_texture, encode_texture],
        })
    }

    fn handles(&self) -> [ViewHandle; 2] {
        [self.views[0].handle(), self.views[1].handle()]
    }
}

/// Converts by drawing with the generated pixel shaders.
pub(super) struct ShaderBackend {
    device: Device,
    input: VideoInfo,
    output: VideoInfo,
    matrices: ConversionMatrices,
    vertex_shader: ShaderHandle,
    passes: SmallVec<[CompiledPass; 2]>,
    sampler: SamplerHandle,
    luts: Option<LutTextures>,
    vertex_buffer: NativeBuffer,
    index_buffer: NativeBuffer,
    vs_buffer: NativeBuffer,
    ps_buffer: NativeBuffer,
    vertices: [Vertex; 4],
    vs_constants: VsConstants,
    ps_constants: PsConstants,
}

impl ShaderBackend {
    pub(super) fn new(
        device: &Device,
        input: &VideoInfo,
        output: &VideoInfo,
        matrices: ConversionMatrices,
        filter: SamplerFilter,
        premul: (bool, bool),
    ) -> Result<Self> {
        let shaders = build_converter_shaders(input.format, output.format, matrices.class.program(), premul.0, premul.1)?;
        let vertex_shader = device.vertex_shader()?;
        let passes = shaders
            .passes
            .into_iter()
            .map(|pass| {
                Ok(CompiledPass {
                    pixel_shader: device.pixel_shader(&pass.pixel)?,
                    pass,
                })
            })
            .collect::<Result<SmallVec<_>>>()?;
        let sampler = device.sampler(filter)?;

        let native = device.native();
        let vertices = quad_vertices(Rect::full(input.width, input.height), input.width, input.height);
        let vs_constants = VsConstants::default();
        let ps_constants = matrices.constants(1.0);
        let buffer = |kind, data: &[u8]| device.check("CreateBuffer", NativeBuffer::create(native, kind, data));
        let vertex_buffer = buffer(BufferKind::Vertex, bytemuck::cast_slice(&vertices))?;
        let index_buffer = buffer(BufferKind::Index, bytemuck::cast_slice(&QUAD_INDICES))?;
        let vs_buffer = buffer(BufferKind::Constant, bytemuck::bytes_of(&vs_constants))?;
        let ps_buffer = buffer(BufferKind::Constant, bytemuck::bytes_of(&ps_constants))?;
        let luts = match &matrices.luts {
            Some(luts) => Some(LutTextures::upload(device, luts)?),
            None => None,
        };

        debug!(
            "Shader backend {} -> {} ({}, {} pass(es))",
            input.format,
            output.format,
            matrices.class,
            passes.len()
        );
        Ok(Self {
            device: device.clone(),
            input: *input,
            output: *output,
            matrices,
            vertex_shader,
            passes,
            sampler,
            luts,
            vertex_buffer,
            index_buffer,
            vs_buffer,
            ps_buffer,
            vertices,
            vs_constants,
            ps_constants,
        })
    }

    pub(super) fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Push changed per-call state into the constant and vertex buffers.
    fn update_buffers(&mut self, input: &Frame, geometry: &ConvertGeometry) -> Result<()> {
        let (width, height) = input
            .surfaces()
            .next()
            .map(|s| s.size())
            .unwrap_or((self.input.width, self.input.height));
        let src = geometry.src_rect_or(self.input.width, self.input.height);
        let vertices = quad_vertices(src, width, height);
        if vertices != self.vertices {
            self.device
                .check("UpdateSubresource", self.vertex_buffer.update(bytemuck::cast_slice(&vertices)))?;
            self.vertices = vertices;
        }
        let vs_constants = geometry.orientation.vs_constants();
        if vs_constants != self.vs_constants {
            self.device
                .check("UpdateSubresource", self.vs_buffer.update(bytemuck::bytes_of(&vs_constants)))?;
            self.vs_constants = vs_constants;
        }
        let ps_constants = self.matrices.constants(geometry.alpha);
        if ps_constants != self.ps_constants {
            self.device
                .check("UpdateSubresource", self.ps_buffer.update(bytemuck::bytes_of(&ps_constants)))?;
            self.ps_constants = ps_constants;
        }
        Ok(())
    }

    /// Draw `input` into `output`, clearing to `border` first when given.
    pub(super) fn convert(
        &mut self,
        input: &Frame,
        output: &Frame,
        geometry: &ConvertGeometry,
        border: Option<&TargetColors>,
    ) -> Result<()> {
        let sources = input
            .shader_resource_views()
            .ok_or_else(|| GpuError::Unsupported(format!("{} input has no shader resource views", input.info().format)))?;
        let targets = output
            .render_target_views()
            .ok_or_else(|| GpuError::InvalidArgument(format!("{} output is not a render target", output.info().format)))?;

        let device = self.device.clone();
        let _ctx = device.lock();
        self.update_buffers(input, geometry)?;
        let _read = input.map_gpu(MapMode::GpuRead)?;
        let _write = output.map_gpu(MapMode::GpuWrite)?;
        let native = self.device.native();

        if let Some(colors) = border {
            for (view, color) in targets.iter().zip(colors.iter()) {
                self.device
                    .check("ClearRenderTargetView", native.clear_render_target(*view, *color))?;
            }
        }

        let dest = geometry.dest_rect_or(self.output.width, self.output.height);
        let (blend, blend_factor, sample_mask) = match geometry.blend {
            Some(b) => (Some(b.desc), b.factor, b.sample_mask),
            None => (None, [1.0; 4], u32::MAX),
        };
        for compiled in &self.passes {
            let out = compiled.pass.output;
            let plane = self
                .output
                .format
                .plane(out.first_plane)
                .ok_or_else(|| GpuError::InvalidArgument(format!("{} has no plane {}", self.output.format, out.first_plane)))?;
            let render_targets = targets
                .get(out.first_plane..out.first_plane + out.plane_count)
                .ok_or_else(|| GpuError::InvalidArgument("output has too few render target views".into()))?
                .iter()
                .copied()
                .collect();
            let pass = DrawPass {
                vertex_shader: self.vertex_shader,
                pixel_shader: compiled.pixel_shader,
                vertex_buffer: self.vertex_buffer.handle(),
                index_buffer: self.index_buffer.handle(),
                index_count: QUAD_INDICES.len() as u32,
                vs_constants: self.vs_buffer.handle(),
                ps_constants: self.ps_buffer.handle(),
                shader_resources: sources.clone(),
                luts: self.luts.as_ref().map(LutTextures::handles),
                render_targets,
                viewport: Viewport::from_rect(dest.subsampled(plane.w_sub, plane.h_sub)),
                sampler: self.sampler,
                blend,
                blend_factor,
                sample_mask,
            };
            trace!("Draw {}", compiled.pass.pixel.entry_point);
            self.device.check("Draw", native.draw(&pass))?;
        }
        Ok(())
    }
}
