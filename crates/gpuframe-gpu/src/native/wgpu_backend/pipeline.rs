//! Bind group layouts and render pipelines for conversion draws.

use crate::native::{BlendDesc, BlendFactor, BlendOp};
use crate::shader::render::{DECODE_LUT_BINDING, ENCODE_LUT_BINDING, FIRST_TEXTURE_BINDING};
use smallvec::SmallVec;
use std::sync::Arc;

/// Identifies one render pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub vertex_shader: u64,
    pub pixel_shader: u64,
    pub targets: SmallVec<[wgpu::TextureFormat; 4]>,
    pub blend: Option<BlendDesc>,
    pub sample_mask: u32,
}

/// Shape of the pixel shader bind group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingShape {
    pub textures: usize,
    pub luts: bool,
}

pub struct PipelineBuilder<'a> {
    device: &'a wgpu::Device,
    label: &'a str,
    vertex: &'a wgpu::ShaderModule,
    pixel: &'a wgpu::ShaderModule,
    pixel_entry: &'a str,
    layout: &'a wgpu::PipelineLayout,
    targets: Vec<Option<wgpu::ColorTargetState>>,
    sample_mask: u32,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(
        device: &'a wgpu::Device,
        vertex: &'a wgpu::ShaderModule,
        pixel: &'a wgpu::ShaderModule,
        pixel_entry: &'a str,
        layout: &'a wgpu::PipelineLayout,
    ) -> Self {
        Self {
            device,
            label: pixel_entry,
            vertex,
            pixel,
            pixel_entry,
            layout,
            targets: Vec::new(),
            sample_mask: u32::MAX,
        }
    }

    pub fn with_targets(mut self, formats: &[wgpu::TextureFormat], blend: Option<BlendDesc>) -> Self {
        let blend = blend.map(blend_state);
        self.targets = formats
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        self
    }

    pub fn with_sample_mask(mut self, mask: u32) -> Self {
        self.sample_mask = mask;
        self
    }

    pub fn build(self) -> wgpu::RenderPipeline {
        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(self.label),
            layout: Some(self.layout),
            vertex: wgpu::VertexState {
                module: self.vertex,
                entry_point: Some(crate::shader::VERTEX_ENTRY_POINT),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<crate::shader::layout::Vertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: self.pixel,
                entry_point: Some(self.pixel_entry),
                targets: &self.targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: self.sample_mask as u64,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        })
    }
}

fn blend_factor(f: BlendFactor) -> wgpu::BlendFactor {
    match f {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::InvSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::InvSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::InvDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::InvDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        BlendFactor::BlendFactor => wgpu::BlendFactor::Constant,
        BlendFactor::InvBlendFactor => wgpu::BlendFactor::OneMinusConstant,
    }
}

fn blend_component(src: BlendFactor, dst: BlendFactor, op: BlendOp) -> wgpu::BlendComponent {
    let operation = match op {
        BlendOp::Add => wgpu::BlendOperation::Add,
        BlendOp::Subtract => wgpu::BlendOperation::Subtract,
        BlendOp::RevSubtract => wgpu::BlendOperation::ReverseSubtract,
        BlendOp::Min => wgpu::BlendOperation::Min,
        BlendOp::Max => wgpu::BlendOperation::Max,
    };
    // min and max ignore the factors and require them to be one
    let (src_factor, dst_factor) = match op {
        BlendOp::Min | BlendOp::Max => (wgpu::BlendFactor::One, wgpu::BlendFactor::One),
        _ => (blend_factor(src), blend_factor(dst)),
    };
    wgpu::BlendComponent {
        src_factor,
        dst_factor,
        operation,
    }
}

pub fn blend_state(desc: BlendDesc) -> wgpu::BlendState {
    wgpu::BlendState {
        color: blend_component(desc.src_color, desc.dst_color, desc.color_op),
        alpha: blend_component(desc.src_alpha, desc.dst_alpha, desc.alpha_op),
    }
}

pub fn vertex_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("vs constants"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

fn texture_entry(binding: u32, filterable: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

pub fn pixel_bind_group_layout(device: &wgpu::Device, shape: BindingShape) -> wgpu::BindGroupLayout {
    let mut entries = vec![
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        },
    ];
    for i in 0..shape.textures {
        entries.push(texture_entry(FIRST_TEXTURE_BINDING + i as u32, true));
    }
    if shape.luts {
        entries.push(texture_entry(DECODE_LUT_BINDING, false));
        entries.push(texture_entry(ENCODE_LUT_BINDING, false));
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("ps resources"),
        entries: &entries,
    })
}

/// Layouts shared by every pipeline with the same binding shape.
pub struct PipelineLayouts {
    pub vertex: wgpu::BindGroupLayout,
    pub pixel: wgpu::BindGroupLayout,
    pub pipeline: wgpu::PipelineLayout,
}

impl PipelineLayouts {
    pub fn new(device: &wgpu::Device, shape: BindingShape) -> Arc<Self> {
        let vertex = vertex_bind_group_layout(device);
        let pixel = pixel_bind_group_layout(device, shape);
        let pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("converter"),
            bind_group_layouts: &[&vertex, &pixel],
            push_constant_ranges: &[],
        });
        Arc::new(Self {
            vertex,
            pixel,
            pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_max_force_unit_factors() {
        let c = blend_component(BlendFactor::SrcAlpha, BlendFactor::Zero, BlendOp::Max);
        assert_eq!(c.src_factor, wgpu::BlendFactor::One);
        assert_eq!(c.dst_factor, wgpu::BlendFactor::One);
    }

    #[test]
    fn test_premultiplied_over() {
        let state = blend_state(BlendDesc::PREMULTIPLIED_OVER);
        assert_eq!(state.color.src_factor, wgpu::BlendFactor::One);
        assert_eq!(state.color.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
    }
}
