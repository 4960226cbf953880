//! Video processor conversion backend.

use super::geometry::ConvertGeometry;
use crate::buffer_pool::Frame;
use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::memory::MapMode;
use crate::native::{
    NativeVideoProcessor, ProcessorBlit, ProcessorCaps, ProcessorColorSpace, ProcessorDesc, ProcessorRotation,
};
use gpuframe_color::HdrMetadata;
use gpuframe_core::VideoInfo;
use tracing::debug;

type HdrPair = (Option<HdrMetadata>, Option<HdrMetadata>);

pub(super) struct ProcessorBackend {
    device: Device,
    processor: Box<dyn NativeVideoProcessor>,
    caps: ProcessorCaps,
    desc: ProcessorDesc,
    /// Metadata last handed to the processor.
    hdr: Option<HdrPair>,
}

impl ProcessorBackend {
    pub(super) fn new(device: &Device, input: &VideoInfo, output: &VideoInfo) -> Result<Self> {
        let native_format = |info: &VideoInfo| {
            device
                .format(info.format)
                .and_then(|d| d.processor_format())
                .ok_or_else(|| GpuError::Unsupported(format!("{} has no single native surface format", info.format)))
        };
        let color_space = |info: &VideoInfo| {
            ProcessorColorSpace::from_info(info)
                .ok_or_else(|| GpuError::Unsupported(format!("{:?} has no processor color space", info.colorimetry)))
        };
        let desc = ProcessorDesc {
            input: *input,
            output: *output,
            input_format: native_format(input)?,
            output_format: native_format(output)?,
            input_color_space: color_space(input)?,
            output_color_space: color_space(output)?,
        };
        let processor = device.check("CreateVideoProcessor", device.native().create_video_processor(&desc))?;
        let caps = processor.caps();
        debug!(
            "Video processor {} -> {} ({:?} -> {:?}), caps {:?}",
            input.format, output.format, desc.input_format, desc.output_format, caps
        );
        Ok(Self {
            device: device.clone(),
            processor,
            caps,
            desc,
            hdr: None,
        })
    }

    pub(super) fn caps(&self) -> ProcessorCaps {
        self.caps
    }

    /// Whether this call's geometry is within what the processor can do.
    pub(super) fn can_handle(&self, geometry: &ConvertGeometry) -> bool {
        if geometry.blend.is_some() || geometry.alpha != 1.0 {
            return false;
        }
        let Some((rotation, flip_h, flip_v)) = geometry.orientation.processor_flags() else {
            return false;
        };
        if rotation != ProcessorRotation::Identity && !self.caps.contains(ProcessorCaps::ROTATION) {
            return false;
        }
        if (flip_h || flip_v) && !self.caps.contains(ProcessorCaps::MIRROR) {
            return false;
        }
        let (input, output) = (&self.desc.input, &self.desc.output);
        let src = geometry.src_rect_or(input.width, input.height);
        let dest = geometry.dest_rect_or(output.width, output.height);
        let (dest_w, dest_h) = if rotation == ProcessorRotation::Rotate90 || rotation == ProcessorRotation::Rotate270 {
            (dest.height, dest.width)
        } else {
            (dest.width, dest.height)
        };
        if (src.width, src.height) != (dest_w, dest_h) && !self.caps.contains(ProcessorCaps::SCALING) {
            return false;
        }
        if geometry.needs_border(output.width, output.height) && !self.caps.contains(ProcessorCaps::BACKGROUND) {
            return false;
        }
        true
    }

    fn apply_hdr(&mut self, geometry: &ConvertGeometry) -> Result<()> {
        let wanted = (geometry.src_hdr, geometry.dest_hdr);
        if self.hdr == Some(wanted) || !self.caps.contains(ProcessorCaps::HDR_METADATA) {
            return Ok(());
        }
        self.device.check(
            "VideoProcessorSetStreamHDRMetaData",
            self.processor.set_hdr_metadata(wanted.0.as_ref(), wanted.1.as_ref()),
        )?;
        self.hdr = Some(wanted);
        Ok(())
    }

    pub(super) fn convert(
        &mut self,
        input: &Frame,
        output: &Frame,
        geometry: &ConvertGeometry,
        background: Option<[f32; 4]>,
    ) -> Result<()> {
        let surface_view = |frame: &Frame, output: bool| {
            let surface = frame.surfaces().next()?;
            if output {
                surface.processor_output_view()
            } else {
                surface.processor_input_view()
            }
        };
        let in_view = surface_view(input, false)
            .ok_or_else(|| GpuError::Unsupported("input has no processor input view".into()))?;
        let out_view = surface_view(output, true)
            .ok_or_else(|| GpuError::Unsupported("output has no processor output view".into()))?;
        let (rotation, flip_horizontal, flip_vertical) = geometry
            .orientation
            .processor_flags()
            .ok_or_else(|| GpuError::Unsupported("custom transform on the video processor".into()))?;

        let device = self.device.clone();
        let _ctx = device.lock();
        self.apply_hdr(geometry)?;
        let _read = input.map_gpu(MapMode::GpuRead)?;
        let _write = output.map_gpu(MapMode::GpuWrite)?;
        let (in_info, out_info) = (&self.desc.input, &self.desc.output);
        let blit = ProcessorBlit {
            input: in_view,
            output: out_view,
            src_rect: geometry.src_rect_or(in_info.width, in_info.height),
            dst_rect: geometry.dest_rect_or(out_info.width, out_info.height),
            rotation,
            flip_horizontal,
            flip_vertical,
            background,
        };
        device.check("VideoProcessorBlt", self.processor.blit(&blit))
    }
}
