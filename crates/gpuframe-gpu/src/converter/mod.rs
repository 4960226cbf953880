//! Format conversion between frames.
//!
//! A [`Converter`] is built for one input and one output stream. At
//! construction it classifies the color work, then brings up the video
//! processor and shader backends it is allowed to use. Each call prefers
//! the processor and falls back to shaders when the call's geometry or a
//! processor failure requires it.
//!
//! Inputs that are CPU frames, live on another device, cannot be sampled,
//! or are packed 4:2:2 are first staged into an internal GPU frame.

mod config;
mod draw;
mod geometry;
mod matrices;
mod processor;
mod repack;

pub use config::{AlphaMode, ConverterBackends, ConverterConfig, GammaMode, PrimariesMode};
pub use geometry::{Blend, ConvertGeometry, Orientation, DEFAULT_BORDER_COLOR};
pub use matrices::{border_code_values, ConversionClass, ConversionMatrices};
pub use repack::{planar_equivalent, unpack_422};

use crate::buffer_pool::Frame;
use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::memory::AllocationParams;
use crate::native::{BindFlags, BlendDesc, ProcessorCaps};
use crate::shader::program::{output_clear_colors, TargetColors};
use draw::ShaderBackend;
use gpuframe_color::HdrMetadata;
use gpuframe_core::{Rect, SystemFrame, VideoDirection, VideoInfo};
use processor::ProcessorBackend;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Input of one conversion.
#[derive(Debug, Clone, Copy)]
pub enum ConvertInput<'a> {
    Gpu(&'a Frame),
    System(&'a SystemFrame),
}

impl<'a> From<&'a Frame> for ConvertInput<'a> {
    fn from(frame: &'a Frame) -> Self {
        Self::Gpu(frame)
    }
}

impl<'a> From<&'a SystemFrame> for ConvertInput<'a> {
    fn from(frame: &'a SystemFrame) -> Self {
        Self::System(frame)
    }
}

/// Counters of the conversions a converter has performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConverterStats {
    pub shader_conversions: u64,
    pub processor_conversions: u64,
    /// Processor blits that failed and were redone with shaders.
    pub processor_fallbacks: u64,
    /// Inputs staged through CPU memory.
    pub cpu_uploads: u64,
}

struct BorderColors {
    argb: u64,
    /// Output code values.
    logical: [f32; 4],
    targets: TargetColors,
}

pub struct Converter {
    device: Device,
    input: VideoInfo,
    /// Input as sampled, after any 4:2:2 unpacking.
    staged_input: VideoInfo,
    output: VideoInfo,
    config: ConverterConfig,
    class: ConversionClass,
    processor: Option<ProcessorBackend>,
    shader: Option<ShaderBackend>,
    geometry: ConvertGeometry,
    border: Option<BorderColors>,
    fallback: Option<Frame>,
    stats: ConverterStats,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("input", &self.input.format)
            .field("output", &self.output.format)
            .field("class", &self.class)
            .field("processor", &self.processor.is_some())
            .field("shader", &self.shader.is_some())
            .finish()
    }
}

impl Converter {
    /// Create a converter from `input` to `output`.
    ///
    /// Fails only when no enabled backend can do the conversion.
    pub fn new(device: &Device, input: VideoInfo, output: VideoInfo, config: ConverterConfig) -> Result<Self> {
        input.validate()?;
        output.validate()?;
        if output.format.is_packed_422() {
            return Err(GpuError::Unsupported(format!("{} output", output.format)));
        }
        let staged_input = repack::repacked_info(&input);
        let class = ConversionClass::classify(&input, &output, &config);

        let mut reasons = Vec::new();
        let processor = if !config.backends.contains(ConverterBackends::VIDEO_PROCESSOR) {
            None
        } else if class.is_linear() {
            debug!("Video processor skipped for {} conversion", class);
            None
        } else if config.src_alpha_mode.is_premultiplied() != config.dest_alpha_mode.is_premultiplied() {
            // the processor passes alpha through untouched
            debug!("Video processor skipped for alpha mode change");
            reasons.push("video processor cannot change alpha premultiplication".to_string());
            None
        } else {
            match ProcessorBackend::new(device, &staged_input, &output) {
                Ok(processor) => Some(processor),
                Err(e) => {
                    debug!("Video processor unavailable: {}", e);
                    reasons.push(e.to_string());
                    None
                }
            }
        };

        let shader = if !config.backends.contains(ConverterBackends::SHADER) {
            None
        } else {
            let built = ConversionMatrices::derive(class, &staged_input, &output).and_then(|matrices| {
                ShaderBackend::new(
                    device,
                    &staged_input,
                    &output,
                    matrices,
                    config.sampler_filter,
                    (config.src_alpha_mode.is_premultiplied(), config.dest_alpha_mode.is_premultiplied()),
                )
            });
            match built {
                Ok(shader) => Some(shader),
                Err(e) => {
                    warn!("Shader backend unavailable for {} -> {}: {}", input.format, output.format, e);
                    reasons.push(e.to_string());
                    None
                }
            }
        };

        if processor.is_none() && shader.is_none() {
            let reason = if reasons.is_empty() {
                "no backend enabled".to_string()
            } else {
                reasons.join("; ")
            };
            return Err(GpuError::Unsupported(format!(
                "cannot convert {} to {}: {}",
                input.format, output.format, reason
            )));
        }

        info!(
            "Converter {} {}x{} -> {} {}x{} ({}), processor: {}, shader: {}",
            input.format,
            input.width,
            input.height,
            output.format,
            output.width,
            output.height,
            class,
            processor.is_some(),
            shader.is_some()
        );
        Ok(Self {
            device: device.clone(),
            input,
            staged_input,
            output,
            config,
            class,
            processor,
            shader,
            geometry: ConvertGeometry::default(),
            border: None,
            fallback: None,
            stats: ConverterStats::default(),
        })
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn input_info(&self) -> &VideoInfo {
        &self.input
    }

    pub fn output_info(&self) -> &VideoInfo {
        &self.output
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn class(&self) -> ConversionClass {
        self.class
    }

    pub fn has_processor(&self) -> bool {
        self.processor.is_some()
    }

    pub fn has_shader(&self) -> bool {
        self.shader.is_some()
    }

    /// Capabilities of the video processor backend, empty without one.
    pub fn processor_caps(&self) -> ProcessorCaps {
        self.processor.as_ref().map(|p| p.caps()).unwrap_or_else(ProcessorCaps::empty)
    }

    /// Draws per shader conversion.
    pub fn shader_pass_count(&self) -> usize {
        self.shader.as_ref().map_or(0, |s| s.pass_count())
    }

    pub fn geometry(&self) -> &ConvertGeometry {
        &self.geometry
    }

    pub fn stats(&self) -> ConverterStats {
        self.stats
    }

    // ── Per-call properties ────────────────────────────────────

    /// Crop of the input; `None` for the full frame.
    pub fn set_src_rect(&mut self, rect: Option<Rect>) -> Result<()> {
        check_rect(rect, &self.input, "source")?;
        self.geometry.src_rect = rect;
        Ok(())
    }

    /// Placement in the output; `None` for the full frame.
    pub fn set_dest_rect(&mut self, rect: Option<Rect>) -> Result<()> {
        check_rect(rect, &self.output, "destination")?;
        self.geometry.dest_rect = rect;
        Ok(())
    }

    pub fn set_direction(&mut self, direction: VideoDirection) {
        self.geometry.orientation = Orientation::Direction(direction);
    }

    /// Custom column-major clip-space transform. Only shaders apply it.
    pub fn set_transform_matrix(&mut self, matrix: [[f32; 4]; 4]) {
        self.geometry.orientation = Orientation::Matrix(matrix);
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.geometry.alpha = alpha.clamp(0.0, 1.0);
    }

    /// Blend into the output instead of overwriting it.
    pub fn set_blend(&mut self, blend: Option<BlendDesc>, factor: [f32; 4], sample_mask: u32) {
        self.geometry.blend = blend.map(|desc| Blend {
            desc,
            factor,
            sample_mask,
        });
    }

    pub fn set_fill_border(&mut self, fill: bool) {
        self.geometry.fill_border = fill;
    }

    /// ARGB64 border color, full-range RGB in the output's primaries.
    pub fn set_border_color(&mut self, argb: u64) {
        self.geometry.border_color = argb;
    }

    /// Mastering display and content light level strings of the input.
    pub fn set_src_hdr_metadata(&mut self, mastering_display: Option<&str>, content_light: Option<&str>) -> Result<()> {
        self.geometry.src_hdr = HdrMetadata::from_strings(mastering_display, content_light)?;
        Ok(())
    }

    /// Mastering display and content light level strings of the output.
    pub fn set_dest_hdr_metadata(&mut self, mastering_display: Option<&str>, content_light: Option<&str>) -> Result<()> {
        self.geometry.dest_hdr = HdrMetadata::from_strings(mastering_display, content_light)?;
        Ok(())
    }

    // ── Conversion ─────────────────────────────────────────────

    /// Convert `input` into `output`, which must be a render target of this
    /// converter's output stream on this device.
    pub fn convert<'a>(&mut self, input: impl Into<ConvertInput<'a>>, output: &Frame) -> Result<()> {
        let input = input.into();
        if !output.device().is_same(&self.device) {
            return Err(GpuError::InvalidArgument("output frame belongs to another device".into()));
        }
        check_shape(output.info(), &self.output, "output")?;

        let staged = match input {
            ConvertInput::Gpu(frame) => {
                check_shape(frame.info(), &self.input, "input")?;
                if self.can_sample(frame) {
                    None
                } else {
                    Some(self.stage_frame(frame)?)
                }
            }
            ConvertInput::System(frame) => {
                check_shape(frame.info(), &self.input, "input")?;
                Some(self.stage_system(frame)?)
            }
        };
        let direct = match input {
            ConvertInput::Gpu(frame) => Some(frame),
            ConvertInput::System(_) => None,
        };
        let source = staged
            .as_ref()
            .or(direct)
            .ok_or_else(|| GpuError::InvalidArgument("no input frame".into()))?;

        let result = self.run(source, output);
        if staged.is_some() {
            self.fallback = staged;
        }
        result
    }

    /// Whether a GPU frame can be used without staging.
    fn can_sample(&self, frame: &Frame) -> bool {
        if !frame.device().is_same(&self.device) || frame.info().format.is_packed_422() {
            return false;
        }
        if self.shader.is_some() {
            frame.shader_resource_views().is_some()
        } else {
            frame.surfaces().next().and_then(|s| s.processor_input_view()).is_some()
        }
    }

    fn take_fallback(&mut self) -> Result<Frame> {
        if let Some(frame) = self.fallback.take() {
            return Ok(frame);
        }
        debug!(
            "Allocating {} {}x{} staging frame for converter input",
            self.staged_input.format, self.staged_input.width, self.staged_input.height
        );
        Frame::allocate(
            &self.device,
            &AllocationParams::new(self.staged_input, BindFlags::SHADER_RESOURCE),
        )
    }

    /// Copy a GPU frame the backends cannot read directly.
    fn stage_frame(&mut self, frame: &Frame) -> Result<Frame> {
        if frame.device().is_same(&self.device) && !frame.info().format.is_packed_422() {
            let fallback = self.take_fallback()?;
            let copied = fallback.surface_count() == frame.surface_count()
                && fallback
                    .surfaces()
                    .zip(frame.surfaces())
                    .all(|(dst, src)| dst.copy_from(src).is_ok());
            if copied {
                return Ok(fallback);
            }
            self.fallback = Some(fallback);
            debug!("GPU copy of converter input failed, staging through CPU memory");
        }
        let system = frame.to_system()?;
        self.stage_system(&system)
    }

    /// Upload a CPU frame, unpacking 4:2:2 on the way.
    fn stage_system(&mut self, frame: &SystemFrame) -> Result<Frame> {
        let fallback = self.take_fallback()?;
        let uploaded = if frame.format().is_packed_422() {
            fallback.upload_from(&repack::unpack_422(frame)?)
        } else {
            fallback.upload_from(frame)
        };
        match uploaded {
            Ok(()) => {
                self.stats.cpu_uploads += 1;
                Ok(fallback)
            }
            Err(e) => {
                self.fallback = Some(fallback);
                Err(e)
            }
        }
    }

    fn border_colors(&mut self) -> Result<Option<&BorderColors>> {
        if !self.geometry.needs_border(self.output.width, self.output.height) {
            return Ok(None);
        }
        let argb = self.geometry.border_color;
        if self.border.as_ref().map(|b| b.argb) != Some(argb) {
            let logical = border_code_values(argb, &self.output)?;
            let targets = output_clear_colors(self.output.format, logical)
                .ok_or_else(|| GpuError::Unsupported(format!("border fill of {}", self.output.format)))?;
            self.border = Some(BorderColors {
                argb,
                logical,
                targets,
            });
        }
        Ok(self.border.as_ref())
    }

    fn run(&mut self, input: &Frame, output: &Frame) -> Result<()> {
        let border = self.border_colors()?.map(|b| (b.logical, b.targets.clone()));

        if let Some(processor) = self.processor.as_mut() {
            if processor.can_handle(&self.geometry) {
                match processor.convert(input, output, &self.geometry, border.as_ref().map(|b| b.0)) {
                    Ok(()) => {
                        self.stats.processor_conversions += 1;
                        return Ok(());
                    }
                    Err(e) if self.shader.is_some() => {
                        warn!("Video processor conversion failed ({}), using shaders", e);
                        self.stats.processor_fallbacks += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let shader = self
            .shader
            .as_mut()
            .ok_or_else(|| GpuError::Unsupported("conversion needs the shader backend".into()))?;
        shader.convert(input, output, &self.geometry, border.as_ref().map(|b| &b.1))?;
        self.stats.shader_conversions += 1;
        Ok(())
    }
}

fn check_rect(rect: Option<Rect>, info: &VideoInfo, what: &str) -> Result<()> {
    match rect {
        Some(r) if r.is_empty() || !r.fits(info.width, info.height) => Err(GpuError::InvalidArgument(format!(
            "{} rectangle {:?} outside {}x{}",
            what, r, info.width, info.height
        ))),
        _ => Ok(()),
    }
}

fn check_shape(actual: &VideoInfo, expected: &VideoInfo, what: &str) -> Result<()> {
    if actual.format != expected.format || actual.width != expected.width || actual.height != expected.height {
        return Err(GpuError::InvalidArgument(format!(
            "{} is {} {}x{}, converter expects {} {}x{}",
            what, actual.format, actual.width, actual.height, expected.format, expected.width, expected.height
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::software::SoftwareOptions;
    use gpuframe_core::{ColorRange, Colorimetry, VideoFormat};

    fn device_with(options: SoftwareOptions) -> Device {
        Device::create_software(options, false).unwrap()
    }

    fn device() -> Device {
        device_with(SoftwareOptions::default())
    }

    fn info(format: VideoFormat, w: u32, h: u32) -> VideoInfo {
        let colorimetry = if format.is_rgb() {
            Colorimetry::SRGB
        } else {
            Colorimetry::BT709
        };
        VideoInfo::new(format, w, h).with_colorimetry(colorimetry)
    }

    fn target(device: &Device, info: VideoInfo) -> Frame {
        Frame::allocate(device, &AllocationParams::new(info, BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET))
            .unwrap()
    }

    fn solid(info: VideoInfo, texels: &[&[u8]]) -> SystemFrame {
        let mut frame = SystemFrame::new(info).unwrap();
        for (plane, texel) in texels.iter().enumerate() {
            frame.fill_plane(plane, texel).unwrap();
        }
        frame
    }

    fn pixel(frame: &SystemFrame, x: usize, y: u32) -> [u8; 4] {
        let row = frame.row(0, y);
        [row[4 * x], row[4 * x + 1], row[4 * x + 2], row[4 * x + 3]]
    }

    #[test]
    fn test_nv12_to_rgba_shader_single_draw() {
        let device = device();
        let in_info = info(VideoFormat::Nv12, 32, 32);
        let out_info = info(VideoFormat::Rgba, 32, 32);
        let mut conv = Converter::new(&device, in_info, out_info, ConverterConfig::shader_only()).unwrap();
        assert!(!conv.has_processor());
        assert_eq!(conv.class(), ConversionClass::Simple);
        assert_eq!(conv.shader_pass_count(), 1);

        let input = target(&device, in_info);
        input.upload_from(&solid(in_info, &[&[235], &[128, 128]])).unwrap();
        let output = target(&device, out_info);
        let before = device.stats().draws;
        conv.convert(&input, &output).unwrap();
        assert_eq!(device.stats().draws - before, 1);
        assert_eq!(conv.stats().shader_conversions, 1);

        let rgba = output.to_system().unwrap();
        assert_eq!(pixel(&rgba, 5, 7), [255, 255, 255, 255]);
    }

    #[test]
    fn test_rgba_to_nv12_two_draws() {
        let device = device();
        let in_info = info(VideoFormat::Rgba, 16, 16);
        let out_info = info(VideoFormat::Nv12, 16, 16);
        let mut conv = Converter::new(&device, in_info, out_info, ConverterConfig::shader_only()).unwrap();
        assert_eq!(conv.shader_pass_count(), 2);
        let output = target(&device, out_info);
        let before = device.stats().draws;
        conv.convert(&solid(in_info, &[&[0, 0, 0, 255]]), &output).unwrap();
        assert_eq!(device.stats().draws - before, 2);
        assert_eq!(conv.stats().cpu_uploads, 1);

        let nv12 = output.to_system().unwrap();
        assert_eq!(nv12.row(0, 3)[3], 16);
        assert_eq!(nv12.row(1, 2)[..2], [128, 128]);
    }

    #[test]
    fn test_processor_preferred() {
        let device = device();
        let in_info = info(VideoFormat::Nv12, 16, 16);
        let out_info = info(VideoFormat::Rgba, 16, 16);
        let mut conv = Converter::new(&device, in_info, out_info, ConverterConfig::default()).unwrap();
        assert!(conv.has_processor());
        assert!(conv.processor_caps().contains(ProcessorCaps::ROTATION));
        let input = target(&device, in_info);
        let output = target(&device, out_info);
        let stats = device.stats();
        conv.convert(&input, &output).unwrap();
        assert_eq!(device.stats().processor_blits - stats.processor_blits, 1);
        assert_eq!(device.stats().draws, stats.draws);
        assert_eq!(conv.stats().processor_conversions, 1);
    }

    #[test]
    fn test_processor_failure_falls_back_to_shader() {
        let device = device_with(SoftwareOptions {
            fail_processor_blits: true,
            ..SoftwareOptions::default()
        });
        let in_info = info(VideoFormat::Nv12, 16, 16);
        let out_info = info(VideoFormat::Rgba, 16, 16);
        let mut conv = Converter::new(&device, in_info, out_info, ConverterConfig::default()).unwrap();
        let input = target(&device, in_info);
        let output = target(&device, out_info);
        conv.convert(&input, &output).unwrap();
        let stats = conv.stats();
        assert_eq!(stats.processor_fallbacks, 1);
        assert_eq!(stats.shader_conversions, 1);
        assert_eq!(stats.processor_conversions, 0);
    }

    #[test]
    fn test_processor_only_fails_without_processor() {
        let device = device_with(SoftwareOptions {
            disable_processor: true,
            ..SoftwareOptions::default()
        });
        let err = Converter::new(
            &device,
            info(VideoFormat::Nv12, 16, 16),
            info(VideoFormat::Rgba, 16, 16),
            ConverterConfig::processor_only(),
        )
        .unwrap_err();
        assert!(matches!(err, GpuError::Unsupported(_)));
    }

    #[test]
    fn test_custom_matrix_and_blend_force_shader() {
        let device = device();
        let in_info = info(VideoFormat::Rgba, 16, 16);
        let mut conv = Converter::new(&device, in_info, in_info, ConverterConfig::default()).unwrap();
        let input = target(&device, in_info);
        let output = target(&device, in_info);

        conv.set_transform_matrix(glam::Mat4::IDENTITY.to_cols_array_2d());
        conv.convert(&input, &output).unwrap();
        assert_eq!(conv.stats().shader_conversions, 1);

        conv.set_direction(VideoDirection::Rotate180);
        conv.set_blend(Some(BlendDesc::ALPHA_OVER), [1.0; 4], u32::MAX);
        conv.convert(&input, &output).unwrap();
        assert_eq!(conv.stats().shader_conversions, 2);

        conv.set_blend(None, [1.0; 4], u32::MAX);
        conv.convert(&input, &output).unwrap();
        assert_eq!(conv.stats().processor_conversions, 1);
    }

    #[test]
    fn test_alpha_mode_change_matches_shader() {
        let device = device();
        let in_info = info(VideoFormat::Rgba, 8, 8);
        let config = ConverterConfig {
            src_alpha_mode: AlphaMode::Premultiplied,
            dest_alpha_mode: AlphaMode::Straight,
            ..ConverterConfig::default()
        };
        let src = solid(in_info, &[&[100, 50, 0, 128]]);

        let mut preferred = Converter::new(&device, in_info, in_info, config).unwrap();
        assert!(!preferred.has_processor());
        let output = target(&device, in_info);
        preferred.convert(&src, &output).unwrap();
        assert_eq!(preferred.stats().processor_conversions, 0);

        let shader_config = ConverterConfig {
            backends: ConverterBackends::SHADER,
            ..config
        };
        let mut shader = Converter::new(&device, in_info, in_info, shader_config).unwrap();
        let reference = target(&device, in_info);
        shader.convert(&src, &reference).unwrap();

        let (a, b) = (output.to_system().unwrap(), reference.to_system().unwrap());
        assert_eq!(pixel(&a, 3, 3), pixel(&b, 3, 3));
        assert!(pixel(&a, 3, 3)[0] > 100);

        let only = ConverterConfig {
            backends: ConverterBackends::VIDEO_PROCESSOR,
            ..config
        };
        assert!(matches!(
            Converter::new(&device, in_info, in_info, only),
            Err(GpuError::Unsupported(_))
        ));
    }

    #[test]
    fn test_horizontal_flip() {
        let device = device();
        let in_info = info(VideoFormat::Rgba, 8, 2);
        let mut conv = Converter::new(&device, in_info, in_info, ConverterConfig::shader_only()).unwrap();
        let mut src = solid(in_info, &[&[0, 0, 0, 255]]);
        for y in 0..2 {
            src.row_mut(0, y)[..4].copy_from_slice(&[255, 0, 0, 255]);
        }
        let output = target(&device, in_info);
        conv.set_direction(VideoDirection::HorizontalFlip);
        conv.convert(&src, &output).unwrap();
        let out = output.to_system().unwrap();
        assert_eq!(pixel(&out, 7, 1), [255, 0, 0, 255]);
        assert_eq!(pixel(&out, 0, 1), [0, 0, 0, 255]);
    }

    #[test]
    fn test_border_fill_rgba() {
        let device = device();
        let in_info = info(VideoFormat::Rgba, 16, 16);
        let mut conv = Converter::new(&device, in_info, in_info, ConverterConfig::shader_only()).unwrap();
        conv.set_dest_rect(Some(Rect::new(4, 4, 8, 8))).unwrap();
        conv.set_fill_border(true);
        conv.set_border_color(0xffff_0000_ffff_0000);
        let output = target(&device, in_info);
        conv.convert(&solid(in_info, &[&[0, 0, 255, 255]]), &output).unwrap();
        let out = output.to_system().unwrap();
        assert_eq!(pixel(&out, 0, 0), [0, 255, 0, 255]);
        assert_eq!(pixel(&out, 15, 15), [0, 255, 0, 255]);
        assert_eq!(pixel(&out, 8, 8), [0, 0, 255, 255]);
    }

    #[test]
    fn test_yuy2_input_is_unpacked() {
        let device = device();
        let in_info = info(VideoFormat::Yuy2, 16, 4);
        let out_info = info(VideoFormat::Rgba, 16, 4);
        let mut conv = Converter::new(&device, in_info, out_info, ConverterConfig::default()).unwrap();
        assert!(conv.has_shader());
        let output = target(&device, out_info);
        conv.convert(&solid(in_info, &[&[235, 128, 235, 128]]), &output).unwrap();
        assert_eq!(conv.stats().cpu_uploads, 1);
        let out = output.to_system().unwrap();
        assert_eq!(pixel(&out, 3, 2), [255, 255, 255, 255]);
    }

    #[test]
    fn test_input_from_other_device_is_staged() {
        let device = device();
        let other = self::device();
        let in_info = info(VideoFormat::Rgba, 8, 8);
        let mut conv = Converter::new(&device, in_info, in_info, ConverterConfig::shader_only()).unwrap();
        let input = target(&other, in_info);
        input.upload_from(&solid(in_info, &[&[10, 20, 30, 255]])).unwrap();
        let output = target(&device, in_info);
        conv.convert(&input, &output).unwrap();
        conv.convert(&input, &output).unwrap();
        assert_eq!(conv.stats().cpu_uploads, 2);
        assert_eq!(pixel(&output.to_system().unwrap(), 4, 4), [10, 20, 30, 255]);
    }

    #[test]
    fn test_range_conversion_keeps_processor() {
        let device = device();
        let in_info = info(VideoFormat::Nv12, 16, 16);
        let out_info = in_info.with_range(ColorRange::Full);
        let conv = Converter::new(&device, in_info, out_info, ConverterConfig::default()).unwrap();
        assert_eq!(conv.class(), ConversionClass::Range);
        assert!(conv.has_processor());
    }

    #[test]
    fn test_gamma_conversion_skips_processor() {
        let device = device();
        let in_info = info(VideoFormat::Nv12, 16, 16);
        let out_info = VideoInfo::new(VideoFormat::P010, 16, 16).with_colorimetry(Colorimetry::BT2100_PQ);
        let config = ConverterConfig {
            gamma_mode: GammaMode::Apply,
            ..ConverterConfig::default()
        };
        let conv = Converter::new(&device, in_info, out_info, config).unwrap();
        assert_eq!(conv.class(), ConversionClass::Gamma);
        assert!(!conv.has_processor());
        assert!(conv.has_shader());
    }

    #[test]
    fn test_rejects_bad_arguments() {
        let device = device();
        let in_info = info(VideoFormat::Rgba, 16, 16);
        assert!(matches!(
            Converter::new(&device, in_info, info(VideoFormat::Yuy2, 16, 16), ConverterConfig::default()),
            Err(GpuError::Unsupported(_))
        ));
        let config = ConverterConfig {
            backends: ConverterBackends::empty(),
            ..ConverterConfig::default()
        };
        assert!(Converter::new(&device, in_info, in_info, config).is_err());

        let mut conv = Converter::new(&device, in_info, in_info, ConverterConfig::default()).unwrap();
        assert!(conv.set_dest_rect(Some(Rect::new(8, 8, 16, 16))).is_err());
        assert!(conv.set_src_rect(Some(Rect::new(0, 0, 0, 4))).is_err());
        assert!(matches!(
            conv.set_dest_rect(Some(Rect::new(u32::MAX, 0, 2, 2))),
            Err(GpuError::InvalidArgument(_))
        ));
        assert!(conv.set_src_rect(Some(Rect::new(0, u32::MAX, 2, 2))).is_err());
        assert!(conv.set_src_hdr_metadata(None, Some("1000")).is_err());
        conv.set_src_hdr_metadata(None, Some("1000:400")).unwrap();
        assert!(conv.geometry().src_hdr.is_some());

        let wrong = target(&device, info(VideoFormat::Rgba, 8, 8));
        let output = target(&device, in_info);
        assert!(matches!(conv.convert(&wrong, &output), Err(GpuError::InvalidArgument(_))));
        assert!(matches!(conv.convert(&output, &wrong), Err(GpuError::InvalidArgument(_))));
    }
}
