//! Fixed-function video processor of the software device.

use super::raster::{self, RasterJob};
use super::State;
use crate::error::{NativeError, NativeResult};
use crate::native::{
    NativeVideoProcessor, ProcessorBlit, ProcessorCaps, ProcessorDesc, ProcessorRotation, SamplerFilter,
    StatsCounters, ViewKind, Viewport,
};
use crate::shader::layout::{orientation_transform, quad_vertices, PsConstants, QUAD_INDICES};
use crate::shader::program::{
    output_clear_colors, output_passes, sample_program, ConvertProgram, OutputPass, PixelProgram, SampleProgram,
};
use gpuframe_color::matrix::conversion_matrix;
use gpuframe_color::{ColorSpec, HdrMetadata};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub(super) struct SoftwareProcessor {
    state: Arc<State>,
    desc: ProcessorDesc,
    sample: SampleProgram,
    passes: SmallVec<[OutputPass; 2]>,
    constants: PsConstants,
    hdr: Mutex<(Option<HdrMetadata>, Option<HdrMetadata>)>,
}

impl SoftwareProcessor {
    pub(super) fn new(state: Arc<State>, desc: &ProcessorDesc) -> NativeResult<Self> {
        let unsupported = || {
            NativeError::Unsupported(format!(
                "processor cannot convert {} to {}",
                desc.input.format, desc.output.format
            ))
        };
        let sample = sample_program(desc.input.format).ok_or_else(unsupported)?;
        let passes = output_passes(desc.output.format).ok_or_else(unsupported)?;
        let matrix = conversion_matrix(&ColorSpec::from_info(&desc.input), &ColorSpec::from_info(&desc.output))
            .map_err(|e| NativeError::Unsupported(e.to_string()))?;
        let constants = PsConstants {
            post: (&matrix).into(),
            ..PsConstants::default()
        };
        Ok(Self {
            state,
            desc: *desc,
            sample,
            passes,
            constants,
            hdr: Mutex::new((None, None)),
        })
    }
}

fn orientation(rotation: ProcessorRotation, flip_h: bool, flip_v: bool) -> [[f32; 2]; 2] {
    let mut m = match rotation {
        ProcessorRotation::Identity => [[1.0, 0.0], [0.0, 1.0]],
        ProcessorRotation::Rotate90 => [[0.0, -1.0], [1.0, 0.0]],
        ProcessorRotation::Rotate180 => [[-1.0, 0.0], [0.0, -1.0]],
        ProcessorRotation::Rotate270 => [[0.0, 1.0], [-1.0, 0.0]],
    };
    for col in &mut m {
        if flip_h {
            col[0] = -col[0];
        }
        if flip_v {
            col[1] = -col[1];
        }
    }
    m
}

impl NativeVideoProcessor for SoftwareProcessor {
    fn caps(&self) -> ProcessorCaps {
        ProcessorCaps::ROTATION
            | ProcessorCaps::MIRROR
            | ProcessorCaps::HDR_METADATA
            | ProcessorCaps::SCALING
            | ProcessorCaps::BACKGROUND
    }

    fn set_hdr_metadata(&self, input: Option<&HdrMetadata>, output: Option<&HdrMetadata>) -> NativeResult<()> {
        debug!("Processor HDR metadata: input {:?}, output {:?}", input, output);
        *self.hdr.lock() = (input.copied(), output.copied());
        Ok(())
    }

    fn blit(&self, blit: &ProcessorBlit) -> NativeResult<()> {
        self.state.alive()?;
        if self.state.options.fail_processor_blits {
            return Err(NativeError::Backend("video processor blit failed".into()));
        }
        let (inputs, outputs) = {
            let resources = self.state.resources.lock();
            (
                resources.view_planes(blit.input, ViewKind::ProcessorInput)?,
                resources.view_planes(blit.output, ViewKind::ProcessorOutput)?,
            )
        };

        if let Some(background) = blit.background {
            let colors = output_clear_colors(self.desc.output.format, background)
                .ok_or_else(|| NativeError::Unsupported("background fill".into()))?;
            for (surface, color) in outputs.iter().zip(colors) {
                raster::clear(surface, color);
            }
        }

        let transform = orientation_transform(orientation(blit.rotation, blit.flip_horizontal, blit.flip_vertical));
        let planes = self.desc.output_format.planes();
        for pass in &self.passes {
            let targets: SmallVec<_> = outputs
                .get(pass.first_plane..pass.first_plane + pass.plane_count)
                .ok_or_else(|| NativeError::InvalidCall("output view has too few planes".into()))?
                .iter()
                .cloned()
                .collect();
            let plane = planes.get(pass.first_plane).copied().unwrap_or(planes[0]);
            let job = RasterJob {
                program: PixelProgram {
                    sample: self.sample,
                    convert: ConvertProgram::Matrix,
                    output: pass.program,
                    premul_in: false,
                    premul_out: false,
                },
                constants: self.constants,
                vertices: quad_vertices(blit.src_rect, self.desc.input.width, self.desc.input.height).to_vec(),
                indices: QUAD_INDICES.to_vec(),
                transform: glam::Mat4::from_cols_array_2d(&transform.transform),
                sources: inputs.clone(),
                luts: None,
                targets,
                viewport: Viewport::from_rect(blit.dst_rect.subsampled(plane.w_sub, plane.h_sub)),
                filter: SamplerFilter::Linear,
                blend: None,
                blend_factor: [1.0; 4],
                sample_mask: u32::MAX,
            };
            raster::execute(&job)?;
        }
        StatsCounters::bump(&self.state.stats.processor_blits);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_applies_after_rotation() {
        // rotate 90 then mirror horizontally is a transpose
        let m = orientation(ProcessorRotation::Rotate90, true, false);
        assert_eq!(m, [[0.0, -1.0], [-1.0, 0.0]]);
    }
}
