//! Conversion shader builder and the process-wide shader cache.
//!
//! Shader sources are generated from a [`program::PixelProgram`] and cached
//! by entry point name for the lifetime of the process, so every device
//! compiles from the same blobs.

pub mod layout;
pub mod program;
pub mod render;

use crate::error::{GpuError, Result};
use gpuframe_core::VideoFormat;
use parking_lot::Mutex;
use program::{output_passes, sample_program, ConvertProgram, OutputPass, PixelProgram};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

pub const VERTEX_ENTRY_POINT: &str = "vs_main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

/// Shader source ready for a native device to compile.
#[derive(Debug)]
pub struct ShaderBlob {
    pub entry_point: String,
    pub stage: ShaderStage,
    pub source: Arc<str>,
    /// Structural form of a pixel shader, for devices that interpret it.
    pub program: Option<PixelProgram>,
}

fn cache() -> &'static Mutex<HashMap<String, Arc<ShaderBlob>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Arc<ShaderBlob>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// The quad vertex shader.
pub fn vertex_shader() -> Arc<ShaderBlob> {
    cache()
        .lock()
        .entry(VERTEX_ENTRY_POINT.to_string())
        .or_insert_with(|| {
            Arc::new(ShaderBlob {
                entry_point: VERTEX_ENTRY_POINT.to_string(),
                stage: ShaderStage::Vertex,
                source: Arc::from(render::VERTEX_SOURCE),
                program: None,
            })
        })
        .clone()
}

/// Pixel shader for `program`, generated once per process.
pub fn pixel_shader(program: &PixelProgram) -> Arc<ShaderBlob> {
    let entry_point = program.entry_point();
    let mut cache = cache().lock();
    if let Some(blob) = cache.get(&entry_point) {
        return blob.clone();
    }
    debug!("Generating pixel shader {}", entry_point);
    let blob = Arc::new(ShaderBlob {
        entry_point: entry_point.clone(),
        stage: ShaderStage::Pixel,
        source: Arc::from(render::pixel_source(program)),
        program: Some(*program),
    });
    cache.insert(entry_point, blob.clone());
    blob
}

/// Number of blobs generated so far.
pub fn cached_shader_count() -> usize {
    cache().lock().len()
}

/// One draw of a conversion.
#[derive(Debug, Clone)]
pub struct ShaderPass {
    pub pixel: Arc<ShaderBlob>,
    pub program: PixelProgram,
    pub output: OutputPass,
}

/// Shaders converting one format into another.
#[derive(Debug, Clone)]
pub struct ConverterShaders {
    pub vertex: Arc<ShaderBlob>,
    pub passes: SmallVec<[ShaderPass; 2]>,
}

/// Build (or fetch) the shaders converting `input` to `output`.
pub fn build_converter_shaders(
    input: VideoFormat,
    output: VideoFormat,
    convert: ConvertProgram,
    premul_in: bool,
    premul_out: bool,
) -> Result<ConverterShaders> {
    let sample = sample_program(input)
        .ok_or_else(|| GpuError::Unsupported(format!("{} cannot be sampled by a shader", input)))?;
    let outputs = output_passes(output)
        .ok_or_else(|| GpuError::Unsupported(format!("{} cannot be written by a shader", output)))?;
    let passes = outputs
        .into_iter()
        .map(|pass| {
            let program = PixelProgram {
                sample,
                convert,
                output: pass.program,
                premul_in,
                premul_out,
            };
            ShaderPass {
                pixel: pixel_shader(&program),
                program,
                output: pass,
            }
        })
        .collect();
    Ok(ConverterShaders {
        vertex: vertex_shader(),
        passes,
    })
}
