//! Triangle rasterizer running pixel programs on the CPU.
//!
//! Pixel centers are sampled at half-integer coordinates and the top-left
//! fill rule decides ownership of shared edges, so the two triangles of a
//! quad cover every pixel exactly once.

use super::texel::{read_texel, write_texel};
use crate::error::{NativeError, NativeResult};
use crate::native::{BlendDesc, BlendFactor, BlendOp, NativeFormat, SamplerFilter, StagingMemory, Viewport};
use crate::shader::layout::{PsConstants, Vertex};
use crate::shader::program::{LutTables, PixelProgram, TargetColors};
use glam::{Mat4, Vec4};
use rayon::prelude::*;
use smallvec::SmallVec;
use std::sync::Arc;

/// One plane of one texture slice, resolved to memory.
#[derive(Debug, Clone)]
pub struct PlaneSurface {
    pub memory: StagingMemory,
    pub offset: usize,
    pub pitch: usize,
    pub width: u32,
    pub height: u32,
    /// Format of a single texel of this plane.
    pub format: NativeFormat,
}

impl PlaneSurface {
    fn texel_offset(&self, x: u32, y: u32) -> usize {
        self.offset + y as usize * self.pitch + x as usize * self.format.texel_size()
    }
}

/// Fill every texel of a plane.
pub fn clear(surface: &PlaneSurface, color: [f32; 4]) {
    let mut bytes = surface.memory.lock();
    let ts = surface.format.texel_size();
    let mut texel = vec![0u8; ts];
    write_texel(surface.format, &mut texel, color);
    for y in 0..surface.height {
        let start = surface.texel_offset(0, y);
        for chunk in bytes[start..start + surface.width as usize * ts].chunks_exact_mut(ts) {
            chunk.copy_from_slice(&texel);
        }
    }
}

/// A fully resolved draw.
#[derive(Debug)]
pub struct RasterJob {
    pub program: PixelProgram,
    pub constants: PsConstants,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
    pub transform: Mat4,
    pub sources: SmallVec<[PlaneSurface; 4]>,
    /// Decode and encode tables.
    pub luts: Option<(Vec<f32>, Vec<f32>)>,
    pub targets: SmallVec<[PlaneSurface; 4]>,
    pub viewport: Viewport,
    pub filter: SamplerFilter,
    pub blend: Option<BlendDesc>,
    pub blend_factor: [f32; 4],
    pub sample_mask: u32,
}

#[derive(Debug, Clone, Copy)]
struct ScreenVertex {
    x: f64,
    y: f64,
    inv_w: f64,
    uv_w: [f64; 2],
}

fn to_screen(v: &Vertex, transform: &Mat4, vp: &Viewport) -> ScreenVertex {
    let clip = *transform * Vec4::new(v.position[0], v.position[1], v.position[2], 1.0);
    let w = if (clip.w as f64).abs() < 1e-12 { 1e-12 } else { clip.w as f64 };
    let ndc_x = clip.x as f64 / w;
    let ndc_y = clip.y as f64 / w;
    let inv_w = 1.0 / w;
    ScreenVertex {
        x: vp.x as f64 + (ndc_x + 1.0) * 0.5 * vp.width as f64,
        y: vp.y as f64 + (1.0 - ndc_y) * 0.5 * vp.height as f64,
        inv_w,
        uv_w: [v.texcoord[0] as f64 * inv_w, v.texcoord[1] as f64 * inv_w],
    }
}

fn edge(a: &ScreenVertex, b: &ScreenVertex, px: f64, py: f64) -> f64 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

/// Top or left edge for positively oriented triangles in y-down space.
fn is_top_left(a: &ScreenVertex, b: &ScreenVertex) -> bool {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    (dy == 0.0 && dx > 0.0) || dy < 0.0
}

fn sample(bytes: &[u8], s: &PlaneSurface, u: f64, v: f64, filter: SamplerFilter) -> [f32; 4] {
    let w = s.width.max(1) as i64;
    let h = s.height.max(1) as i64;
    let texel = |x: i64, y: i64| {
        let x = x.clamp(0, w - 1) as u32;
        let y = y.clamp(0, h - 1) as u32;
        read_texel(s.format, &bytes[s.texel_offset(x, y)..])
    };
    match filter {
        SamplerFilter::Point => texel((u * w as f64).floor() as i64, (v * h as f64).floor() as i64),
        SamplerFilter::Linear => {
            let x = u * w as f64 - 0.5;
            let y = v * h as f64 - 0.5;
            let x0 = x.floor();
            let y0 = y.floor();
            let fx = (x - x0) as f32;
            let fy = (y - y0) as f32;
            let (x0, y0) = (x0 as i64, y0 as i64);
            let t00 = texel(x0, y0);
            let t10 = texel(x0 + 1, y0);
            let t01 = texel(x0, y0 + 1);
            let t11 = texel(x0 + 1, y0 + 1);
            let mut out = [0.0; 4];
            for i in 0..4 {
                let top = t00[i] + (t10[i] - t00[i]) * fx;
                let bottom = t01[i] + (t11[i] - t01[i]) * fx;
                out[i] = top + (bottom - top) * fy;
            }
            out
        }
    }
}

fn blend_factor(f: BlendFactor, i: usize, src: &[f32; 4], dst: &[f32; 4], constant: &[f32; 4]) -> f32 {
    match f {
        BlendFactor::Zero => 0.0,
        BlendFactor::One => 1.0,
        BlendFactor::SrcColor => src[i],
        BlendFactor::InvSrcColor => 1.0 - src[i],
        BlendFactor::SrcAlpha => src[3],
        BlendFactor::InvSrcAlpha => 1.0 - src[3],
        BlendFactor::DstColor => dst[i],
        BlendFactor::InvDstColor => 1.0 - dst[i],
        BlendFactor::DstAlpha => dst[3],
        BlendFactor::InvDstAlpha => 1.0 - dst[3],
        BlendFactor::BlendFactor => constant[i],
        BlendFactor::InvBlendFactor => 1.0 - constant[i],
    }
}

/// Output merger blend of one texel.
pub fn blend(desc: &BlendDesc, src: [f32; 4], dst: [f32; 4], constant: &[f32; 4]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (i, o) in out.iter_mut().enumerate() {
        let (sf, df, op) = if i < 3 {
            (desc.src_color, desc.dst_color, desc.color_op)
        } else {
            (desc.src_alpha, desc.dst_alpha, desc.alpha_op)
        };
        let s = src[i] * blend_factor(sf, i, &src, &dst, constant);
        let d = dst[i] * blend_factor(df, i, &src, &dst, constant);
        *o = match op {
            BlendOp::Add => s + d,
            BlendOp::Subtract => s - d,
            BlendOp::RevSubtract => d - s,
            BlendOp::Min => src[i].min(dst[i]),
            BlendOp::Max => src[i].max(dst[i]),
        }
        .clamp(0.0, 1.0);
    }
    out
}

type ShadedRow = (u32, Vec<(u32, TargetColors)>);

/// Run a draw to completion.
pub fn execute(job: &RasterJob) -> NativeResult<()> {
    if job.sample_mask & 1 == 0 || job.targets.is_empty() {
        return Ok(());
    }

    // Each distinct slice memory is locked once for the whole draw.
    let mut memories: Vec<StagingMemory> = Vec::new();
    let mut index_of = |m: &StagingMemory| match memories.iter().position(|x| Arc::ptr_eq(x, m)) {
        Some(i) => i,
        None => {
            memories.push(m.clone());
            memories.len() - 1
        }
    };
    let source_idx: SmallVec<[usize; 4]> = job.sources.iter().map(|s| index_of(&s.memory)).collect();
    let target_idx: SmallVec<[usize; 4]> = job.targets.iter().map(|t| index_of(&t.memory)).collect();
    if target_idx.iter().any(|t| source_idx.contains(t)) {
        return Err(NativeError::InvalidCall(
            "texture slice bound as both shader resource and render target".into(),
        ));
    }
    let mut guards: Vec<_> = memories.iter().map(|m| m.lock()).collect();

    let vp = job.viewport;
    let max_x = job.targets.iter().map(|t| t.width).min().unwrap_or(0) as f64;
    let max_y = job.targets.iter().map(|t| t.height).min().unwrap_or(0) as f64;
    let x_lo = vp.x.max(0.0) as f64;
    let y_lo = vp.y.max(0.0) as f64;
    let x_hi = ((vp.x + vp.width) as f64).min(max_x);
    let y_hi = ((vp.y + vp.height) as f64).min(max_y);

    let luts = job.luts.as_ref().map(|(decode, encode)| LutTables { decode, encode });

    for tri in job.indices.chunks_exact(3) {
        let fetch_vertex = |i: u16| {
            job.vertices
                .get(i as usize)
                .map(|v| to_screen(v, &job.transform, &vp))
                .ok_or_else(|| NativeError::InvalidCall(format!("vertex index {} out of range", i)))
        };
        let mut v = [fetch_vertex(tri[0])?, fetch_vertex(tri[1])?, fetch_vertex(tri[2])?];
        let mut area = edge(&v[0], &v[1], v[2].x, v[2].y);
        if area == 0.0 {
            continue;
        }
        if area < 0.0 {
            v.swap(1, 2);
            area = -area;
        }
        let bx0 = v.iter().map(|p| p.x).fold(f64::INFINITY, f64::min).max(x_lo).floor();
        let bx1 = v.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max).min(x_hi).ceil();
        let by0 = v.iter().map(|p| p.y).fold(f64::INFINITY, f64::min).max(y_lo).floor();
        let by1 = v.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max).min(y_hi).ceil();
        if bx0 >= bx1 || by0 >= by1 {
            continue;
        }
        let edges = [(1usize, 2usize), (2, 0), (0, 1)];
        let top_left = edges.map(|(a, b)| is_top_left(&v[a], &v[b]));

        let guards_ref = &guards;
        let rows: Vec<ShadedRow> = (by0 as u32..by1 as u32)
            .into_par_iter()
            .map(|py| {
                let cy = py as f64 + 0.5;
                let mut pixels = Vec::new();
                for px in bx0 as u32..bx1 as u32 {
                    let cx = px as f64 + 0.5;
                    let mut bary = [0.0f64; 3];
                    let mut inside = true;
                    for (k, &(a, b)) in edges.iter().enumerate() {
                        let e = edge(&v[a], &v[b], cx, cy);
                        if e < 0.0 || (e == 0.0 && !top_left[k]) {
                            inside = false;
                            break;
                        }
                        bary[k] = e / area;
                    }
                    if !inside {
                        continue;
                    }
                    let inv_w: f64 = (0..3).map(|k| bary[k] * v[k].inv_w).sum();
                    let u = (0..3).map(|k| bary[k] * v[k].uv_w[0]).sum::<f64>() / inv_w;
                    let t = (0..3).map(|k| bary[k] * v[k].uv_w[1]).sum::<f64>() / inv_w;
                    let fetch = |i: usize| match (job.sources.get(i), source_idx.get(i)) {
                        (Some(s), Some(&g)) => sample(&guards_ref[g], s, u, t, job.filter),
                        _ => [0.0, 0.0, 0.0, 1.0],
                    };
                    let mut colors = job.program.shade(fetch, &job.constants, luts);
                    if let Some(desc) = &job.blend {
                        for (i, color) in colors.iter_mut().enumerate() {
                            let target = &job.targets[i];
                            let dst = read_texel(target.format, &guards_ref[target_idx[i]][target.texel_offset(px, py)..]);
                            *color = blend(desc, *color, dst, &job.blend_factor);
                        }
                    }
                    pixels.push((px, colors));
                }
                (py, pixels)
            })
            .collect();

        for (py, pixels) in rows {
            for (px, colors) in pixels {
                for (i, color) in colors.iter().enumerate().take(job.targets.len()) {
                    let target = &job.targets[i];
                    let offset = target.texel_offset(px, py);
                    write_texel(target.format, &mut guards[target_idx[i]][offset..], *color);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::layout::{quad_vertices, QUAD_INDICES};
    use crate::shader::program::{ConvertProgram, OutputProgram, SampleProgram, IDENTITY_SWIZZLE};
    use gpuframe_core::Rect;
    use parking_lot::Mutex;
    use smallvec::smallvec;

    fn surface(width: u32, height: u32) -> PlaneSurface {
        PlaneSurface {
            memory: Arc::new(Mutex::new(vec![0; (width * height * 4) as usize])),
            offset: 0,
            pitch: width as usize * 4,
            width,
            height,
            format: NativeFormat::Rgba8Unorm,
        }
    }

    fn copy_job(src: &PlaneSurface, dst: &PlaneSurface, viewport: Viewport) -> RasterJob {
        let packed = SampleProgram::Packed {
            swizzle: IDENTITY_SWIZZLE,
            opaque: false,
        };
        RasterJob {
            program: PixelProgram {
                sample: packed,
                convert: ConvertProgram::Identity,
                output: OutputProgram::Packed {
                    swizzle: IDENTITY_SWIZZLE,
                    opaque: false,
                },
                premul_in: false,
                premul_out: false,
            },
            constants: PsConstants::default(),
            vertices: quad_vertices(Rect::full(src.width, src.height), src.width, src.height).to_vec(),
            indices: QUAD_INDICES.to_vec(),
            transform: Mat4::IDENTITY,
            sources: smallvec![src.clone()],
            luts: None,
            targets: smallvec![dst.clone()],
            viewport,
            filter: SamplerFilter::Point,
            blend: None,
            blend_factor: [1.0; 4],
            sample_mask: u32::MAX,
        }
    }

    #[test]
    fn test_quad_covers_each_pixel_once() {
        let src = surface(7, 5);
        {
            let mut bytes = src.memory.lock();
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = (i % 251) as u8;
            }
        }
        let dst = surface(7, 5);
        execute(&copy_job(&src, &dst, Viewport::from_rect(Rect::full(7, 5)))).unwrap();
        assert_eq!(*src.memory.lock(), *dst.memory.lock());
    }

    #[test]
    fn test_viewport_limits_coverage() {
        let src = surface(2, 2);
        clear(&src, [1.0, 1.0, 1.0, 1.0]);
        let dst = surface(4, 4);
        execute(&copy_job(&src, &dst, Viewport::from_rect(Rect::new(1, 1, 2, 2)))).unwrap();
        let bytes = dst.memory.lock();
        let covered = bytes.chunks_exact(4).filter(|t| t[0] == 255).count();
        assert_eq!(covered, 4);
        assert_eq!(bytes[0], 0);
    }

    #[test]
    fn test_overlapping_bindings_rejected() {
        let s = surface(2, 2);
        let err = execute(&copy_job(&s, &s, Viewport::from_rect(Rect::full(2, 2)))).unwrap_err();
        assert!(matches!(err, NativeError::InvalidCall(_)));
    }

    #[test]
    fn test_alpha_over_blend() {
        let out = blend(&BlendDesc::ALPHA_OVER, [1.0, 0.0, 0.0, 0.5], [0.0, 0.0, 1.0, 1.0], &[1.0; 4]);
        assert_eq!(out, [0.5, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_masked_draw_writes_nothing() {
        let src = surface(2, 2);
        clear(&src, [1.0; 4]);
        let dst = surface(2, 2);
        let mut job = copy_job(&src, &dst, Viewport::from_rect(Rect::full(2, 2)));
        job.sample_mask = 0;
        execute(&job).unwrap();
        assert!(dst.memory.lock().iter().all(|&b| b == 0));
    }
}
