//! Renders a [`PixelProgram`] into WGSL source.

use super::program::{ConvertProgram, OutputProgram, PixelProgram, SampleProgram, Swizzle, LSB10_SCALE};
use std::fmt::Write;

pub const VERTEX_SOURCE: &str = include_str!("wgsl/vertex.wgsl");
const PIXEL_TEMPLATE: &str = include_str!("wgsl/converter.wgsl");

/// Bind slot of the first input texture in group 1.
pub const FIRST_TEXTURE_BINDING: u32 = 2;
pub const DECODE_LUT_BINDING: u32 = 8;
pub const ENCODE_LUT_BINDING: u32 = 9;

const LUT_FUNCTIONS: &str = "\
@group(1) @binding(8) var decode_lut: texture_2d<f32>;
@group(1) @binding(9) var encode_lut: texture_2d<f32>;

fn lut(table: texture_2d<f32>, v: f32) -> f32 {
    let last = textureDimensions(table).x - 1u;
    let pos = clamp(v, 0.0, 1.0) * f32(last);
    let lo = min(u32(floor(pos)), last);
    let hi = min(lo + 1u, last);
    let a = textureLoad(table, vec2<u32>(lo, 0u), 0).x;
    let b = textureLoad(table, vec2<u32>(hi, 0u), 0).x;
    return mix(a, b, pos - f32(lo));
}

fn lut3(table: texture_2d<f32>, c: vec3<f32>) -> vec3<f32> {
    return vec3<f32>(lut(table, c.x), lut(table, c.y), lut(table, c.z));
}";

fn swizzle(s: Swizzle) -> String {
    s.iter().map(|&c| b"xyzw"[c as usize] as char).collect()
}

fn float(v: f32) -> String {
    format!("{:.9}", v)
}

fn fetch(i: usize) -> String {
    format!("textureSample(tex{}, input_sampler, uv)", i)
}

fn sample_body(sample: &SampleProgram) -> String {
    match *sample {
        SampleProgram::Packed { swizzle: s, opaque } => {
            let mut body = format!("    var c = {}.{};\n", fetch(0), swizzle(s));
            if opaque {
                body.push_str("    c.w = 1.0;\n");
            }
            body.push_str("    return c;");
            body
        }
        SampleProgram::Gray { depth } => {
            let depth = depth.clamp(8, 16) as u32;
            let neutral = float((1u32 << (depth - 1)) as f32 / ((1u32 << depth) - 1) as f32);
            format!("    return vec4<f32>({}.x, {n}, {n}, 1.0);", fetch(0), n = neutral)
        }
        SampleProgram::SemiPlanar { swap_uv } => format!(
            "    let y = {}.x;\n    let uv_ = {}.{};\n    return vec4<f32>(y, uv_.x, uv_.y, 1.0);",
            fetch(0),
            fetch(1),
            if swap_uv { "yx" } else { "xy" }
        ),
        SampleProgram::Planar { swap_uv, lsb10 } => {
            let (u, v) = if swap_uv { (2, 1) } else { (1, 2) };
            let scale = if lsb10 { float(LSB10_SCALE) } else { float(1.0) };
            format!(
                "    let yuv = vec3<f32>({}.x, {}.x, {}.x) * {};\n    return vec4<f32>(yuv, 1.0);",
                fetch(0),
                fetch(u),
                fetch(v),
                scale
            )
        }
        SampleProgram::PlanarRgb { alpha } => format!(
            "    return vec4<f32>({}.x, {}.x, {}.x, {});",
            fetch(2),
            fetch(0),
            fetch(1),
            if alpha { format!("{}.x", fetch(3)) } else { "1.0".to_string() }
        ),
    }
}

fn convert_body(convert: ConvertProgram) -> &'static str {
    match convert {
        ConvertProgram::Identity => "    return c;",
        ConvertProgram::Matrix => "    return apply_transform(ps.post, c);",
        ConvertProgram::Gamma | ConvertProgram::Primary => {
            "    var rgb = apply_transform(ps.pre, c);
    rgb = lut3(decode_lut, rgb);
    rgb = apply_transform(ps.primaries, rgb);
    rgb = lut3(encode_lut, rgb);
    return apply_transform(ps.post, rgb);"
        }
    }
}

fn output_struct(output: &OutputProgram) -> String {
    let mut s = String::from("struct FragmentOutput {\n");
    for i in 0..output.target_count() {
        let _ = writeln!(s, "    @location({i}) target{i}: vec4<f32>,");
    }
    s.push_str("};");
    s
}

fn output_body(output: &OutputProgram) -> String {
    let single = |target: usize, value: &str| format!("    out.target{target} = vec4<f32>({value}, 0.0, 0.0, 1.0);\n");
    let lsb = |lsb10: bool| {
        if lsb10 {
            format!(" * {}", float(1.0 / LSB10_SCALE))
        } else {
            String::new()
        }
    };
    match *output {
        OutputProgram::Packed { swizzle: s, opaque } => {
            let mut body = String::new();
            if opaque {
                body.push_str("    let v = vec4<f32>(c.xyz, 1.0);\n");
            } else {
                body.push_str("    let v = c;\n");
            }
            let _ = writeln!(body, "    out.target0 = v.{};", swizzle(s));
            body
        }
        OutputProgram::Luma { lsb10 } => single(0, &format!("c.x{}", lsb(lsb10))),
        OutputProgram::Chroma { swap_uv } => format!(
            "    out.target0 = vec4<f32>(c.{}, 0.0, 1.0);\n",
            if swap_uv { "zy" } else { "yz" }
        ),
        OutputProgram::ChromaPlanar { swap_uv, lsb10 } => {
            let (a, b) = if swap_uv { ("z", "y") } else { ("y", "z") };
            let scale = lsb(lsb10);
            format!("{}{}", single(0, &format!("c.{a}{scale}")), single(1, &format!("c.{b}{scale}")))
        }
        OutputProgram::Planar => format!("{}{}{}", single(0, "c.x"), single(1, "c.y"), single(2, "c.z")),
        OutputProgram::PlanarRgb { alpha } => {
            let mut body = format!("{}{}{}", single(0, "c.y"), single(1, "c.z"), single(2, "c.x"));
            if alpha {
                body.push_str(&single(3, "c.w"));
            }
            body
        }
    }
}

/// Full WGSL module for one pixel program.
pub fn pixel_source(program: &PixelProgram) -> String {
    let mut textures = String::new();
    for i in 0..program.sample.input_count() {
        let _ = writeln!(
            textures,
            "@group(1) @binding({}) var tex{}: texture_2d<f32>;",
            FIRST_TEXTURE_BINDING as usize + i,
            i
        );
    }
    let luts = if program.convert.uses_luts() { LUT_FUNCTIONS } else { "" };
    let premul_in = if program.premul_in {
        "    if (c.w > 0.0) {\n        c = vec4<f32>(c.xyz / c.w, c.w);\n    }"
    } else {
        ""
    };
    let premul_out = if program.premul_out {
        "    color = vec4<f32>(color.xyz * color.w, color.w);"
    } else {
        ""
    };
    PIXEL_TEMPLATE
        .replace("$TEXTURES", &textures)
        .replace("$LUTS", luts)
        .replace("$SAMPLE", &sample_body(&program.sample))
        .replace("$CONVERT", convert_body(program.convert))
        .replace("$OUTPUT_STRUCT", &output_struct(&program.output))
        .replace("$OUTPUT", &output_body(&program.output))
        .replace("$PREMUL_IN", premul_in)
        .replace("$PREMUL_OUT", premul_out)
        .replace("$ENTRY", &program.entry_point())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::program::{output_passes, sample_program};
    use gpuframe_core::VideoFormat;

    fn program(input: VideoFormat, output: VideoFormat, convert: ConvertProgram) -> PixelProgram {
        PixelProgram {
            sample: sample_program(input).unwrap(),
            convert,
            output: output_passes(output).unwrap()[0].program,
            premul_in: false,
            premul_out: false,
        }
    }

    #[test]
    fn test_placeholders_fully_substituted() {
        let p = program(VideoFormat::I420P10, VideoFormat::Gbra, ConvertProgram::Primary);
        let src = pixel_source(&p);
        assert!(!src.contains('$'), "{}", src);
        assert!(src.contains(&format!("fn {}(", p.entry_point())));
        assert!(src.contains("var tex2: texture_2d<f32>"));
        assert!(src.contains("@location(3) target3"));
        assert!(src.contains("decode_lut"));
    }

    #[test]
    fn test_luts_only_when_needed() {
        let p = program(VideoFormat::Nv12, VideoFormat::Rgba, ConvertProgram::Matrix);
        let src = pixel_source(&p);
        assert!(!src.contains("decode_lut"));
        assert!(src.contains("var tex1: texture_2d<f32>"));
        assert!(!src.contains("var tex2"));
    }

    #[test]
    fn test_opaque_output_forces_alpha() {
        let p = program(VideoFormat::Rgba, VideoFormat::Bgrx, ConvertProgram::Identity);
        assert!(pixel_source(&p).contains("vec4<f32>(c.xyz, 1.0)"));
    }
}
