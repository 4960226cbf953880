//! Texel encoding of plain view formats.

use crate::native::NativeFormat;

fn unorm8(b: u8) -> f32 {
    b as f32 / 255.0
}

fn unorm16(bytes: &[u8]) -> f32 {
    u16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 65535.0
}

fn quantize(v: f32, max: u32) -> u32 {
    (v.clamp(0.0, 1.0) * max as f32).round() as u32
}

/// Decode the texel at the start of `bytes`, as a shader would see it.
pub fn read_texel(format: NativeFormat, bytes: &[u8]) -> [f32; 4] {
    use NativeFormat::*;
    match format {
        R8Unorm => [unorm8(bytes[0]), 0.0, 0.0, 1.0],
        Rg8Unorm => [unorm8(bytes[0]), unorm8(bytes[1]), 0.0, 1.0],
        Rgba8Unorm | Ayuv | Yuy2 => [unorm8(bytes[0]), unorm8(bytes[1]), unorm8(bytes[2]), unorm8(bytes[3])],
        Bgra8Unorm => [unorm8(bytes[2]), unorm8(bytes[1]), unorm8(bytes[0]), unorm8(bytes[3])],
        R16Unorm => [unorm16(bytes), 0.0, 0.0, 1.0],
        Rg16Unorm => [unorm16(bytes), unorm16(&bytes[2..]), 0.0, 1.0],
        Rgba16Unorm | Y210 => [
            unorm16(bytes),
            unorm16(&bytes[2..]),
            unorm16(&bytes[4..]),
            unorm16(&bytes[6..]),
        ],
        Rgb10a2Unorm | Y410 => {
            let v = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            [
                (v & 0x3ff) as f32 / 1023.0,
                ((v >> 10) & 0x3ff) as f32 / 1023.0,
                ((v >> 20) & 0x3ff) as f32 / 1023.0,
                (v >> 30) as f32 / 3.0,
            ]
        }
        R32Float => [f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 0.0, 0.0, 1.0],
        Nv12 => [unorm8(bytes[0]), 0.0, 0.0, 1.0],
        P010 | P016 => [unorm16(bytes), 0.0, 0.0, 1.0],
    }
}

/// Encode `value` into the texel at the start of `bytes`.
pub fn write_texel(format: NativeFormat, bytes: &mut [u8], value: [f32; 4]) {
    use NativeFormat::*;
    let u8s = |bytes: &mut [u8], n: usize| {
        for i in 0..n {
            bytes[i] = quantize(value[i], 255) as u8;
        }
    };
    let u16s = |bytes: &mut [u8], n: usize| {
        for i in 0..n {
            let q = quantize(value[i], 65535) as u16;
            bytes[i * 2..i * 2 + 2].copy_from_slice(&q.to_le_bytes());
        }
    };
    match format {
        R8Unorm | Nv12 => u8s(bytes, 1),
        Rg8Unorm => u8s(bytes, 2),
        Rgba8Unorm | Ayuv | Yuy2 => u8s(bytes, 4),
        Bgra8Unorm => {
            bytes[0] = quantize(value[2], 255) as u8;
            bytes[1] = quantize(value[1], 255) as u8;
            bytes[2] = quantize(value[0], 255) as u8;
            bytes[3] = quantize(value[3], 255) as u8;
        }
        R16Unorm | P010 | P016 => u16s(bytes, 1),
        Rg16Unorm => u16s(bytes, 2),
        Rgba16Unorm | Y210 => u16s(bytes, 4),
        Rgb10a2Unorm | Y410 => {
            let v = quantize(value[0], 1023)
                | quantize(value[1], 1023) << 10
                | quantize(value[2], 1023) << 20
                | quantize(value[3], 3) << 30;
            bytes[..4].copy_from_slice(&v.to_le_bytes());
        }
        R32Float => bytes[..4].copy_from_slice(&value[0].to_le_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_is_swizzled() {
        let mut bytes = [0u8; 4];
        write_texel(NativeFormat::Bgra8Unorm, &mut bytes, [1.0, 0.0, 0.5, 1.0]);
        assert_eq!(bytes, [128, 0, 255, 255]);
        assert_eq!(read_texel(NativeFormat::Bgra8Unorm, &bytes)[0], 1.0);
    }

    #[test]
    fn test_rgb10a2_packing() {
        let mut bytes = [0u8; 4];
        write_texel(NativeFormat::Rgb10a2Unorm, &mut bytes, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(u32::from_le_bytes(bytes), 0x3ff | 3 << 30);
    }

    #[test]
    fn test_unorm16_quantization() {
        let mut bytes = [0u8; 2];
        write_texel(NativeFormat::R16Unorm, &mut bytes, [940.0 * 64.0 / 65535.0, 0.0, 0.0, 0.0]);
        assert_eq!(u16::from_le_bytes(bytes), 940 * 64);
    }

    #[test]
    fn test_float_passthrough() {
        let mut bytes = [0u8; 4];
        write_texel(NativeFormat::R32Float, &mut bytes, [0.123, 0.0, 0.0, 0.0]);
        assert_eq!(read_texel(NativeFormat::R32Float, &bytes)[0], 0.123);
    }
}
