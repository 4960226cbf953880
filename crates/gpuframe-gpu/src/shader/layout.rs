//! Vertex layout and constant buffer layouts shared by every backend.

use bytemuck::{Pod, Zeroable};
use gpuframe_color::ColorMatrix;
use gpuframe_core::Rect;

/// Quad vertex: clip-space position and texture coordinate.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
}

/// Vertex shader constants.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VsConstants {
    /// Column-major 4x4 transform applied to positions.
    pub transform: [[f32; 4]; 4],
}

impl Default for VsConstants {
    fn default() -> Self {
        Self {
            transform: glam::Mat4::IDENTITY.to_cols_array_2d(),
        }
    }
}

/// One colorspace transform as laid out in the pixel shader constants.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ColorTransformConstants {
    /// Matrix rows, each padded to four floats.
    pub coeff: [[f32; 4]; 3],
    pub offset: [f32; 4],
    pub min: [f32; 4],
    pub max: [f32; 4],
}

impl ColorTransformConstants {
    /// Apply the transform, clamping each component.
    pub fn apply(&self, c: [f32; 3]) -> [f32; 3] {
        let mut out = [0.0; 3];
        for (i, v) in out.iter_mut().enumerate() {
            let row = self.coeff[i];
            let x = row[0] * c[0] + row[1] * c[1] + row[2] * c[2] + self.offset[i];
            *v = x.clamp(self.min[i], self.max[i]);
        }
        out
    }
}

impl Default for ColorTransformConstants {
    fn default() -> Self {
        Self::from(&ColorMatrix::IDENTITY)
    }
}

impl From<&ColorMatrix> for ColorTransformConstants {
    fn from(m: &ColorMatrix) -> Self {
        let finite = |v: f64| (v as f32).clamp(f32::MIN, f32::MAX);
        let mut coeff = [[0.0; 4]; 3];
        for (row, src) in coeff.iter_mut().zip(m.matrix.iter()) {
            row[..3].copy_from_slice(&[src[0] as f32, src[1] as f32, src[2] as f32]);
        }
        Self {
            coeff,
            offset: [m.offset[0] as f32, m.offset[1] as f32, m.offset[2] as f32, 0.0],
            min: [finite(m.min[0]), finite(m.min[1]), finite(m.min[2]), 0.0],
            max: [finite(m.max[0]), finite(m.max[1]), finite(m.max[2]), 1.0],
        }
    }
}

/// Pixel shader constants: pre-matrix, primaries matrix, post-matrix, alpha.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PsConstants {
    pub pre: ColorTransformConstants,
    pub primaries: ColorTransformConstants,
    pub post: ColorTransformConstants,
    /// x: alpha multiplier.
    pub alpha: [f32; 4],
}

impl Default for PsConstants {
    fn default() -> Self {
        Self {
            pre: ColorTransformConstants::default(),
            primaries: ColorTransformConstants::default(),
            post: ColorTransformConstants::default(),
            alpha: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Full-frame quad: bottom-left, top-left, top-right, bottom-right.
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 3, 0, 2];

/// Quad covering clip space, sampling `crop` of a `width` x `height` input.
pub fn quad_vertices(crop: Rect, width: u32, height: u32) -> [Vertex; 4] {
    let w = width.max(1) as f32;
    let h = height.max(1) as f32;
    let u0 = crop.x as f32 / w;
    let v0 = crop.y as f32 / h;
    let u1 = crop.right() as f32 / w;
    let v1 = crop.bottom() as f32 / h;
    let vertex = |x: f32, y: f32, u: f32, v: f32| Vertex {
        position: [x, y, 0.0],
        texcoord: [u, v],
    };
    [
        vertex(-1.0, -1.0, u0, v1),
        vertex(-1.0, 1.0, u0, v0),
        vertex(1.0, 1.0, u1, v0),
        vertex(1.0, -1.0, u1, v1),
    ]
}

/// Vertex transform applying a 2x2 orientation matrix in clip space.
pub fn orientation_transform(m: [[f32; 2]; 2]) -> VsConstants {
    let mat = glam::Mat4::from_cols(
        glam::Vec4::new(m[0][0], m[0][1], 0.0, 0.0),
        glam::Vec4::new(m[1][0], m[1][1], 0.0, 0.0),
        glam::Vec4::Z,
        glam::Vec4::W,
    );
    VsConstants {
        transform: mat.to_cols_array_2d(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 20);
        assert_eq!(std::mem::size_of::<VsConstants>(), 64);
        assert_eq!(std::mem::size_of::<ColorTransformConstants>(), 96);
        assert_eq!(std::mem::size_of::<PsConstants>(), 3 * 96 + 16);
    }

    #[test]
    fn test_identity_constants_pass_through() {
        let t = ColorTransformConstants::default();
        assert_eq!(t.apply([0.25, 0.5, 0.75]), [0.25, 0.5, 0.75]);
        assert_eq!(t.apply([1.5, -0.5, 0.0]), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_quad_samples_crop() {
        let quad = quad_vertices(Rect::new(16, 0, 32, 24), 64, 48);
        assert_eq!(quad[1].texcoord, [0.25, 0.0]);
        assert_eq!(quad[3].texcoord, [0.75, 0.5]);
    }

    #[test]
    fn test_orientation_transform_rotates_axes() {
        let vs = orientation_transform([[0.0, -1.0], [1.0, 0.0]]);
        let m = glam::Mat4::from_cols_array_2d(&vs.transform);
        let p = m * glam::Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert_eq!(p.truncate().truncate(), glam::Vec2::new(0.0, -1.0));
    }
}
