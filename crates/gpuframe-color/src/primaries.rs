//! RGB↔XYZ transforms derived from primaries chromaticities.
#![allow(clippy::excessive_precision)]

use crate::error::ColorError;
use crate::matrix::{mat3_inverse, mat3_mul, mat3_mul_vec, ColorMatrix, Mat3, MAT3_IDENTITY};
use gpuframe_core::ColorPrimaries;

/// Bradford cone response matrix.
const BRADFORD: Mat3 = [
    [0.8951, 0.2664, -0.1614],
    [-0.7502, 1.7135, 0.0367],
    [0.0389, -0.0685, 1.0296],
];

fn xy_to_xyz(xy: [f64; 2]) -> [f64; 3] {
    [xy[0] / xy[1], 1.0, (1.0 - xy[0] - xy[1]) / xy[1]]
}

/// RGB-to-XYZ 3x3 matrix for a primaries set (linear light, white Y = 1).
pub fn rgb_to_xyz(primaries: ColorPrimaries) -> Result<Mat3, ColorError> {
    let [r, g, b, w] = primaries.chromaticities();
    if [r, g, b, w].iter().any(|c| c[1] <= 0.0) {
        // CIE XYZ primaries have a zero y for blue; use XYZ directly
        return if primaries == ColorPrimaries::Smpte428 {
            Ok(MAT3_IDENTITY)
        } else {
            Err(ColorError::UnsupportedSpace(format!("{:?}", primaries)))
        };
    }
    let (xr, xg, xb) = (xy_to_xyz(r), xy_to_xyz(g), xy_to_xyz(b));
    let m: Mat3 = [
        [xr[0], xg[0], xb[0]],
        [xr[1], xg[1], xb[1]],
        [xr[2], xg[2], xb[2]],
    ];
    let inv = mat3_inverse(&m).ok_or(ColorError::SingularMatrix)?;
    let s = mat3_mul_vec(&inv, xy_to_xyz(w));
    Ok([
        [m[0][0] * s[0], m[0][1] * s[1], m[0][2] * s[2]],
        [m[1][0] * s[0], m[1][1] * s[1], m[1][2] * s[2]],
        [m[2][0] * s[0], m[2][1] * s[1], m[2][2] * s[2]],
    ])
}

/// XYZ-to-RGB 3x3 matrix for a primaries set (inverse of `rgb_to_xyz`).
pub fn xyz_to_rgb(primaries: ColorPrimaries) -> Result<Mat3, ColorError> {
    mat3_inverse(&rgb_to_xyz(primaries)?).ok_or(ColorError::SingularMatrix)
}

/// Bradford chromatic adaptation between two white points, in XYZ.
pub fn chromatic_adaptation(src_white: [f64; 2], dst_white: [f64; 2]) -> Result<Mat3, ColorError> {
    if src_white == dst_white {
        return Ok(MAT3_IDENTITY);
    }
    let src = mat3_mul_vec(&BRADFORD, xy_to_xyz(src_white));
    let dst = mat3_mul_vec(&BRADFORD, xy_to_xyz(dst_white));
    let scale: Mat3 = [
        [dst[0] / src[0], 0.0, 0.0],
        [0.0, dst[1] / src[1], 0.0],
        [0.0, 0.0, dst[2] / src[2]],
    ];
    let inv = mat3_inverse(&BRADFORD).ok_or(ColorError::SingularMatrix)?;
    Ok(mat3_mul(&inv, &mat3_mul(&scale, &BRADFORD)))
}

/// Linear RGB in `input` primaries to linear RGB in `output` primaries,
/// clamped to 0..=1.
pub fn primaries_matrix(input: ColorPrimaries, output: ColorPrimaries) -> Result<ColorMatrix, ColorError> {
    if input.is_equivalent(output) {
        return Ok(ColorMatrix::IDENTITY);
    }
    let to_xyz = rgb_to_xyz(input)?;
    let adapt = chromatic_adaptation(input.white_point(), output.white_point())?;
    let from_xyz = xyz_to_rgb(output)?;
    Ok(ColorMatrix::from_matrix(mat3_mul(
        &from_xyz,
        &mat3_mul(&adapt, &to_xyz),
    )))
}

/// Convert a linear RGB pixel from one primaries set to another via XYZ.
pub fn convert_3x3(
    pixel: [f64; 3],
    from: ColorPrimaries,
    to: ColorPrimaries,
) -> Result<[f64; 3], ColorError> {
    Ok(primaries_matrix(from, to)?.apply_unclamped(pixel))
}
