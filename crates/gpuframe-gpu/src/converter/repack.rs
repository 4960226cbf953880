//! CPU unpacking of packed 4:2:2 frames into planar 4:2:2.
//!
//! Shaders never sample YUY2, UYVY or Y210 directly; those frames are
//! split into Y42B or I422_10LE on the CPU and uploaded in that layout.

use crate::error::{GpuError, Result};
use gpuframe_core::{SystemFrame, VideoFormat, VideoInfo};

/// Planar format a packed 4:2:2 format is unpacked into.
pub fn planar_equivalent(format: VideoFormat) -> Option<VideoFormat> {
    match format {
        VideoFormat::Yuy2 | VideoFormat::Uyvy => Some(VideoFormat::Y42b),
        VideoFormat::Y210 => Some(VideoFormat::I422P10),
        _ => None,
    }
}

/// Stream info after unpacking; unchanged for other formats.
pub fn repacked_info(info: &VideoInfo) -> VideoInfo {
    match planar_equivalent(info.format) {
        Some(format) => VideoInfo { format, ..*info },
        None => *info,
    }
}

/// Unpack a packed 4:2:2 frame into a new planar frame.
pub fn unpack_422(src: &SystemFrame) -> Result<SystemFrame> {
    let format = planar_equivalent(src.format())
        .ok_or_else(|| GpuError::InvalidArgument(format!("{} is not packed 4:2:2", src.format())))?;
    let mut dst = SystemFrame::new(repacked_info(src.info()))?;
    let width = src.width() as usize;
    // byte positions of Y0, U, Y1, V in one 8-bit macropixel
    let order = match src.format() {
        VideoFormat::Yuy2 => Some([0, 1, 2, 3]),
        VideoFormat::Uyvy => Some([1, 0, 3, 2]),
        _ => None,
    };

    for y in 0..src.height() {
        match order {
            Some([y0, u, y1, v]) => {
                let packed = src.row(0, y);
                let mut luma = vec![0u8; width];
                let mut cb = Vec::with_capacity(width.div_ceil(2));
                let mut cr = Vec::with_capacity(width.div_ceil(2));
                for (i, px) in packed.chunks_exact(4).enumerate() {
                    luma[2 * i] = px[y0];
                    if let Some(slot) = luma.get_mut(2 * i + 1) {
                        *slot = px[y1];
                    }
                    cb.push(px[u]);
                    cr.push(px[v]);
                }
                dst.row_mut(0, y).copy_from_slice(&luma);
                dst.row_mut(1, y).copy_from_slice(&cb);
                dst.row_mut(2, y).copy_from_slice(&cr);
            }
            None => {
                // Y210: Y0 U Y1 V, 16 bits each, MSB aligned
                let words: Vec<u16> = src
                    .row(0, y)
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]) >> 6)
                    .collect();
                let mut luma = vec![0u16; width];
                let mut cb = Vec::with_capacity(width.div_ceil(2));
                let mut cr = Vec::with_capacity(width.div_ceil(2));
                for (i, px) in words.chunks_exact(4).enumerate() {
                    luma[2 * i] = px[0];
                    if let Some(slot) = luma.get_mut(2 * i + 1) {
                        *slot = px[2];
                    }
                    cb.push(px[1]);
                    cr.push(px[3]);
                }
                for (plane, samples) in [(0, &luma), (1, &cb), (2, &cr)] {
                    let row = dst.row_mut(plane, y);
                    for (out, sample) in row.chunks_exact_mut(2).zip(samples.iter()) {
                        out.copy_from_slice(&sample.to_le_bytes());
                    }
                }
            }
        }
    }
    tracing::trace!("Unpacked {} {}x{} into {}", src.format(), src.width(), src.height(), format);
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(format: VideoFormat, width: u32, height: u32, texel: &[u8]) -> SystemFrame {
        let mut frame = SystemFrame::new(VideoInfo::new(format, width, height)).unwrap();
        frame.fill_plane(0, texel).unwrap();
        frame
    }

    #[test]
    fn test_planar_equivalent() {
        assert_eq!(planar_equivalent(VideoFormat::Yuy2), Some(VideoFormat::Y42b));
        assert_eq!(planar_equivalent(VideoFormat::Uyvy), Some(VideoFormat::Y42b));
        assert_eq!(planar_equivalent(VideoFormat::Y210), Some(VideoFormat::I422P10));
        assert_eq!(planar_equivalent(VideoFormat::Nv12), None);
        let info = VideoInfo::new(VideoFormat::Nv12, 8, 8);
        assert_eq!(repacked_info(&info), info);
    }

    #[test]
    fn test_unpack_yuy2() {
        let src = packed(VideoFormat::Yuy2, 6, 2, &[10, 20, 30, 40]);
        let dst = unpack_422(&src).unwrap();
        assert_eq!(dst.format(), VideoFormat::Y42b);
        assert_eq!(dst.row(0, 1), &[10, 30, 10, 30, 10, 30]);
        assert_eq!(dst.row(1, 0), &[20, 20, 20]);
        assert_eq!(dst.row(2, 0), &[40, 40, 40]);
    }

    #[test]
    fn test_unpack_uyvy_odd_width() {
        let src = packed(VideoFormat::Uyvy, 5, 1, &[20, 10, 40, 30]);
        let dst = unpack_422(&src).unwrap();
        assert_eq!(dst.row(0, 0), &[10, 30, 10, 30, 10]);
        assert_eq!(dst.row(1, 0), &[20, 20, 20]);
        assert_eq!(dst.row(2, 0), &[40, 40, 40]);
    }

    #[test]
    fn test_unpack_y210_shifts_to_lsb() {
        let word = |v: u16| (v << 6).to_le_bytes();
        let texel: Vec<u8> = [word(64), word(512), word(940), word(448)].concat();
        let src = packed(VideoFormat::Y210, 2, 1, &texel);
        let dst = unpack_422(&src).unwrap();
        assert_eq!(dst.format(), VideoFormat::I422P10);
        assert_eq!(dst.row(0, 0), &[64, 0, 172, 3]);
        assert_eq!(dst.row(1, 0), &512u16.to_le_bytes());
        assert_eq!(dst.row(2, 0), &448u16.to_le_bytes());
    }

    #[test]
    fn test_rejects_planar_input() {
        let src = SystemFrame::new(VideoInfo::new(VideoFormat::I420, 4, 4)).unwrap();
        assert!(matches!(unpack_422(&src), Err(GpuError::InvalidArgument(_))));
    }
}
