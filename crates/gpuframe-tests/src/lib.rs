//! Integration test crate for gpuframe.
//!
//! Holds cross-crate tests that run against the software reference device,
//! so no GPU is required.

use gpuframe_core::{Colorimetry, SystemFrame, VideoFormat, VideoInfo};
use gpuframe_gpu::{AllocationParams, BindFlags, Device, Frame, SoftwareOptions};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test subscriber filtered by `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn software_device() -> Device {
    software_device_with(SoftwareOptions::default())
}

pub fn software_device_with(options: SoftwareOptions) -> Device {
    init_tracing();
    match Device::create_software(options, false) {
        Ok(device) => device,
        Err(e) => panic!("software device: {}", e),
    }
}

/// Stream info with the usual colorimetry for the format family.
pub fn stream(format: VideoFormat, width: u32, height: u32) -> VideoInfo {
    let colorimetry = if format.is_rgb() {
        Colorimetry::SRGB
    } else {
        Colorimetry::BT709
    };
    VideoInfo::new(format, width, height).with_colorimetry(colorimetry)
}

/// A GPU frame usable both as converter input and output.
pub fn render_target(device: &Device, info: VideoInfo) -> Frame {
    let params = AllocationParams::new(info, BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET);
    match Frame::allocate(device, &params) {
        Ok(frame) => frame,
        Err(e) => panic!("{} {}x{} frame: {}", info.format, info.width, info.height, e),
    }
}

/// A CPU frame with every texel of every plane set.
pub fn solid_frame(info: VideoInfo, texels: &[&[u8]]) -> SystemFrame {
    let mut frame = match SystemFrame::new(info) {
        Ok(frame) => frame,
        Err(e) => panic!("system frame: {}", e),
    };
    for (plane, texel) in texels.iter().enumerate() {
        if let Err(e) = frame.fill_plane(plane, texel) {
            panic!("fill plane {}: {}", plane, e);
        }
    }
    frame
}

#[cfg(test)]
mod color;

#[cfg(test)]
mod converter;

#[cfg(test)]
mod memory;

#[cfg(test)]
mod pool;
