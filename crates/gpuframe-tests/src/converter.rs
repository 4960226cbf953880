//! End-to-end conversions on the software device.

use crate::{render_target, software_device, software_device_with, solid_frame, stream};
use gpuframe_core::{ColorRange, Rect, SystemFrame, VideoDirection, VideoFormat, VideoInfo};
use gpuframe_gpu::{ConverterBackends, ConverterConfig, Converter, GpuError, SoftwareOptions};

const RED: u64 = 0xffff_ffff_0000_0000;

fn gradient(info: VideoInfo) -> SystemFrame {
    let mut frame = solid_frame(info, &[&[0, 0, 0, 255]]);
    for y in 0..info.height {
        let row = frame.row_mut(0, y);
        for x in 0..info.width as usize {
            let px = &mut row[4 * x..4 * x + 4];
            px[0] = (x * 16) as u8;
            px[1] = (y * 16) as u8;
            px[2] = 255 - (x * 8 + y as usize * 8) as u8;
        }
    }
    frame
}

#[test]
fn nv12_to_rgba_uses_one_draw() {
    let device = software_device();
    let (input, output) = (stream(VideoFormat::Nv12, 64, 64), stream(VideoFormat::Rgba, 64, 64));
    let mut converter = Converter::new(&device, input, output, ConverterConfig::shader_only()).unwrap();
    assert!(!converter.has_processor());
    assert_eq!(converter.shader_pass_count(), 1);

    let src = render_target(&device, input);
    let dst = render_target(&device, output);
    let draws = device.stats().draws;
    converter.convert(&src, &dst).unwrap();
    assert_eq!(device.stats().draws - draws, 1);
    // freshly allocated NV12 is black
    assert_eq!(&dst.to_system().unwrap().row(0, 40)[..4], &[0, 0, 0, 255]);
}

#[test]
fn two_target_outputs_use_two_draws() {
    let device = software_device();
    let input = stream(VideoFormat::Rgba, 32, 32);
    for (format, draws) in [
        (VideoFormat::Nv12, 2),
        (VideoFormat::I420, 2),
        (VideoFormat::P010, 2),
        (VideoFormat::Y444, 1),
        (VideoFormat::Bgra, 1),
    ] {
        let output = stream(format, 32, 32);
        let mut converter = Converter::new(&device, input, output, ConverterConfig::shader_only()).unwrap();
        assert_eq!(converter.shader_pass_count(), draws, "{}", format);
        let dst = render_target(&device, output);
        let before = device.stats().draws;
        converter.convert(&gradient(input), &dst).unwrap();
        assert_eq!(device.stats().draws - before, draws as u64, "{}", format);
    }
}

#[test]
fn rgb_yuv_rgb_round_trip_within_one_lsb() {
    let device = software_device();
    let rgba = stream(VideoFormat::Rgba, 16, 16);
    let ayuv = stream(VideoFormat::Ayuv64, 16, 16).with_range(ColorRange::Limited);
    let mut forward = Converter::new(&device, rgba, ayuv, ConverterConfig::shader_only()).unwrap();
    let mut back = Converter::new(&device, ayuv, rgba, ConverterConfig::shader_only()).unwrap();

    let src = gradient(rgba);
    let yuv = render_target(&device, ayuv);
    let out = render_target(&device, rgba);
    forward.convert(&src, &yuv).unwrap();
    back.convert(&yuv, &out).unwrap();

    let result = out.to_system().unwrap();
    for y in 0..16 {
        for (a, b) in src.row(0, y).iter().zip(result.row(0, y)) {
            assert!(a.abs_diff(*b) <= 1, "row {}: {} vs {}", y, a, b);
        }
    }
}

#[test]
fn border_matches_converted_color() {
    let device = software_device();
    let input = stream(VideoFormat::Rgba, 16, 16);
    let black = solid_frame(input, &[&[0, 0, 0, 255]]);

    // code values of limited BT.709 red
    let cases: [(VideoFormat, &[&[u8]]); 3] = [
        (VideoFormat::Rgba, &[&[255, 0, 0, 255]]),
        (VideoFormat::Nv12, &[&[63], &[102, 240]]),
        (VideoFormat::Y444, &[&[63], &[102], &[240]]),
    ];
    for (format, border) in cases {
        let output = stream(format, 16, 16);
        let mut converter = Converter::new(&device, input, output, ConverterConfig::shader_only()).unwrap();
        converter.set_dest_rect(Some(Rect::new(4, 4, 8, 8))).unwrap();
        converter.set_fill_border(true);
        converter.set_border_color(RED);
        let dst = render_target(&device, output);
        converter.convert(&black, &dst).unwrap();

        let result = dst.to_system().unwrap();
        for (plane, texel) in border.iter().enumerate() {
            assert_eq!(&result.row(plane, 0)[..texel.len()], *texel, "{} plane {}", format, plane);
        }
        if format != VideoFormat::Rgba {
            // inside the destination rectangle: limited black
            assert_eq!(result.row(0, 8)[8], 16, "{}", format);
        }
    }
}

#[test]
fn processor_conversion_and_shader_fallback() {
    let (input, output) = (stream(VideoFormat::Nv12, 32, 32), stream(VideoFormat::Bgra, 32, 32));

    let device = software_device();
    let mut converter = Converter::new(&device, input, output, ConverterConfig::default()).unwrap();
    let (src, dst) = (render_target(&device, input), render_target(&device, output));
    converter.set_direction(VideoDirection::Rotate90R);
    converter.convert(&src, &dst).unwrap();
    assert_eq!(converter.stats().processor_conversions, 1);
    assert_eq!(device.stats().draws, 0);

    let failing = software_device_with(SoftwareOptions {
        fail_processor_blits: true,
        ..Default::default()
    });
    let mut converter = Converter::new(&failing, input, output, ConverterConfig::default()).unwrap();
    let (src, dst) = (render_target(&failing, input), render_target(&failing, output));
    converter.convert(&src, &dst).unwrap();
    let stats = converter.stats();
    assert_eq!(stats.processor_fallbacks, 1);
    assert_eq!(stats.shader_conversions, 1);
    assert_eq!(failing.stats().draws, 1);
}

#[test]
fn config_from_json_limits_backends() {
    let device = software_device();
    let config = ConverterConfig::from_json(r#"{ "backends": "VIDEO_PROCESSOR" }"#).unwrap();
    assert_eq!(config.backends, ConverterBackends::VIDEO_PROCESSOR);
    let converter = Converter::new(
        &device,
        stream(VideoFormat::Nv12, 16, 16),
        stream(VideoFormat::Rgba, 16, 16),
        config,
    )
    .unwrap();
    assert!(converter.has_processor());
    assert!(!converter.has_shader());
}

#[test]
fn every_pair_builds_or_explains() {
    let device = software_device();
    let mut built = 0;
    for input in VideoFormat::ALL {
        for output in VideoFormat::ALL {
            let result = Converter::new(
                &device,
                stream(input, 16, 16),
                stream(output, 16, 16),
                ConverterConfig::default(),
            );
            match result {
                Ok(converter) => {
                    assert!(converter.has_shader() || converter.has_processor());
                    built += 1;
                }
                Err(GpuError::Unsupported(reason)) => assert!(!reason.is_empty()),
                Err(e) => panic!("{} -> {}: {}", input, output, e),
            }
        }
    }
    // every non-packed output is reachable from every input
    assert_eq!(built, VideoFormat::ALL.len() * (VideoFormat::ALL.len() - 3));
}
