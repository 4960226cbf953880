//! Color math as the converter drives it.

use gpuframe_color::{gamma_lut, primaries_matrix, HdrMetadata, LutDirection};
use gpuframe_core::{
    ColorPrimaries, ColorRange, Colorimetry, MatrixCoefficients, TransferFunction, VideoFormat, VideoInfo,
};
use gpuframe_gpu::converter::{border_code_values, ConversionClass, ConversionMatrices};
use gpuframe_gpu::ConverterConfig;
use proptest::prelude::*;

fn rgb() -> VideoInfo {
    VideoInfo::new(VideoFormat::Rgba, 16, 16).with_colorimetry(Colorimetry::SRGB)
}

fn close(a: [f64; 3], b: [f64; 3], eps: f64) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= eps)
}

#[test]
fn gamma_tables_invert_each_other() {
    for transfer in [TransferFunction::Srgb, TransferFunction::Bt709, TransferFunction::Gamma22] {
        let decode = gamma_lut(transfer, LutDirection::Decode);
        let encode = gamma_lut(transfer, LutDirection::Encode);
        for i in 5..=100 {
            let v = i as f32 / 100.0;
            let back = encode.lookup(decode.lookup(v));
            assert!((back - v).abs() < 2e-3, "{:?} {} -> {}", transfer, v, back);
        }
    }
}

#[test]
fn primaries_round_trip_to_identity() {
    let there = primaries_matrix(ColorPrimaries::Bt709, ColorPrimaries::Bt2020).unwrap();
    let back = primaries_matrix(ColorPrimaries::Bt2020, ColorPrimaries::Bt709).unwrap();
    assert!(there.then(&back).is_identity(1e-9));
}

#[test]
fn hdr_metadata_strings_round_trip() {
    let mastering = "35400:14600:8500:39850:6550:2300:15635:16450:10000000:50";
    let meta = HdrMetadata::from_strings(Some(mastering), Some("1000:400"))
        .unwrap()
        .unwrap();
    assert_eq!(meta.mastering_display.unwrap().to_string(), mastering);
    assert_eq!(meta.content_light_level.unwrap().to_string(), "1000:400");
    assert_eq!(HdrMetadata::from_strings(None, None).unwrap(), None);
}

#[test]
fn gamma_class_maps_black_to_black() {
    let input = VideoInfo::new(VideoFormat::Nv12, 16, 16).with_colorimetry(Colorimetry::BT709);
    let output = VideoInfo::new(VideoFormat::P010, 16, 16).with_colorimetry(Colorimetry::BT2100_PQ);
    let config = ConverterConfig {
        primaries_mode: gpuframe_gpu::PrimariesMode::Apply,
        ..Default::default()
    };
    let class = ConversionClass::classify(&input, &output, &config);
    assert_eq!(class, ConversionClass::Primary);
    let m = ConversionMatrices::derive(class, &input, &output).unwrap();
    let out = m.apply([16.0 / 255.0, 128.0 / 255.0, 128.0 / 255.0]);
    // limited 10-bit black, MSB aligned
    assert!(close(out, [64.0 / 1023.0, 512.0 / 1023.0, 512.0 / 1023.0], 2e-3), "{:?}", out);
}

proptest! {
    #[test]
    fn prop_converter_matrices_round_trip(
        r in 0.0f64..=1.0,
        g in 0.0f64..=1.0,
        b in 0.0f64..=1.0,
        format in prop::sample::select(vec![VideoFormat::Nv12, VideoFormat::P010, VideoFormat::Y444P16]),
        limited in any::<bool>(),
        matrix in prop::sample::select(vec![
            MatrixCoefficients::Bt601,
            MatrixCoefficients::Bt709,
            MatrixCoefficients::Bt2020,
        ]),
    ) {
        let range = if limited { ColorRange::Limited } else { ColorRange::Full };
        let yuv = VideoInfo::new(format, 16, 16)
            .with_colorimetry(Colorimetry::BT709.with_range(range).with_matrix(matrix));
        let config = ConverterConfig::default();
        let forward_class = ConversionClass::classify(&rgb(), &yuv, &config);
        prop_assert_eq!(forward_class, ConversionClass::Simple);

        let forward = ConversionMatrices::derive(forward_class, &rgb(), &yuv).unwrap();
        let back = ConversionMatrices::derive(ConversionClass::classify(&yuv, &rgb(), &config), &yuv, &rgb()).unwrap();
        let out = back.apply(forward.apply([r, g, b]));
        prop_assert!(close(out, [r, g, b], 1e-6), "{:?} vs {:?}", out, [r, g, b]);
    }

    #[test]
    fn prop_rgb_border_is_the_color(r in any::<u16>(), g in any::<u16>(), b in any::<u16>()) {
        let argb = (0xffff_u64 << 48) | ((r as u64) << 32) | ((g as u64) << 16) | b as u64;
        let code = border_code_values(argb, &rgb()).unwrap();
        let expected = [r, g, b].map(|v| v as f64 / 65535.0);
        prop_assert!(close([code[0] as f64, code[1] as f64, code[2] as f64], expected, 1e-6));
        prop_assert_eq!(code[3], 1.0);
    }
}
