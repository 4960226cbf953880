//! Map, transfer and sharing behaviour of frames on the software device.

use crate::{render_target, software_device, solid_frame, stream};
use gpuframe_core::VideoFormat;
use gpuframe_gpu::{
    Allocation, AllocationParams, BindFlags, Converter, ConverterConfig, Frame, MapMode, MiscFlags,
    PooledAllocation,
};

#[test]
fn nested_maps_issue_one_native_map() {
    let device = software_device();
    let frame = render_target(&device, stream(VideoFormat::Bgra, 64, 64));
    let surface = frame.surfaces().next().unwrap();
    let before = device.stats();

    let maps: Vec<_> = (0..5).map(|_| surface.map(MapMode::Read).unwrap()).collect();
    assert_eq!(surface.map_count(), 5);
    drop(maps);

    let after = device.stats();
    assert_eq!(surface.map_count(), 0);
    assert_eq!(after.maps - before.maps, 1);
    assert_eq!(after.unmaps - before.unmaps, 1);
}

#[test]
fn cpu_write_then_read_downloads_once() {
    let device = software_device();
    let info = stream(VideoFormat::Bgra, 64, 64);
    let before = device.stats().downloads;
    let frame = Frame::allocate(&device, &AllocationParams::new(info, BindFlags::SHADER_RESOURCE)).unwrap();
    // assembling the frame maps it once to learn its layout
    assert_eq!(device.stats().downloads - before, 1);
    let before = device.stats().downloads;

    frame.upload_from(&solid_frame(info, &[&[30, 60, 90, 255]])).unwrap();
    let first = frame.to_system().unwrap();
    let second = frame.to_system().unwrap();
    assert_eq!(first.row(0, 63), second.row(0, 63));
    assert_eq!(&first.row(0, 17)[..4], &[30, 60, 90, 255]);
    // the CPU write lives in staging; reading it back copies nothing
    assert_eq!(device.stats().downloads, before);

    let uploads = device.stats().uploads;
    drop(frame.map_gpu(MapMode::GpuRead).unwrap());
    assert_eq!(device.stats().uploads, uploads + 1);
    frame.to_system().unwrap();
    assert_eq!(device.stats().downloads, before);
}

#[test]
fn gpu_write_invalidates_staging() {
    let device = software_device();
    let info = stream(VideoFormat::Rgba, 16, 16);
    let frame = render_target(&device, info);
    frame.upload_from(&solid_frame(info, &[&[1, 2, 3, 4]])).unwrap();
    let before = device.stats().downloads;

    drop(frame.map_gpu(MapMode::GpuWrite).unwrap());
    frame.to_system().unwrap();
    assert_eq!(device.stats().downloads - before, 1);
}

#[test]
fn views_are_memoized_per_plane() {
    let device = software_device();
    let frame = render_target(&device, stream(VideoFormat::I420, 32, 32));
    assert_eq!(frame.surface_count(), 3);
    let created = device.stats().views_created;

    let first = frame.shader_resource_views().unwrap();
    let second = frame.shader_resource_views().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
    assert_eq!(device.stats().views_created, created + 3);

    let targets = frame.render_target_views().unwrap();
    assert_eq!(targets.len(), 3);
    assert!(targets.iter().all(|t| !first.contains(t)));
}

#[test]
fn frame_layout_follows_planes() {
    let device = software_device();
    let frame = render_target(&device, stream(VideoFormat::Nv12, 48, 32));
    assert_eq!(frame.n_planes(), 2);
    assert_eq!(frame.strides().len(), 2);
    let (surface, _) = frame.plane(1).unwrap();
    let (first, _) = frame.plane(0).unwrap();
    assert!(std::ptr::eq(surface, first));
    assert!(frame.offsets()[1] >= frame.strides()[0] * 32);
}

#[test]
fn shared_surface_is_converted_on_another_device() {
    let producer = software_device();
    let consumer = software_device();
    let info = stream(VideoFormat::Rgba, 16, 16);
    let params = AllocationParams::new(info, BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET)
        .with_misc(MiscFlags::SHARED);

    let source = Frame::allocate(&producer, &params).unwrap();
    source.upload_from(&solid_frame(info, &[&[200, 100, 50, 255]])).unwrap();
    drop(source.map_gpu(MapMode::GpuRead).unwrap());
    let handle = source.surfaces().next().unwrap().shareable_handle().unwrap();

    let opened = Allocation::open_shared(&consumer, handle, info).unwrap();
    let input = Frame::from_allocations(info, [PooledAllocation::detached(opened)]).unwrap();
    let output = render_target(&consumer, info);
    let mut converter = Converter::new(&consumer, info, info, ConverterConfig::shader_only()).unwrap();
    converter.convert(&input, &output).unwrap();

    assert_eq!(converter.stats().cpu_uploads, 0);
    let pixels = output.to_system().unwrap();
    assert_eq!(&pixels.row(0, 9)[36..40], &[200, 100, 50, 255]);
}
