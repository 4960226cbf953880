//! Buffer pool behaviour across threads.

use crate::{software_device, stream};
use gpuframe_core::VideoFormat;
use gpuframe_gpu::{
    AllocationParams, Allocator, BindFlags, BufferPool, BufferPoolConfig, GpuError, PlainAllocator, PoolAllocator,
};
use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

fn params(format: VideoFormat) -> AllocationParams {
    AllocationParams::new(stream(format, 64, 48), BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET)
}

fn array_config(capacity: usize) -> BufferPoolConfig {
    BufferPoolConfig {
        max_buffers: capacity,
        use_texture_array: true,
        ..Default::default()
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn array_pool_never_exceeds_capacity() {
    let device = software_device();
    let pool = BufferPool::new(&device, params(VideoFormat::Nv12), array_config(3)).unwrap();
    pool.set_active(true).unwrap();

    let frames: Vec<_> = (0..3).map(|_| pool.try_acquire().unwrap()).collect();
    let slices: HashSet<u32> = frames
        .iter()
        .map(|f| f.surfaces().next().unwrap().subresource())
        .collect();
    assert_eq!(slices.len(), 3);
    assert!(matches!(pool.try_acquire(), Err(GpuError::Exhausted)));
    assert_eq!(pool.pools()[0].stats().outstanding, 3);
    assert_eq!(pool.pools()[0].capacity(), Some(3));

    drop(frames);
    assert_eq!(pool.pools()[0].stats().outstanding, 0);
    assert_eq!(pool.pools()[0].stats().free, 3);
}

#[test]
fn blocked_acquire_gets_released_frame() {
    let device = software_device();
    let pool = BufferPool::new(&device, params(VideoFormat::Rgba), array_config(1)).unwrap();
    pool.set_active(true).unwrap();
    let held = pool.acquire().unwrap();

    thread::scope(|s| {
        let waiter = s.spawn(|| pool.acquire().map(|f| f.surface_count()));
        wait_for(|| pool.pools()[0].stats().waits >= 1);
        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), 1);
    });
}

#[test]
fn flushing_wakes_blocked_acquire() {
    let device = software_device();
    let pool = BufferPool::new(&device, params(VideoFormat::Nv12), array_config(2)).unwrap();
    pool.set_active(true).unwrap();
    let held: Vec<_> = (0..2).map(|_| pool.acquire().unwrap()).collect();

    thread::scope(|s| {
        let waiter = s.spawn(|| pool.acquire().map(drop));
        wait_for(|| pool.pools()[0].stats().waits >= 1);
        pool.set_active(false).unwrap();
        assert!(matches!(waiter.join().unwrap(), Err(GpuError::Flushing)));
    });

    let destroyed = device.stats().textures_destroyed;
    drop(held);
    // the staging surface of the first frame, which was mapped for its
    // layout, then the texture array with the last slice
    assert_eq!(device.stats().textures_destroyed, destroyed + 2);
    assert_eq!(pool.pools()[0].stats().freed_inactive, 2);
}

#[test]
fn plain_pool_recycles_frames() {
    let device = software_device();
    let config = BufferPoolConfig {
        min_buffers: 2,
        max_buffers: 2,
        use_texture_array: false,
    };
    let pool = BufferPool::new(&device, params(VideoFormat::I420), config).unwrap();
    pool.start().unwrap();
    assert_eq!(pool.pools().len(), 3);
    assert!(pool.pools().iter().all(|p| p.stats().free == 2));

    pool.set_active(true).unwrap();
    let created = device.stats().textures_created;
    // the first frame is mapped for its layout, one staging surface per plane
    drop(pool.acquire().unwrap());
    assert_eq!(device.stats().textures_created, created + 3);

    let created = device.stats().textures_created;
    for _ in 0..4 {
        let frame = pool.acquire().unwrap();
        assert_eq!(frame.surface_count(), 3);
    }
    assert_eq!(device.stats().textures_created, created);
    let stats = pool.pools()[0].stats();
    assert_eq!(stats.hits, 5);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.recycled, 5);
}

#[test]
fn inactive_allocators_report_flushing() {
    let device = software_device();
    let descs = params(VideoFormat::Rgba).surface_descs(device.format(VideoFormat::Rgba).unwrap());
    let allocators: Vec<Box<dyn Allocator>> = vec![
        Box::new(PlainAllocator::new(&device, descs[0].clone())),
        Box::new(PoolAllocator::new(&device, descs[0].clone(), 1, 4)),
        Box::new(PoolAllocator::new_array(&device, descs[0].clone(), 2).unwrap()),
    ];
    for allocator in &allocators {
        allocator.set_active(true).unwrap();
        assert!(allocator.is_active());
        drop(allocator.try_alloc().unwrap());
        allocator.set_active(false).unwrap();
        assert!(matches!(allocator.try_alloc(), Err(GpuError::Flushing)));
        assert!(matches!(allocator.alloc(), Err(GpuError::Flushing)));
    }
}
