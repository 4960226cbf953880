//! gpuframe GPU - video frames on the GPU and format conversion
//!
//! Layers, leaf first:
//! - `native`: the device seam, with a wgpu backend and a CPU reference backend
//! - `format`: abstract format to native surface format table
//! - `device`: native device plus context lock and per-device caches
//! - `memory`: one GPU surface with lazy views and CPU staging
//! - `pool` / `buffer_pool`: recycled allocations and multi-plane frames
//! - `shader`: pixel programs, WGSL generation and the compiled blob cache
//! - `converter`: shader and video-processor conversion between formats

pub mod buffer_pool;
pub mod converter;
pub mod device;
pub mod error;
pub mod format;
pub mod memory;
pub mod native;
pub mod pool;
pub mod shader;

pub use buffer_pool::{BufferPool, BufferPoolConfig, Frame};
pub use converter::{
    AlphaMode, ConversionClass, ConvertGeometry, ConvertInput, Converter, ConverterBackends, ConverterConfig,
    ConverterStats, GammaMode, Orientation, PrimariesMode,
};
pub use device::{AdapterSelector, BackendPreference, Device, DeviceOptions};
pub use error::{GpuError, NativeError, Result};
pub use format::{FormatDescriptor, FormatTable};
pub use memory::{Allocation, AllocationParams, KeyedMutexGuard, MapMode, MappedAllocation};
pub use native::software::{SoftwareDevice, SoftwareOptions};
pub use native::{BindFlags, BlendDesc, DeviceStats, MiscFlags, NativeDevice, NativeFormat, SamplerFilter};
pub use pool::{Allocator, PlainAllocator, PoolAllocator, PoolStats, PooledAllocation};
