//! GPU device management.
//!
//! A [`Device`] owns one native device and its immediate context, the
//! reentrant lock that serializes context work across threads, the format
//! table probed at creation, and per-device caches of compiled shaders and
//! samplers.

use crate::error::{GpuError, NativeError, NativeResult, Result};
use crate::format::{FormatDescriptor, FormatTable};
use crate::native::software::{SoftwareDevice, SoftwareOptions};
use crate::native::wgpu_backend::WgpuDevice;
use crate::native::{
    AdapterInfo, DeviceStats, NativeDevice, SamplerFilter, SamplerHandle, ShaderHandle,
};
use crate::shader::{self, ShaderBlob, ShaderStage};
use gpuframe_core::VideoFormat;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Which adapter a hardware device is created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterSelector {
    /// The system's preferred high-performance adapter.
    #[default]
    Default,
    /// Adapter at this enumeration index.
    Index(u32),
    /// First adapter with this PCI vendor id.
    Vendor(u32),
    /// The platform's software adapter.
    Software,
}

impl fmt::Display for AdapterSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default adapter"),
            Self::Index(i) => write!(f, "adapter index {}", i),
            Self::Vendor(v) => write!(f, "vendor 0x{:04x}", v),
            Self::Software => write!(f, "software adapter"),
        }
    }
}

/// Native backend to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// Hardware, falling back to the software device.
    #[default]
    Auto,
    Hardware,
    Software,
}

/// How to create a [`Device`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceOptions {
    pub selector: AdapterSelector,
    pub backend: BackendPreference,
    /// Request the debug/validation layer.
    pub debug: bool,
    /// Options of the software device, when one is created.
    pub software: SoftwareOptions,
}

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Create a native device, retrying once without the debug layer.
/// Returns the device and whether the debug layer took effect.
fn create_with_debug_retry<T>(debug: bool, create: impl Fn(bool) -> NativeResult<T>) -> NativeResult<(T, bool)> {
    match create(debug) {
        Ok(native) => Ok((native, debug)),
        Err(e) if debug => {
            warn!("Device creation with debug layer failed ({}), retrying without it", e);
            create(false).map(|native| (native, false))
        }
        Err(e) => Err(e),
    }
}

struct DeviceInner {
    id: u64,
    native: Arc<dyn NativeDevice>,
    lock: ReentrantMutex<()>,
    formats: FormatTable,
    debug: bool,
    vertex_shaders: Mutex<HashMap<String, ShaderHandle>>,
    pixel_shaders: Mutex<HashMap<String, ShaderHandle>>,
    samplers: Mutex<HashMap<SamplerFilter, SamplerHandle>>,
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        for (_, handle) in self.vertex_shaders.get_mut().drain() {
            self.native.destroy_shader(handle);
        }
        for (_, handle) in self.pixel_shaders.get_mut().drain() {
            self.native.destroy_shader(handle);
        }
        for (_, handle) in self.samplers.get_mut().drain() {
            self.native.destroy_sampler(handle);
        }
    }
}

/// A GPU device shared by allocations, pools and converters.
///
/// Cloning is cheap; every clone refers to the same native device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("adapter", self.inner.native.adapter_info())
            .field("debug", &self.inner.debug)
            .finish()
    }
}

impl Device {
    /// Create a device as described by `options`.
    pub fn create(options: &DeviceOptions) -> Result<Self> {
        match options.backend {
            BackendPreference::Hardware => Self::create_hardware(options.selector, options.debug),
            BackendPreference::Software => Self::create_software(options.software.clone(), options.debug),
            BackendPreference::Auto => match Self::create_hardware(options.selector, options.debug) {
                Ok(device) => Ok(device),
                Err(e) => {
                    warn!("No hardware device ({}), using the software device", e);
                    Self::create_software(options.software.clone(), options.debug)
                }
            },
        }
    }

    /// Create a wgpu device on the selected adapter.
    pub fn create_hardware(selector: AdapterSelector, debug: bool) -> Result<Self> {
        let (native, debug) = create_with_debug_retry(debug, |debug| WgpuDevice::new_blocking(&selector, debug))
            .map_err(|e| match e {
                NativeError::Unsupported(_) => GpuError::AdapterNotFound(selector.to_string()),
                other => GpuError::DeviceCreation(other),
            })?;
        Ok(Self::build(Arc::new(native), debug))
    }

    /// Create a CPU reference device.
    pub fn create_software(options: SoftwareOptions, debug: bool) -> Result<Self> {
        let (native, debug) = create_with_debug_retry(debug, |debug| SoftwareDevice::create(options.clone(), debug))
            .map_err(GpuError::DeviceCreation)?;
        Ok(Self::build(Arc::new(native), debug))
    }

    /// Wrap an externally created native device.
    pub fn wrap(native: Arc<dyn NativeDevice>) -> Self {
        Self::build(native, false)
    }

    fn build(native: Arc<dyn NativeDevice>, debug: bool) -> Self {
        let formats = FormatTable::probe(native.as_ref());
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let adapter = native.adapter_info();
        info!(
            "Device {} on adapter {} ({}, vendor 0x{:04x}, device 0x{:04x}, {})",
            id,
            adapter.index,
            adapter.description,
            adapter.vendor_id,
            adapter.device_id,
            adapter.backend
        );
        Self {
            inner: Arc::new(DeviceInner {
                id,
                native,
                lock: ReentrantMutex::new(()),
                formats,
                debug,
                vertex_shaders: Mutex::new(HashMap::new()),
                pixel_shaders: Mutex::new(HashMap::new()),
                samplers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Process-unique id of this device.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn native(&self) -> &Arc<dyn NativeDevice> {
        &self.inner.native
    }

    pub fn adapter_info(&self) -> &AdapterInfo {
        self.inner.native.adapter_info()
    }

    /// Whether the device runs with the debug layer.
    pub fn is_debug(&self) -> bool {
        self.inner.debug
    }

    /// Both handles refer to the same device.
    pub fn is_same(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Lock the immediate context. Reentrant on the owning thread.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.inner.lock.lock()
    }

    /// Storage of `format` on this device, if supported.
    pub fn format(&self, format: VideoFormat) -> Option<&FormatDescriptor> {
        self.inner.formats.get(format)
    }

    pub fn format_table(&self) -> &FormatTable {
        &self.inner.formats
    }

    pub fn stats(&self) -> DeviceStats {
        self.inner.native.stats()
    }

    /// Translate a native result, logging failures and device removal.
    pub fn check<T>(&self, call: &'static str, result: NativeResult<T>) -> Result<T> {
        result.map_err(|e| {
            if let Some(reason) = self.inner.native.removed_reason() {
                error!("{} failed, device removed (0x{:08x}): {}", call, reason.code(), reason);
                return GpuError::DeviceRemoved(reason.to_string());
            }
            error!("{} failed (0x{:08x}): {}", call, e.code(), e);
            match e {
                NativeError::Unsupported(msg) => GpuError::Unsupported(format!("{}: {}", call, msg)),
                other => GpuError::native(call, other),
            }
        })
    }

    /// Native handle of the shared quad vertex shader.
    pub fn vertex_shader(&self) -> Result<ShaderHandle> {
        self.native_shader(&shader::vertex_shader())
    }

    /// Native handle of a pixel shader, compiled once per device.
    pub fn pixel_shader(&self, blob: &ShaderBlob) -> Result<ShaderHandle> {
        self.native_shader(blob)
    }

    fn native_shader(&self, blob: &ShaderBlob) -> Result<ShaderHandle> {
        let cache = match blob.stage {
            ShaderStage::Vertex => &self.inner.vertex_shaders,
            ShaderStage::Pixel => &self.inner.pixel_shaders,
        };
        let mut cache = cache.lock();
        if let Some(&handle) = cache.get(&blob.entry_point) {
            return Ok(handle);
        }
        let created = match blob.stage {
            ShaderStage::Vertex => self.inner.native.create_vertex_shader(blob),
            ShaderStage::Pixel => self.inner.native.create_pixel_shader(blob),
        };
        let handle = match created {
            Err(NativeError::Compile(message)) => {
                error!("Shader {} failed to compile: {}", blob.entry_point, message);
                return Err(GpuError::ShaderCompile {
                    entry_point: blob.entry_point.clone(),
                    message,
                });
            }
            other => self.check("CreateShader", other)?,
        };
        cache.insert(blob.entry_point.clone(), handle);
        Ok(handle)
    }

    /// Sampler with the given filter, created once per device.
    pub fn sampler(&self, filter: SamplerFilter) -> Result<SamplerHandle> {
        let mut samplers = self.inner.samplers.lock();
        if let Some(&handle) = samplers.get(&filter) {
            return Ok(handle);
        }
        let handle = self.check("CreateSamplerState", self.inner.native.create_sampler(filter))?;
        samplers.insert(filter, handle);
        Ok(handle)
    }
}
