//! Abstract format to native surface format table.
//!
//! Every [`VideoFormat`] has an optional combined native format holding all
//! planes in one surface, and one resource format per plane. Which of the
//! two a device uses is decided once, when the device is created, from the
//! native capability flags.

use crate::native::{FormatSupport, NativeDevice, NativeFormat};
use gpuframe_core::VideoFormat;
use smallvec::{smallvec, SmallVec};
use tracing::debug;

/// Per-plane native formats.
pub type ResourceFormats = SmallVec<[NativeFormat; 4]>;

/// How one abstract format is stored on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub format: VideoFormat,
    /// Single native format covering every plane, if one exists.
    pub combined: Option<NativeFormat>,
    /// One native format per plane of `format`.
    pub resources: ResourceFormats,
    /// The device stores this format in one `combined` surface.
    pub uses_combined: bool,
    /// Capabilities of the storage in use.
    pub support: FormatSupport,
}

/// Combined format and per-plane formats before device probing.
fn template(format: VideoFormat) -> (Option<NativeFormat>, ResourceFormats) {
    use NativeFormat::*;
    use VideoFormat as V;
    match format {
        V::Bgra | V::Bgrx => (Some(Bgra8Unorm), smallvec![Bgra8Unorm]),
        V::Rgba | V::Rgbx => (Some(Rgba8Unorm), smallvec![Rgba8Unorm]),
        V::Argb | V::Abgr | V::Ayuv | V::Uyvy => (None, smallvec![Rgba8Unorm]),
        V::Rgb10a2 => (Some(Rgb10a2Unorm), smallvec![Rgb10a2Unorm]),
        V::Rgba64 => (Some(Rgba16Unorm), smallvec![Rgba16Unorm]),
        V::Nv12 => (Some(Nv12), smallvec![R8Unorm, Rg8Unorm]),
        V::Nv21 => (None, smallvec![R8Unorm, Rg8Unorm]),
        V::P010 => (Some(P010), smallvec![R16Unorm, Rg16Unorm]),
        V::P016 => (Some(P016), smallvec![R16Unorm, Rg16Unorm]),
        V::I420 | V::Yv12 | V::Y42b | V::Y444 | V::Gbr => (None, smallvec![R8Unorm; 3]),
        V::I420P10 | V::I422P10 | V::Y444P16 => (None, smallvec![R16Unorm; 3]),
        V::Gbra => (None, smallvec![R8Unorm; 4]),
        // VUYA bytes are what DXGI calls AYUV
        V::Vuya => (Some(Ayuv), smallvec![Rgba8Unorm]),
        V::Ayuv64 => (None, smallvec![Rgba16Unorm]),
        V::Y410 => (Some(Y410), smallvec![Rgb10a2Unorm]),
        V::Yuy2 => (Some(Yuy2), smallvec![Rgba8Unorm]),
        V::Y210 => (Some(Y210), smallvec![Rgba16Unorm]),
        V::Gray8 => (Some(R8Unorm), smallvec![R8Unorm]),
        V::Gray16 => (Some(R16Unorm), smallvec![R16Unorm]),
    }
}

const RENDERABLE: FormatSupport = FormatSupport::TEXTURE2D
    .union(FormatSupport::RENDER_TARGET)
    .union(FormatSupport::SHADER_SAMPLE);

impl FormatDescriptor {
    /// Resolve the storage of `format` against a device's capabilities.
    pub fn resolve(format: VideoFormat, support: impl Fn(NativeFormat) -> FormatSupport) -> Option<Self> {
        let (combined, resources) = template(format);

        if let Some(native) = combined {
            let caps = support(native);
            if caps.contains(RENDERABLE) || (resources.is_empty() && caps.contains(FormatSupport::TEXTURE2D)) {
                return Some(Self {
                    format,
                    combined,
                    resources,
                    uses_combined: true,
                    support: caps,
                });
            }
        }

        if resources.is_empty() {
            return None;
        }
        let mut caps = FormatSupport::all();
        for &native in &resources {
            caps &= support(native);
        }
        if !caps.contains(FormatSupport::TEXTURE2D) {
            return None;
        }
        // decoder and processor access needs the combined surface
        caps.remove(
            FormatSupport::DECODER_OUTPUT | FormatSupport::VIDEO_PROCESSOR_INPUT | FormatSupport::VIDEO_PROCESSOR_OUTPUT,
        );
        Some(Self {
            format,
            combined,
            resources,
            uses_combined: false,
            support: caps,
        })
    }

    /// Native format of each surface backing one frame, in plane order.
    pub fn surfaces(&self) -> ResourceFormats {
        match (self.uses_combined, self.combined) {
            (true, Some(native)) => smallvec![native],
            _ => self.resources.clone(),
        }
    }

    /// Logical planes held by surface `index`.
    pub fn surface_planes(&self, index: usize) -> std::ops::Range<usize> {
        if self.uses_combined {
            0..self.format.n_planes()
        } else {
            index..index + 1
        }
    }

    /// Combined native format usable by decoders and video processors.
    pub fn processor_format(&self) -> Option<NativeFormat> {
        self.combined.filter(|_| self.uses_combined)
    }

    pub fn supports(&self, caps: FormatSupport) -> bool {
        self.support.contains(caps)
    }
}

/// Per-device resolved format table.
#[derive(Debug, Clone)]
pub struct FormatTable {
    entries: Vec<Option<FormatDescriptor>>,
}

impl FormatTable {
    /// Probe `native` for every abstract format.
    pub fn probe(native: &dyn NativeDevice) -> Self {
        let entries = VideoFormat::ALL
            .iter()
            .map(|&format| {
                let entry = FormatDescriptor::resolve(format, |n| native.format_support(n));
                match &entry {
                    Some(d) => debug!(
                        "Format {} uses {}",
                        format,
                        if d.uses_combined { "combined surface" } else { "per-plane resources" }
                    ),
                    None => debug!("Format {} is not supported", format),
                }
                entry
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, format: VideoFormat) -> Option<&FormatDescriptor> {
        self.entries.get(format as usize).and_then(Option::as_ref)
    }

    /// Formats this device supports.
    pub fn supported(&self) -> impl Iterator<Item = VideoFormat> + '_ {
        self.entries.iter().flatten().map(|d| d.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_formats_cover_every_plane() {
        for format in VideoFormat::ALL {
            let (combined, resources) = template(format);
            assert_eq!(resources.len(), format.n_planes(), "{}", format);
            if let Some(native) = combined {
                assert_eq!(native.plane_count(), format.n_planes(), "{}", format);
            }
            for (i, native) in resources.iter().enumerate() {
                let plane = format.plane(i).unwrap();
                assert_eq!(native.texel_size(), plane.texel_size as usize, "{} plane {}", format, i);
            }
        }
    }

    #[test]
    fn test_combined_preferred_when_renderable() {
        let d = FormatDescriptor::resolve(VideoFormat::Nv12, |_| FormatSupport::all()).unwrap();
        assert!(d.uses_combined);
        assert_eq!(d.surfaces().as_slice(), &[NativeFormat::Nv12]);
        assert_eq!(d.surface_planes(0), 0..2);
        assert_eq!(d.processor_format(), Some(NativeFormat::Nv12));
    }

    #[test]
    fn test_falls_back_to_resources() {
        let d = FormatDescriptor::resolve(VideoFormat::Nv12, |n| {
            if n == NativeFormat::Nv12 {
                FormatSupport::TEXTURE2D | FormatSupport::DECODER_OUTPUT
            } else {
                FormatSupport::all()
            }
        })
        .unwrap();
        assert!(!d.uses_combined);
        assert_eq!(d.surfaces().as_slice(), &[NativeFormat::R8Unorm, NativeFormat::Rg8Unorm]);
        assert_eq!(d.surface_planes(1), 1..2);
        assert_eq!(d.processor_format(), None);
        assert!(!d.supports(FormatSupport::DECODER_OUTPUT));
    }

    #[test]
    fn test_unsupported_without_textures() {
        assert!(FormatDescriptor::resolve(VideoFormat::P010, |_| FormatSupport::empty()).is_none());
    }
}
