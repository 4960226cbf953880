//! HDR static metadata: mastering display color volume and content light level.

use crate::error::ColorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chromaticity coordinates are carried in units of 0.00002.
const CHROMATICITY_UNIT: f32 = 0.00002;
/// Luminance is carried in units of 0.0001 cd/m².
const LUMINANCE_UNIT: f32 = 0.0001;

/// Mastering display color volume (SMPTE ST 2086).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MasteringDisplayInfo {
    /// Red, green and blue primaries as CIE xy coordinates.
    pub primaries: [[f32; 2]; 3],
    /// White point as CIE xy coordinates.
    pub white_point: [f32; 2],
    /// Maximum display luminance in cd/m².
    pub max_luminance: f32,
    /// Minimum display luminance in cd/m².
    pub min_luminance: f32,
}

impl Default for MasteringDisplayInfo {
    fn default() -> Self {
        Self {
            primaries: [
                [0.708, 0.292], // R (Rec.2020)
                [0.170, 0.797], // G
                [0.131, 0.046], // B
            ],
            white_point: [0.3127, 0.3290], // D65
            max_luminance: 1000.0,
            min_luminance: 0.005,
        }
    }
}

fn parse_fields<const N: usize>(s: &str, what: &str) -> Result<[u32; N], ColorError> {
    let mut out = [0u32; N];
    let mut parts = s.trim().split(':');
    for slot in out.iter_mut() {
        let part = parts
            .next()
            .ok_or_else(|| ColorError::Parse(format!("{} needs {} fields: {:?}", what, N, s)))?;
        *slot = part
            .trim()
            .parse()
            .map_err(|e| ColorError::Parse(format!("bad {} field {:?}: {}", what, part, e)))?;
    }
    if parts.next().is_some() {
        return Err(ColorError::Parse(format!(
            "{} has more than {} fields: {:?}",
            what, N, s
        )));
    }
    Ok(out)
}

impl FromStr for MasteringDisplayInfo {
    type Err = ColorError;

    /// Parse `"Rx:Ry:Gx:Gy:Bx:By:Wx:Wy:max:min"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = parse_fields::<10>(s, "mastering display info")?;
        let xy = |i: usize| [v[i] as f32 * CHROMATICITY_UNIT, v[i + 1] as f32 * CHROMATICITY_UNIT];
        let info = Self {
            primaries: [xy(0), xy(2), xy(4)],
            white_point: xy(6),
            max_luminance: v[8] as f32 * LUMINANCE_UNIT,
            min_luminance: v[9] as f32 * LUMINANCE_UNIT,
        };
        if info.min_luminance > info.max_luminance {
            return Err(ColorError::Parse(format!(
                "minimum luminance {} exceeds maximum {}",
                info.min_luminance, info.max_luminance
            )));
        }
        Ok(info)
    }
}

impl fmt::Display for MasteringDisplayInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = |v: f32| (v / CHROMATICITY_UNIT).round() as u32;
        let l = |v: f32| (v / LUMINANCE_UNIT).round() as u32;
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
            c(self.primaries[0][0]),
            c(self.primaries[0][1]),
            c(self.primaries[1][0]),
            c(self.primaries[1][1]),
            c(self.primaries[2][0]),
            c(self.primaries[2][1]),
            c(self.white_point[0]),
            c(self.white_point[1]),
            l(self.max_luminance),
            l(self.min_luminance)
        )
    }
}

/// Content light level (CTA-861.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentLightLevel {
    /// Maximum Content Light Level in nits.
    pub max_content_light_level: u16,
    /// Maximum Frame Average Light Level in nits.
    pub max_frame_avg_light_level: u16,
}

impl FromStr for ContentLightLevel {
    type Err = ColorError;

    /// Parse `"maxCLL:maxFALL"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [cll, fall] = parse_fields::<2>(s, "content light level")?;
        let narrow = |v: u32| {
            u16::try_from(v).map_err(|_| ColorError::Parse(format!("light level {} out of range", v)))
        };
        Ok(Self {
            max_content_light_level: narrow(cll)?,
            max_frame_avg_light_level: narrow(fall)?,
        })
    }
}

impl fmt::Display for ContentLightLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.max_content_light_level, self.max_frame_avg_light_level
        )
    }
}

/// HDR metadata for a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HdrMetadata {
    pub mastering_display: Option<MasteringDisplayInfo>,
    pub content_light_level: Option<ContentLightLevel>,
}

impl HdrMetadata {
    /// Build from the optional string forms; `None` when neither is given.
    pub fn from_strings(
        mastering_display: Option<&str>,
        content_light_level: Option<&str>,
    ) -> Result<Option<Self>, ColorError> {
        let meta = Self {
            mastering_display: mastering_display.map(str::parse).transpose()?,
            content_light_level: content_light_level.map(str::parse).transpose()?,
        };
        Ok(if meta.is_empty() { None } else { Some(meta) })
    }

    pub fn is_empty(&self) -> bool {
        self.mastering_display.is_none() && self.content_light_level.is_none()
    }
}
