//! Per-frame side data
//!
//! Provides:
//! - HDR10 static metadata (SMPTE ST 2086)
//! - Content light level (MaxCLL, MaxFALL)
//! - Stereo 3D pixel offsets
//! - Latest-wins tracking with change detection
//!
//! Every block is validated by exact byte size before it is used.

use bytes::{Buf, BufMut, Bytes};
use tracing::{debug, warn};

use super::dovi::{DoviChanges, DoviMetadata};
use crate::error::{Error, Result};

pub const HDR10_BLOCK_SIZE: usize = 10 * 8;
pub const CLL_BLOCK_SIZE: usize = 2 * 4;
pub const MAX_3D_OFFSETS: usize = 32;
pub const OFFSET_3D_BLOCK_SIZE: usize = 4 + MAX_3D_OFFSETS * 4;

/// Side-data tag attached to a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SideDataTag {
    Hdr10,
    ContentLightLevel,
    Offset3d,
    DolbyVision,
}

/// One side-data block as delivered with a sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideData {
    pub tag: SideDataTag,
    pub payload: Bytes,
}

impl SideData {
    pub fn new(tag: SideDataTag, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }
}

fn expect_size(what: &str, data: &[u8], size: usize) -> Result<()> {
    if data.len() != size {
        return Err(Error::MalformedMetadata(format!(
            "{} block is {} bytes, expected {}",
            what,
            data.len(),
            size
        )));
    }
    Ok(())
}

/// HDR10 static metadata (SMPTE ST 2086)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Hdr10Metadata {
    /// Red primary X (0.0-1.0)
    pub red_primary_x: f64,
    /// Red primary Y (0.0-1.0)
    pub red_primary_y: f64,
    /// Green primary X (0.0-1.0)
    pub green_primary_x: f64,
    /// Green primary Y (0.0-1.0)
    pub green_primary_y: f64,
    /// Blue primary X (0.0-1.0)
    pub blue_primary_x: f64,
    /// Blue primary Y (0.0-1.0)
    pub blue_primary_y: f64,
    /// White point X (0.0-1.0)
    pub white_point_x: f64,
    /// White point Y (0.0-1.0)
    pub white_point_y: f64,
    /// Max luminance in nits (cd/m²)
    pub max_luminance: f64,
    /// Min luminance in nits (cd/m²)
    pub min_luminance: f64,
}

impl Hdr10Metadata {
    /// Mastering display with BT.2020 primaries and D65 white
    pub fn bt2020_default() -> Self {
        Self {
            red_primary_x: 0.708,
            red_primary_y: 0.292,
            green_primary_x: 0.170,
            green_primary_y: 0.797,
            blue_primary_x: 0.131,
            blue_primary_y: 0.046,
            white_point_x: 0.3127,
            white_point_y: 0.3290,
            max_luminance: 1000.0,
            min_luminance: 0.001,
        }
    }

    pub fn with_max_luminance(max_nits: f64) -> Self {
        Self {
            max_luminance: max_nits,
            ..Self::bt2020_default()
        }
    }

    /// Parse the 80-byte block: primaries x[R,G,B], y[R,G,B], white x/y, max/min luminance
    pub fn parse(data: &[u8]) -> Result<Self> {
        expect_size("HDR10", data, HDR10_BLOCK_SIZE)?;
        let mut buf = data;
        let mut x = [0f64; 3];
        let mut y = [0f64; 3];
        for v in x.iter_mut().chain(y.iter_mut()) {
            *v = buf.get_f64_le();
        }
        let meta = Self {
            red_primary_x: x[0],
            green_primary_x: x[1],
            blue_primary_x: x[2],
            red_primary_y: y[0],
            green_primary_y: y[1],
            blue_primary_y: y[2],
            white_point_x: buf.get_f64_le(),
            white_point_y: buf.get_f64_le(),
            max_luminance: buf.get_f64_le(),
            min_luminance: buf.get_f64_le(),
        };
        if !(meta.max_luminance.is_finite() && meta.min_luminance.is_finite())
            || meta.max_luminance < 0.0
            || meta.min_luminance < 0.0
        {
            return Err(Error::MalformedMetadata(format!(
                "HDR10 luminance {}..{} is invalid",
                meta.min_luminance, meta.max_luminance
            )));
        }
        Ok(meta)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HDR10_BLOCK_SIZE);
        for v in [
            self.red_primary_x,
            self.green_primary_x,
            self.blue_primary_x,
            self.red_primary_y,
            self.green_primary_y,
            self.blue_primary_y,
            self.white_point_x,
            self.white_point_y,
            self.max_luminance,
            self.min_luminance,
        ] {
            out.put_f64_le(v);
        }
        out
    }

    /// Peak luminance to tone map from, 0 when unsignaled
    pub fn peak_nits(&self) -> f64 {
        self.max_luminance
    }
}

/// Content Light Level Info (MaxCLL, MaxFALL)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentLightLevel {
    /// Maximum Content Light Level (nits)
    pub max_cll: u32,
    /// Maximum Frame Average Light Level (nits)
    pub max_fall: u32,
}

impl ContentLightLevel {
    pub fn new(max_cll: u32, max_fall: u32) -> Self {
        Self { max_cll, max_fall }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        expect_size("Content light level", data, CLL_BLOCK_SIZE)?;
        let mut buf = data;
        Ok(Self {
            max_cll: buf.get_u32_le(),
            max_fall: buf.get_u32_le(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CLL_BLOCK_SIZE);
        out.put_u32_le(self.max_cll);
        out.put_u32_le(self.max_fall);
        out
    }
}

/// Stereo 3D pixel offsets (subtitle/OSD depth planes)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StereoOffsets {
    pub offsets: Vec<i32>,
}

impl StereoOffsets {
    pub fn parse(data: &[u8]) -> Result<Self> {
        expect_size("3D offset", data, OFFSET_3D_BLOCK_SIZE)?;
        let mut buf = data;
        let count = buf.get_i32_le();
        if count < 0 || count as usize > MAX_3D_OFFSETS {
            return Err(Error::MalformedMetadata(format!(
                "3D offset count {} out of range",
                count
            )));
        }
        let offsets = (0..count).map(|_| buf.get_i32_le()).collect();
        Ok(Self { offsets })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OFFSET_3D_BLOCK_SIZE);
        let count = self.offsets.len().min(MAX_3D_OFFSETS);
        out.put_i32_le(count as i32);
        for i in 0..MAX_3D_OFFSETS {
            out.put_i32_le(if i < count { self.offsets[i] } else { 0 });
        }
        out
    }
}

/// What changed after applying a frame's side data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetadataChanges {
    pub hdr10: bool,
    pub light_level: bool,
    pub offsets: bool,
    pub dovi: DoviChanges,
    /// First valid Dolby Vision block of the stream
    pub dovi_started: bool,
}

impl MetadataChanges {
    pub fn any(&self) -> bool {
        self.hdr10 || self.light_level || self.offsets || self.dovi.any() || self.dovi_started
    }
}

/// Latest dynamic metadata of a stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicMetadata {
    pub hdr10: Option<Hdr10Metadata>,
    pub light_level: Option<ContentLightLevel>,
    pub offsets: Option<StereoOffsets>,
    pub dovi: Option<DoviMetadata>,
}

impl DynamicMetadata {
    /// Apply one block, returning what changed
    ///
    /// A malformed block leaves the current values untouched.
    pub fn apply(&mut self, block: &SideData) -> Result<MetadataChanges> {
        let data = block.payload.as_ref();
        let mut changes = MetadataChanges::default();
        match block.tag {
            SideDataTag::Hdr10 => {
                let meta = Hdr10Metadata::parse(data)?;
                changes.hdr10 = self.hdr10 != Some(meta);
                self.hdr10 = Some(meta);
            }
            SideDataTag::ContentLightLevel => {
                let cll = ContentLightLevel::parse(data)?;
                changes.light_level = self.light_level != Some(cll);
                self.light_level = Some(cll);
            }
            SideDataTag::Offset3d => {
                let offsets = StereoOffsets::parse(data)?;
                changes.offsets = self.offsets.as_ref() != Some(&offsets);
                self.offsets = Some(offsets);
            }
            SideDataTag::DolbyVision => {
                let dovi = DoviMetadata::parse(data)?;
                changes.dovi = dovi.diff(self.dovi.as_ref());
                changes.dovi_started = self.dovi.is_none();
                self.dovi = Some(dovi);
            }
        }
        Ok(changes)
    }

    /// Apply every block of a sample, skipping malformed ones
    pub fn apply_all<'a>(
        &mut self,
        blocks: impl IntoIterator<Item = &'a SideData>,
    ) -> MetadataChanges {
        let mut total = MetadataChanges::default();
        for block in blocks {
            match self.apply(block) {
                Ok(c) => {
                    total.hdr10 |= c.hdr10;
                    total.light_level |= c.light_level;
                    total.offsets |= c.offsets;
                    total.dovi.ycc |= c.dovi.ycc;
                    total.dovi.lms |= c.dovi.lms;
                    total.dovi.curves |= c.dovi.curves;
                    total.dovi.pq_range |= c.dovi.pq_range;
                    total.dovi_started |= c.dovi_started;
                }
                Err(e) => warn!("Ignoring {:?} side data: {}", block.tag, e),
            }
        }
        if total.any() {
            debug!("Dynamic metadata changed: {:?}", total);
        }
        total
    }

    /// Content peak luminance in nits, MaxCLL preferred over the mastering display
    pub fn content_peak_nits(&self) -> Option<f64> {
        self.light_level
            .filter(|cll| cll.max_cll > 0)
            .map(|cll| cll.max_cll as f64)
            .or_else(|| {
                self.hdr10
                    .map(|m| m.peak_nits())
                    .filter(|nits| *nits > 0.0)
            })
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hdr10_block() {
        let meta = Hdr10Metadata::with_max_luminance(4000.0);
        let bytes = meta.to_bytes();
        assert_eq!(bytes.len(), 80);
        assert_eq!(Hdr10Metadata::parse(&bytes).unwrap(), meta);
        assert!(Hdr10Metadata::parse(&bytes[..72]).is_err());
    }

    #[test]
    fn test_light_level_block() {
        let cll = ContentLightLevel::parse(&ContentLightLevel::new(1000, 400).to_bytes()).unwrap();
        assert_eq!(cll.max_cll, 1000);
        assert_eq!(cll.max_fall, 400);
        assert!(ContentLightLevel::parse(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_offset_block() {
        let offsets = StereoOffsets {
            offsets: vec![-3, 0, 7],
        };
        let bytes = offsets.to_bytes();
        assert_eq!(bytes.len(), OFFSET_3D_BLOCK_SIZE);
        assert_eq!(StereoOffsets::parse(&bytes).unwrap(), offsets);

        let mut bad = bytes.clone();
        bad[..4].copy_from_slice(&33i32.to_le_bytes());
        assert!(StereoOffsets::parse(&bad).is_err());
    }

    #[test]
    fn test_latest_wins_and_change_detection() {
        let mut dm = DynamicMetadata::default();
        let block = SideData::new(SideDataTag::Hdr10, Hdr10Metadata::bt2020_default().to_bytes());
        assert!(dm.apply(&block).unwrap().hdr10);
        assert!(!dm.apply(&block).unwrap().hdr10);

        let brighter = SideData::new(
            SideDataTag::Hdr10,
            Hdr10Metadata::with_max_luminance(4000.0).to_bytes(),
        );
        assert!(dm.apply(&brighter).unwrap().hdr10);
        assert_eq!(dm.content_peak_nits(), Some(4000.0));

        let cll = SideData::new(
            SideDataTag::ContentLightLevel,
            ContentLightLevel::new(1200, 300).to_bytes(),
        );
        dm.apply(&cll).unwrap();
        assert_eq!(dm.content_peak_nits(), Some(1200.0));
    }

    #[test]
    fn test_malformed_block_keeps_previous() {
        let mut dm = DynamicMetadata::default();
        let good = SideData::new(SideDataTag::DolbyVision, DoviMetadata::identity(10).to_bytes());
        let changes = dm.apply_all([&good]);
        assert!(changes.dovi_started);
        assert!(changes.dovi.any());

        let bad = SideData::new(SideDataTag::DolbyVision, vec![0u8; 100]);
        let before = dm.clone();
        let changes = dm.apply_all([&bad]);
        assert!(!changes.any());
        assert_eq!(dm, before);
    }
}
