//! Media type descriptors
//!
//! Upstream filters offer video either with the legacy video-info header or
//! the extended one (interlace flags, picture aspect ratio, packed
//! colorimetry). Both shapes reduce to the same [`VideoGeometry`].

use crate::error::{Error, Result};
use crate::processing::colorimetry::ExtendedColorInfo;
use crate::types::{FieldOrder, Rect, Resolution};

use super::catalog::{lookup, ColorFormat, ColorSystem, PixelFormatDescriptor};
use super::classify::{classify, subtype_for, Guid};

/// Interlace flags of the extended header
pub const INTERLACE_IS_INTERLACED: u32 = 0x0000_0001;
pub const INTERLACE_ONE_FIELD_PER_SAMPLE: u32 = 0x0000_0002;
pub const INTERLACE_FIELD1_FIRST: u32 = 0x0000_0004;

/// Control flag marking the extended color word as valid
pub const CONTROL_COLORINFO_PRESENT: u32 = 0x0000_0080;

/// Bitmap header shared by both video-info shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitmapInfoHeader {
    pub width: i32,
    /// Negative for top-down RGB
    pub height: i32,
    pub bit_count: u16,
    /// FourCC or `BI_RGB`/`BI_BITFIELDS`
    pub compression: u32,
    pub size_image: u32,
}

/// Legacy video-info header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoInfoHeader {
    pub source: Rect,
    pub target: Rect,
    /// 100 ns units
    pub avg_time_per_frame: i64,
    pub bmi: BitmapInfoHeader,
}

/// Extended video-info header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoInfoHeader2 {
    pub source: Rect,
    pub target: Rect,
    pub avg_time_per_frame: i64,
    pub interlace_flags: u32,
    pub pict_aspect_x: u32,
    pub pict_aspect_y: u32,
    /// Low byte holds control flags; with `CONTROL_COLORINFO_PRESENT` the
    /// whole word is a packed extended color format
    pub control_flags: u32,
    pub bmi: BitmapInfoHeader,
}

/// Format block attached to a media type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatBlock {
    VideoInfo(VideoInfoHeader),
    VideoInfo2(VideoInfoHeader2),
}

/// Candidate media type offered by the upstream filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaType {
    pub subtype: Guid,
    pub format: FormatBlock,
    /// Display aspect ratio imposed by the host, wins over the header
    pub aspect_override: Option<(u32, u32)>,
}

/// Logical fields extracted from a media type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoGeometry {
    pub format: ColorFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per line of the first plane
    pub pitch: u32,
    /// Bottom-up RGB: rows must be flipped on upload
    pub bottom_up: bool,
    pub source_rect: Rect,
    pub aspect: (u32, u32),
    pub field_order: FieldOrder,
    /// 100 ns units, 0 when unknown
    pub frame_duration: i64,
    /// Colorimetry as signaled, possibly with unknown fields
    pub color: ExtendedColorInfo,
}

impl VideoGeometry {
    pub fn descriptor(&self) -> &'static PixelFormatDescriptor {
        lookup(self.format)
    }

    pub fn size(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn is_interlaced(&self) -> bool {
        self.field_order.is_interlaced()
    }
}

impl MediaType {
    /// Media type with a legacy header
    pub fn video_info(subtype: Guid, header: VideoInfoHeader) -> Self {
        Self {
            subtype,
            format: FormatBlock::VideoInfo(header),
            aspect_override: None,
        }
    }

    /// Media type with an extended header
    pub fn video_info2(subtype: Guid, header: VideoInfoHeader2) -> Self {
        Self {
            subtype,
            format: FormatBlock::VideoInfo2(header),
            aspect_override: None,
        }
    }

    /// Extended-header media type describing a top-down `format` frame
    ///
    /// Pitch is the tightest 4-byte aligned line. Returns `None` for
    /// [`ColorFormat::None`] and for sizes the header fields cannot hold.
    pub fn for_format(format: ColorFormat, width: u32, height: u32) -> Option<Self> {
        let (subtype, compression) = subtype_for(format)?;
        let desc = lookup(format);
        let w = i32::try_from(width).ok()?;
        let h = i32::try_from(height).ok()?;
        let pitch = width.checked_mul(desc.pack_size as u32)?.checked_add(3)? & !3;
        let size_image = pitch as u64 * height as u64 * desc.pitch_coeff as u64 / 2;
        let header = VideoInfoHeader2 {
            source: Rect::new(0, 0, w, h),
            target: Rect::new(0, 0, w, h),
            bmi: BitmapInfoHeader {
                width: w,
                height: -h,
                bit_count: (desc.pack_size as u32 * 8 * desc.pitch_coeff as u32 / 2) as u16,
                compression,
                size_image: u32::try_from(size_image).ok()?,
            },
            ..Default::default()
        };
        Some(Self::video_info2(subtype, header))
    }

    /// Signal colorimetry through the extended header's control flags
    ///
    /// No effect on legacy headers, which cannot carry it.
    pub fn with_color_info(mut self, info: &ExtendedColorInfo) -> Self {
        if let FormatBlock::VideoInfo2(vih2) = &mut self.format {
            vih2.control_flags =
                (vih2.control_flags & 0xFF) | CONTROL_COLORINFO_PRESENT | info.to_packed();
        }
        self
    }

    pub fn with_interlace_flags(mut self, flags: u32) -> Self {
        if let FormatBlock::VideoInfo2(vih2) = &mut self.format {
            vih2.interlace_flags = flags;
        }
        self
    }

    pub fn with_aspect_override(mut self, x: u32, y: u32) -> Self {
        self.aspect_override = Some((x, y));
        self
    }

    fn bmi(&self) -> &BitmapInfoHeader {
        match &self.format {
            FormatBlock::VideoInfo(vih) => &vih.bmi,
            FormatBlock::VideoInfo2(vih2) => &vih2.bmi,
        }
    }

    /// Classify the format without validating the rest of the header
    pub fn color_format(&self) -> ColorFormat {
        let bmi = self.bmi();
        classify(&self.subtype, bmi.compression, bmi.bit_count)
    }

    /// Validate the media type and extract its logical fields
    pub fn geometry(&self) -> Result<VideoGeometry> {
        let bmi = *self.bmi();
        let format = self.color_format();
        if format == ColorFormat::None {
            return Err(Error::UnsupportedFormat(format!(
                "unrecognized subtype {} (compression {:#010x}, {} bpp)",
                self.subtype, bmi.compression, bmi.bit_count
            )));
        }
        let desc = lookup(format);

        if bmi.width <= 0 || bmi.height == 0 || bmi.height == i32::MIN {
            return Err(Error::UnsupportedFormat(format!(
                "{} with invalid size {}x{}",
                desc.name, bmi.width, bmi.height
            )));
        }
        let width = bmi.width as u32;
        let height = bmi.height.unsigned_abs();
        let overflow = || {
            Error::UnsupportedFormat(format!(
                "{} {}x{} overflows the line size",
                desc.name, width, height
            ))
        };

        let min_pitch = width
            .checked_mul(desc.pack_size as u32)
            .ok_or_else(overflow)?;
        let pitch = if bmi.size_image != 0 {
            let lines = height as u64 * desc.pitch_coeff as u64;
            u32::try_from(bmi.size_image as u64 * 2 / lines).map_err(|_| overflow())?
        } else if desc.color_system == ColorSystem::Rgb {
            min_pitch.checked_add(3).ok_or_else(overflow)? & !3
        } else {
            return Err(Error::UnsupportedFormat(format!(
                "{} without image size",
                desc.name
            )));
        };
        if pitch < min_pitch {
            return Err(Error::UnsupportedFormat(format!(
                "{} pitch {} below line size {}",
                desc.name, pitch, min_pitch
            )));
        }

        let (source, interlace_flags, pict_aspect, control_flags, avg_time_per_frame) =
            match &self.format {
                FormatBlock::VideoInfo(vih) => (vih.source, 0, None, 0, vih.avg_time_per_frame),
                FormatBlock::VideoInfo2(vih2) => (
                    vih2.source,
                    vih2.interlace_flags,
                    (vih2.pict_aspect_x != 0 && vih2.pict_aspect_y != 0)
                        .then_some((vih2.pict_aspect_x, vih2.pict_aspect_y)),
                    vih2.control_flags,
                    vih2.avg_time_per_frame,
                ),
            };

        let full = Rect::new(0, 0, width as i32, height as i32);
        let source_rect = if source.is_empty()
            || source.right > full.right
            || source.bottom > full.bottom
            || source.left < 0
            || source.top < 0
        {
            full
        } else {
            source
        };

        let aspect = self
            .aspect_override
            .filter(|(x, y)| *x != 0 && *y != 0)
            .or(pict_aspect)
            .unwrap_or_else(|| reduce(source_rect.width(), source_rect.height()));

        let field_order = if interlace_flags & INTERLACE_IS_INTERLACED == 0 {
            FieldOrder::Progressive
        } else if interlace_flags & INTERLACE_FIELD1_FIRST != 0 {
            FieldOrder::TopFieldFirst
        } else {
            FieldOrder::BottomFieldFirst
        };

        let color = if control_flags & CONTROL_COLORINFO_PRESENT != 0 {
            ExtendedColorInfo::from_packed(control_flags)
        } else {
            ExtendedColorInfo::default()
        };

        Ok(VideoGeometry {
            format,
            width,
            height,
            pitch,
            bottom_up: desc.color_system == ColorSystem::Rgb && bmi.height > 0,
            source_rect,
            aspect,
            field_order,
            frame_duration: avg_time_per_frame.max(0),
            color,
        })
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn reduce(x: u32, y: u32) -> (u32, u32) {
    match gcd(x, y) {
        0 => (x, y),
        g => (x / g, y / g),
    }
}
