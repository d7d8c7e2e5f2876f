//! Pixel format catalog
//!
//! Every color format the renderer accepts has exactly one
//! [`PixelFormatDescriptor`]. Lookups go through an explicit `match` on the
//! format tag so reordering [`ColorFormat`] can never shift a descriptor onto
//! the wrong format.

use serde::{Deserialize, Serialize};

/// Canonical color format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum ColorFormat {
    #[default]
    None = 0,
    // 8-bit YUV
    Yv12 = 1,
    Iyuv = 2,
    Nv12 = 3,
    Yuy2 = 4,
    Yv16 = 5,
    Yv24 = 6,
    Ayuv = 7,
    // High bit depth YUV, semi-planar and packed
    P010 = 8,
    P016 = 9,
    P210 = 10,
    P216 = 11,
    Y210 = 12,
    Y216 = 13,
    Y410 = 14,
    Y416 = 15,
    // High bit depth YUV, planar little-endian
    Yuv420P10 = 16,
    Yuv420P16 = 17,
    Yuv422P10 = 18,
    Yuv422P16 = 19,
    Yuv444P10 = 20,
    Yuv444P16 = 21,
    // RGB
    Rgb24 = 22,
    Xrgb32 = 23,
    Argb32 = 24,
    Rgb48 = 25,
    Bgr48 = 26,
    Bgra64 = 27,
    B64a = 28,
    Gbrp8 = 29,
    Gbrp10 = 30,
    Gbrp16 = 31,
    // Gray
    Y8 = 32,
    Y800 = 33,
    Y116 = 34,
}

impl ColorFormat {
    /// Every real format, in declaration order
    pub const ALL: [ColorFormat; 34] = [
        ColorFormat::Yv12,
        ColorFormat::Iyuv,
        ColorFormat::Nv12,
        ColorFormat::Yuy2,
        ColorFormat::Yv16,
        ColorFormat::Yv24,
        ColorFormat::Ayuv,
        ColorFormat::P010,
        ColorFormat::P016,
        ColorFormat::P210,
        ColorFormat::P216,
        ColorFormat::Y210,
        ColorFormat::Y216,
        ColorFormat::Y410,
        ColorFormat::Y416,
        ColorFormat::Yuv420P10,
        ColorFormat::Yuv420P16,
        ColorFormat::Yuv422P10,
        ColorFormat::Yuv422P16,
        ColorFormat::Yuv444P10,
        ColorFormat::Yuv444P16,
        ColorFormat::Rgb24,
        ColorFormat::Xrgb32,
        ColorFormat::Argb32,
        ColorFormat::Rgb48,
        ColorFormat::Bgr48,
        ColorFormat::Bgra64,
        ColorFormat::B64a,
        ColorFormat::Gbrp8,
        ColorFormat::Gbrp10,
        ColorFormat::Gbrp16,
        ColorFormat::Y8,
        ColorFormat::Y800,
        ColorFormat::Y116,
    ];

    /// Map a raw tag value back onto the enumeration
    pub fn from_raw(value: u32) -> Option<Self> {
        if value == ColorFormat::None as u32 {
            return Some(ColorFormat::None);
        }
        Self::ALL.iter().copied().find(|f| *f as u32 == value)
    }

    /// Look a format up by its catalog name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| lookup(*f).name.eq_ignore_ascii_case(name))
    }

    pub fn descriptor(&self) -> &'static PixelFormatDescriptor {
        lookup(*self)
    }
}

impl std::fmt::Display for ColorFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", lookup(*self).name)
    }
}

/// Color system of the samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorSystem {
    #[default]
    Unknown,
    Rgb,
    Yuv,
    Gray,
}

/// Chroma subsampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Subsampling {
    #[default]
    Unknown,
    S444,
    S422,
    S420,
    S400,
}

impl Subsampling {
    /// Horizontal and vertical chroma decimation factors
    pub fn chroma_period(&self) -> (u32, u32) {
        match self {
            Subsampling::S420 => (2, 2),
            Subsampling::S422 => (2, 1),
            _ => (1, 1),
        }
    }
}

/// How the planes of a format are arranged in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlaneLayout {
    #[default]
    Unknown,
    /// All components interleaved in one plane
    Packed,
    /// Luma plane followed by an interleaved chroma plane
    SemiPlanar,
    /// One plane per component
    Planar,
}

/// Component order of planar formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChannelOrder {
    #[default]
    Natural,
    /// V plane stored before U (YV12, YV16, YV24)
    Vu,
    /// Planes stored as G, B, R
    Gbr,
}

/// GPU surface format used for video processor input or shader planes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurfaceFormat {
    R8,
    R8G8,
    R16,
    R16G16,
    Bgra8,
    Bgrx8,
    Rgba8,
    Rgb10a2,
    Rgba16,
    Rgba16f,
    Nv12,
    P010,
    P016,
    P210,
    P216,
    Yuy2,
    Y210,
    Y216,
    Ayuv,
    Y410,
    Y416,
}

impl SurfaceFormat {
    /// Bits per color component
    pub fn component_bits(&self) -> u8 {
        match self {
            SurfaceFormat::R8
            | SurfaceFormat::R8G8
            | SurfaceFormat::Bgra8
            | SurfaceFormat::Bgrx8
            | SurfaceFormat::Rgba8
            | SurfaceFormat::Nv12
            | SurfaceFormat::Yuy2
            | SurfaceFormat::Ayuv => 8,
            SurfaceFormat::Rgb10a2
            | SurfaceFormat::P010
            | SurfaceFormat::P210
            | SurfaceFormat::Y210
            | SurfaceFormat::Y410 => 10,
            _ => 16,
        }
    }
}

/// Static description of a pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormatDescriptor {
    pub format: ColorFormat,
    pub name: &'static str,
    /// Number of memory planes (0 only for the sentinel)
    pub planes: u8,
    pub layout: PlaneLayout,
    /// Bytes per sample in the first plane
    pub pack_size: u8,
    /// Total lines of the buffer = height * pitch_coeff / 2
    pub pitch_coeff: u8,
    pub color_system: ColorSystem,
    pub subsampling: Subsampling,
    pub bit_depth: u8,
    pub channel_order: ChannelOrder,
    /// Samples sit in the low bits of a 16-bit word
    pub lsb_aligned: bool,
    /// Surface the hardware video processor reads, if it can take this format at all
    pub vp_format: Option<SurfaceFormat>,
    /// Per-plane textures for the shader path
    pub plane_formats: [Option<SurfaceFormat>; 3],
}

impl PixelFormatDescriptor {
    pub fn is_none(&self) -> bool {
        self.format == ColorFormat::None
    }

    pub fn is_packed_422(&self) -> bool {
        self.layout == PlaneLayout::Packed && self.subsampling == Subsampling::S422
    }

    pub fn is_gbr(&self) -> bool {
        self.channel_order == ChannelOrder::Gbr
    }

    /// Bit width of the texture the shader samples
    pub fn texture_bits(&self) -> u8 {
        if self.lsb_aligned {
            16
        } else {
            self.bit_depth
        }
    }

    /// Number of buffer lines for a picture of `height` rows
    pub fn buffer_lines(&self, height: u32) -> u64 {
        height as u64 * self.pitch_coeff as u64 / 2
    }
}

const fn descriptor(
    format: ColorFormat,
    name: &'static str,
    layout: PlaneLayout,
    pack_size: u8,
    pitch_coeff: u8,
    color_system: ColorSystem,
    subsampling: Subsampling,
    bit_depth: u8,
    vp_format: Option<SurfaceFormat>,
    plane_formats: [Option<SurfaceFormat>; 3],
) -> PixelFormatDescriptor {
    let planes = match layout {
        PlaneLayout::Packed => 1,
        PlaneLayout::SemiPlanar => 2,
        PlaneLayout::Planar => match subsampling {
            Subsampling::S400 => 1,
            _ => 3,
        },
        PlaneLayout::Unknown => 0,
    };
    PixelFormatDescriptor {
        format,
        name,
        planes,
        layout,
        pack_size,
        pitch_coeff,
        color_system,
        subsampling,
        bit_depth,
        channel_order: ChannelOrder::Natural,
        lsb_aligned: false,
        vp_format,
        plane_formats,
    }
}

const fn with_order(mut d: PixelFormatDescriptor, order: ChannelOrder) -> PixelFormatDescriptor {
    d.channel_order = order;
    d
}

const fn lsb(mut d: PixelFormatDescriptor) -> PixelFormatDescriptor {
    d.lsb_aligned = true;
    d
}

use ColorSystem::{Gray, Rgb, Yuv};
use PlaneLayout::{Packed, Planar, SemiPlanar};
use SurfaceFormat as S;
use Subsampling::{S400, S420, S422, S444};

static NONE: PixelFormatDescriptor = PixelFormatDescriptor {
    format: ColorFormat::None,
    name: "None",
    planes: 0,
    layout: PlaneLayout::Unknown,
    pack_size: 0,
    pitch_coeff: 0,
    color_system: ColorSystem::Unknown,
    subsampling: Subsampling::Unknown,
    bit_depth: 0,
    channel_order: ChannelOrder::Natural,
    lsb_aligned: false,
    vp_format: None,
    plane_formats: [None, None, None],
};

const PLANAR8: [Option<SurfaceFormat>; 3] = [Some(S::R8), Some(S::R8), Some(S::R8)];
const PLANAR16: [Option<SurfaceFormat>; 3] = [Some(S::R16), Some(S::R16), Some(S::R16)];

static YV12: PixelFormatDescriptor = with_order(
    descriptor(ColorFormat::Yv12, "YV12", Planar, 1, 3, Yuv, S420, 8, Some(S::Nv12), PLANAR8),
    ChannelOrder::Vu,
);
static IYUV: PixelFormatDescriptor =
    descriptor(ColorFormat::Iyuv, "IYUV", Planar, 1, 3, Yuv, S420, 8, Some(S::Nv12), PLANAR8);
static NV12: PixelFormatDescriptor = descriptor(
    ColorFormat::Nv12, "NV12", SemiPlanar, 1, 3, Yuv, S420, 8,
    Some(S::Nv12), [Some(S::R8), Some(S::R8G8), None],
);
static YUY2: PixelFormatDescriptor = descriptor(
    ColorFormat::Yuy2, "YUY2", Packed, 2, 2, Yuv, S422, 8,
    Some(S::Yuy2), [Some(S::Rgba8), None, None],
);
static YV16: PixelFormatDescriptor = with_order(
    descriptor(ColorFormat::Yv16, "YV16", Planar, 1, 4, Yuv, S422, 8, None, PLANAR8),
    ChannelOrder::Vu,
);
static YV24: PixelFormatDescriptor = with_order(
    descriptor(ColorFormat::Yv24, "YV24", Planar, 1, 6, Yuv, S444, 8, None, PLANAR8),
    ChannelOrder::Vu,
);
static AYUV: PixelFormatDescriptor = descriptor(
    ColorFormat::Ayuv, "AYUV", Packed, 4, 2, Yuv, S444, 8,
    Some(S::Ayuv), [Some(S::Bgra8), None, None],
);
static P010: PixelFormatDescriptor = descriptor(
    ColorFormat::P010, "P010", SemiPlanar, 2, 3, Yuv, S420, 10,
    Some(S::P010), [Some(S::R16), Some(S::R16G16), None],
);
static P016: PixelFormatDescriptor = descriptor(
    ColorFormat::P016, "P016", SemiPlanar, 2, 3, Yuv, S420, 16,
    Some(S::P016), [Some(S::R16), Some(S::R16G16), None],
);
static P210: PixelFormatDescriptor = descriptor(
    ColorFormat::P210, "P210", SemiPlanar, 2, 4, Yuv, S422, 10,
    Some(S::P210), [Some(S::R16), Some(S::R16G16), None],
);
static P216: PixelFormatDescriptor = descriptor(
    ColorFormat::P216, "P216", SemiPlanar, 2, 4, Yuv, S422, 16,
    Some(S::P216), [Some(S::R16), Some(S::R16G16), None],
);
static Y210: PixelFormatDescriptor = descriptor(
    ColorFormat::Y210, "Y210", Packed, 4, 2, Yuv, S422, 10,
    Some(S::Y210), [Some(S::Rgba16), None, None],
);
static Y216: PixelFormatDescriptor = descriptor(
    ColorFormat::Y216, "Y216", Packed, 4, 2, Yuv, S422, 16,
    Some(S::Y216), [Some(S::Rgba16), None, None],
);
static Y410: PixelFormatDescriptor = descriptor(
    ColorFormat::Y410, "Y410", Packed, 4, 2, Yuv, S444, 10,
    Some(S::Y410), [Some(S::Rgb10a2), None, None],
);
static Y416: PixelFormatDescriptor = descriptor(
    ColorFormat::Y416, "Y416", Packed, 8, 2, Yuv, S444, 16,
    Some(S::Y416), [Some(S::Rgba16), None, None],
);
static YUV420P10: PixelFormatDescriptor = lsb(descriptor(
    ColorFormat::Yuv420P10, "YUV420P10", Planar, 2, 3, Yuv, S420, 10,
    None, PLANAR16,
));
static YUV420P16: PixelFormatDescriptor =
    descriptor(ColorFormat::Yuv420P16, "YUV420P16", Planar, 2, 3, Yuv, S420, 16, None, PLANAR16);
static YUV422P10: PixelFormatDescriptor = lsb(descriptor(
    ColorFormat::Yuv422P10, "YUV422P10", Planar, 2, 4, Yuv, S422, 10,
    None, PLANAR16,
));
static YUV422P16: PixelFormatDescriptor =
    descriptor(ColorFormat::Yuv422P16, "YUV422P16", Planar, 2, 4, Yuv, S422, 16, None, PLANAR16);
static YUV444P10: PixelFormatDescriptor = lsb(descriptor(
    ColorFormat::Yuv444P10, "YUV444P10", Planar, 2, 6, Yuv, S444, 10,
    None, PLANAR16,
));
static YUV444P16: PixelFormatDescriptor =
    descriptor(ColorFormat::Yuv444P16, "YUV444P16", Planar, 2, 6, Yuv, S444, 16, None, PLANAR16);
// RGB24 and the 48/64-bit RGB variants are expanded to 4 components on upload.
static RGB24: PixelFormatDescriptor = descriptor(
    ColorFormat::Rgb24, "RGB24", Packed, 3, 2, Rgb, S444, 8,
    Some(S::Bgrx8), [Some(S::Bgrx8), None, None],
);
static XRGB32: PixelFormatDescriptor = descriptor(
    ColorFormat::Xrgb32, "RGB32", Packed, 4, 2, Rgb, S444, 8,
    Some(S::Bgrx8), [Some(S::Bgrx8), None, None],
);
static ARGB32: PixelFormatDescriptor = descriptor(
    ColorFormat::Argb32, "ARGB32", Packed, 4, 2, Rgb, S444, 8,
    Some(S::Bgra8), [Some(S::Bgra8), None, None],
);
static RGB48: PixelFormatDescriptor = descriptor(
    ColorFormat::Rgb48, "RGB48", Packed, 6, 2, Rgb, S444, 16,
    Some(S::Rgba16), [Some(S::Rgba16), None, None],
);
static BGR48: PixelFormatDescriptor = descriptor(
    ColorFormat::Bgr48, "BGR48", Packed, 6, 2, Rgb, S444, 16,
    Some(S::Rgba16), [Some(S::Rgba16), None, None],
);
static BGRA64: PixelFormatDescriptor = descriptor(
    ColorFormat::Bgra64, "BGRA64", Packed, 8, 2, Rgb, S444, 16,
    Some(S::Rgba16), [Some(S::Rgba16), None, None],
);
static B64A: PixelFormatDescriptor = descriptor(
    ColorFormat::B64a, "b64a", Packed, 8, 2, Rgb, S444, 16,
    Some(S::Rgba16), [Some(S::Rgba16), None, None],
);
static GBRP8: PixelFormatDescriptor = with_order(
    descriptor(ColorFormat::Gbrp8, "GBRP8", Planar, 1, 6, Rgb, S444, 8, None, PLANAR8),
    ChannelOrder::Gbr,
);
static GBRP10: PixelFormatDescriptor = with_order(
    lsb(descriptor(ColorFormat::Gbrp10, "GBRP10", Planar, 2, 6, Rgb, S444, 10, None, PLANAR16)),
    ChannelOrder::Gbr,
);
static GBRP16: PixelFormatDescriptor = with_order(
    descriptor(ColorFormat::Gbrp16, "GBRP16", Planar, 2, 6, Rgb, S444, 16, None, PLANAR16),
    ChannelOrder::Gbr,
);
static Y8: PixelFormatDescriptor = descriptor(
    ColorFormat::Y8, "Y8", Planar, 1, 2, Gray, S400, 8,
    None, [Some(S::R8), None, None],
);
static Y800: PixelFormatDescriptor = descriptor(
    ColorFormat::Y800, "Y800", Planar, 1, 2, Gray, S400, 8,
    None, [Some(S::R8), None, None],
);
static Y116: PixelFormatDescriptor = descriptor(
    ColorFormat::Y116, "Y116", Planar, 2, 2, Gray, S400, 16,
    None, [Some(S::R16), None, None],
);

/// Look up the descriptor for a format tag
pub fn lookup(format: ColorFormat) -> &'static PixelFormatDescriptor {
    match format {
        ColorFormat::None => &NONE,
        ColorFormat::Yv12 => &YV12,
        ColorFormat::Iyuv => &IYUV,
        ColorFormat::Nv12 => &NV12,
        ColorFormat::Yuy2 => &YUY2,
        ColorFormat::Yv16 => &YV16,
        ColorFormat::Yv24 => &YV24,
        ColorFormat::Ayuv => &AYUV,
        ColorFormat::P010 => &P010,
        ColorFormat::P016 => &P016,
        ColorFormat::P210 => &P210,
        ColorFormat::P216 => &P216,
        ColorFormat::Y210 => &Y210,
        ColorFormat::Y216 => &Y216,
        ColorFormat::Y410 => &Y410,
        ColorFormat::Y416 => &Y416,
        ColorFormat::Yuv420P10 => &YUV420P10,
        ColorFormat::Yuv420P16 => &YUV420P16,
        ColorFormat::Yuv422P10 => &YUV422P10,
        ColorFormat::Yuv422P16 => &YUV422P16,
        ColorFormat::Yuv444P10 => &YUV444P10,
        ColorFormat::Yuv444P16 => &YUV444P16,
        ColorFormat::Rgb24 => &RGB24,
        ColorFormat::Xrgb32 => &XRGB32,
        ColorFormat::Argb32 => &ARGB32,
        ColorFormat::Rgb48 => &RGB48,
        ColorFormat::Bgr48 => &BGR48,
        ColorFormat::Bgra64 => &BGRA64,
        ColorFormat::B64a => &B64A,
        ColorFormat::Gbrp8 => &GBRP8,
        ColorFormat::Gbrp10 => &GBRP10,
        ColorFormat::Gbrp16 => &GBRP16,
        ColorFormat::Y8 => &Y8,
        ColorFormat::Y800 => &Y800,
        ColorFormat::Y116 => &Y116,
    }
}

/// Look up a raw tag; values outside the enumeration yield the sentinel
pub fn lookup_raw(value: u32) -> &'static PixelFormatDescriptor {
    ColorFormat::from_raw(value).map(lookup).unwrap_or(&NONE)
}
