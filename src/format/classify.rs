//! Wire identifier classification
//!
//! Maps FourCC codes and media subtype GUIDs onto [`ColorFormat`]. Anything
//! that does not match exactly classifies to [`ColorFormat::None`].

use super::catalog::ColorFormat;

/// Build a FourCC from four bytes, first byte in the low bits
pub const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

pub const FCC_NV12: u32 = fourcc(b'N', b'V', b'1', b'2');
pub const FCC_YV12: u32 = fourcc(b'Y', b'V', b'1', b'2');
pub const FCC_IYUV: u32 = fourcc(b'I', b'Y', b'U', b'V');
pub const FCC_I420: u32 = fourcc(b'I', b'4', b'2', b'0');
pub const FCC_YUY2: u32 = fourcc(b'Y', b'U', b'Y', b'2');
pub const FCC_YV16: u32 = fourcc(b'Y', b'V', b'1', b'6');
pub const FCC_YV24: u32 = fourcc(b'Y', b'V', b'2', b'4');
pub const FCC_AYUV: u32 = fourcc(b'A', b'Y', b'U', b'V');
pub const FCC_P010: u32 = fourcc(b'P', b'0', b'1', b'0');
pub const FCC_P016: u32 = fourcc(b'P', b'0', b'1', b'6');
pub const FCC_P210: u32 = fourcc(b'P', b'2', b'1', b'0');
pub const FCC_P216: u32 = fourcc(b'P', b'2', b'1', b'6');
pub const FCC_Y210: u32 = fourcc(b'Y', b'2', b'1', b'0');
pub const FCC_Y216: u32 = fourcc(b'Y', b'2', b'1', b'6');
pub const FCC_Y410: u32 = fourcc(b'Y', b'4', b'1', b'0');
pub const FCC_Y416: u32 = fourcc(b'Y', b'4', b'1', b'6');
pub const FCC_Y8: u32 = fourcc(b'Y', b'8', b' ', b' ');
pub const FCC_Y800: u32 = fourcc(b'Y', b'8', b'0', b'0');
pub const FCC_GREY: u32 = fourcc(b'G', b'R', b'E', b'Y');
pub const FCC_Y116: u32 = fourcc(b'Y', b'1', 0, 16);
pub const FCC_B64A: u32 = fourcc(b'b', b'6', b'4', b'a');
pub const FCC_RGB48: u32 = fourcc(b'R', b'G', b'B', 48);
pub const FCC_BGR48: u32 = fourcc(b'B', b'G', b'R', 48);
pub const FCC_BGRA64: u32 = fourcc(b'B', b'R', b'A', 64);

/// `BI_RGB` compression: plain RGB identified by bit count alone
pub const BI_RGB: u32 = 0;
/// `BI_BITFIELDS` compression: RGB with explicit masks
pub const BI_BITFIELDS: u32 = 3;

/// Media subtype / interface GUID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    /// Subtype GUID that carries a FourCC in its first field
    pub const fn from_fourcc(code: u32) -> Self {
        Self::new(code, 0x0000, 0x0010, FOURCC_GUID_TAIL)
    }

    /// The FourCC, if this GUID follows the FourCC subtype pattern
    pub fn fourcc(&self) -> Option<u32> {
        (self.data2 == 0x0000 && self.data3 == 0x0010 && self.data4 == FOURCC_GUID_TAIL)
            .then_some(self.data1)
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-",
            self.data1, self.data2, self.data3, self.data4[0], self.data4[1]
        )?;
        for b in &self.data4[2..] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

const FOURCC_GUID_TAIL: [u8; 8] = [0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71];

pub const SUBTYPE_RGB24: Guid = Guid::new(
    0xe436eb7d,
    0x524f,
    0x11ce,
    [0x9f, 0x53, 0x00, 0x20, 0xaf, 0x0b, 0xa7, 0x70],
);
pub const SUBTYPE_RGB32: Guid = Guid::new(
    0xe436eb7e,
    0x524f,
    0x11ce,
    [0x9f, 0x53, 0x00, 0x20, 0xaf, 0x0b, 0xa7, 0x70],
);
pub const SUBTYPE_ARGB32: Guid = Guid::new(
    0x773c9ac0,
    0x3274,
    0x11d0,
    [0xb7, 0x24, 0x00, 0xaa, 0x00, 0x6c, 0x1a, 0x01],
);

/// Planar little-endian YUV: 'Y3' + layout byte + bit depth
fn classify_planar_yuv(layout: u8, depth: u8) -> ColorFormat {
    match (layout, depth) {
        (11, 10) => ColorFormat::Yuv420P10,
        (11, 16) => ColorFormat::Yuv420P16,
        (10, 10) => ColorFormat::Yuv422P10,
        (10, 16) => ColorFormat::Yuv422P16,
        (0, 10) => ColorFormat::Yuv444P10,
        (0, 16) => ColorFormat::Yuv444P16,
        _ => ColorFormat::None,
    }
}

/// Planar GBR: 'G3' 0 + bit depth
fn classify_planar_gbr(layout: u8, depth: u8) -> ColorFormat {
    match (layout, depth) {
        (0, 8) => ColorFormat::Gbrp8,
        (0, 10) => ColorFormat::Gbrp10,
        (0, 16) => ColorFormat::Gbrp16,
        _ => ColorFormat::None,
    }
}

/// Classify a FourCC code
pub fn classify_fourcc(code: u32) -> ColorFormat {
    match code {
        FCC_NV12 => ColorFormat::Nv12,
        FCC_YV12 => ColorFormat::Yv12,
        FCC_IYUV | FCC_I420 => ColorFormat::Iyuv,
        FCC_YUY2 => ColorFormat::Yuy2,
        FCC_YV16 => ColorFormat::Yv16,
        FCC_YV24 => ColorFormat::Yv24,
        FCC_AYUV => ColorFormat::Ayuv,
        FCC_P010 => ColorFormat::P010,
        FCC_P016 => ColorFormat::P016,
        FCC_P210 => ColorFormat::P210,
        FCC_P216 => ColorFormat::P216,
        FCC_Y210 => ColorFormat::Y210,
        FCC_Y216 => ColorFormat::Y216,
        FCC_Y410 => ColorFormat::Y410,
        FCC_Y416 => ColorFormat::Y416,
        FCC_Y8 => ColorFormat::Y8,
        FCC_Y800 | FCC_GREY => ColorFormat::Y800,
        FCC_Y116 => ColorFormat::Y116,
        FCC_B64A => ColorFormat::B64a,
        FCC_RGB48 => ColorFormat::Rgb48,
        FCC_BGR48 => ColorFormat::Bgr48,
        FCC_BGRA64 => ColorFormat::Bgra64,
        _ => {
            let [a, b, c, d] = code.to_le_bytes();
            match (a, b) {
                (b'Y', b'3') => classify_planar_yuv(c, d),
                (b'G', b'3') => classify_planar_gbr(c, d),
                _ => ColorFormat::None,
            }
        }
    }
}

/// Classify uncompressed RGB by bit count (`BI_RGB` / `BI_BITFIELDS`)
pub fn classify_rgb_bitcount(bit_count: u16) -> ColorFormat {
    match bit_count {
        24 => ColorFormat::Rgb24,
        32 => ColorFormat::Xrgb32,
        _ => ColorFormat::None,
    }
}

/// Classify a media subtype GUID
pub fn classify_subtype(subtype: &Guid) -> ColorFormat {
    match *subtype {
        SUBTYPE_RGB24 => ColorFormat::Rgb24,
        SUBTYPE_RGB32 => ColorFormat::Xrgb32,
        SUBTYPE_ARGB32 => ColorFormat::Argb32,
        _ => subtype
            .fourcc()
            .map(classify_fourcc)
            .unwrap_or(ColorFormat::None),
    }
}

/// Subtype and bitmap compression that classify back to `format`
pub fn subtype_for(format: ColorFormat) -> Option<(Guid, u32)> {
    let fcc = match format {
        ColorFormat::None => return None,
        ColorFormat::Rgb24 => return Some((SUBTYPE_RGB24, BI_RGB)),
        ColorFormat::Xrgb32 => return Some((SUBTYPE_RGB32, BI_RGB)),
        ColorFormat::Argb32 => return Some((SUBTYPE_ARGB32, BI_RGB)),
        ColorFormat::Yv12 => FCC_YV12,
        ColorFormat::Iyuv => FCC_IYUV,
        ColorFormat::Nv12 => FCC_NV12,
        ColorFormat::Yuy2 => FCC_YUY2,
        ColorFormat::Yv16 => FCC_YV16,
        ColorFormat::Yv24 => FCC_YV24,
        ColorFormat::Ayuv => FCC_AYUV,
        ColorFormat::P010 => FCC_P010,
        ColorFormat::P016 => FCC_P016,
        ColorFormat::P210 => FCC_P210,
        ColorFormat::P216 => FCC_P216,
        ColorFormat::Y210 => FCC_Y210,
        ColorFormat::Y216 => FCC_Y216,
        ColorFormat::Y410 => FCC_Y410,
        ColorFormat::Y416 => FCC_Y416,
        ColorFormat::Yuv420P10 => fourcc(b'Y', b'3', 11, 10),
        ColorFormat::Yuv420P16 => fourcc(b'Y', b'3', 11, 16),
        ColorFormat::Yuv422P10 => fourcc(b'Y', b'3', 10, 10),
        ColorFormat::Yuv422P16 => fourcc(b'Y', b'3', 10, 16),
        ColorFormat::Yuv444P10 => fourcc(b'Y', b'3', 0, 10),
        ColorFormat::Yuv444P16 => fourcc(b'Y', b'3', 0, 16),
        ColorFormat::Rgb48 => FCC_RGB48,
        ColorFormat::Bgr48 => FCC_BGR48,
        ColorFormat::Bgra64 => FCC_BGRA64,
        ColorFormat::B64a => FCC_B64A,
        ColorFormat::Gbrp8 => fourcc(b'G', b'3', 0, 8),
        ColorFormat::Gbrp10 => fourcc(b'G', b'3', 0, 10),
        ColorFormat::Gbrp16 => fourcc(b'G', b'3', 0, 16),
        ColorFormat::Y8 => FCC_Y8,
        ColorFormat::Y800 => FCC_Y800,
        ColorFormat::Y116 => FCC_Y116,
    };
    Some((Guid::from_fourcc(fcc), fcc))
}

/// Classify using the subtype first, then the bitmap header's compression
pub fn classify(subtype: &Guid, compression: u32, bit_count: u16) -> ColorFormat {
    let format = classify_subtype(subtype);
    if format != ColorFormat::None {
        return format;
    }
    match compression {
        BI_RGB | BI_BITFIELDS => classify_rgb_bitcount(bit_count),
        code => classify_fourcc(code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtype_for_classifies_back() {
        for format in ColorFormat::ALL {
            let (subtype, compression) = subtype_for(format).unwrap();
            assert_eq!(classify(&subtype, compression, 32), format, "{:?}", format);
        }
        assert!(subtype_for(ColorFormat::None).is_none());
    }

    #[test]
    fn test_fourcc_layout() {
        assert_eq!(FCC_NV12, 0x3231_564E);
        assert_eq!(Guid::from_fourcc(FCC_NV12).fourcc(), Some(FCC_NV12));
        assert_eq!(SUBTYPE_RGB24.fourcc(), None);
    }

    #[test]
    fn test_classify_fourcc_families() {
        assert_eq!(classify_fourcc(FCC_NV12), ColorFormat::Nv12);
        assert_eq!(classify_fourcc(FCC_I420), ColorFormat::Iyuv);
        assert_eq!(classify_fourcc(FCC_Y216), ColorFormat::Y216);
        assert_eq!(classify_fourcc(FCC_Y410), ColorFormat::Y410);
        assert_eq!(classify_fourcc(FCC_P210), ColorFormat::P210);
        assert_eq!(classify_fourcc(fourcc(b'Y', b'3', 11, 10)), ColorFormat::Yuv420P10);
        assert_eq!(classify_fourcc(fourcc(b'Y', b'3', 0, 16)), ColorFormat::Yuv444P16);
        assert_eq!(classify_fourcc(fourcc(b'G', b'3', 0, 10)), ColorFormat::Gbrp10);
        assert_eq!(classify_fourcc(FCC_GREY), ColorFormat::Y800);
    }

    #[test]
    fn test_ambiguous_codes_classify_to_none() {
        assert_eq!(classify_fourcc(fourcc(b'Y', b'3', 11, 12)), ColorFormat::None);
        assert_eq!(classify_fourcc(fourcc(b'H', b'2', b'6', b'4')), ColorFormat::None);
        assert_eq!(classify_rgb_bitcount(16), ColorFormat::None);
    }

    #[test]
    fn test_classify_subtype_guids() {
        assert_eq!(classify_subtype(&SUBTYPE_ARGB32), ColorFormat::Argb32);
        assert_eq!(classify_subtype(&Guid::from_fourcc(FCC_P010)), ColorFormat::P010);
        assert_eq!(classify_subtype(&Guid::default()), ColorFormat::None);
    }

    #[test]
    fn test_classify_falls_back_to_compression() {
        assert_eq!(classify(&Guid::default(), BI_RGB, 24), ColorFormat::Rgb24);
        assert_eq!(classify(&Guid::default(), FCC_YUY2, 16), ColorFormat::Yuy2);
        assert_eq!(classify(&Guid::default(), BI_RGB, 8), ColorFormat::None);
    }

    #[test]
    fn test_guid_display() {
        assert_eq!(
            Guid::from_fourcc(FCC_NV12).to_string(),
            "3231564e-0000-0010-8000-00aa00389b71"
        );
    }
}
