//! Stream colorimetry and its resolution
//!
//! Upstream filters describe colorimetry loosely: any field may be unknown.
//! [`resolve`] fills in every gap once per media type so nothing downstream
//! ever branches on "unknown".

use serde::{Deserialize, Serialize};

use crate::format::{ColorSystem, Subsampling};

/// Nominal sample range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NominalRange {
    #[default]
    Unknown,
    /// 0-255 (PC levels)
    Full,
    /// 16-235 (TV levels)
    Limited,
    /// 48-208
    Range48To208,
}

/// Chroma sample siting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChromaSiting {
    #[default]
    Unknown,
    /// No subsampled chroma to site
    NotApplicable,
    Mpeg2,
    Mpeg1,
    DvPal,
    Cosited,
}

/// YUV to RGB transfer matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferMatrix {
    #[default]
    Unknown,
    Bt709,
    Bt601,
    Smpte240m,
    Bt2020Nc,
    Bt2020C,
    Fcc,
    YCgCo,
    /// No matrix: RGB input, or gray where the matrix is inert
    Identity,
}

impl TransferMatrix {
    pub fn is_bt2020(&self) -> bool {
        matches!(self, TransferMatrix::Bt2020Nc | TransferMatrix::Bt2020C)
    }
}

/// Intended viewing environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Lighting {
    #[default]
    Unknown,
    Bright,
    Office,
    Dim,
    Dark,
}

/// Color primaries (color gamut)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorPrimaries {
    #[default]
    Unknown,
    /// BT.709 (SDR, HD)
    Bt709,
    Bt470M,
    Bt470Bg,
    Smpte170m,
    Smpte240m,
    Ebu3213,
    SmpteC,
    /// BT.2020 (HDR, UHD)
    Bt2020,
    Xyz,
    /// DCI-P3 (Cinema)
    DciP3,
    /// Display P3 (D65 white)
    DisplayP3,
}

/// Transfer function (gamma curve)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferFunction {
    #[default]
    Unknown,
    Linear,
    Gamma18,
    Gamma20,
    Gamma22,
    /// BT.709 (SDR)
    Bt709,
    Smpte240m,
    Srgb,
    Gamma28,
    /// PQ (Perceptual Quantizer) - HDR10, Dolby Vision
    Pq,
    /// HLG (Hybrid Log-Gamma) - BBC/NHK
    Hlg,
}

impl TransferFunction {
    pub fn is_hdr(&self) -> bool {
        matches!(self, TransferFunction::Pq | TransferFunction::Hlg)
    }
}

/// Per-stream colorimetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ExtendedColorInfo {
    pub range: NominalRange,
    pub siting: ChromaSiting,
    pub matrix: TransferMatrix,
    pub lighting: Lighting,
    pub primaries: ColorPrimaries,
    pub transfer: TransferFunction,
}

impl ExtendedColorInfo {
    /// Colorimetry of RGB input: nothing is ambiguous
    pub const RGB: Self = Self {
        range: NominalRange::Full,
        siting: ChromaSiting::NotApplicable,
        matrix: TransferMatrix::Identity,
        lighting: Lighting::Dim,
        primaries: ColorPrimaries::Bt709,
        transfer: TransferFunction::Srgb,
    };

    /// Typical HD SDR stream
    pub const BT709: Self = Self {
        range: NominalRange::Limited,
        siting: ChromaSiting::Mpeg2,
        matrix: TransferMatrix::Bt709,
        lighting: Lighting::Dim,
        primaries: ColorPrimaries::Bt709,
        transfer: TransferFunction::Bt709,
    };

    /// Typical HDR10 stream
    pub const HDR10: Self = Self {
        range: NominalRange::Limited,
        siting: ChromaSiting::Mpeg2,
        matrix: TransferMatrix::Bt2020Nc,
        lighting: Lighting::Dim,
        primaries: ColorPrimaries::Bt2020,
        transfer: TransferFunction::Pq,
    };

    /// True when no field is left unknown
    pub fn is_resolved(&self) -> bool {
        self.range != NominalRange::Unknown
            && self.siting != ChromaSiting::Unknown
            && self.matrix != TransferMatrix::Unknown
            && self.lighting != Lighting::Unknown
            && self.primaries != ColorPrimaries::Unknown
            && self.transfer != TransferFunction::Unknown
    }

    pub fn is_hdr(&self) -> bool {
        self.transfer.is_hdr()
    }

    /// Decode the packed 32-bit extended format word
    ///
    /// Bits 0-7 sample format, 8-11 chroma siting, 12-14 nominal range,
    /// 15-17 transfer matrix, 18-21 lighting, 22-26 primaries, 27-31
    /// transfer function.
    pub fn from_packed(value: u32) -> Self {
        let field = |shift: u32, bits: u32| (value >> shift) & ((1 << bits) - 1);

        let siting = match field(8, 4) {
            0b0101 => ChromaSiting::Mpeg2,
            0b1100 => ChromaSiting::Mpeg1,
            0b0110 => ChromaSiting::DvPal,
            0b0111 => ChromaSiting::Cosited,
            _ => ChromaSiting::Unknown,
        };
        let range = match field(12, 3) {
            1 => NominalRange::Full,
            2 => NominalRange::Limited,
            3 => NominalRange::Range48To208,
            _ => NominalRange::Unknown,
        };
        let matrix = match field(15, 3) {
            1 => TransferMatrix::Bt709,
            2 => TransferMatrix::Bt601,
            3 => TransferMatrix::Smpte240m,
            4 => TransferMatrix::Bt2020Nc,
            5 => TransferMatrix::Bt2020C,
            6 => TransferMatrix::Fcc,
            7 => TransferMatrix::YCgCo,
            _ => TransferMatrix::Unknown,
        };
        let lighting = match field(18, 4) {
            1 => Lighting::Bright,
            2 => Lighting::Office,
            3 => Lighting::Dim,
            4 => Lighting::Dark,
            _ => Lighting::Unknown,
        };
        let primaries = match field(22, 5) {
            2 => ColorPrimaries::Bt709,
            3 => ColorPrimaries::Bt470M,
            4 => ColorPrimaries::Bt470Bg,
            5 => ColorPrimaries::Smpte170m,
            6 => ColorPrimaries::Smpte240m,
            7 => ColorPrimaries::Ebu3213,
            8 => ColorPrimaries::SmpteC,
            9 => ColorPrimaries::Bt2020,
            10 => ColorPrimaries::Xyz,
            11 => ColorPrimaries::DciP3,
            12 => ColorPrimaries::DisplayP3,
            _ => ColorPrimaries::Unknown,
        };
        let transfer = match field(27, 5) {
            1 => TransferFunction::Linear,
            2 => TransferFunction::Gamma18,
            3 => TransferFunction::Gamma20,
            4 => TransferFunction::Gamma22,
            5 => TransferFunction::Bt709,
            6 => TransferFunction::Smpte240m,
            7 => TransferFunction::Srgb,
            8 => TransferFunction::Gamma28,
            16 => TransferFunction::Pq,
            17 => TransferFunction::Hlg,
            _ => TransferFunction::Unknown,
        };

        Self {
            range,
            siting,
            matrix,
            lighting,
            primaries,
            transfer,
        }
    }

    /// Encode into the packed extended format word, sample format bits clear
    ///
    /// Inverse of [`ExtendedColorInfo::from_packed`] for every value it can
    /// produce; `NotApplicable` siting encodes as unknown.
    pub fn to_packed(&self) -> u32 {
        let siting: u32 = match self.siting {
            ChromaSiting::Mpeg2 => 0b0101,
            ChromaSiting::Mpeg1 => 0b1100,
            ChromaSiting::DvPal => 0b0110,
            ChromaSiting::Cosited => 0b0111,
            ChromaSiting::Unknown | ChromaSiting::NotApplicable => 0,
        };
        let range: u32 = match self.range {
            NominalRange::Unknown => 0,
            NominalRange::Full => 1,
            NominalRange::Limited => 2,
            NominalRange::Range48To208 => 3,
        };
        let matrix: u32 = match self.matrix {
            TransferMatrix::Unknown | TransferMatrix::Identity => 0,
            TransferMatrix::Bt709 => 1,
            TransferMatrix::Bt601 => 2,
            TransferMatrix::Smpte240m => 3,
            TransferMatrix::Bt2020Nc => 4,
            TransferMatrix::Bt2020C => 5,
            TransferMatrix::Fcc => 6,
            TransferMatrix::YCgCo => 7,
        };
        let lighting: u32 = match self.lighting {
            Lighting::Unknown => 0,
            Lighting::Bright => 1,
            Lighting::Office => 2,
            Lighting::Dim => 3,
            Lighting::Dark => 4,
        };
        let primaries: u32 = match self.primaries {
            ColorPrimaries::Unknown => 0,
            ColorPrimaries::Bt709 => 2,
            ColorPrimaries::Bt470M => 3,
            ColorPrimaries::Bt470Bg => 4,
            ColorPrimaries::Smpte170m => 5,
            ColorPrimaries::Smpte240m => 6,
            ColorPrimaries::Ebu3213 => 7,
            ColorPrimaries::SmpteC => 8,
            ColorPrimaries::Bt2020 => 9,
            ColorPrimaries::Xyz => 10,
            ColorPrimaries::DciP3 => 11,
            ColorPrimaries::DisplayP3 => 12,
        };
        let transfer: u32 = match self.transfer {
            TransferFunction::Unknown => 0,
            TransferFunction::Linear => 1,
            TransferFunction::Gamma18 => 2,
            TransferFunction::Gamma20 => 3,
            TransferFunction::Gamma22 => 4,
            TransferFunction::Bt709 => 5,
            TransferFunction::Smpte240m => 6,
            TransferFunction::Srgb => 7,
            TransferFunction::Gamma28 => 8,
            TransferFunction::Pq => 16,
            TransferFunction::Hlg => 17,
        };
        siting << 8 | range << 12 | matrix << 15 | lighting << 18 | primaries << 22 | transfer << 27
    }
}

impl std::fmt::Display for ExtendedColorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}/{:?}/{:?}/{:?}/{:?}",
            self.matrix, self.range, self.primaries, self.transfer, self.siting
        )
    }
}

/// Largest frame still treated as standard definition
const SD_MAX_WIDTH: u32 = 1024;
const SD_MAX_HEIGHT: u32 = 576;

/// Fill in every unknown field of `info`
///
/// RGB collapses to [`ExtendedColorInfo::RGB`]. YUV and gray get the
/// defaults below; for YUV the matrix depends on the frame size (BT.601 up to
/// 1024x576, BT.709 above).
pub fn resolve(
    info: ExtendedColorInfo,
    system: ColorSystem,
    subsampling: Subsampling,
    width: u32,
    height: u32,
) -> ExtendedColorInfo {
    match system {
        ColorSystem::Rgb => ExtendedColorInfo::RGB,
        ColorSystem::Gray => ExtendedColorInfo {
            range: default_range(info.range),
            siting: ChromaSiting::NotApplicable,
            matrix: TransferMatrix::Identity,
            lighting: default_lighting(info.lighting),
            primaries: default_primaries(info.primaries),
            transfer: default_transfer(info.transfer),
        },
        ColorSystem::Yuv | ColorSystem::Unknown => {
            let siting = if subsampling != Subsampling::S420 {
                ChromaSiting::NotApplicable
            } else if matches!(info.siting, ChromaSiting::Unknown | ChromaSiting::NotApplicable) {
                ChromaSiting::Mpeg2
            } else {
                info.siting
            };

            let matrix = match info.matrix {
                TransferMatrix::Unknown | TransferMatrix::Identity => {
                    if width <= SD_MAX_WIDTH && height <= SD_MAX_HEIGHT {
                        TransferMatrix::Bt601
                    } else {
                        TransferMatrix::Bt709
                    }
                }
                m => m,
            };

            ExtendedColorInfo {
                range: default_range(info.range),
                siting,
                matrix,
                lighting: default_lighting(info.lighting),
                primaries: default_primaries(info.primaries),
                transfer: default_transfer(info.transfer),
            }
        }
    }
}

fn default_range(range: NominalRange) -> NominalRange {
    match range {
        NominalRange::Unknown => NominalRange::Limited,
        r => r,
    }
}

fn default_lighting(lighting: Lighting) -> Lighting {
    match lighting {
        Lighting::Unknown => Lighting::Dim,
        l => l,
    }
}

fn default_primaries(primaries: ColorPrimaries) -> ColorPrimaries {
    match primaries {
        ColorPrimaries::Unknown => ColorPrimaries::Bt709,
        p => p,
    }
}

fn default_transfer(transfer: TransferFunction) -> TransferFunction {
    match transfer {
        TransferFunction::Unknown => TransferFunction::Bt709,
        t => t,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unknown_yuv(width: u32, height: u32) -> ExtendedColorInfo {
        resolve(
            ExtendedColorInfo::default(),
            ColorSystem::Yuv,
            Subsampling::S420,
            width,
            height,
        )
    }

    #[test]
    fn test_sd_hd_boundary() {
        assert_eq!(unknown_yuv(1024, 576).matrix, TransferMatrix::Bt601);
        assert_eq!(unknown_yuv(1025, 576).matrix, TransferMatrix::Bt709);
        assert_eq!(unknown_yuv(1024, 577).matrix, TransferMatrix::Bt709);
        assert_eq!(unknown_yuv(720, 480).matrix, TransferMatrix::Bt601);
    }

    #[test]
    fn test_yuv_defaults() {
        let info = unknown_yuv(1920, 1080);
        assert_eq!(info.range, NominalRange::Limited);
        assert_eq!(info.siting, ChromaSiting::Mpeg2);
        assert_eq!(info.lighting, Lighting::Dim);
        assert_eq!(info.primaries, ColorPrimaries::Bt709);
        assert_eq!(info.transfer, TransferFunction::Bt709);
        assert!(info.is_resolved());
    }

    #[test]
    fn test_siting_not_applicable_without_420() {
        let partial = ExtendedColorInfo {
            siting: ChromaSiting::Cosited,
            ..Default::default()
        };
        let info = resolve(partial, ColorSystem::Yuv, Subsampling::S422, 1920, 1080);
        assert_eq!(info.siting, ChromaSiting::NotApplicable);

        let info = resolve(partial, ColorSystem::Yuv, Subsampling::S420, 1920, 1080);
        assert_eq!(info.siting, ChromaSiting::Cosited);
    }

    #[test]
    fn test_known_fields_are_kept() {
        let info = resolve(
            ExtendedColorInfo::HDR10,
            ColorSystem::Yuv,
            Subsampling::S420,
            640,
            360,
        );
        assert_eq!(info, ExtendedColorInfo::HDR10);
    }

    #[test]
    fn test_rgb_collapses_to_sentinel() {
        let partial = ExtendedColorInfo {
            matrix: TransferMatrix::Bt2020Nc,
            range: NominalRange::Limited,
            ..Default::default()
        };
        let info = resolve(partial, ColorSystem::Rgb, Subsampling::S444, 1920, 1080);
        assert_eq!(info, ExtendedColorInfo::RGB);
    }

    #[test]
    fn test_gray_marks_matrix_inert() {
        let info = resolve(
            ExtendedColorInfo::default(),
            ColorSystem::Gray,
            Subsampling::S400,
            1920,
            1080,
        );
        assert_eq!(info.range, NominalRange::Limited);
        assert_eq!(info.matrix, TransferMatrix::Identity);
        assert_eq!(info.siting, ChromaSiting::NotApplicable);
        assert!(info.is_resolved());
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let systems = [
            (ColorSystem::Rgb, Subsampling::S444),
            (ColorSystem::Yuv, Subsampling::S420),
            (ColorSystem::Yuv, Subsampling::S422),
            (ColorSystem::Yuv, Subsampling::S444),
            (ColorSystem::Gray, Subsampling::S400),
        ];
        let partials = [
            ExtendedColorInfo::default(),
            ExtendedColorInfo::HDR10,
            ExtendedColorInfo::from_packed(0x2A9A_5580),
            ExtendedColorInfo {
                matrix: TransferMatrix::YCgCo,
                range: NominalRange::Full,
                ..Default::default()
            },
        ];
        for (system, subsampling) in systems {
            for partial in partials {
                for (w, h) in [(1024, 576), (1025, 576), (3840, 2160)] {
                    let once = resolve(partial, system, subsampling, w, h);
                    let twice = resolve(once, system, subsampling, w, h);
                    assert_eq!(once, twice);
                    assert!(once.is_resolved());
                }
            }
        }
    }

    #[test]
    fn test_from_packed() {
        // MPEG-2 siting, limited range, BT.2020 NC, dim, BT.2020, PQ
        let packed: u32 =
            (0b0101 << 8) | (2 << 12) | (4 << 15) | (3 << 18) | (9 << 22) | (16 << 27);
        assert_eq!(ExtendedColorInfo::from_packed(packed), ExtendedColorInfo::HDR10);
        assert_eq!(ExtendedColorInfo::from_packed(0), ExtendedColorInfo::default());
        assert_eq!(ExtendedColorInfo::HDR10.to_packed(), packed);
    }
}
