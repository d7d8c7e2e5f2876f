//! Color gamut math
//!
//! RGB to XYZ from chromaticities, Bradford chromatic adaptation and the
//! linear gamut remap between two sets of primaries.

use super::colorimetry::ColorPrimaries;
use super::matrix::Mat3;
use crate::hdr::Hdr10Metadata;

/// CIE 1931 xy chromaticity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Xy {
    pub x: f64,
    pub y: f64,
}

impl Xy {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// XYZ with Y = 1
    fn to_xyz(self) -> [f64; 3] {
        [self.x / self.y, 1.0, (1.0 - self.x - self.y) / self.y]
    }
}

pub const WHITE_D65: Xy = Xy::new(0.3127, 0.3290);
pub const WHITE_C: Xy = Xy::new(0.310, 0.316);
pub const WHITE_DCI: Xy = Xy::new(0.314, 0.351);
pub const WHITE_E: Xy = Xy::new(1.0 / 3.0, 1.0 / 3.0);

/// Red, green, blue primaries and white point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chromaticities {
    pub red: Xy,
    pub green: Xy,
    pub blue: Xy,
    pub white: Xy,
}

impl Chromaticities {
    const fn new(r: (f64, f64), g: (f64, f64), b: (f64, f64), white: Xy) -> Self {
        Self {
            red: Xy::new(r.0, r.1),
            green: Xy::new(g.0, g.1),
            blue: Xy::new(b.0, b.1),
            white,
        }
    }

    /// Chromaticities of a primaries set; `None` for XYZ and unknown
    pub fn of(primaries: ColorPrimaries) -> Option<Self> {
        let c = match primaries {
            ColorPrimaries::Bt709 => {
                Self::new((0.640, 0.330), (0.300, 0.600), (0.150, 0.060), WHITE_D65)
            }
            ColorPrimaries::Bt470M => {
                Self::new((0.670, 0.330), (0.210, 0.710), (0.140, 0.080), WHITE_C)
            }
            ColorPrimaries::Bt470Bg => {
                Self::new((0.640, 0.330), (0.290, 0.600), (0.150, 0.060), WHITE_D65)
            }
            ColorPrimaries::Smpte170m | ColorPrimaries::Smpte240m | ColorPrimaries::SmpteC => {
                Self::new((0.630, 0.340), (0.310, 0.595), (0.155, 0.070), WHITE_D65)
            }
            ColorPrimaries::Ebu3213 => {
                Self::new((0.630, 0.340), (0.295, 0.605), (0.155, 0.077), WHITE_D65)
            }
            ColorPrimaries::Bt2020 => {
                Self::new((0.708, 0.292), (0.170, 0.797), (0.131, 0.046), WHITE_D65)
            }
            ColorPrimaries::DciP3 => {
                Self::new((0.680, 0.320), (0.265, 0.690), (0.150, 0.060), WHITE_DCI)
            }
            ColorPrimaries::DisplayP3 => {
                Self::new((0.680, 0.320), (0.265, 0.690), (0.150, 0.060), WHITE_D65)
            }
            ColorPrimaries::Xyz | ColorPrimaries::Unknown => return None,
        };
        Some(c)
    }

    /// Mastering display primaries from HDR10 metadata, if plausible
    pub fn from_hdr10(meta: &Hdr10Metadata) -> Option<Self> {
        let c = Self {
            red: Xy::new(meta.red_primary_x, meta.red_primary_y),
            green: Xy::new(meta.green_primary_x, meta.green_primary_y),
            blue: Xy::new(meta.blue_primary_x, meta.blue_primary_y),
            white: Xy::new(meta.white_point_x, meta.white_point_y),
        };
        let valid = [c.red, c.green, c.blue, c.white]
            .iter()
            .all(|p| p.x > 0.0 && p.x < 1.0 && p.y > 0.0 && p.y < 1.0);
        valid.then_some(c)
    }

    /// Normalized primary matrix: linear RGB to XYZ
    pub fn rgb_to_xyz(&self) -> Option<Mat3> {
        let r = self.red.to_xyz();
        let g = self.green.to_xyz();
        let b = self.blue.to_xyz();
        let p = Mat3([[r[0], g[0], b[0]], [r[1], g[1], b[1]], [r[2], g[2], b[2]]]);
        let s = p.inverse()?.apply(self.white.to_xyz());
        Some(p * Mat3::diagonal(s))
    }
}

const BRADFORD: Mat3 = Mat3([
    [0.8951, 0.2664, -0.1614],
    [-0.7502, 1.7135, 0.0367],
    [0.0389, -0.0685, 1.0296],
]);

/// Bradford adaptation of XYZ from white `src` to white `dst`
pub fn chromatic_adaptation(src: Xy, dst: Xy) -> Mat3 {
    if src == dst {
        return Mat3::IDENTITY;
    }
    let Some(inv) = BRADFORD.inverse() else {
        return Mat3::IDENTITY;
    };
    let s = BRADFORD.apply(src.to_xyz());
    let d = BRADFORD.apply(dst.to_xyz());
    inv * Mat3::diagonal([d[0] / s[0], d[1] / s[1], d[2] / s[2]]) * BRADFORD
}

/// Linear RGB in `src` primaries to linear RGB in `dst` primaries
pub fn gamut_remap_between(src: &Chromaticities, dst: &Chromaticities) -> Option<Mat3> {
    let to_xyz = src.rgb_to_xyz()?;
    let from_xyz = dst.rgb_to_xyz()?.inverse()?;
    Some(from_xyz * chromatic_adaptation(src.white, dst.white) * to_xyz)
}

/// Gamut remap between two signaled primaries; identity when either is unusable
pub fn gamut_remap(src: ColorPrimaries, dst: ColorPrimaries) -> Mat3 {
    if src == dst {
        return Mat3::IDENTITY;
    }
    match (Chromaticities::of(src), Chromaticities::of(dst)) {
        (Some(s), Some(d)) => gamut_remap_between(&s, &d).unwrap_or(Mat3::IDENTITY),
        _ => Mat3::IDENTITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bt709_to_xyz() {
        let m = Chromaticities::of(ColorPrimaries::Bt709)
            .unwrap()
            .rgb_to_xyz()
            .unwrap();
        // luminance row equals the BT.709 luma weights
        assert!((m.0[1][0] - 0.2126).abs() < 1e-3);
        assert!((m.0[1][1] - 0.7152).abs() < 1e-3);
        assert!((m.0[1][2] - 0.0722).abs() < 1e-3);
    }

    #[test]
    fn test_bt2020_to_bt709() {
        let m = gamut_remap(ColorPrimaries::Bt2020, ColorPrimaries::Bt709);
        let expected = Mat3([
            [1.6605, -0.5876, -0.0728],
            [-0.1246, 1.1329, -0.0083],
            [-0.0182, -0.1006, 1.1187],
        ]);
        assert!(m.approx_eq(&expected, 1e-3), "{:?}", m);
        // white stays white
        let w = m.apply([1.0, 1.0, 1.0]);
        assert!(w.iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_same_primaries_is_identity() {
        assert_eq!(
            gamut_remap(ColorPrimaries::Bt709, ColorPrimaries::Bt709),
            Mat3::IDENTITY
        );
        assert_eq!(
            gamut_remap(ColorPrimaries::Xyz, ColorPrimaries::Bt709),
            Mat3::IDENTITY
        );
    }

    #[test]
    fn test_dci_white_is_adapted() {
        let m = gamut_remap(ColorPrimaries::DciP3, ColorPrimaries::DisplayP3);
        assert!(!m.approx_eq(&Mat3::IDENTITY, 1e-3));
        let adapt = chromatic_adaptation(WHITE_DCI, WHITE_D65);
        let w = adapt.apply(WHITE_DCI.to_xyz());
        let d65 = WHITE_D65.to_xyz();
        assert!(w.iter().zip(&d65).all(|(a, b)| (a - b).abs() < 1e-9));
    }

    #[test]
    fn test_hdr10_mastering_primaries() {
        let c = Chromaticities::from_hdr10(&Hdr10Metadata::bt2020_default()).unwrap();
        assert_eq!(c, Chromaticities::of(ColorPrimaries::Bt2020).unwrap());
        assert!(Chromaticities::from_hdr10(&Hdr10Metadata::default()).is_none());
    }
}
