//! Transfer curves and tone mapping
//!
//! Provides:
//! - PQ (SMPTE ST 2084) and HLG (ARIB STD-B67) curves
//! - Pure gamma and sRGB curves for SDR
//! - HDR to SDR tone-mapping operators
//!
//! These are the reference formulas behind the correction shaders and are
//! used on the CPU for diagnostics and tests.

use serde::{Deserialize, Serialize};

use super::colorimetry::TransferFunction;

/// Peak luminance of the PQ signal range (nits)
pub const PQ_PEAK_NITS: f32 = 10000.0;
/// Nominal peak of an HLG display (nits)
pub const HLG_PEAK_NITS: f32 = 1000.0;
/// HLG system gamma at the nominal peak
pub const HLG_SYSTEM_GAMMA: f32 = 1.2;
/// Default SDR reference white (nits)
pub const SDR_WHITE_NITS: f32 = 203.0;

const PQ_M1: f32 = 0.1593017578125; // 2610/16384
const PQ_M2: f32 = 78.84375; // 2523/32 * 128
const PQ_C1: f32 = 0.8359375; // 3424/4096
const PQ_C2: f32 = 18.8515625; // 2413/128
const PQ_C3: f32 = 18.6875; // 2392/128

const HLG_A: f32 = 0.17883277;
const HLG_B: f32 = 0.28466892;
const HLG_C: f32 = 0.55991073;

/// Apply PQ (SMPTE ST 2084) transfer function
/// Converts linear light (nits) to PQ encoded value
pub fn linear_to_pq(nits: f32) -> f32 {
    let y = (nits / PQ_PEAK_NITS).max(0.0);
    let y_m1 = y.powf(PQ_M1);
    ((PQ_C1 + PQ_C2 * y_m1) / (1.0 + PQ_C3 * y_m1)).powf(PQ_M2)
}

/// Apply inverse PQ transfer function
/// Converts PQ encoded value to linear light (nits)
pub fn pq_to_linear(pq: f32) -> f32 {
    let e_inv_m2 = pq.max(0.0).powf(1.0 / PQ_M2);
    let num = (e_inv_m2 - PQ_C1).max(0.0);
    let den = PQ_C2 - PQ_C3 * e_inv_m2;
    PQ_PEAK_NITS * (num / den).powf(1.0 / PQ_M1)
}

/// HLG OETF: normalized scene light to signal
pub fn hlg_oetf(e: f32) -> f32 {
    let e = e.max(0.0);
    if e <= 1.0 / 12.0 {
        (3.0 * e).sqrt()
    } else {
        HLG_A * (12.0 * e - HLG_B).ln() + HLG_C
    }
}

/// Inverse HLG OETF: signal to normalized scene light
pub fn hlg_inverse_oetf(signal: f32) -> f32 {
    let s = signal.max(0.0);
    if s <= 0.5 {
        s * s / 3.0
    } else {
        (((s - HLG_C) / HLG_A).exp() + HLG_B) / 12.0
    }
}

/// HLG signal to display light in nits (per-component OOTF)
pub fn hlg_to_nits(signal: f32, peak_nits: f32) -> f32 {
    peak_nits * hlg_inverse_oetf(signal).powf(HLG_SYSTEM_GAMMA)
}

fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.0031308 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// Display gamma of an SDR curve
fn display_gamma(tf: TransferFunction) -> Option<f32> {
    match tf {
        TransferFunction::Gamma18 => Some(1.8),
        TransferFunction::Gamma20 => Some(2.0),
        TransferFunction::Gamma22 => Some(2.2),
        TransferFunction::Gamma28 => Some(2.8),
        // BT.1886 display for BT.709 / 240M content
        TransferFunction::Bt709 | TransferFunction::Smpte240m | TransferFunction::Unknown => {
            Some(2.4)
        }
        _ => None,
    }
}

/// Signal to linear light
///
/// SDR curves return display-relative light (1.0 = reference white), PQ
/// returns nits / 10000, HLG returns normalized scene light.
pub fn linearize(tf: TransferFunction, v: f32) -> f32 {
    match tf {
        TransferFunction::Linear => v,
        TransferFunction::Srgb => srgb_to_linear(v),
        TransferFunction::Pq => pq_to_linear(v) / PQ_PEAK_NITS,
        TransferFunction::Hlg => hlg_inverse_oetf(v),
        other => v.max(0.0).powf(display_gamma(other).unwrap_or(2.4)),
    }
}

/// Inverse of [`linearize`]
pub fn delinearize(tf: TransferFunction, v: f32) -> f32 {
    match tf {
        TransferFunction::Linear => v,
        TransferFunction::Srgb => linear_to_srgb(v),
        TransferFunction::Pq => linear_to_pq(v * PQ_PEAK_NITS),
        TransferFunction::Hlg => hlg_oetf(v),
        other => v.max(0.0).powf(1.0 / display_gamma(other).unwrap_or(2.4)),
    }
}

/// HDR to SDR tone-mapping operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToneMapping {
    Reinhard,
    /// ACES filmic
    Aces,
    /// BT.2390 EETF (hermite knee in PQ space)
    #[default]
    Bt2390,
}

impl ToneMapping {
    pub fn shader_name(&self) -> &'static str {
        match self {
            ToneMapping::Reinhard => "tonemap_reinhard",
            ToneMapping::Aces => "tonemap_aces",
            ToneMapping::Bt2390 => "tonemap_bt2390",
        }
    }

    /// Map content luminance `nits` (peak `source_peak`) onto a display peaking at `target_peak`
    pub fn apply(&self, nits: f32, source_peak: f32, target_peak: f32) -> f32 {
        if source_peak <= target_peak {
            return nits.min(target_peak);
        }
        match self {
            ToneMapping::Reinhard => {
                let x = nits / target_peak;
                let white = source_peak / target_peak;
                // extended Reinhard: source peak lands exactly on target peak
                target_peak * x * (1.0 + x / (white * white)) / (1.0 + x)
            }
            ToneMapping::Aces => target_peak * tonemap_aces(nits / target_peak),
            ToneMapping::Bt2390 => tonemap_bt2390(nits, source_peak, target_peak),
        }
    }
}

/// Simple HDR to SDR tonemapping (Reinhard)
pub fn tonemap_reinhard(hdr_linear: f32, max_luminance: f32) -> f32 {
    let scaled = hdr_linear / max_luminance;
    scaled / (1.0 + scaled)
}

/// ACES filmic tonemapping
pub fn tonemap_aces(x: f32) -> f32 {
    const A: f32 = 2.51;
    const B: f32 = 0.03;
    const C: f32 = 2.43;
    const D: f32 = 0.59;
    const E: f32 = 0.14;

    ((x * (A * x + B)) / (x * (C * x + D) + E)).clamp(0.0, 1.0)
}

/// BT.2390 EETF without black level lift
pub fn tonemap_bt2390(nits: f32, source_peak: f32, target_peak: f32) -> f32 {
    let src_pq = linear_to_pq(source_peak);
    if src_pq <= 0.0 {
        return 0.0;
    }
    let e1 = (linear_to_pq(nits) / src_pq).clamp(0.0, 1.0);
    let max_lum = linear_to_pq(target_peak) / src_pq;
    let ks = 1.5 * max_lum - 0.5;

    let e2 = if e1 < ks {
        e1
    } else {
        let t = (e1 - ks) / (1.0 - ks);
        let t2 = t * t;
        let t3 = t2 * t;
        (2.0 * t3 - 3.0 * t2 + 1.0) * ks
            + (t3 - 2.0 * t2 + t) * (1.0 - ks)
            + (-2.0 * t3 + 3.0 * t2) * max_lum
    };
    pq_to_linear(e2 * src_pq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pq_reference_points() {
        assert!((linear_to_pq(10000.0) - 1.0).abs() < 1e-4);
        assert!((linear_to_pq(100.0) - 0.508).abs() < 1e-3);
        assert!(linear_to_pq(0.0) < 1e-6);
        let back = pq_to_linear(linear_to_pq(1000.0));
        assert!((back - 1000.0).abs() < 0.5);
    }

    #[test]
    fn test_hlg_curve() {
        assert!((hlg_oetf(1.0) - 1.0).abs() < 1e-4);
        assert!((hlg_oetf(1.0 / 12.0) - 0.5).abs() < 1e-6);
        for s in [0.1f32, 0.5, 0.75, 1.0] {
            assert!((hlg_oetf(hlg_inverse_oetf(s)) - s).abs() < 1e-4);
        }
        assert!((hlg_to_nits(1.0, HLG_PEAK_NITS) - 1000.0).abs() < 0.5);
    }

    #[test]
    fn test_sdr_curves_invert() {
        for tf in [
            TransferFunction::Srgb,
            TransferFunction::Bt709,
            TransferFunction::Gamma22,
            TransferFunction::Linear,
        ] {
            let v = 0.42;
            assert!((delinearize(tf, linearize(tf, v)) - v).abs() < 1e-5, "{:?}", tf);
        }
        assert!((linearize(TransferFunction::Gamma22, 0.5) - 0.5f32.powf(2.2)).abs() < 1e-6);
    }

    #[test]
    fn test_tonemap_operators() {
        assert!(tonemap_reinhard(1.0, 1.0) == 0.5);
        assert!(tonemap_aces(100.0) <= 1.0);

        for op in [ToneMapping::Reinhard, ToneMapping::Aces, ToneMapping::Bt2390] {
            let peak = op.apply(4000.0, 4000.0, 203.0);
            assert!(peak <= 203.5, "{:?} peak {}", op, peak);
            let dark = op.apply(1.0, 4000.0, 203.0);
            assert!(dark > 0.0 && dark <= 1.5, "{:?} dark {}", op, dark);
            // brighter in, brighter out
            assert!(op.apply(500.0, 4000.0, 203.0) > op.apply(100.0, 4000.0, 203.0));
        }
    }

    #[test]
    fn test_bt2390_knee() {
        // below the knee the curve is the identity
        let low = tonemap_bt2390(5.0, 1000.0, 400.0);
        assert!((low - 5.0).abs() < 0.01);
        // the source peak lands on the target peak
        let top = tonemap_bt2390(1000.0, 1000.0, 400.0);
        assert!((top - 400.0).abs() < 1.0);
    }

    #[test]
    fn test_no_tonemap_when_display_is_brighter() {
        assert_eq!(ToneMapping::Bt2390.apply(300.0, 1000.0, 1000.0), 300.0);
    }
}
