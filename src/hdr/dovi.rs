//! Dolby Vision reshaping metadata
//!
//! The side-data block is a fixed little-endian layout:
//!
//! ```text
//! header          8 bytes   bl/el/vdr bit depth, mapping color space, chroma format, 3 reserved
//! color metadata 88 bytes   ycc_to_rgb[9] f32, ycc_offset[3] f32, rgb_to_lms[9] f32,
//!                           source_min_pq u16, source_max_pq u16
//! curve x3      844 bytes   num_pivots u8, method[8] u8, poly_order[8] u8, mmr_order[8] u8,
//!                           pad u8, pivots[9] u16, poly_coeffs[8][3] f32,
//!                           mmr_constant[8] f32, mmr_coeffs[8][3][7] f32
//! ```
//!
//! Each curve segment is tagged polynomial or MMR on its own; mixing both
//! kinds inside one curve is legal.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Segments per curve
pub const MAX_PIECES: usize = 8;
/// Pivots per curve
pub const MAX_PIVOTS: usize = MAX_PIECES + 1;
/// Highest MMR order
pub const MAX_MMR_ORDER: usize = 3;
/// Cross terms per MMR order
pub const MMR_TERMS: usize = 7;

const HEADER_SIZE: usize = 8;
const COLOR_METADATA_SIZE: usize = (9 + 3 + 9) * 4 + 2 * 2;
const CURVE_SIZE: usize = 1
    + 3 * MAX_PIECES
    + 1
    + MAX_PIVOTS * 2
    + MAX_PIECES * 3 * 4
    + MAX_PIECES * 4
    + MAX_PIECES * MAX_MMR_ORDER * MMR_TERMS * 4;

/// Exact size of a Dolby Vision side-data block
pub const DOVI_BLOCK_SIZE: usize = HEADER_SIZE + COLOR_METADATA_SIZE + 3 * CURVE_SIZE;

/// Floats per component in the packed curve buffer
pub const CURVE_BUFFER_FLOATS: usize =
    MAX_PIECES + MAX_PIECES * 4 + MAX_PIECES * MAX_MMR_ORDER * 8;

/// Pivot bound used for unused segments in the packed buffer
const UNUSED_PIVOT: f32 = 1e9;

/// Stream-level RPU header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoviHeader {
    pub bl_bit_depth: u8,
    pub el_bit_depth: u8,
    pub vdr_bit_depth: u8,
    pub mapping_color_space: u8,
    pub chroma_format: u8,
}

/// Matrices and PQ range carried with every frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DoviColorMetadata {
    /// Row-major
    pub ycc_to_rgb: [f32; 9],
    pub ycc_offset: [f32; 3],
    /// Row-major
    pub rgb_to_lms: [f32; 9],
    pub source_min_pq: u16,
    pub source_max_pq: u16,
}

/// One segment of a reshaping curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CurveSegment {
    /// `c0 + c1*x + c2*x^2` (order 1 ignores `c2`)
    Polynomial { order: u8, coeffs: [f32; 3] },
    /// Multivariate multiple regression over all three input channels
    Mmr {
        order: u8,
        constant: f32,
        coeffs: [[f32; MMR_TERMS]; MAX_MMR_ORDER],
    },
}

impl CurveSegment {
    fn evaluate(&self, own: f32, ycc: [f32; 3]) -> f32 {
        match *self {
            CurveSegment::Polynomial { order, coeffs } => {
                let mut v = coeffs[0] + coeffs[1] * own;
                if order >= 2 {
                    v += coeffs[2] * own * own;
                }
                v
            }
            CurveSegment::Mmr {
                order,
                constant,
                coeffs,
            } => {
                let [a, b, c] = ycc;
                let terms = [a, b, c, a * b, a * c, b * c, a * b * c];
                let mut v = constant;
                for (k, row) in coeffs.iter().enumerate().take(order as usize) {
                    let power = (k + 1) as i32;
                    for (t, w) in terms.iter().zip(row) {
                        v += w * t.powi(power);
                    }
                }
                v
            }
        }
    }
}

/// Piecewise reshaping curve of one component
#[derive(Debug, Clone, PartialEq)]
pub struct ReshapeCurve {
    /// Strictly increasing, in base-layer code values
    pub pivots: Vec<u16>,
    /// `pivots.len() - 1` entries
    pub segments: Vec<CurveSegment>,
}

impl ReshapeCurve {
    /// Pass-through curve over the full code range of `bit_depth`
    pub fn identity(bit_depth: u8) -> Self {
        Self {
            pivots: vec![0, code_max(bit_depth)],
            segments: vec![CurveSegment::Polynomial {
                order: 1,
                coeffs: [0.0, 1.0, 0.0],
            }],
        }
    }

    pub fn is_identity(&self) -> bool {
        self.pivots.len() == 2
            && self.pivots[0] == 0
            && matches!(
                self.segments.as_slice(),
                [CurveSegment::Polynomial { order: 1, coeffs }]
                    if coeffs[0] == 0.0 && coeffs[1] == 1.0
            )
    }

    fn segment_for(&self, code: f32) -> Option<&CurveSegment> {
        let idx = self
            .pivots
            .iter()
            .skip(1)
            .position(|p| code < *p as f32)
            .unwrap_or(self.segments.len().saturating_sub(1));
        self.segments.get(idx)
    }

    /// Pack into the per-component layout the reshaping shader reads
    ///
    /// 8 segment upper bounds, then one vec4 per segment (polynomial
    /// coefficients, or MMR constant with the order in `w`), then per
    /// segment three MMR rows of 7 coefficients padded to 8.
    pub fn pack(&self, bit_depth: u8, out: &mut Vec<f32>) {
        let scale = 1.0 / code_max(bit_depth) as f32;
        for i in 0..MAX_PIECES {
            out.push(match self.pivots.get(i + 1) {
                Some(p) if i + 1 < self.pivots.len() - 1 => *p as f32 * scale,
                _ => UNUSED_PIVOT,
            });
        }
        for i in 0..MAX_PIECES {
            match self.segments.get(i) {
                Some(CurveSegment::Polynomial { order, coeffs }) => {
                    let c2 = if *order >= 2 { coeffs[2] } else { 0.0 };
                    out.extend_from_slice(&[coeffs[0], coeffs[1], c2, 0.0])
                }
                Some(CurveSegment::Mmr {
                    order, constant, ..
                }) => out.extend_from_slice(&[*constant, 0.0, 0.0, *order as f32]),
                None => out.extend_from_slice(&[0.0; 4]),
            }
        }
        for i in 0..MAX_PIECES {
            match self.segments.get(i) {
                Some(CurveSegment::Mmr { coeffs, .. }) => {
                    for row in coeffs {
                        out.extend_from_slice(row);
                        out.push(0.0);
                    }
                }
                _ => out.extend_from_slice(&[0.0; MAX_MMR_ORDER * 8]),
            }
        }
    }
}

/// Which parts of the metadata differ from the previous frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoviChanges {
    pub ycc: bool,
    pub lms: bool,
    pub curves: bool,
    pub pq_range: bool,
}

impl DoviChanges {
    pub const ALL: Self = Self {
        ycc: true,
        lms: true,
        curves: true,
        pq_range: true,
    };

    pub fn any(&self) -> bool {
        self.ycc || self.lms || self.curves || self.pq_range
    }

    /// The color matrix constant buffer must be rebuilt
    pub fn affects_matrix(&self) -> bool {
        self.ycc
    }

    /// The reshaping/LMS correction state must be rebuilt
    pub fn affects_curves(&self) -> bool {
        self.curves || self.lms || self.pq_range
    }
}

/// Validated Dolby Vision metadata for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct DoviMetadata {
    pub header: DoviHeader,
    pub color: DoviColorMetadata,
    pub curves: [ReshapeCurve; 3],
}

impl DoviMetadata {
    /// Parse and validate a side-data block
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != DOVI_BLOCK_SIZE {
            return Err(Error::MalformedMetadata(format!(
                "Dolby Vision block is {} bytes, expected {}",
                data.len(),
                DOVI_BLOCK_SIZE
            )));
        }
        let mut buf = data;

        let header = DoviHeader {
            bl_bit_depth: buf.get_u8(),
            el_bit_depth: buf.get_u8(),
            vdr_bit_depth: buf.get_u8(),
            mapping_color_space: buf.get_u8(),
            chroma_format: buf.get_u8(),
        };
        buf.advance(3);
        validate_header(&header)?;

        let mut color = DoviColorMetadata::default();
        read_f32s(&mut buf, &mut color.ycc_to_rgb);
        read_f32s(&mut buf, &mut color.ycc_offset);
        read_f32s(&mut buf, &mut color.rgb_to_lms);
        color.source_min_pq = buf.get_u16_le();
        color.source_max_pq = buf.get_u16_le();
        if color.source_min_pq > color.source_max_pq || color.source_max_pq > 4095 {
            return Err(Error::MalformedMetadata(format!(
                "Dolby Vision PQ range {}..{} is invalid",
                color.source_min_pq, color.source_max_pq
            )));
        }
        if color
            .ycc_to_rgb
            .iter()
            .chain(&color.ycc_offset)
            .chain(&color.rgb_to_lms)
            .any(|v| !v.is_finite())
        {
            return Err(Error::MalformedMetadata(
                "Dolby Vision color matrices contain non-finite values".into(),
            ));
        }

        let y = read_curve(&mut buf, 0, header.bl_bit_depth)?;
        let cb = read_curve(&mut buf, 1, header.bl_bit_depth)?;
        let cr = read_curve(&mut buf, 2, header.bl_bit_depth)?;

        Ok(Self {
            header,
            color,
            curves: [y, cb, cr],
        })
    }

    /// Serialize back into the side-data layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DOVI_BLOCK_SIZE);
        out.put_u8(self.header.bl_bit_depth);
        out.put_u8(self.header.el_bit_depth);
        out.put_u8(self.header.vdr_bit_depth);
        out.put_u8(self.header.mapping_color_space);
        out.put_u8(self.header.chroma_format);
        out.put_bytes(0, 3);

        for v in self
            .color
            .ycc_to_rgb
            .iter()
            .chain(&self.color.ycc_offset)
            .chain(&self.color.rgb_to_lms)
        {
            out.put_f32_le(*v);
        }
        out.put_u16_le(self.color.source_min_pq);
        out.put_u16_le(self.color.source_max_pq);

        for curve in &self.curves {
            write_curve(&mut out, curve);
        }
        out
    }

    /// Compare against the metadata of the previous frame
    pub fn diff(&self, previous: Option<&DoviMetadata>) -> DoviChanges {
        let Some(prev) = previous else {
            return DoviChanges::ALL;
        };
        DoviChanges {
            ycc: self.color.ycc_to_rgb != prev.color.ycc_to_rgb
                || self.color.ycc_offset != prev.color.ycc_offset,
            lms: self.color.rgb_to_lms != prev.color.rgb_to_lms,
            curves: self.curves != prev.curves,
            pq_range: self.color.source_min_pq != prev.color.source_min_pq
                || self.color.source_max_pq != prev.color.source_max_pq,
        }
    }

    /// All three curves are pass-through, the reshaping step can be skipped
    pub fn has_identity_reshaping(&self) -> bool {
        self.curves.iter().all(ReshapeCurve::is_identity)
    }

    /// Packed curve buffer for all three components
    pub fn curve_buffer(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(3 * CURVE_BUFFER_FLOATS);
        for curve in &self.curves {
            curve.pack(self.header.bl_bit_depth, &mut out);
        }
        out
    }

    /// Apply the reshaping curves to one normalized YCbCr sample
    pub fn reshape(&self, ycc: [f32; 3]) -> [f32; 3] {
        let max = code_max(self.header.bl_bit_depth) as f32;
        let mut out = [0.0; 3];
        for (i, curve) in self.curves.iter().enumerate() {
            out[i] = curve
                .segment_for(ycc[i] * max)
                .map(|seg| seg.evaluate(ycc[i], ycc))
                .unwrap_or(ycc[i]);
        }
        out
    }

    /// Metadata whose curves and matrices change nothing (BT.709 YCC matrix)
    pub fn identity(bit_depth: u8) -> Self {
        Self {
            header: DoviHeader {
                bl_bit_depth: bit_depth,
                el_bit_depth: 0,
                vdr_bit_depth: 12,
                mapping_color_space: 0,
                chroma_format: 0,
            },
            color: DoviColorMetadata {
                ycc_to_rgb: [
                    1.0, 0.0, 1.5748, 1.0, -0.187324, -0.468124, 1.0, 1.8556, 0.0,
                ],
                ycc_offset: [0.0625, 0.5, 0.5],
                rgb_to_lms: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
                source_min_pq: 62,
                source_max_pq: 3696,
            },
            curves: [
                ReshapeCurve::identity(bit_depth),
                ReshapeCurve::identity(bit_depth),
                ReshapeCurve::identity(bit_depth),
            ],
        }
    }
}

fn code_max(bit_depth: u8) -> u16 {
    ((1u32 << bit_depth.clamp(1, 16)) - 1) as u16
}

fn validate_header(header: &DoviHeader) -> Result<()> {
    let depth_ok = |d: u8| (8..=16).contains(&d);
    if !depth_ok(header.bl_bit_depth)
        || !depth_ok(header.vdr_bit_depth)
        || !(header.el_bit_depth == 0 || depth_ok(header.el_bit_depth))
    {
        return Err(Error::MalformedMetadata(format!(
            "Dolby Vision bit depths bl={} el={} vdr={} out of range",
            header.bl_bit_depth, header.el_bit_depth, header.vdr_bit_depth
        )));
    }
    Ok(())
}

fn read_f32s(buf: &mut &[u8], out: &mut [f32]) {
    for v in out {
        *v = buf.get_f32_le();
    }
}

fn read_curve(buf: &mut &[u8], component: usize, bit_depth: u8) -> Result<ReshapeCurve> {
    let malformed = |what: String| {
        Error::MalformedMetadata(format!("Dolby Vision curve {}: {}", component, what))
    };

    let num_pivots = buf.get_u8() as usize;
    let mut method = [0u8; MAX_PIECES];
    let mut poly_order = [0u8; MAX_PIECES];
    let mut mmr_order = [0u8; MAX_PIECES];
    buf.copy_to_slice(&mut method);
    buf.copy_to_slice(&mut poly_order);
    buf.copy_to_slice(&mut mmr_order);
    buf.advance(1);

    let mut pivots = [0u16; MAX_PIVOTS];
    for p in pivots.iter_mut() {
        *p = buf.get_u16_le();
    }
    let mut poly_coeffs = [[0f32; 3]; MAX_PIECES];
    for row in poly_coeffs.iter_mut() {
        read_f32s(buf, row);
    }
    let mut mmr_constant = [0f32; MAX_PIECES];
    read_f32s(buf, &mut mmr_constant);
    let mut mmr_coeffs = [[[0f32; MMR_TERMS]; MAX_MMR_ORDER]; MAX_PIECES];
    for seg in mmr_coeffs.iter_mut() {
        for row in seg.iter_mut() {
            read_f32s(buf, row);
        }
    }

    if !(2..=MAX_PIVOTS).contains(&num_pivots) {
        return Err(malformed(format!("{} pivots", num_pivots)));
    }
    let pivots = &pivots[..num_pivots];
    if pivots.windows(2).any(|w| w[0] >= w[1]) {
        return Err(malformed(format!("pivots {:?} not increasing", pivots)));
    }
    if pivots[num_pivots - 1] > code_max(bit_depth) {
        return Err(malformed(format!(
            "pivot {} exceeds {}-bit range",
            pivots[num_pivots - 1],
            bit_depth
        )));
    }

    let mut segments = Vec::with_capacity(num_pivots - 1);
    for i in 0..num_pivots - 1 {
        let segment = match method[i] {
            0 => {
                let order = poly_order[i];
                if !(1..=2).contains(&order) {
                    return Err(malformed(format!("segment {} polynomial order {}", i, order)));
                }
                CurveSegment::Polynomial {
                    order,
                    coeffs: poly_coeffs[i],
                }
            }
            1 => {
                let order = mmr_order[i];
                if !(1..=MAX_MMR_ORDER as u8).contains(&order) {
                    return Err(malformed(format!("segment {} MMR order {}", i, order)));
                }
                CurveSegment::Mmr {
                    order,
                    constant: mmr_constant[i],
                    coeffs: mmr_coeffs[i],
                }
            }
            m => return Err(malformed(format!("segment {} method {}", i, m))),
        };
        segments.push(segment);
    }

    Ok(ReshapeCurve {
        pivots: pivots.to_vec(),
        segments,
    })
}

fn write_curve(out: &mut Vec<u8>, curve: &ReshapeCurve) {
    let mut method = [0u8; MAX_PIECES];
    let mut poly_order = [0u8; MAX_PIECES];
    let mut mmr_order = [0u8; MAX_PIECES];
    let mut poly_coeffs = [[0f32; 3]; MAX_PIECES];
    let mut mmr_constant = [0f32; MAX_PIECES];
    let mut mmr_coeffs = [[[0f32; MMR_TERMS]; MAX_MMR_ORDER]; MAX_PIECES];

    for (i, seg) in curve.segments.iter().take(MAX_PIECES).enumerate() {
        match *seg {
            CurveSegment::Polynomial { order, coeffs } => {
                poly_order[i] = order;
                poly_coeffs[i] = coeffs;
            }
            CurveSegment::Mmr {
                order,
                constant,
                coeffs,
            } => {
                method[i] = 1;
                mmr_order[i] = order;
                mmr_constant[i] = constant;
                mmr_coeffs[i] = coeffs;
            }
        }
    }

    out.put_u8(curve.pivots.len().min(MAX_PIVOTS) as u8);
    out.put_slice(&method);
    out.put_slice(&poly_order);
    out.put_slice(&mmr_order);
    out.put_u8(0);
    for i in 0..MAX_PIVOTS {
        out.put_u16_le(curve.pivots.get(i).copied().unwrap_or(0));
    }
    for v in poly_coeffs.iter().flatten() {
        out.put_f32_le(*v);
    }
    for v in mmr_constant {
        out.put_f32_le(v);
    }
    for v in mmr_coeffs.iter().flatten().flatten() {
        out.put_f32_le(*v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_piece_curve() -> ReshapeCurve {
        ReshapeCurve {
            pivots: vec![0, 512, 1023],
            segments: vec![
                CurveSegment::Polynomial {
                    order: 2,
                    coeffs: [0.0, 0.9, 0.1],
                },
                CurveSegment::Mmr {
                    order: 1,
                    constant: 0.05,
                    coeffs: [[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]; MAX_MMR_ORDER],
                },
            ],
        }
    }

    #[test]
    fn test_block_size() {
        assert_eq!(CURVE_SIZE, 844);
        assert_eq!(DOVI_BLOCK_SIZE, 2628);
        assert_eq!(CURVE_BUFFER_FLOATS, 232);
    }

    #[test]
    fn test_parse_serialized_block() {
        let mut meta = DoviMetadata::identity(10);
        meta.curves[1] = two_piece_curve();
        let bytes = meta.to_bytes();
        assert_eq!(bytes.len(), DOVI_BLOCK_SIZE);
        assert_eq!(DoviMetadata::parse(&bytes).unwrap(), meta);
    }

    #[test]
    fn test_wrong_size_rejected() {
        let bytes = DoviMetadata::identity(10).to_bytes();
        assert!(matches!(
            DoviMetadata::parse(&bytes[..DOVI_BLOCK_SIZE - 1]),
            Err(Error::MalformedMetadata(_))
        ));
        let mut longer = bytes.clone();
        longer.push(0);
        assert!(DoviMetadata::parse(&longer).is_err());
    }

    #[test]
    fn test_invalid_curves_rejected() {
        let mut meta = DoviMetadata::identity(10);
        meta.curves[0].pivots = vec![0, 600, 600];
        meta.curves[0].segments.push(CurveSegment::Polynomial {
            order: 1,
            coeffs: [0.0, 1.0, 0.0],
        });
        assert!(DoviMetadata::parse(&meta.to_bytes()).is_err());

        let mut meta = DoviMetadata::identity(10);
        meta.curves[2].segments[0] = CurveSegment::Polynomial {
            order: 3,
            coeffs: [0.0, 1.0, 0.0],
        };
        assert!(DoviMetadata::parse(&meta.to_bytes()).is_err());

        let mut meta = DoviMetadata::identity(10);
        meta.curves[2].segments[0] = CurveSegment::Mmr {
            order: 4,
            constant: 0.0,
            coeffs: [[0.0; MMR_TERMS]; MAX_MMR_ORDER],
        };
        assert!(DoviMetadata::parse(&meta.to_bytes()).is_err());

        let mut bytes = DoviMetadata::identity(10).to_bytes();
        bytes[0] = 7;
        assert!(DoviMetadata::parse(&bytes).is_err());

        // single pivot
        let mut bytes = DoviMetadata::identity(10).to_bytes();
        bytes[HEADER_SIZE + COLOR_METADATA_SIZE] = 1;
        assert!(DoviMetadata::parse(&bytes).is_err());

        // unknown method
        let mut bytes = DoviMetadata::identity(10).to_bytes();
        bytes[HEADER_SIZE + COLOR_METADATA_SIZE + 1] = 2;
        assert!(DoviMetadata::parse(&bytes).is_err());
    }

    #[test]
    fn test_change_detection() {
        let base = DoviMetadata::identity(10);
        assert_eq!(base.diff(None), DoviChanges::ALL);
        assert!(!base.diff(Some(&base)).any());

        let mut lms = base.clone();
        lms.color.rgb_to_lms[1] = 0.1;
        let changes = lms.diff(Some(&base));
        assert!(changes.lms && !changes.ycc && !changes.curves);
        assert!(changes.affects_curves());
        assert!(!changes.affects_matrix());

        let mut curves = base.clone();
        curves.curves[0] = two_piece_curve();
        let changes = curves.diff(Some(&base));
        assert!(changes.curves && !changes.lms);

        let mut ycc = base.clone();
        ycc.color.ycc_offset[0] = 0.0;
        assert!(ycc.diff(Some(&base)).affects_matrix());
    }

    #[test]
    fn test_identity_reshaping() {
        let meta = DoviMetadata::identity(10);
        assert!(meta.has_identity_reshaping());
        let out = meta.reshape([0.25, 0.5, 0.75]);
        assert!((out[0] - 0.25).abs() < 1e-6);
        assert!((out[2] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_mixed_segments_evaluate_per_segment() {
        let mut meta = DoviMetadata::identity(10);
        meta.curves[0] = two_piece_curve();
        assert!(!meta.has_identity_reshaping());

        // polynomial segment below the middle pivot
        let low = meta.reshape([0.25, 0.5, 0.5])[0];
        assert!((low - (0.9 * 0.25 + 0.1 * 0.0625)).abs() < 1e-6);

        // MMR segment above it: constant + first-order luma term
        let high = meta.reshape([0.75, 0.5, 0.5])[0];
        assert!((high - 0.80).abs() < 1e-6);
    }

    #[test]
    fn test_curve_buffer_layout() {
        let mut meta = DoviMetadata::identity(10);
        meta.curves[0] = two_piece_curve();
        let buf = meta.curve_buffer();
        assert_eq!(buf.len(), 3 * CURVE_BUFFER_FLOATS);
        assert!((buf[0] - 512.0 / 1023.0).abs() < 1e-6);
        assert_eq!(buf[1], UNUSED_PIVOT);
        // second segment header holds the MMR constant and order
        assert_eq!(&buf[MAX_PIECES + 4..MAX_PIECES + 8], &[0.05, 0.0, 0.0, 1.0]);
    }
}
