//! Color conversion matrix
//!
//! Builds the 3x3 matrix + offset that maps sampled texture values of the
//! input format to normalized output RGB. Luma coefficients, chroma
//! rotation (hue/saturation), level remapping and contrast/brightness are
//! folded into one affine transform so the conversion pass is a single
//! multiply-add per pixel.

use std::ops::Mul;

use bytemuck::{Pod, Zeroable};
use tracing::trace;

use super::colorimetry::{ExtendedColorInfo, NominalRange, TransferMatrix};
use super::procamp::ProcAmp;
use crate::format::{ColorSystem, PixelFormatDescriptor};
use crate::hdr::DoviColorMetadata;

/// Row-major 3x3 matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat3(pub [[f64; 3]; 3]);

impl Mat3 {
    pub const IDENTITY: Mat3 = Mat3([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    pub fn diagonal(d: [f64; 3]) -> Self {
        Mat3([[d[0], 0.0, 0.0], [0.0, d[1], 0.0], [0.0, 0.0, d[2]]])
    }

    /// Row-major slice of 9 values
    pub fn from_row_major(v: &[f32; 9]) -> Self {
        let mut m = [[0.0; 3]; 3];
        for (i, x) in v.iter().enumerate() {
            m[i / 3][i % 3] = *x as f64;
        }
        Mat3(m)
    }

    pub fn apply(&self, v: [f64; 3]) -> [f64; 3] {
        let m = &self.0;
        [
            m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
            m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
            m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
        ]
    }

    pub fn transpose(&self) -> Self {
        let m = &self.0;
        Mat3([
            [m[0][0], m[1][0], m[2][0]],
            [m[0][1], m[1][1], m[2][1]],
            [m[0][2], m[1][2], m[2][2]],
        ])
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.0;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Inverse, or `None` for a singular matrix
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() < 1e-12 {
            return None;
        }
        let m = &self.0;
        let inv = 1.0 / det;
        Some(Mat3([
            [
                (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv,
                (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv,
                (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv,
            ],
            [
                (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv,
                (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv,
                (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv,
            ],
            [
                (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv,
                (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv,
                (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv,
            ],
        ]))
    }

    pub fn scaled(&self, s: f64) -> Self {
        let mut out = *self;
        for row in out.0.iter_mut() {
            for v in row.iter_mut() {
                *v *= s;
            }
        }
        out
    }

    pub fn approx_eq(&self, other: &Mat3, eps: f64) -> bool {
        self.0
            .iter()
            .flatten()
            .zip(other.0.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= eps)
    }
}

impl Mul for Mat3 {
    type Output = Mat3;

    fn mul(self, rhs: Mat3) -> Mat3 {
        let mut out = [[0.0; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (0..3).map(|k| self.0[i][k] * rhs.0[k][j]).sum();
            }
        }
        Mat3(out)
    }
}

/// Planes sampled as (G, B, R) mapped back to (R, G, B)
const GBR_TO_RGB: Mat3 = Mat3([[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);

/// Constant-buffer payload of the conversion pass
///
/// Each of `cm_r`/`cm_g`/`cm_b` is one matrix row, dotted with the sampled
/// color; `cm_c` is added afterwards.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ColorConstants {
    pub cm_r: [f32; 4],
    pub cm_g: [f32; 4],
    pub cm_b: [f32; 4],
    pub cm_c: [f32; 4],
}

/// Affine color transform `out = m * in + c`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorTransform {
    pub m: Mat3,
    pub c: [f64; 3],
    /// The conversion pass is needed at all
    pub enabled: bool,
}

impl Default for ColorTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl ColorTransform {
    pub fn identity() -> Self {
        Self {
            m: Mat3::IDENTITY,
            c: [0.0; 3],
            enabled: false,
        }
    }

    pub fn apply(&self, v: [f64; 3]) -> [f64; 3] {
        let r = self.m.apply(v);
        [r[0] + self.c[0], r[1] + self.c[1], r[2] + self.c[2]]
    }

    /// Flat 3x4 layout: one row of the matrix followed by its offset
    pub fn to_floats(&self) -> [f32; 12] {
        let mut out = [0.0; 12];
        for i in 0..3 {
            for j in 0..3 {
                out[i * 4 + j] = self.m.0[i][j] as f32;
            }
            out[i * 4 + 3] = self.c[i] as f32;
        }
        out
    }

    pub fn constants(&self) -> ColorConstants {
        let row = |i: usize| {
            [
                self.m.0[i][0] as f32,
                self.m.0[i][1] as f32,
                self.m.0[i][2] as f32,
                0.0,
            ]
        };
        ColorConstants {
            cm_r: row(0),
            cm_g: row(1),
            cm_b: row(2),
            cm_c: [self.c[0] as f32, self.c[1] as f32, self.c[2] as f32, 0.0],
        }
    }

    /// Bytes to upload as the constant buffer
    pub fn constant_bytes(&self) -> Vec<u8> {
        bytemuck::bytes_of(&self.constants()).to_vec()
    }
}

/// Sample levels, already scaled to the texture's normalized range
#[derive(Debug, Clone, Copy)]
struct Levels {
    ymin: f64,
    ymax: f64,
    cmax: f64,
    cmid: f64,
}

impl Levels {
    fn scaled(ymin: f64, ymax: f64, cmax: f64, cmid: f64, s: f64) -> Self {
        Self {
            ymin: ymin * s / 255.0,
            ymax: ymax * s / 255.0,
            cmax: cmax * s / 255.0,
            cmid: cmid * s / 255.0,
        }
    }
}

/// Multiplier relating `input_bits` samples stored in a `texture_bits` texture to 8-bit levels
pub fn level_multiplier(system: ColorSystem, input_bits: u8, texture_bits: u8) -> f64 {
    if input_bits == 0 {
        return 1.0;
    }
    let tex_max = ((1u64 << texture_bits) - 1) as f64;
    match system {
        ColorSystem::Rgb => ((1u64 << input_bits) - 1) as f64 / tex_max,
        // high bit depth YUV levels are shifted 8-bit levels
        _ => (1u64 << input_bits) as f64 / tex_max * 255.0 / 256.0,
    }
}

/// Luma coefficients (Kr, Kb) of a luma-derived matrix
fn luma_weights(matrix: TransferMatrix) -> Option<(f64, f64)> {
    match matrix {
        TransferMatrix::Bt601 => Some((0.299, 0.114)),
        TransferMatrix::Bt709 => Some((0.2126, 0.0722)),
        TransferMatrix::Smpte240m => Some((0.2122, 0.0865)),
        TransferMatrix::Bt2020Nc => Some((0.2627, 0.0593)),
        TransferMatrix::Fcc => Some((0.30, 0.11)),
        _ => None,
    }
}

/// YCbCr to RGB for luma coefficients (Kr, Kb)
fn luma_matrix(lr: f64, lb: f64) -> Mat3 {
    let lg = 1.0 - lr - lb;
    Mat3([
        [1.0, 0.0, 2.0 * (1.0 - lr)],
        [
            1.0,
            -2.0 * (1.0 - lb) * lb / lg,
            -2.0 * (1.0 - lr) * lr / lg,
        ],
        [1.0, 2.0 * (1.0 - lb), 0.0],
    ])
}

/// Builds [`ColorTransform`]s for the conversion pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMatrixBuilder {
    /// Output levels: `Full` (0-255) or `Limited` (16-235)
    pub output_range: NominalRange,
}

impl Default for ColorMatrixBuilder {
    fn default() -> Self {
        Self {
            output_range: NominalRange::Full,
        }
    }
}

impl ColorMatrixBuilder {
    pub fn new(output_range: NominalRange) -> Self {
        Self { output_range }
    }

    /// Build the transform for a stream
    ///
    /// With Dolby Vision metadata the YCC matrix comes from the metadata and
    /// the pass is always enabled.
    pub fn build(
        &self,
        desc: &PixelFormatDescriptor,
        info: &ExtendedColorInfo,
        procamp: &ProcAmp,
        dovi: Option<&DoviColorMetadata>,
    ) -> ColorTransform {
        let procamp = procamp.clamped();
        let transform = match dovi {
            Some(color) => self.build_dovi(color, &procamp),
            None => self.build_standard(desc, info, &procamp),
        };
        trace!(
            "Color transform for {} ({}): enabled={} m={:?} c={:?}",
            desc.name,
            info,
            transform.enabled,
            transform.m,
            transform.c
        );
        transform
    }

    fn build_dovi(&self, color: &DoviColorMetadata, procamp: &ProcAmp) -> ColorTransform {
        let m = Mat3::from_row_major(&color.ycc_to_rgb).scaled(procamp.contrast as f64);
        let offset = [
            color.ycc_offset[0] as f64,
            color.ycc_offset[1] as f64,
            color.ycc_offset[2] as f64,
        ];
        let shifted = m.apply(offset);
        let brightness = procamp.brightness_offset();
        ColorTransform {
            m,
            c: [
                brightness - shifted[0],
                brightness - shifted[1],
                brightness - shifted[2],
            ],
            enabled: true,
        }
    }

    fn build_standard(
        &self,
        desc: &PixelFormatDescriptor,
        info: &ExtendedColorInfo,
        procamp: &ProcAmp,
    ) -> ColorTransform {
        let system = desc.color_system;
        let gray = system == ColorSystem::Gray;
        let s = level_multiplier(system, desc.bit_depth, desc.texture_bits());

        let mut m = match system {
            ColorSystem::Rgb => Mat3::IDENTITY,
            ColorSystem::Gray => luma_matrix(0.2126, 0.0722),
            ColorSystem::Yuv | ColorSystem::Unknown => match info.matrix {
                TransferMatrix::Bt2020C => {
                    Mat3([[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
                }
                TransferMatrix::YCgCo => {
                    Mat3([[1.0, -1.0, 1.0], [1.0, 1.0, 0.0], [1.0, -1.0, -1.0]])
                }
                other => {
                    let (lr, lb) = luma_weights(other).unwrap_or((0.2126, 0.0722));
                    luma_matrix(lr, lb)
                }
            },
        };

        // hue rotates (U, V), saturation scales it; gray has no chroma at all
        let rotatable = gray
            || (system != ColorSystem::Rgb && luma_weights(info.matrix).is_some());
        if rotatable {
            let (huecos, huesin) = if gray {
                (0.0, 0.0)
            } else {
                let hue = procamp.hue_radians();
                let sat = procamp.saturation as f64;
                (sat * hue.cos(), sat * hue.sin())
            };
            for row in m.0.iter_mut() {
                let (u, v) = (row[1], row[2]);
                row[1] = huecos * u - huesin * v;
                row[2] = huesin * u + huecos * v;
            }
        }

        let levels = match system {
            ColorSystem::Rgb => Levels::scaled(0.0, 255.0, 255.0 / 2.0, 0.0, s),
            _ => match info.range {
                NominalRange::Full => Levels::scaled(0.0, 255.0, 255.0, 128.0, s),
                _ => Levels::scaled(16.0, 235.0, 240.0, 128.0, s),
            },
        };
        let (out_min, out_max) = match self.output_range {
            NominalRange::Limited => (16.0 / 255.0, 235.0 / 255.0),
            _ => (0.0, 1.0),
        };

        let contrast = procamp.contrast as f64;
        let ymul = (out_max - out_min) / (levels.ymax - levels.ymin) * contrast;
        let cmul = (out_max - out_min) / (levels.cmax - levels.cmid) / 2.0 * contrast;
        let brightness = procamp.brightness_offset();

        let mut c = [0.0; 3];
        for (i, row) in m.0.iter_mut().enumerate() {
            row[0] *= ymul;
            row[1] *= cmul;
            row[2] *= cmul;
            c[i] = out_min - row[0] * levels.ymin - (row[1] + row[2]) * levels.cmid + brightness;
        }

        if desc.is_gbr() {
            m = m * GBR_TO_RGB;
        }

        let enabled = system == ColorSystem::Yuv
            || desc.is_gbr()
            || gray
            || !procamp.is_neutral_levels();

        ColorTransform { m, c, enabled }
    }
}
