//! Shader programs
//!
//! Provides:
//! - Conversion programs for every sampling layout (`ConvertProgram`)
//! - HDR / BT.2020 correction plans (`CorrectionPlan`)
//! - Built-in pass shaders: copy, resize, interlace pack, dither
//! - Compiled program cache and the user post-shader registry
//!
//! Sources are HLSL pixel shaders. Values that change per frame (color
//! matrix, tone-mapping peaks, Dolby Vision curves, geometry) live in
//! constant buffers; values fixed for a stream (gamut and LMS matrices) are
//! baked into the source and therefore into the program key.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::format::{
    ChannelOrder, ColorFormat, ColorSystem, PixelFormatDescriptor, PlaneLayout, Subsampling,
};
use crate::processing::primaries::gamut_remap;
use crate::processing::scale::{Axis, ChromaUpsampling, Downscaler, ScaleKernel, Upscaler};
use crate::processing::transfer::{self, ToneMapping, PQ_PEAK_NITS};
use crate::processing::{ColorPrimaries, ExtendedColorInfo, Mat3, TransferFunction};
use crate::render::backend::{GpuDevice, ShaderHandle};

/// Luma weights of BT.2020 primaries, used to tone-map by luminance
const BT2020_LUMA: [f64; 3] = [0.2627, 0.6780, 0.0593];

/// Transfer curve of SDR output after tone mapping
pub const SDR_OUTPUT_TRANSFER: TransferFunction = TransferFunction::Gamma22;

/// How the conversion shader reads the input planes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplingLayout {
    /// One interleaved texture; `swizzle` reorders it into Y, U, V (or R, G, B)
    Packed { swizzle: &'static str },
    /// YUYV macropixels at half width
    Packed422,
    /// Luma plus interleaved chroma
    SemiPlanar,
    /// One texture per component
    Planar,
    /// Single luma plane
    Gray,
}

impl SamplingLayout {
    pub fn for_descriptor(desc: &PixelFormatDescriptor) -> Self {
        if desc.color_system == ColorSystem::Gray {
            return SamplingLayout::Gray;
        }
        if desc.is_packed_422() {
            return SamplingLayout::Packed422;
        }
        match desc.layout {
            PlaneLayout::SemiPlanar => SamplingLayout::SemiPlanar,
            PlaneLayout::Planar => SamplingLayout::Planar,
            _ => SamplingLayout::Packed {
                swizzle: match desc.format {
                    // VUYA in memory
                    ColorFormat::Ayuv => "bgr",
                    // UYVA in memory
                    ColorFormat::Y410 | ColorFormat::Y416 => "grb",
                    ColorFormat::Bgr48 => "bgr",
                    _ => "rgb",
                },
            },
        }
    }

    /// Number of input textures
    pub fn texture_count(&self) -> usize {
        match self {
            SamplingLayout::Packed { .. } | SamplingLayout::Packed422 | SamplingLayout::Gray => 1,
            SamplingLayout::SemiPlanar => 2,
            SamplingLayout::Planar => 3,
        }
    }
}

/// One step of the color pipeline after (or, for reshaping, before) the matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConvertStep {
    /// Dolby Vision reshaping curves, applied to YCbCr before the matrix
    Reshape,
    /// Signal to linear light (PQ normalized to 10000 nits)
    Linearize(TransferFunction),
    /// HLG scene light to display light, normalized like PQ
    HlgOotf,
    /// Dolby Vision LMS to BT.2020 RGB
    LmsToRgb(Mat3),
    /// Luminance tone mapping; output is relative to `target_peak`
    ToneMap {
        op: ToneMapping,
        source_peak: f32,
        target_peak: f32,
    },
    GamutRemap {
        from: ColorPrimaries,
        to: ColorPrimaries,
        matrix: Mat3,
    },
    /// Linear light to signal
    Delinearize(TransferFunction),
}

impl ConvertStep {
    pub fn gamut_remap(from: ColorPrimaries, to: ColorPrimaries) -> Self {
        ConvertStep::GamutRemap {
            from,
            to,
            matrix: gamut_remap(from, to),
        }
    }

    /// Stable text identifying the generated code of this step
    fn key(&self) -> String {
        match self {
            ConvertStep::Reshape => "reshape".into(),
            ConvertStep::Linearize(tf) => format!("lin-{:?}", tf),
            ConvertStep::HlgOotf => "hlg-ootf".into(),
            ConvertStep::LmsToRgb(m) => format!("lms-{}", matrix_key(m)),
            // peaks come from the constant buffer
            ConvertStep::ToneMap { op, .. } => format!("tm-{:?}", op),
            ConvertStep::GamutRemap { matrix, .. } => format!("gamut-{}", matrix_key(matrix)),
            ConvertStep::Delinearize(tf) => format!("delin-{:?}", tf),
        }
    }

    /// Reference evaluation on the CPU
    ///
    /// `Reshape` needs the curve data and is the identity here.
    pub fn apply(&self, c: [f64; 3]) -> [f64; 3] {
        let each = |f: &dyn Fn(f32) -> f32| c.map(|v| f(v as f32) as f64);
        match self {
            ConvertStep::Reshape => c,
            ConvertStep::Linearize(tf) => each(&|v| transfer::linearize(*tf, v)),
            ConvertStep::HlgOotf => each(&|v| {
                transfer::HLG_PEAK_NITS * v.max(0.0).powf(transfer::HLG_SYSTEM_GAMMA) / PQ_PEAK_NITS
            }),
            ConvertStep::LmsToRgb(m) => m.apply(c),
            ConvertStep::ToneMap {
                op,
                source_peak,
                target_peak,
            } => {
                let nits = (c[0] * BT2020_LUMA[0] + c[1] * BT2020_LUMA[1] + c[2] * BT2020_LUMA[2])
                    * PQ_PEAK_NITS as f64;
                if nits <= 1e-6 {
                    return [0.0; 3];
                }
                let mapped = op.apply(nits as f32, *source_peak, *target_peak) as f64;
                let gain = PQ_PEAK_NITS as f64 * mapped / (nits * *target_peak as f64);
                c.map(|v| v * gain)
            }
            ConvertStep::GamutRemap { matrix, .. } => matrix.apply(c),
            ConvertStep::Delinearize(tf) => each(&|v| transfer::delinearize(*tf, v)),
        }
    }
}

fn matrix_key(m: &Mat3) -> String {
    m.0.iter()
        .flatten()
        .map(|v| format!("{:.5}", v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Dolby Vision inputs of a correction plan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoviCorrection {
    /// Reshaping curves are not the identity
    pub reshape: bool,
    pub lms_to_rgb: Mat3,
}

/// Inputs of [`CorrectionPlan::derive`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionInput {
    pub color: ExtendedColorInfo,
    pub dovi: Option<DoviCorrection>,
    /// HDR output is active (display capable and passthrough enabled)
    pub hdr_passthrough: bool,
    pub convert_to_sdr: bool,
    pub tone_mapping: ToneMapping,
    /// Content peak in nits
    pub source_peak: f32,
    /// SDR display peak in nits
    pub target_peak: f32,
}

/// Ordered correction steps for a stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionPlan {
    pub steps: Vec<ConvertStep>,
}

impl CorrectionPlan {
    /// Derive the steps for HDR, Dolby Vision or BT.2020 content
    ///
    /// Everything else gets an empty plan.
    pub fn derive(input: &CorrectionInput) -> Self {
        let mut steps = Vec::new();
        let color = &input.color;

        if let Some(dovi) = input.dovi {
            if dovi.reshape {
                steps.push(ConvertStep::Reshape);
            }
            steps.push(ConvertStep::Linearize(TransferFunction::Pq));
            steps.push(ConvertStep::LmsToRgb(dovi.lms_to_rgb));
            if !input.hdr_passthrough && input.convert_to_sdr {
                Self::push_sdr_tail(&mut steps, input, ColorPrimaries::Bt2020);
            } else {
                steps.push(ConvertStep::Delinearize(TransferFunction::Pq));
            }
        } else if color.transfer.is_hdr() {
            let hlg = color.transfer == TransferFunction::Hlg;
            if input.hdr_passthrough {
                if hlg {
                    steps.push(ConvertStep::Linearize(TransferFunction::Hlg));
                    steps.push(ConvertStep::HlgOotf);
                    steps.push(ConvertStep::Delinearize(TransferFunction::Pq));
                }
            } else if input.convert_to_sdr {
                steps.push(ConvertStep::Linearize(color.transfer));
                if hlg {
                    steps.push(ConvertStep::HlgOotf);
                }
                Self::push_sdr_tail(&mut steps, input, color.primaries);
            }
        } else if color.primaries == ColorPrimaries::Bt2020 && !input.hdr_passthrough {
            steps.push(ConvertStep::Linearize(color.transfer));
            steps.push(ConvertStep::gamut_remap(ColorPrimaries::Bt2020, ColorPrimaries::Bt709));
            steps.push(ConvertStep::Delinearize(color.transfer));
        }

        Self { steps }
    }

    fn push_sdr_tail(
        steps: &mut Vec<ConvertStep>,
        input: &CorrectionInput,
        primaries: ColorPrimaries,
    ) {
        steps.push(ConvertStep::ToneMap {
            op: input.tone_mapping,
            source_peak: input.source_peak,
            target_peak: input.target_peak,
        });
        if primaries != ColorPrimaries::Bt709 && primaries != ColorPrimaries::Unknown {
            steps.push(ConvertStep::gamut_remap(primaries, ColorPrimaries::Bt709));
        }
        steps.push(ConvertStep::Delinearize(SDR_OUTPUT_TRANSFER));
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn has_tone_map(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, ConvertStep::ToneMap { .. }))
    }

    pub fn has_reshape(&self) -> bool {
        self.steps.contains(&ConvertStep::Reshape)
    }

    /// Gamut remap step between the given primaries, if present
    pub fn gamut_step(&self, from: ColorPrimaries, to: ColorPrimaries) -> Option<&Mat3> {
        self.steps.iter().find_map(|s| match s {
            ConvertStep::GamutRemap { from: f, to: t, matrix } if *f == from && *t == to => {
                Some(matrix)
            }
            _ => None,
        })
    }

    /// Tone-mapping constants for the current peaks
    pub fn tonemap_constants(&self) -> Option<ToneMapConstants> {
        self.steps.iter().find_map(|s| match s {
            ConvertStep::ToneMap {
                source_peak,
                target_peak,
                ..
            } => Some(ToneMapConstants {
                source_peak: *source_peak,
                target_peak: *target_peak,
                hlg_peak: transfer::HLG_PEAK_NITS,
                _pad: 0.0,
            }),
            _ => None,
        })
    }

    /// Run every step except reshaping on one RGB value
    pub fn apply(&self, c: [f64; 3]) -> [f64; 3] {
        self.steps.iter().fold(c, |acc, step| step.apply(acc))
    }

    fn key(&self) -> String {
        self.steps.iter().map(ConvertStep::key).collect::<Vec<_>>().join("|")
    }

    /// Standalone correction shader reading an RGB texture
    ///
    /// Used after the video processor. Reshaping only exists on the shader
    /// path and is skipped here.
    pub fn to_hlsl(&self) -> String {
        let mut src = String::from("// correction\n");
        src.push_str(&common_header(1));
        src.push_str(CB_TONEMAP);
        src.push_str(&step_helpers(&self.steps));
        src.push_str("float4 main(PS_INPUT input) : SV_Target\n{\n");
        src.push_str("    float4 px = tex0.Sample(samp_point, input.uv);\n");
        src.push_str("    float3 c = px.rgb;\n");
        src.push_str(&step_body(&self.steps));
        src.push_str("    return float4(c, px.a);\n}\n");
        src
    }

    pub fn program_key(&self) -> String {
        format!("correction:{}", self.key())
    }
}

/// Constant buffer of the tone-mapping step
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ToneMapConstants {
    pub source_peak: f32,
    pub target_peak: f32,
    pub hlg_peak: f32,
    pub _pad: f32,
}

/// Geometry constants: size and reciprocal size of each extent
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GeometryConstants {
    pub source: [f32; 4],
    pub target: [f32; 4],
    pub chroma: [f32; 4],
}

impl GeometryConstants {
    pub fn new(source: (u32, u32), target: (u32, u32), chroma_period: (u32, u32)) -> Self {
        let extent = |w: u32, h: u32| {
            let (w, h) = (w.max(1) as f32, h.max(1) as f32);
            [w, h, 1.0 / w, 1.0 / h]
        };
        Self {
            source: extent(source.0, source.1),
            target: extent(target.0, target.1),
            chroma: extent(
                source.0.div_ceil(chroma_period.0.max(1)),
                source.1.div_ceil(chroma_period.1.max(1)),
            ),
        }
    }
}

/// Conversion shader for one input format
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertProgram {
    pub format: ColorFormat,
    pub layout: SamplingLayout,
    /// `None` for formats without subsampled chroma
    pub chroma: Option<ChromaUpsampling>,
    /// Planes are stored Y, V, U
    pub swap_uv: bool,
    pub steps: Vec<ConvertStep>,
}

impl ConvertProgram {
    pub fn new(desc: &PixelFormatDescriptor, chroma: ChromaUpsampling) -> Self {
        let subsampled = matches!(desc.subsampling, Subsampling::S420 | Subsampling::S422)
            && desc.color_system == ColorSystem::Yuv;
        Self {
            format: desc.format,
            layout: SamplingLayout::for_descriptor(desc),
            chroma: subsampled.then_some(chroma),
            swap_uv: desc.channel_order == ChannelOrder::Vu,
            steps: Vec::new(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<ConvertStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn name(&self) -> String {
        format!("convert_{}", self.format.descriptor().name.to_ascii_lowercase())
    }

    /// Key of the compiled program; equal keys mean identical source
    pub fn program_key(&self) -> String {
        format!(
            "convert:{:?}:{:?}:{:?}:{}:{}",
            self.format,
            self.layout,
            self.chroma,
            self.swap_uv,
            self.steps.iter().map(ConvertStep::key).collect::<Vec<_>>().join("|")
        )
    }

    pub fn texture_count(&self) -> usize {
        self.layout.texture_count()
    }

    fn chroma_sample(&self, texture: &str) -> String {
        match self.chroma {
            Some(ChromaUpsampling::CatmullRom) => {
                format!("sample_catmull_rom({}, uv, chroma_size)", texture)
            }
            Some(ChromaUpsampling::Nearest) => format!("{}.Sample(samp_point, uv)", texture),
            _ => format!("{}.Sample(samp_linear, uv)", texture),
        }
    }

    fn sample_body(&self) -> String {
        match self.layout {
            SamplingLayout::Packed { swizzle } => {
                format!("    float3 c = tex0.Sample(samp_point, uv).{};\n", swizzle)
            }
            SamplingLayout::Gray => "    float3 c = float3(tex0.Sample(samp_point, uv).r, 0.0, 0.0);\n".into(),
            SamplingLayout::SemiPlanar => format!(
                "    float y = tex0.Sample(samp_point, uv).r;\n    float2 uv_c = {}.rg;\n    float3 c = float3(y, uv_c);\n",
                self.chroma_sample("tex1")
            ),
            SamplingLayout::Planar => {
                let (u, v) = if self.swap_uv { ("tex2", "tex1") } else { ("tex1", "tex2") };
                format!(
                    "    float y = tex0.Sample(samp_point, uv).r;\n    float u = {}.r;\n    float v = {}.r;\n    float3 c = float3(y, u, v);\n",
                    self.chroma_sample(u),
                    self.chroma_sample(v)
                )
            }
            SamplingLayout::Packed422 => {
                let mut body = String::from(
                    "    float4 p = tex0.Sample(samp_point, uv);\n    float odd = frac(uv.x * src_size.x * 0.5) >= 0.5 ? 1.0 : 0.0;\n    float2 uv_c = p.yw;\n",
                );
                if self.chroma != Some(ChromaUpsampling::Nearest) {
                    body.push_str(
                        "    float4 n = tex0.Sample(samp_point, uv + float2(src_size.z * 2.0, 0.0));\n    uv_c = lerp(p.yw, 0.5 * (p.yw + n.yw), odd);\n",
                    );
                }
                body.push_str("    float3 c = float3(lerp(p.x, p.z, odd), uv_c);\n");
                body
            }
        }
    }

    pub fn to_hlsl(&self) -> String {
        let mut src = format!("// {}\n", self.name());
        src.push_str(&common_header(self.texture_count()));
        src.push_str(CB_COLOR);
        src.push_str(CB_GEOMETRY);
        let (pre, post): (Vec<ConvertStep>, Vec<ConvertStep>) =
            self.steps.iter().copied().partition(|s| matches!(s, ConvertStep::Reshape));
        if !post.is_empty() {
            src.push_str(CB_TONEMAP);
        }
        if !pre.is_empty() {
            src.push_str(CB_DOVI);
            src.push_str(RESHAPE_FN);
        }
        if self.chroma == Some(ChromaUpsampling::CatmullRom) {
            src.push_str(CATMULL_ROM_FN);
        }
        src.push_str(&step_helpers(&post));

        src.push_str("float4 main(PS_INPUT input) : SV_Target\n{\n    float2 uv = input.uv;\n");
        src.push_str(&self.sample_body());
        if !pre.is_empty() {
            src.push_str(
                "    c = float3(reshape(0, c.x, c), reshape(1, c.y, c), reshape(2, c.z, c));\n",
            );
        }
        src.push_str(
            "    c = float3(dot(cm_r.rgb, c), dot(cm_g.rgb, c), dot(cm_b.rgb, c)) + cm_c.rgb;\n",
        );
        src.push_str(&step_body(&post));
        src.push_str("    return float4(c, 1.0);\n}\n");
        src
    }
}

fn common_header(textures: usize) -> String {
    let mut src = String::new();
    for i in 0..textures {
        src.push_str(&format!("Texture2D tex{i} : register(t{i});\n"));
    }
    src.push_str(
        "SamplerState samp_point : register(s0);\nSamplerState samp_linear : register(s1);\n\n\
         struct PS_INPUT\n{\n    float4 pos : SV_Position;\n    float2 uv : TEXCOORD0;\n};\n\n",
    );
    src
}

const CB_COLOR: &str =
    "cbuffer Color : register(b0)\n{\n    float4 cm_r;\n    float4 cm_g;\n    float4 cm_b;\n    float4 cm_c;\n};\n\n";

const CB_TONEMAP: &str =
    "cbuffer ToneMap : register(b1)\n{\n    float src_peak;\n    float dst_peak;\n    float hlg_peak;\n    float tm_pad;\n};\n\n";

const CB_DOVI: &str = "cbuffer DoviCurves : register(b2)\n{\n    float4 dovi[174];\n};\n\n";

const CB_GEOMETRY: &str =
    "cbuffer Geometry : register(b3)\n{\n    float4 src_size;\n    float4 dst_size;\n    float4 chroma_size;\n};\n\n";

// 58 float4 per component: 2 of pivots, 8 of segment coefficients, 48 of MMR rows
const RESHAPE_FN: &str = r#"float reshape(int comp, float s, float3 ycc)
{
    int base = comp * 58;
    float4 p0 = dovi[base];
    float4 p1 = dovi[base + 1];
    int seg = (int)(dot(step(p0, s.xxxx), 1.0.xxxx) + dot(step(p1, s.xxxx), 1.0.xxxx));
    seg = min(seg, 7);
    float4 k = dovi[base + 2 + seg];
    if (k.w == 0.0)
        return k.x + k.y * s + k.z * s * s;
    float4 t0 = float4(ycc.x, ycc.y, ycc.z, ycc.x * ycc.y);
    float3 t1 = float3(ycc.x * ycc.z, ycc.y * ycc.z, ycc.x * ycc.y * ycc.z);
    float4 q0 = t0;
    float3 q1 = t1;
    float v = k.x;
    for (int o = 0; o < (int)k.w; o++) {
        int row = base + 10 + seg * 6 + o * 2;
        v += dot(dovi[row], q0) + dot(dovi[row + 1].xyz, q1);
        q0 *= t0;
        q1 *= t1;
    }
    return v;
}

"#;

const CATMULL_ROM_FN: &str = r#"float4 sample_catmull_rom(Texture2D t, float2 uv, float4 size)
{
    float2 pos = uv * size.xy;
    float2 p1 = floor(pos - 0.5) + 0.5;
    float2 f = pos - p1;
    float2 w0 = f * (-0.5 + f * (1.0 - 0.5 * f));
    float2 w1 = 1.0 + f * f * (-2.5 + 1.5 * f);
    float2 w2 = f * (0.5 + f * (2.0 - 1.5 * f));
    float2 w3 = f * f * (-0.5 + 0.5 * f);
    float2 w12 = w1 + w2;
    float2 tc0 = (p1 - 1.0) * size.zw;
    float2 tc3 = (p1 + 2.0) * size.zw;
    float2 tc12 = (p1 + w2 / w12) * size.zw;
    float4 r = 0;
    r += t.Sample(samp_linear, float2(tc0.x, tc0.y)) * w0.x * w0.y;
    r += t.Sample(samp_linear, float2(tc12.x, tc0.y)) * w12.x * w0.y;
    r += t.Sample(samp_linear, float2(tc3.x, tc0.y)) * w3.x * w0.y;
    r += t.Sample(samp_linear, float2(tc0.x, tc12.y)) * w0.x * w12.y;
    r += t.Sample(samp_linear, float2(tc12.x, tc12.y)) * w12.x * w12.y;
    r += t.Sample(samp_linear, float2(tc3.x, tc12.y)) * w3.x * w12.y;
    r += t.Sample(samp_linear, float2(tc0.x, tc3.y)) * w0.x * w3.y;
    r += t.Sample(samp_linear, float2(tc12.x, tc3.y)) * w12.x * w3.y;
    r += t.Sample(samp_linear, float2(tc3.x, tc3.y)) * w3.x * w3.y;
    return r;
}

"#;

const PQ_FNS: &str = r#"static const float PQ_M1 = 0.1593017578125;
static const float PQ_M2 = 78.84375;
static const float PQ_C1 = 0.8359375;
static const float PQ_C2 = 18.8515625;
static const float PQ_C3 = 18.6875;

float3 pq_to_linear(float3 v)
{
    float3 p = pow(max(v, 0.0), 1.0 / PQ_M2);
    return pow(max(p - PQ_C1, 0.0) / (PQ_C2 - PQ_C3 * p), 1.0 / PQ_M1);
}

float3 linear_to_pq(float3 v)
{
    float3 p = pow(max(v, 0.0), PQ_M1);
    return pow((PQ_C1 + PQ_C2 * p) / (1.0 + PQ_C3 * p), PQ_M2);
}

float pq_nits(float v)
{
    return 10000.0 * pq_to_linear(v.xxx).x;
}

float nits_pq(float n)
{
    return linear_to_pq((n / 10000.0).xxx).x;
}

"#;

const HLG_FNS: &str = r#"static const float HLG_A = 0.17883277;
static const float HLG_B = 0.28466892;
static const float HLG_C = 0.55991073;

float3 hlg_to_linear(float3 v)
{
    v = max(v, 0.0);
    return v <= 0.5 ? v * v / 3.0 : (exp((v - HLG_C) / HLG_A) + HLG_B) / 12.0;
}

float3 linear_to_hlg(float3 v)
{
    v = max(v, 0.0);
    return v <= 1.0 / 12.0 ? sqrt(3.0 * v) : HLG_A * log(12.0 * v - HLG_B) + HLG_C;
}

"#;

const SRGB_FNS: &str = r#"float3 srgb_to_linear(float3 v)
{
    return v <= 0.04045 ? v / 12.92 : pow((max(v, 0.0) + 0.055) / 1.055, 2.4);
}

float3 linear_to_srgb(float3 v)
{
    return v <= 0.0031308 ? v * 12.92 : 1.055 * pow(max(v, 0.0), 1.0 / 2.4) - 0.055;
}

"#;

fn tonemap_fn(op: ToneMapping) -> String {
    let curve = match op {
        ToneMapping::Reinhard => {
            "    float x = n / dst_peak;\n    float white = src_peak / dst_peak;\n    return dst_peak * x * (1.0 + x / (white * white)) / (1.0 + x);\n"
        }
        ToneMapping::Aces => {
            "    float x = n / dst_peak;\n    return dst_peak * saturate((x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14));\n"
        }
        ToneMapping::Bt2390 => {
            "    float src = nits_pq(src_peak);\n    float e1 = saturate(nits_pq(n) / src);\n    float max_lum = nits_pq(dst_peak) / src;\n    float ks = 1.5 * max_lum - 0.5;\n    if (e1 >= ks) {\n        float t = (e1 - ks) / (1.0 - ks);\n        float t2 = t * t;\n        float t3 = t2 * t;\n        e1 = (2.0 * t3 - 3.0 * t2 + 1.0) * ks + (t3 - 2.0 * t2 + t) * (1.0 - ks) + (-2.0 * t3 + 3.0 * t2) * max_lum;\n    }\n    return pq_nits(e1 * src);\n"
        }
    };
    format!(
        "float tonemap_nits(float n)\n{{\n    if (src_peak <= dst_peak)\n        return min(n, dst_peak);\n{}}}\n\n\
         float3 tonemap(float3 c)\n{{\n    float n = dot(c, float3({:.4}, {:.4}, {:.4})) * 10000.0;\n    if (n <= 1e-6)\n        return 0.0;\n    return c * (10000.0 * tonemap_nits(n) / (n * dst_peak));\n}}\n\n",
        curve, BT2020_LUMA[0], BT2020_LUMA[1], BT2020_LUMA[2]
    )
}

fn matrix_literal(m: &Mat3) -> String {
    let r = |i: usize| format!("{:.6}, {:.6}, {:.6}", m.0[i][0], m.0[i][1], m.0[i][2]);
    format!("float3x3({}, {}, {})", r(0), r(1), r(2))
}

fn gamma_of(tf: TransferFunction) -> f32 {
    match tf {
        TransferFunction::Gamma18 => 1.8,
        TransferFunction::Gamma20 => 2.0,
        TransferFunction::Gamma22 => 2.2,
        TransferFunction::Gamma28 => 2.8,
        _ => 2.4,
    }
}

fn linearize_expr(tf: TransferFunction) -> String {
    match tf {
        TransferFunction::Linear => "c".into(),
        TransferFunction::Pq => "pq_to_linear(c)".into(),
        TransferFunction::Hlg => "hlg_to_linear(c)".into(),
        TransferFunction::Srgb => "srgb_to_linear(c)".into(),
        other => format!("pow(max(c, 0.0), {:.1})", gamma_of(other)),
    }
}

fn delinearize_expr(tf: TransferFunction) -> String {
    match tf {
        TransferFunction::Linear => "c".into(),
        TransferFunction::Pq => "linear_to_pq(c)".into(),
        TransferFunction::Hlg => "linear_to_hlg(c)".into(),
        TransferFunction::Srgb => "linear_to_srgb(c)".into(),
        other => format!("pow(max(c, 0.0), 1.0 / {:.1})", gamma_of(other)),
    }
}

/// Helper functions the steps need, each emitted once
fn step_helpers(steps: &[ConvertStep]) -> String {
    let uses = |tf: TransferFunction| {
        steps.iter().any(|s| {
            matches!(s, ConvertStep::Linearize(t) | ConvertStep::Delinearize(t) if *t == tf)
        })
    };
    let mut src = String::new();
    let tonemap = steps.iter().find_map(|s| match s {
        ConvertStep::ToneMap { op, .. } => Some(*op),
        _ => None,
    });
    if uses(TransferFunction::Pq) || tonemap == Some(ToneMapping::Bt2390) {
        src.push_str(PQ_FNS);
    }
    if uses(TransferFunction::Hlg) {
        src.push_str(HLG_FNS);
    }
    if uses(TransferFunction::Srgb) {
        src.push_str(SRGB_FNS);
    }
    if let Some(op) = tonemap {
        src.push_str(&tonemap_fn(op));
    }
    src
}

fn step_body(steps: &[ConvertStep]) -> String {
    let mut body = String::new();
    for step in steps {
        let line = match step {
            ConvertStep::Reshape => continue,
            ConvertStep::Linearize(tf) => format!("c = {};", linearize_expr(*tf)),
            ConvertStep::HlgOotf => "c = hlg_peak * pow(max(c, 0.0), 1.2) / 10000.0;".into(),
            ConvertStep::LmsToRgb(m) => format!("c = mul({}, c);", matrix_literal(m)),
            ConvertStep::ToneMap { .. } => "c = tonemap(c);".into(),
            ConvertStep::GamutRemap { matrix, .. } => {
                format!("c = mul({}, c);", matrix_literal(matrix))
            }
            ConvertStep::Delinearize(tf) => format!("c = {};", delinearize_expr(*tf)),
        };
        body.push_str("    ");
        body.push_str(&line);
        body.push('\n');
    }
    body
}

/// Built-in pass shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinShader {
    Copy,
    Resize { axis: Axis, kernel: ScaleKernel },
    InterlacePack,
    Dither,
}

impl BuiltinShader {
    pub fn name(&self) -> String {
        match self {
            BuiltinShader::Copy => "copy".into(),
            BuiltinShader::Resize { axis, kernel } => {
                let suffix = match axis {
                    Axis::X => "_x",
                    Axis::Y => "_y",
                    Axis::Both => "",
                };
                format!("{}{}", kernel.shader_name(), suffix)
            }
            BuiltinShader::InterlacePack => "interlace_pack".into(),
            BuiltinShader::Dither => "dither".into(),
        }
    }

    pub fn program_key(&self) -> String {
        format!("builtin:{}", self.name())
    }

    pub fn to_hlsl(&self) -> String {
        let mut src = format!("// {}\n", self.name());
        src.push_str(&common_header(1));
        src.push_str(CB_GEOMETRY);
        match self {
            BuiltinShader::Copy => src.push_str(
                "float4 main(PS_INPUT input) : SV_Target\n{\n    return tex0.Sample(samp_linear, input.uv);\n}\n",
            ),
            BuiltinShader::InterlacePack => src.push_str(
                "float4 main(PS_INPUT input) : SV_Target\n{\n    float row = floor(input.uv.y * dst_size.y);\n    float half_offset = fmod(row, 2.0) < 1.0 ? 0.0 : 0.5;\n    float v = (floor(row * 0.5) + 0.5) * dst_size.w + half_offset;\n    return tex0.Sample(samp_point, float2(input.uv.x, v));\n}\n",
            ),
            BuiltinShader::Dither => src.push_str(
                "float bayer8(uint2 p)\n{\n    uint x = p.x & 7u;\n    uint y = p.y & 7u;\n    uint v = ((x ^ y) & 1u) << 5 | (y & 1u) << 4 | ((x ^ y) & 2u) << 2 | (y & 2u) << 1 | ((x ^ y) & 4u) >> 1 | (y & 4u) >> 2;\n    return (v + 0.5) / 64.0;\n}\n\n\
                 float4 main(PS_INPUT input) : SV_Target\n{\n    float4 c = tex0.Sample(samp_point, input.uv);\n    c.rgb += (bayer8((uint2)input.pos.xy) - 0.5) / 255.0;\n    return c;\n}\n",
            ),
            BuiltinShader::Resize { axis, kernel } => src.push_str(&resize_body(*axis, *kernel)),
        }
        src
    }
}

fn weight_fn(kernel: ScaleKernel) -> String {
    let cubic = |b: f32, c: f32| {
        format!(
            "    x = abs(x);\n    if (x < 1.0)\n        return ((12.0 - 9.0 * {b:.4} - 6.0 * {c:.4}) * x * x * x + (-18.0 + 12.0 * {b:.4} + 6.0 * {c:.4}) * x * x + (6.0 - 2.0 * {b:.4})) / 6.0;\n    if (x < 2.0)\n        return ((-{b:.4} - 6.0 * {c:.4}) * x * x * x + (6.0 * {b:.4} + 30.0 * {c:.4}) * x * x + (-12.0 * {b:.4} - 48.0 * {c:.4}) * x + (8.0 * {b:.4} + 24.0 * {c:.4})) / 6.0;\n    return 0.0;\n",
            b = b,
            c = c
        )
    };
    let lanczos = |a: f32| {
        format!("    return abs(x) < {a:.1} ? sinc(x) * sinc(x / {a:.1}) : 0.0;\n")
    };
    let body = match kernel {
        ScaleKernel::Up(Upscaler::Mitchell) => cubic(1.0 / 3.0, 1.0 / 3.0),
        ScaleKernel::Up(Upscaler::CatmullRom) => cubic(0.0, 0.5),
        ScaleKernel::Down(Downscaler::Bicubic) => cubic(0.0, 0.75),
        ScaleKernel::Down(Downscaler::BicubicSharp) => cubic(0.0, 1.0),
        ScaleKernel::Up(Upscaler::Lanczos2) => lanczos(2.0),
        ScaleKernel::Up(Upscaler::Lanczos3) | ScaleKernel::Down(Downscaler::Lanczos) => {
            lanczos(3.0)
        }
        ScaleKernel::Up(Upscaler::Jinc2) => {
            "    return abs(x) < 2.0 ? jinc(x) * jinc(x * 0.6098) : 0.0;\n".into()
        }
        ScaleKernel::Down(Downscaler::Box) => "    return abs(x) <= 0.5 ? 1.0 : 0.0;\n".into(),
        ScaleKernel::Down(Downscaler::Bilinear) => "    return max(0.0, 1.0 - abs(x));\n".into(),
        ScaleKernel::Down(Downscaler::Hamming) => {
            "    return abs(x) < 2.0 ? sinc(x) * (0.54 + 0.46 * cos(3.14159265 * x / 2.0)) : 0.0;\n".into()
        }
        ScaleKernel::Up(Upscaler::Nearest) => "    return 1.0;\n".into(),
    };
    format!(
        "float sinc(float x)\n{{\n    x *= 3.14159265;\n    return abs(x) < 1e-5 ? 1.0 : sin(x) / x;\n}}\n\n\
         float jinc(float x)\n{{\n    float t = 3.14159265 * abs(x);\n    if (t < 1e-5)\n        return 1.0;\n    float j1 = t < 3.0 ? t * 0.5 - t * t * t / 16.0 + pow(t, 5.0) / 384.0 - pow(t, 7.0) / 18432.0\n                       : sqrt(2.0 / (3.14159265 * t)) * cos(t - 2.35619449);\n    return 2.0 * j1 / t;\n}}\n\n\
         float weight(float x)\n{{\n{}}}\n\n",
        body
    )
}

fn resize_body(axis: Axis, kernel: ScaleKernel) -> String {
    if kernel == ScaleKernel::Up(Upscaler::Nearest) {
        return "float4 main(PS_INPUT input) : SV_Target\n{\n    return tex0.Sample(samp_point, input.uv);\n}\n".into();
    }
    let mut src = weight_fn(kernel);
    src.push_str(&format!("static const float RADIUS = {:.1};\n\n", kernel.radius()));
    src.push_str(
        "float4 main(PS_INPUT input) : SV_Target\n{\n    float2 scale = max(src_size.xy * dst_size.zw, 1.0);\n    float2 pos = input.uv * src_size.xy - 0.5;\n    float2 base = floor(pos);\n    float2 f = pos - base;\n    float4 sum = 0;\n    float wsum = 0;\n",
    );
    let loop_body = match axis {
        Axis::X => "    int r = (int)ceil(RADIUS * scale.x);\n    for (int i = 1 - r; i <= r; i++) {\n        float w = weight((i - f.x) / scale.x);\n        sum += w * tex0.SampleLevel(samp_point, (float2(base.x + i, pos.y) + 0.5) * src_size.zw, 0);\n        wsum += w;\n    }\n",
        Axis::Y => "    int r = (int)ceil(RADIUS * scale.y);\n    for (int j = 1 - r; j <= r; j++) {\n        float w = weight((j - f.y) / scale.y);\n        sum += w * tex0.SampleLevel(samp_point, (float2(pos.x, base.y + j) + 0.5) * src_size.zw, 0);\n        wsum += w;\n    }\n",
        Axis::Both if kernel == ScaleKernel::Up(Upscaler::Jinc2) => "    int r = (int)ceil(RADIUS);\n    for (int j = 1 - r; j <= r; j++) {\n        for (int i = 1 - r; i <= r; i++) {\n            float w = weight(length(float2(i, j) - f));\n            sum += w * tex0.SampleLevel(samp_point, (base + float2(i, j) + 0.5) * src_size.zw, 0);\n            wsum += w;\n        }\n    }\n",
        Axis::Both => "    int2 r = (int2)ceil(RADIUS * scale);\n    for (int j = 1 - r.y; j <= r.y; j++) {\n        float wy = weight((j - f.y) / scale.y);\n        for (int i = 1 - r.x; i <= r.x; i++) {\n            float w = wy * weight((i - f.x) / scale.x);\n            sum += w * tex0.SampleLevel(samp_point, (base + float2(i, j) + 0.5) * src_size.zw, 0);\n            wsum += w;\n        }\n    }\n",
    };
    src.push_str(loop_body);
    src.push_str("    return sum / max(wsum, 1e-6);\n}\n");
    src
}

/// Compiled programs by key
#[derive(Debug, Default)]
pub struct ProgramCache {
    programs: HashMap<String, ShaderHandle>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached program or compile `source` under `name`
    pub fn get_or_compile(
        &mut self,
        device: &mut dyn GpuDevice,
        key: &str,
        name: &str,
        source: impl FnOnce() -> String,
    ) -> Result<ShaderHandle> {
        if let Some(handle) = self.programs.get(key) {
            return Ok(*handle);
        }
        let handle = device.compile_shader(name, &source())?;
        debug!("Compiled shader {} ({})", name, key);
        self.programs.insert(key.to_string(), handle);
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Release every program
    pub fn clear(&mut self, device: &mut dyn GpuDevice) {
        for (_, handle) in self.programs.drain() {
            device.release_shader(handle);
        }
    }

    /// Forget handles without releasing them (the device is gone)
    pub fn forget(&mut self) {
        self.programs.clear();
    }
}

/// User post-scale shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostShader {
    pub name: String,
    pub source: String,
    pub handle: ShaderHandle,
}

/// Post-scale shaders in registration order
#[derive(Debug, Default)]
pub struct PostShaderRegistry {
    shaders: Vec<PostShader>,
}

impl PostShaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and append a shader
    ///
    /// A compile failure leaves the registry untouched.
    pub fn add(
        &mut self,
        device: &mut dyn GpuDevice,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<usize> {
        let name = name.into();
        let source = source.into();
        let handle = device.compile_shader(&name, &source)?;
        info!("Added post-scale shader '{}'", name);
        self.shaders.push(PostShader {
            name,
            source,
            handle,
        });
        Ok(self.shaders.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PostShader> {
        self.shaders.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PostShader> {
        self.shaders.iter()
    }

    /// Release and remove every shader
    pub fn clear(&mut self, device: &mut dyn GpuDevice) {
        for shader in self.shaders.drain(..) {
            device.release_shader(shader.handle);
        }
    }

    /// Compile every shader again on a new device, dropping those that fail
    pub fn recompile(&mut self, device: &mut dyn GpuDevice) {
        self.shaders.retain_mut(|shader| match device.compile_shader(&shader.name, &shader.source) {
            Ok(handle) => {
                shader.handle = handle;
                true
            }
            Err(e) => {
                warn!("Dropping post-scale shader '{}': {}", shader.name, e);
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::lookup;
    use crate::render::recording::RecordingDevice;

    fn hdr10_input() -> CorrectionInput {
        CorrectionInput {
            color: ExtendedColorInfo::HDR10,
            dovi: None,
            hdr_passthrough: false,
            convert_to_sdr: true,
            tone_mapping: ToneMapping::Bt2390,
            source_peak: 1000.0,
            target_peak: 203.0,
        }
    }

    #[test]
    fn test_hdr10_to_sdr_plan() {
        let plan = CorrectionPlan::derive(&hdr10_input());
        assert!(plan.has_tone_map());
        assert_eq!(plan.steps[0], ConvertStep::Linearize(TransferFunction::Pq));
        assert!(plan
            .gamut_step(ColorPrimaries::Bt2020, ColorPrimaries::Bt709)
            .is_some());
        assert_eq!(
            plan.steps.last(),
            Some(&ConvertStep::Delinearize(SDR_OUTPUT_TRANSFER))
        );
    }

    #[test]
    fn test_hdr10_plan_maps_peak_to_white() {
        let plan = CorrectionPlan::derive(&hdr10_input());
        let peak = transfer::linear_to_pq(1000.0) as f64;
        let out = plan.apply([peak; 3]);
        for v in out {
            assert!(v > 0.95 && v < 1.02, "{}", v);
        }
        let black = plan.apply([0.0; 3]);
        assert!(black.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_passthrough_keeps_pq_and_converts_hlg() {
        let pq = CorrectionPlan::derive(&CorrectionInput {
            hdr_passthrough: true,
            ..hdr10_input()
        });
        assert!(pq.is_empty());

        let hlg = CorrectionPlan::derive(&CorrectionInput {
            color: ExtendedColorInfo {
                transfer: TransferFunction::Hlg,
                ..ExtendedColorInfo::HDR10
            },
            hdr_passthrough: true,
            ..hdr10_input()
        });
        assert_eq!(
            hlg.steps,
            vec![
                ConvertStep::Linearize(TransferFunction::Hlg),
                ConvertStep::HlgOotf,
                ConvertStep::Delinearize(TransferFunction::Pq),
            ]
        );
        // HLG peak signal lands on 1000 nits in PQ
        let out = hlg.apply([1.0; 3]);
        assert!((out[0] - transfer::linear_to_pq(1000.0) as f64).abs() < 1e-3);
    }

    #[test]
    fn test_sdr_bt2020_gets_gamut_only() {
        let plan = CorrectionPlan::derive(&CorrectionInput {
            color: ExtendedColorInfo {
                transfer: TransferFunction::Bt709,
                ..ExtendedColorInfo::HDR10
            },
            ..hdr10_input()
        });
        assert!(!plan.has_tone_map());
        assert_eq!(plan.steps.len(), 3);
        let white = plan.apply([1.0; 3]);
        assert!(white.iter().all(|v| (v - 1.0).abs() < 1e-3));
    }

    #[test]
    fn test_bt709_sdr_has_no_plan() {
        let plan = CorrectionPlan::derive(&CorrectionInput {
            color: ExtendedColorInfo {
                transfer: TransferFunction::Bt709,
                primaries: ColorPrimaries::Bt709,
                ..ExtendedColorInfo::HDR10
            },
            ..hdr10_input()
        });
        assert!(plan.is_empty());
    }

    #[test]
    fn test_dovi_plan() {
        let plan = CorrectionPlan::derive(&CorrectionInput {
            dovi: Some(DoviCorrection {
                reshape: true,
                lms_to_rgb: Mat3::IDENTITY,
            }),
            ..hdr10_input()
        });
        assert!(plan.has_reshape());
        assert_eq!(plan.steps[1], ConvertStep::Linearize(TransferFunction::Pq));
        assert!(matches!(plan.steps[2], ConvertStep::LmsToRgb(_)));
        assert!(plan.has_tone_map());
    }

    #[test]
    fn test_program_layouts() {
        let nv12 = ConvertProgram::new(lookup(ColorFormat::Nv12), ChromaUpsampling::CatmullRom);
        assert_eq!(nv12.layout, SamplingLayout::SemiPlanar);
        assert_eq!(nv12.texture_count(), 2);
        let src = nv12.to_hlsl();
        assert!(src.contains("sample_catmull_rom(tex1"));
        assert!(src.contains("cbuffer Color"));
        assert!(!src.contains("tex2"));

        let yv12 = ConvertProgram::new(lookup(ColorFormat::Yv12), ChromaUpsampling::Bilinear);
        assert!(yv12.swap_uv);
        assert!(yv12.to_hlsl().contains("float u = tex2.Sample(samp_linear, uv).r;"));

        let yuy2 = ConvertProgram::new(lookup(ColorFormat::Yuy2), ChromaUpsampling::Bilinear);
        assert_eq!(yuy2.layout, SamplingLayout::Packed422);

        let rgb = ConvertProgram::new(lookup(ColorFormat::Xrgb32), ChromaUpsampling::Bilinear);
        assert_eq!(rgb.chroma, None);
        let gray = ConvertProgram::new(lookup(ColorFormat::Y8), ChromaUpsampling::Bilinear);
        assert_eq!(gray.layout, SamplingLayout::Gray);
    }

    #[test]
    fn test_program_key_tracks_steps() {
        let base = ConvertProgram::new(lookup(ColorFormat::P010), ChromaUpsampling::Bilinear);
        let with_plan = base.clone().with_steps(CorrectionPlan::derive(&hdr10_input()).steps);
        assert_ne!(base.program_key(), with_plan.program_key());

        // peaks are constants, not code
        let brighter = CorrectionPlan::derive(&CorrectionInput {
            source_peak: 4000.0,
            ..hdr10_input()
        });
        let other = base.clone().with_steps(brighter.steps);
        assert_eq!(with_plan.program_key(), other.program_key());

        let src = with_plan.to_hlsl();
        assert!(src.contains("pq_to_linear"));
        assert!(src.contains("tonemap(c)"));
        assert!(src.contains("cbuffer ToneMap"));
    }

    #[test]
    fn test_reshape_emitted_before_matrix() {
        let program = ConvertProgram::new(lookup(ColorFormat::P010), ChromaUpsampling::Bilinear)
            .with_steps(vec![ConvertStep::Reshape]);
        let src = program.to_hlsl();
        let reshape = src.find("reshape(0, c.x, c)").unwrap();
        let matrix = src.find("dot(cm_r.rgb, c)").unwrap();
        assert!(reshape < matrix);
        assert!(src.contains("float4 dovi[174]"));
    }

    #[test]
    fn test_builtin_shader_names() {
        let kernel = ScaleKernel::Up(Upscaler::Lanczos3);
        let x = BuiltinShader::Resize { axis: Axis::X, kernel };
        assert_eq!(x.name(), "resize_lanczos3_x");
        assert!(x.to_hlsl().contains("RADIUS = 3.0"));
        assert!(BuiltinShader::Dither.to_hlsl().contains("bayer8"));
        assert!(BuiltinShader::InterlacePack.to_hlsl().contains("half_offset"));
    }

    #[test]
    fn test_program_cache_compiles_once() {
        let mut device = RecordingDevice::default();
        let mut cache = ProgramCache::new();
        let a = cache
            .get_or_compile(&mut device, "k", "copy", || BuiltinShader::Copy.to_hlsl())
            .unwrap();
        let b = cache
            .get_or_compile(&mut device, "k", "copy", || unreachable!())
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(device.live_shaders(), 1);
        cache.clear(&mut device);
        assert_eq!(device.live_shaders(), 0);
    }

    #[test]
    fn test_post_shader_failure_not_added() {
        let mut device = RecordingDevice::default();
        let mut registry = PostShaderRegistry::new();
        registry.add(&mut device, "sharpen", "float4 main() : SV_Target { return 0; }").unwrap();
        device.fail_shader("broken");
        assert!(registry.add(&mut device, "broken", "???").is_err());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(0).map(|s| s.name.as_str()), Some("sharpen"));
    }
}
