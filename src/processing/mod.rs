//! Video processing decisions
//!
//! Provides:
//! - Colorimetry resolution
//! - Color conversion matrix
//! - Gamut remapping and transfer curves
//! - ProcAmp controls
//! - Scaling policy

pub mod colorimetry;
pub mod matrix;
pub mod primaries;
pub mod procamp;
pub mod scale;
pub mod transfer;

pub use colorimetry::{
    resolve, ChromaSiting, ColorPrimaries, ExtendedColorInfo, Lighting, NominalRange,
    TransferFunction, TransferMatrix,
};
pub use matrix::{ColorConstants, ColorMatrixBuilder, ColorTransform, Mat3};
pub use primaries::{gamut_remap, Chromaticities};
pub use procamp::ProcAmp;
pub use scale::{
    quad_texcoords, Axis, AxisScaling, ChromaUpsampling, Downscaler, ScaleKernel, ScalingDecision,
    ScalingPasses, ScalingPolicy, Upscaler,
};
pub use transfer::ToneMapping;
