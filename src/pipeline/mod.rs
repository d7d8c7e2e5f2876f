//! Render pipeline assembly
//!
//! Provides:
//! - Stage sequencing and intermediate buffer layout
//! - Shader programs for conversion, correction and the built-in passes

pub mod sequencer;
pub mod shaders;

pub use sequencer::{
    BufferDesc, FrontStage, PipelineSequencer, PipelineStageList, Stage, StageExtents, StageKind,
    StageOutput, StageRequest,
};
pub use shaders::{
    BuiltinShader, ConvertProgram, ConvertStep, CorrectionInput, CorrectionPlan, DoviCorrection,
    GeometryConstants, PostShaderRegistry, ProgramCache, SamplingLayout, ToneMapConstants,
};
