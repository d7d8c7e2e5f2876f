//! GhostRender: GPU video renderer core
//!
//! Format negotiation, color conversion and scaling decisions for a GPU
//! video renderer. The crate decides; a [`GpuDevice`] implementation
//! executes.
//!
//! # Features
//!
//! - **Formats**: static pixel format catalog, FourCC/subtype classification,
//!   legacy and extended video-info headers
//! - **Color**: colorimetry resolution, YUV to RGB matrices with ProcAmp,
//!   gamut remapping, PQ/HLG curves and tone mapping
//! - **HDR**: HDR10, content light level and Dolby Vision side data
//! - **Scaling**: per-axis kernel choice, one or two passes, rotation
//! - **Pipeline**: pass sequencing with a ping-pong buffer pool
//!
//! # Example
//!
//! ```rust,no_run
//! use ghostrender::{FrameProcessor, FrameSample, RecordingDevice, RendererSettings};
//! use ghostrender::render::GpuVendor;
//! # fn media_type() -> ghostrender::format::MediaType { unimplemented!() }
//!
//! fn main() -> ghostrender::Result<()> {
//!     let device = RecordingDevice::new(GpuVendor::Intel);
//!     let mut processor = FrameProcessor::new(device, RendererSettings::default());
//!     processor.configure(media_type())?;
//!     processor.process_frame(&FrameSample::new(vec![0u8; 1920 * 1080 * 3 / 2]))?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod hdr;
pub mod pipeline;
pub mod processing;
pub mod render;
pub mod types;

// Re-exports for convenience
pub use config::{RendererSettings, SettingsHandle, SwapChainBits, TextureFormat};
pub use error::{Error, Result};
pub use format::{lookup, ColorFormat, MediaType, PixelFormatDescriptor};
pub use hdr::{DynamicMetadata, SideData, SideDataTag};
pub use pipeline::{CorrectionPlan, PipelineSequencer, PipelineStageList, StageKind};
pub use processing::{
    ColorMatrixBuilder, ColorTransform, ExtendedColorInfo, ScalingDecision, ScalingPolicy,
};
pub use render::{
    FrameProcessor, FrameSample, GpuDevice, ProcessorState, ReconfigureSignals, RecordingDevice,
    StrategyKind,
};
pub use types::{Rect, Resolution, Rotation};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
