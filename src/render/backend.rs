//! GPU device boundary
//!
//! The decision engine never talks to a graphics API directly. Everything it
//! needs from the GPU goes through [`GpuDevice`]: texture and shader
//! creation, constant uploads, draws and the hardware video processor.

use crate::error::Result;
use crate::format::SurfaceFormat;
use crate::processing::ExtendedColorInfo;
use crate::types::{Rect, Resolution, Rotation};

use super::vendor::GpuVendor;

/// Opaque texture handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Opaque compiled shader handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u64);

/// Texture creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub size: Resolution,
    pub format: SurfaceFormat,
    /// Usable as a render target
    pub render_target: bool,
}

impl TextureDesc {
    pub fn input(size: Resolution, format: SurfaceFormat) -> Self {
        Self {
            size,
            format,
            render_target: false,
        }
    }

    pub fn target(size: Resolution, format: SurfaceFormat) -> Self {
        Self {
            size,
            format,
            render_target: true,
        }
    }
}

/// Hardware video processor configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProcessorDesc {
    pub input_format: SurfaceFormat,
    pub input_size: Resolution,
    pub output_format: SurfaceFormat,
    pub output_size: Resolution,
    pub color: ExtendedColorInfo,
    /// Full-range output
    pub output_full_range: bool,
    pub deinterlace: bool,
}

/// Where a pass writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// The presentation target supplied by the caller
    Output,
    Texture(TextureHandle),
}

/// Constant-buffer slots shared by all generated shaders
pub mod slots {
    /// Color matrix (`ColorConstants`)
    pub const COLOR: u32 = 0;
    /// Tone-mapping peaks
    pub const TONEMAP: u32 = 1;
    /// Dolby Vision reshaping curves
    pub const DOVI_CURVES: u32 = 2;
    /// Source and destination geometry
    pub const GEOMETRY: u32 = 3;
}

/// One full-screen quad draw
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub shader: ShaderHandle,
    pub inputs: Vec<TextureHandle>,
    pub target: RenderTarget,
    /// Area of the target covered by the quad
    pub viewport: Rect,
    /// Texture coordinates of the quad corners (TL, TR, BL, BR)
    pub texcoords: [[f32; 2]; 4],
}

/// Video processor blit parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProcessorBlt {
    pub input: TextureHandle,
    pub target: RenderTarget,
    pub source: Rect,
    pub destination: Rect,
    pub rotation: Rotation,
    /// Field to output for interlaced content (0 or 1)
    pub field: u8,
}

/// GPU operations the renderer core depends on
pub trait GpuDevice {
    /// Adapter vendor
    fn vendor(&self) -> GpuVendor;

    /// Whether the video processor accepts `format` as input
    fn supports_vp_input(&self, format: SurfaceFormat) -> bool;

    /// Whether the attached display accepts HDR output
    fn supports_hdr_output(&self) -> bool;

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle>;

    /// Release a texture; unknown handles are ignored
    fn release_texture(&mut self, texture: TextureHandle);

    /// Upload frame data into the input textures
    fn upload_frame(&mut self, planes: &[TextureHandle], data: &[u8], pitch: u32) -> Result<()>;

    /// Compile pixel shader source
    fn compile_shader(&mut self, name: &str, source: &str) -> Result<ShaderHandle>;

    /// Release a compiled shader; unknown handles are ignored
    fn release_shader(&mut self, shader: ShaderHandle);

    /// Upload a constant buffer to `slot`
    fn upload_constants(&mut self, slot: u32, data: &[u8]) -> Result<()>;

    /// Issue a quad draw
    fn draw(&mut self, call: &DrawCall) -> Result<()>;

    /// Configure the video processor
    ///
    /// Returns `Error::IncompatibleColorspace` when the processor cannot
    /// handle the stream colorimetry.
    fn create_video_processor(&mut self, desc: &VideoProcessorDesc) -> Result<()>;

    fn release_video_processor(&mut self);

    /// Run the configured video processor
    fn video_processor_blt(&mut self, blt: &VideoProcessorBlt) -> Result<()>;
}
