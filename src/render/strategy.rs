//! Rendering strategies
//!
//! A stream is rendered either by the hardware video processor or by the
//! conversion shader. Both sit behind [`RenderStrategy`] so the frame
//! processor negotiates, builds the color stage and runs the first pass the
//! same way for either.

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::format::{PixelFormatDescriptor, SurfaceFormat, VideoGeometry};
use crate::pipeline::sequencer::FrontStage;
use crate::pipeline::shaders::{ConvertProgram, CorrectionPlan, ProgramCache};
use crate::processing::{ChromaUpsampling, ColorTransform, ExtendedColorInfo};
use crate::types::Resolution;

use super::backend::{
    slots, GpuDevice, ShaderHandle, TextureDesc, TextureHandle, VideoProcessorBlt,
    VideoProcessorDesc,
};

/// Which strategy a stream uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    VideoProcessor,
    Shader,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::VideoProcessor => write!(f, "video processor"),
            StrategyKind::Shader => write!(f, "shader"),
        }
    }
}

/// Negotiation inputs shared by both strategies
#[derive(Debug, Clone, Copy)]
pub struct NegotiateParams<'a> {
    pub geometry: &'a VideoGeometry,
    pub color: &'a ExtendedColorInfo,
    /// Internal render target format
    pub output_format: SurfaceFormat,
    /// Size the video processor writes
    pub output_size: Resolution,
    pub full_range_output: bool,
    pub deinterlace: bool,
}

/// Video processor state
#[derive(Debug, Clone)]
pub struct VideoProcessorStrategy {
    pub input: TextureHandle,
    pub desc: VideoProcessorDesc,
}

/// Shader path state
#[derive(Debug, Clone, Default)]
pub struct ShaderStrategy {
    pub planes: Vec<TextureHandle>,
    pub program: Option<ConvertProgram>,
    pub shader: Option<ShaderHandle>,
}

#[derive(Debug, Clone)]
pub enum RenderStrategy {
    VideoProcessor(VideoProcessorStrategy),
    Shader(ShaderStrategy),
}

/// Size of each shader-path input plane
pub fn plane_sizes(
    desc: &PixelFormatDescriptor,
    size: Resolution,
) -> Vec<(Resolution, SurfaceFormat)> {
    let (px, py) = desc.subsampling.chroma_period();
    desc.plane_formats
        .iter()
        .enumerate()
        .filter_map(|(i, format)| {
            let format = (*format)?;
            let plane = if i == 0 {
                if desc.is_packed_422() {
                    Resolution::new(size.width.div_ceil(2), size.height)
                } else {
                    size
                }
            } else {
                Resolution::new(size.width.div_ceil(px), size.height.div_ceil(py))
            };
            Some((plane, format))
        })
        .collect()
}

impl RenderStrategy {
    /// Create the input resources for `kind`
    ///
    /// The video processor may refuse the stream colorimetry with
    /// `Error::IncompatibleColorspace`; the caller then retries with
    /// [`StrategyKind::Shader`].
    pub fn negotiate(
        kind: StrategyKind,
        device: &mut dyn GpuDevice,
        params: &NegotiateParams<'_>,
    ) -> Result<Self> {
        let desc = params.geometry.descriptor();
        let size = params.geometry.size();
        match kind {
            StrategyKind::VideoProcessor => {
                let input_format = desc.vp_format.ok_or_else(|| {
                    let reason = format!("{} has no video processor surface", desc.name);
                    Error::UnsupportedFormat(reason)
                })?;
                let vp = VideoProcessorDesc {
                    input_format,
                    input_size: size,
                    output_format: params.output_format,
                    output_size: params.output_size,
                    color: *params.color,
                    output_full_range: params.full_range_output,
                    deinterlace: params.deinterlace && params.geometry.is_interlaced(),
                };
                device.create_video_processor(&vp)?;
                let input = match device.create_texture(&TextureDesc::input(size, input_format)) {
                    Ok(t) => t,
                    Err(e) => {
                        device.release_video_processor();
                        return Err(e);
                    }
                };
                info!(
                    "Video processor configured: {:?} {} -> {:?}",
                    input_format, size, params.output_format
                );
                Ok(RenderStrategy::VideoProcessor(VideoProcessorStrategy { input, desc: vp }))
            }
            StrategyKind::Shader => {
                let mut planes = Vec::with_capacity(desc.planes as usize);
                for (plane, format) in plane_sizes(desc, size) {
                    match device.create_texture(&TextureDesc::input(plane, format)) {
                        Ok(t) => planes.push(t),
                        Err(e) => {
                            planes.iter().for_each(|t| device.release_texture(*t));
                            return Err(e);
                        }
                    }
                }
                info!("Shader path configured: {} with {} input planes", desc.name, planes.len());
                Ok(RenderStrategy::Shader(ShaderStrategy {
                    planes,
                    ..Default::default()
                }))
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            RenderStrategy::VideoProcessor(_) => StrategyKind::VideoProcessor,
            RenderStrategy::Shader(_) => StrategyKind::Shader,
        }
    }

    /// Textures that receive the frame data
    pub fn inputs(&self) -> Vec<TextureHandle> {
        match self {
            RenderStrategy::VideoProcessor(vp) => vec![vp.input],
            RenderStrategy::Shader(s) => s.planes.clone(),
        }
    }

    /// First stage of the pipeline
    pub fn front_stage(&self, color_pass: bool, vp_scaling: bool) -> FrontStage {
        match self {
            RenderStrategy::VideoProcessor(_) => FrontStage::VideoProcessor { scaling: vp_scaling },
            RenderStrategy::Shader(_) if color_pass => FrontStage::ColorConversion,
            RenderStrategy::Shader(_) => FrontStage::None,
        }
    }

    /// Correction steps run as a separate stage after scaling
    pub fn needs_correction_stage(&self, plan: &CorrectionPlan) -> bool {
        matches!(self, RenderStrategy::VideoProcessor(_)) && !plan.is_empty()
    }

    /// Prepare the color stage: program and matrix constants on the shader
    /// path, nothing on the video processor which converts by itself
    pub fn build_color_stage(
        &mut self,
        device: &mut dyn GpuDevice,
        cache: &mut ProgramCache,
        desc: &PixelFormatDescriptor,
        chroma: ChromaUpsampling,
        transform: &ColorTransform,
        plan: &CorrectionPlan,
    ) -> Result<()> {
        let RenderStrategy::Shader(shader) = self else {
            return Ok(());
        };
        let program = ConvertProgram::new(desc, chroma).with_steps(plan.steps.clone());
        if shader.program.as_ref() != Some(&program) || shader.shader.is_none() {
            let key = program.program_key();
            let handle = cache.get_or_compile(device, &key, &program.name(), || program.to_hlsl())?;
            debug!("Conversion program {} ready", program.name());
            shader.shader = Some(handle);
            shader.program = Some(program);
        }
        device.upload_constants(slots::COLOR, &transform.constant_bytes())?;
        Ok(())
    }

    /// Compiled conversion shader, shader path only
    pub fn conversion_shader(&self) -> Option<ShaderHandle> {
        match self {
            RenderStrategy::Shader(s) => s.shader,
            RenderStrategy::VideoProcessor(_) => None,
        }
    }

    pub fn upload(&self, device: &mut dyn GpuDevice, data: &[u8], pitch: u32) -> Result<()> {
        device.upload_frame(&self.inputs(), data, pitch)
    }

    /// Run the video processor; no-op on the shader path
    pub fn process(&self, device: &mut dyn GpuDevice, blt: &VideoProcessorBlt) -> Result<()> {
        match self {
            RenderStrategy::VideoProcessor(_) => device.video_processor_blt(blt),
            RenderStrategy::Shader(_) => Ok(()),
        }
    }

    /// Release every resource of the strategy
    pub fn release(&mut self, device: &mut dyn GpuDevice) {
        match self {
            RenderStrategy::VideoProcessor(vp) => {
                device.release_texture(vp.input);
                device.release_video_processor();
            }
            RenderStrategy::Shader(s) => {
                for plane in s.planes.drain(..) {
                    device.release_texture(plane);
                }
                // the program itself belongs to the cache
                s.shader = None;
                s.program = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{lookup, ColorFormat};
    use crate::render::recording::RecordingDevice;
    use crate::render::vendor::GpuVendor;
    use crate::types::{FieldOrder, Rect};

    fn geometry(format: ColorFormat, w: u32, h: u32) -> VideoGeometry {
        VideoGeometry {
            format,
            width: w,
            height: h,
            pitch: w,
            bottom_up: false,
            source_rect: Rect::new(0, 0, w as i32, h as i32),
            aspect: (16, 9),
            field_order: FieldOrder::Progressive,
            frame_duration: 0,
            color: ExtendedColorInfo::default(),
        }
    }

    fn params<'a>(
        geometry: &'a VideoGeometry,
        color: &'a ExtendedColorInfo,
    ) -> NegotiateParams<'a> {
        NegotiateParams {
            geometry,
            color,
            output_format: SurfaceFormat::Bgra8,
            output_size: geometry.size(),
            full_range_output: true,
            deinterlace: true,
        }
    }

    #[test]
    fn test_plane_sizes() {
        let nv12 = plane_sizes(lookup(ColorFormat::Nv12), Resolution::new(1919, 1079));
        assert_eq!(nv12.len(), 2);
        assert_eq!(nv12[1].0, Resolution::new(960, 540));

        let yuy2 = plane_sizes(lookup(ColorFormat::Yuy2), Resolution::new(1920, 1080));
        assert_eq!(yuy2.len(), 1);
        assert_eq!(yuy2[0].0, Resolution::new(960, 1080));

        let yv24 = plane_sizes(lookup(ColorFormat::Yv24), Resolution::FHD_1080P);
        assert!(yv24.iter().all(|(size, _)| *size == Resolution::FHD_1080P));
    }

    #[test]
    fn test_vp_negotiation() {
        let mut device = RecordingDevice::new(GpuVendor::Intel);
        let g = geometry(ColorFormat::Nv12, 1920, 1080);
        let color = ExtendedColorInfo::HDR10;
        let params = params(&g, &color);
        let strategy =
            RenderStrategy::negotiate(StrategyKind::VideoProcessor, &mut device, &params).unwrap();
        assert_eq!(strategy.kind(), StrategyKind::VideoProcessor);
        assert!(device.video_processor_active());
        assert_eq!(
            strategy.front_stage(true, false),
            FrontStage::VideoProcessor { scaling: false }
        );
    }

    #[test]
    fn test_vp_colorspace_rejection_leaves_nothing_behind() {
        let mut device = RecordingDevice::new(GpuVendor::Intel);
        device.reject_vp_colorspace(true);
        let g = geometry(ColorFormat::Nv12, 1920, 1080);
        let color = ExtendedColorInfo::HDR10;
        let params = params(&g, &color);
        let err =
            RenderStrategy::negotiate(StrategyKind::VideoProcessor, &mut device, &params).unwrap_err();
        assert!(matches!(err, Error::IncompatibleColorspace(_)));
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn test_shader_release() {
        let mut device = RecordingDevice::default();
        let g = geometry(ColorFormat::Yv12, 1280, 720);
        let color = ExtendedColorInfo::default();
        let mut strategy =
            RenderStrategy::negotiate(StrategyKind::Shader, &mut device, &params(&g, &color))
                .unwrap();
        assert_eq!(strategy.inputs().len(), 3);
        assert_eq!(strategy.front_stage(false, false), FrontStage::None);
        strategy.release(&mut device);
        assert_eq!(device.live_textures(), 0);
    }
}
