//! Frame rendering
//!
//! Provides:
//! - The GPU device boundary and a recording device
//! - Video processor and shader strategies
//! - Vendor workaround policy
//! - [`FrameProcessor`], the per-stream state machine tying the decision
//!   engine together

pub mod backend;
pub mod recording;
pub mod strategy;
pub mod vendor;

pub use backend::{
    slots, DrawCall, GpuDevice, RenderTarget, ShaderHandle, TextureDesc, TextureHandle,
    VideoProcessorBlt, VideoProcessorDesc,
};
pub use recording::{DeviceCall, RecordingDevice};
pub use strategy::{NegotiateParams, RenderStrategy, StrategyKind};
pub use vendor::{GpuVendor, VendorPolicy, VendorRule};

use bytes::Bytes;

use crate::config::{RendererSettings, SettingsHandle, StereoTransform, SwapChainBits};
use crate::error::{Error, Result};
use crate::format::{MediaType, SurfaceFormat, VideoGeometry};
use crate::hdr::{DynamicMetadata, MetadataChanges, SideData};
use crate::pipeline::{
    BuiltinShader, CorrectionInput, CorrectionPlan, DoviCorrection, FrontStage, GeometryConstants,
    PipelineSequencer, PipelineStageList, PostShaderRegistry, ProgramCache, StageExtents,
    StageKind, StageOutput, StageRequest,
};
use crate::processing::transfer::{self, HLG_PEAK_NITS};
use crate::processing::{
    quad_texcoords, resolve, ColorMatrixBuilder, ColorTransform, ExtendedColorInfo, Mat3,
    NominalRange, ScalingDecision, TransferFunction, TransferMatrix,
};
use crate::types::{Rect, Resolution, Rotation};

/// Content peak assumed when no metadata says otherwise
const DEFAULT_CONTENT_PEAK_NITS: f32 = 1000.0;

/// Frame processor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessorState {
    #[default]
    Uninitialized,
    MediaTypeNegotiated,
    Ready,
    Error,
}

/// What the host has to recreate after a (re)configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconfigureSignals {
    /// HDR output mode changed; the device must be recreated
    pub device: bool,
    /// Swap chain bit depth or HDR mode changed
    pub swap_chain: bool,
}

impl ReconfigureSignals {
    pub fn any(&self) -> bool {
        self.device || self.swap_chain
    }

    /// Fold in signals raised by a later reconfiguration
    pub fn merge(&mut self, other: ReconfigureSignals) {
        self.device |= other.device;
        self.swap_chain |= other.swap_chain;
    }
}

/// One decoded frame
#[derive(Debug, Clone, Default)]
pub struct FrameSample {
    pub data: Bytes,
    pub side_data: Vec<SideData>,
}

impl FrameSample {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            side_data: Vec::new(),
        }
    }

    pub fn with_side_data(mut self, block: SideData) -> Self {
        self.side_data.push(block);
        self
    }
}

/// Processing statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_processed: u64,
    /// Frames whose side data changed the dynamic metadata
    pub metadata_updates: u64,
    pub matrix_rebuilds: u64,
    pub curve_uploads: u64,
    pub pipeline_rebuilds: u64,
}

/// Intermediate render target owned by the pipeline
#[derive(Debug, Clone, Copy)]
struct PooledBuffer {
    size: Resolution,
    texture: TextureHandle,
}

/// Built-in programs are part of the renderer; failing to compile one is a
/// resource failure, not a recoverable user-shader error
fn builtin_failure(e: Error) -> Error {
    match e {
        Error::ShaderCompile { name, reason } => {
            Error::ResourceCreation(format!("built-in shader {}: {}", name, reason))
        }
        other => other,
    }
}

/// Per-stream renderer state machine
///
/// Owns the device for its lifetime. All calls are synchronous and expect
/// exclusive access; settings edited on other threads arrive through
/// [`FrameProcessor::sync_settings`].
pub struct FrameProcessor<D: GpuDevice> {
    device: D,
    settings: RendererSettings,
    settings_generation: Option<u64>,
    state: ProcessorState,

    media_type: Option<MediaType>,
    geometry: Option<VideoGeometry>,
    color: ExtendedColorInfo,
    metadata: DynamicMetadata,

    strategy: Option<RenderStrategy>,
    /// The video processor rejected the stream or Dolby Vision showed up
    force_shader: bool,
    dovi_switched: bool,

    transform: ColorTransform,
    plan: CorrectionPlan,
    scaling: Option<ScalingDecision>,
    scaling_dirty: bool,

    sequencer: PipelineSequencer,
    buffers: Vec<PooledBuffer>,
    internal_format: SurfaceFormat,
    programs: ProgramCache,
    post_shaders: PostShaderRegistry,

    window: Option<Resolution>,
    video_rect: Option<Rect>,
    rotation: Rotation,
    flip_h: bool,
    flip_v: bool,

    output_hdr: bool,
    swap_chain_bits: u8,
    /// Raised while processing frames, drained by the host
    pending_signals: ReconfigureSignals,
    stats: FrameStats,
}

impl<D: GpuDevice> FrameProcessor<D> {
    pub fn new(device: D, settings: RendererSettings) -> Self {
        Self {
            device,
            settings,
            settings_generation: None,
            state: ProcessorState::Uninitialized,
            media_type: None,
            geometry: None,
            color: ExtendedColorInfo::default(),
            metadata: DynamicMetadata::default(),
            strategy: None,
            force_shader: false,
            dovi_switched: false,
            transform: ColorTransform::identity(),
            plan: CorrectionPlan::default(),
            scaling: None,
            scaling_dirty: true,
            sequencer: PipelineSequencer::new(),
            buffers: Vec::new(),
            internal_format: SurfaceFormat::Bgra8,
            programs: ProgramCache::new(),
            post_shaders: PostShaderRegistry::new(),
            window: None,
            video_rect: None,
            rotation: Rotation::R0,
            flip_h: false,
            flip_v: false,
            output_hdr: false,
            swap_chain_bits: 8,
            pending_signals: ReconfigureSignals::default(),
            stats: FrameStats::default(),
        }
    }

    /// Accept a media type and bring the stream to `Ready`
    ///
    /// An unsupported media type is rejected without touching the current
    /// stream. Fatal resource failures move the processor to `Error`.
    pub fn configure(&mut self, media_type: MediaType) -> Result<ReconfigureSignals> {
        if self.state == ProcessorState::Error {
            return Err(Error::InvalidState(
                "processor is in the error state; reset the device first".into(),
            ));
        }
        let geometry = media_type.geometry()?;
        let desc = geometry.descriptor();

        tracing::info!(
            "Configuring {} {}x{} ({})",
            desc.name,
            geometry.width,
            geometry.height,
            geometry.field_order
        );

        self.teardown();
        self.metadata.clear();
        self.force_shader = false;
        self.dovi_switched = false;
        self.media_type = Some(media_type);
        self.geometry = Some(geometry);
        self.color = resolve(
            geometry.color,
            desc.color_system,
            desc.subsampling,
            geometry.width,
            geometry.height,
        );
        tracing::debug!("Resolved colorimetry: {}", self.color);
        self.state = ProcessorState::MediaTypeNegotiated;

        self.initialize()
    }

    /// Tear down and rebuild the stream, keeping its media type and metadata
    ///
    /// Used when the output changes (HDR toggle, swap chain depth) or a
    /// setting needs new resources.
    pub fn renegotiate(&mut self) -> Result<ReconfigureSignals> {
        if self.state == ProcessorState::Error {
            return Err(Error::InvalidState(
                "processor is in the error state; reset the device first".into(),
            ));
        }
        if self.geometry.is_none() {
            return Ok(ReconfigureSignals::default());
        }
        tracing::info!("Renegotiating stream");
        self.teardown();
        self.state = ProcessorState::MediaTypeNegotiated;
        self.initialize()
    }

    /// Output changes raised by frames since the last call
    ///
    /// Metadata can change the output mode mid-stream (Dolby Vision showing
    /// up on SDR-signalled content). The host polls this after
    /// [`FrameProcessor::process_frame`] and recreates what it names.
    pub fn take_reconfigure(&mut self) -> ReconfigureSignals {
        std::mem::take(&mut self.pending_signals)
    }

    /// Process one frame: metadata, scaling, upload and every render pass
    pub fn process_frame(&mut self, sample: &FrameSample) -> Result<()> {
        if self.state != ProcessorState::Ready {
            return Err(Error::InvalidState(format!(
                "cannot process a frame in state {:?}",
                self.state
            )));
        }

        let changes = self.metadata.apply_all(&sample.side_data);
        if changes.any() {
            self.stats.metadata_updates += 1;
        }
        let result = self.apply_metadata_changes(&changes);
        let result = self.check(result);
        result?;

        let result = self.render(sample);
        self.check(result)
    }

    /// Replace the device after a device loss
    ///
    /// Handles of the old device are dropped without being released. Post
    /// shaders are compiled again and the stream, if any, renegotiated. This
    /// is the way out of the `Error` state.
    pub fn reset_device(&mut self, device: D) -> Result<ReconfigureSignals> {
        tracing::info!("Resetting device");
        self.strategy = None;
        self.buffers.clear();
        self.sequencer.reset();
        self.scaling = None;
        self.programs.forget();
        self.device = device;
        self.post_shaders.recompile(&mut self.device);

        if self.geometry.is_none() {
            self.state = ProcessorState::Uninitialized;
            return Ok(ReconfigureSignals::default());
        }
        self.state = ProcessorState::MediaTypeNegotiated;
        self.initialize()
    }

    /// Pick up settings edited through a shared handle
    pub fn sync_settings(&mut self, handle: &SettingsHandle) -> Result<ReconfigureSignals> {
        if self.settings_generation == Some(handle.generation()) {
            return Ok(ReconfigureSignals::default());
        }
        let (generation, settings) = handle.snapshot();
        self.settings_generation = Some(generation);
        if settings == self.settings {
            return Ok(ReconfigureSignals::default());
        }
        self.set_settings(settings)
    }

    /// Apply new settings, rebuilding only what they affect
    pub fn set_settings(&mut self, settings: RendererSettings) -> Result<ReconfigureSignals> {
        let old = std::mem::replace(&mut self.settings, settings);
        let new = &self.settings;

        let renegotiate = old.prefer_video_processor != new.prefer_video_processor
            || old.vp_scaling != new.vp_scaling
            || old.texture_format != new.texture_format
            || old.swap_chain_bits != new.swap_chain_bits
            || old.deinterlace != new.deinterlace
            || old.hdr_passthrough != new.hdr_passthrough
            || old.vendor_policy != new.vendor_policy;
        let color = old.procamp != new.procamp
            || old.output_range != new.output_range
            || old.chroma_upsampling != new.chroma_upsampling
            || old.convert_to_sdr != new.convert_to_sdr
            || old.tone_mapping != new.tone_mapping
            || old.sdr_display_nits != new.sdr_display_nits;
        let pipeline = old.upscaler != new.upscaler
            || old.downscaler != new.downscaler
            || old.interpolate_at_50pct != new.interpolate_at_50pct
            || old.dither != new.dither
            || old.stereo_transform != new.stereo_transform;

        if self.state != ProcessorState::Ready {
            return Ok(ReconfigureSignals::default());
        }
        if renegotiate {
            tracing::debug!("Settings change requires renegotiation");
            return self.renegotiate();
        }
        if color {
            let result = self.rebuild_color();
            self.check(result)?;
        }
        if color || pipeline {
            self.scaling_dirty = true;
            let result = self.refresh_pipeline();
            self.check(result)?;
        }
        Ok(ReconfigureSignals::default())
    }

    /// Compile and append a post-scale shader
    ///
    /// A compile failure leaves the pipeline as it was.
    pub fn add_post_shader(&mut self, name: &str, source: &str) -> Result<usize> {
        let index = self.post_shaders.add(&mut self.device, name, source)?;
        self.pipeline_membership_changed()?;
        Ok(index)
    }

    pub fn clear_post_shaders(&mut self) -> Result<()> {
        if self.post_shaders.is_empty() {
            return Ok(());
        }
        self.post_shaders.clear(&mut self.device);
        self.pipeline_membership_changed()
    }

    /// Size of the presentation target
    pub fn set_window_size(&mut self, size: Resolution) {
        if self.window != Some(size) {
            self.window = Some(size);
            self.scaling_dirty = true;
        }
    }

    /// Area of the presentation target the video covers; `None` fills the window
    pub fn set_video_rect(&mut self, rect: Option<Rect>) {
        if self.video_rect != rect {
            self.video_rect = rect;
            self.scaling_dirty = true;
        }
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        if self.rotation != rotation {
            self.rotation = rotation;
            self.scaling_dirty = true;
        }
    }

    pub fn set_flip(&mut self, horizontal: bool, vertical: bool) {
        if (self.flip_h, self.flip_v) != (horizontal, vertical) {
            self.flip_h = horizontal;
            self.flip_v = vertical;
            self.scaling_dirty = true;
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    pub fn strategy_kind(&self) -> Option<StrategyKind> {
        self.strategy.as_ref().map(RenderStrategy::kind)
    }

    pub fn media_type(&self) -> Option<&MediaType> {
        self.media_type.as_ref()
    }

    pub fn geometry(&self) -> Option<&VideoGeometry> {
        self.geometry.as_ref()
    }

    /// Resolved colorimetry of the stream
    pub fn color_info(&self) -> &ExtendedColorInfo {
        &self.color
    }

    pub fn color_transform(&self) -> &ColorTransform {
        &self.transform
    }

    pub fn correction_plan(&self) -> &CorrectionPlan {
        &self.plan
    }

    pub fn scaling_decision(&self) -> Option<&ScalingDecision> {
        self.scaling.as_ref()
    }

    pub fn stage_list(&self) -> &PipelineStageList {
        self.sequencer.stages()
    }

    pub fn post_scale_steps(&self) -> usize {
        self.sequencer.post_scale_steps()
    }

    pub fn post_shader_count(&self) -> usize {
        self.post_shaders.len()
    }

    pub fn metadata(&self) -> &DynamicMetadata {
        &self.metadata
    }

    /// HDR is sent to the display as PQ
    pub fn output_hdr(&self) -> bool {
        self.output_hdr
    }

    pub fn swap_chain_bits(&self) -> u8 {
        self.swap_chain_bits
    }

    /// Format of the intermediate buffers
    pub fn internal_format(&self) -> SurfaceFormat {
        self.internal_format
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn frames_processed(&self) -> u64 {
        self.stats.frames_processed
    }

    fn initialize(&mut self) -> Result<ReconfigureSignals> {
        let result = self.try_initialize();
        match result {
            Ok(signals) => {
                self.state = ProcessorState::Ready;
                tracing::info!(
                    "Stream ready: {} path, {} stages, {} post-scale steps",
                    self.strategy_kind().map_or("no".to_string(), |k| k.to_string()),
                    self.sequencer.stages().len(),
                    self.sequencer.post_scale_steps()
                );
                Ok(signals)
            }
            Err(e) => {
                if e.is_fatal() {
                    self.enter_error(&e);
                } else {
                    tracing::warn!("Stream initialization failed: {}", e);
                    self.teardown();
                }
                Err(e)
            }
        }
    }

    fn try_initialize(&mut self) -> Result<ReconfigureSignals> {
        let geometry = self
            .geometry
            .ok_or_else(|| Error::InvalidState("no media type negotiated".into()))?;
        let desc = geometry.descriptor();

        let (output_hdr, swap_chain_bits) = self.output_mode();
        let signals = ReconfigureSignals {
            device: output_hdr != self.output_hdr,
            swap_chain: output_hdr != self.output_hdr || swap_chain_bits != self.swap_chain_bits,
        };
        if signals.any() {
            tracing::info!(
                "Output changes to {}-bit {}",
                swap_chain_bits,
                if output_hdr { "HDR" } else { "SDR" }
            );
        }
        self.output_hdr = output_hdr;
        self.swap_chain_bits = swap_chain_bits;
        self.internal_format = self.surface_format(desc.bit_depth);

        let src = self.source_rect();
        let dst = self.destination_rect();
        let decision = self.settings.scaling_policy().decide(src, dst, self.rotation);
        let vp_output = if self.settings.vp_scaling || !decision.is_resize() {
            dst.size()
        } else {
            src.size()
        };

        let kind = self.choose_strategy(&geometry);
        let params = NegotiateParams {
            geometry: &geometry,
            color: &self.color,
            output_format: self.internal_format,
            output_size: vp_output,
            full_range_output: self.settings.output_range.nominal() == NominalRange::Full,
            deinterlace: self.settings.deinterlace,
        };
        let strategy = match RenderStrategy::negotiate(kind, &mut self.device, &params) {
            Err(Error::IncompatibleColorspace(reason)) if kind == StrategyKind::VideoProcessor => {
                tracing::warn!(
                    "Video processor rejected {}: {}; falling back to the shader path",
                    self.color,
                    reason
                );
                self.force_shader = true;
                RenderStrategy::negotiate(StrategyKind::Shader, &mut self.device, &params)?
            }
            other => other?,
        };
        self.strategy = Some(strategy);

        self.rebuild_color()?;
        self.scaling_dirty = true;
        self.refresh_pipeline()?;
        Ok(signals)
    }

    fn hdr_content(&self) -> bool {
        self.color.is_hdr() || self.metadata.dovi.is_some()
    }

    /// HDR output flag and swap chain depth for the current stream
    fn output_mode(&self) -> (bool, u8) {
        let output_hdr = self.settings.hdr_passthrough
            && self.device.supports_hdr_output()
            && self.hdr_content();
        let bits = match self.settings.swap_chain_bits {
            SwapChainBits::Eight => 8,
            SwapChainBits::Ten => 10,
            SwapChainBits::Auto if output_hdr => 10,
            SwapChainBits::Auto => 8,
        };
        (output_hdr, bits)
    }

    fn surface_format(&self, source_bits: u8) -> SurfaceFormat {
        self.settings
            .texture_format
            .surface(source_bits, self.hdr_content())
    }

    fn choose_strategy(&self, geometry: &VideoGeometry) -> StrategyKind {
        let desc = geometry.descriptor();
        if !self.settings.prefer_video_processor || self.force_shader {
            return StrategyKind::Shader;
        }
        let Some(vp_format) = desc.vp_format else {
            tracing::debug!("{} has no video processor surface", desc.name);
            return StrategyKind::Shader;
        };
        if !self.device.supports_vp_input(vp_format) {
            tracing::debug!("Video processor does not take {:?}", vp_format);
            return StrategyKind::Shader;
        }
        if self.color.matrix == TransferMatrix::YCgCo {
            tracing::info!("YCgCo matrix, using the shader path");
            return StrategyKind::Shader;
        }
        if self.metadata.dovi.is_some() {
            tracing::info!("Dolby Vision stream, using the shader path");
            return StrategyKind::Shader;
        }
        if let Some(rule) =
            self.settings
                .vendor_policy
                .disqualifying_rule(self.device.vendor(), desc, geometry.width)
        {
            tracing::info!("Vendor workaround, using the shader path: {}", rule.reason);
            return StrategyKind::Shader;
        }
        StrategyKind::VideoProcessor
    }

    fn is_shader_path(&self) -> bool {
        self.strategy_kind() == Some(StrategyKind::Shader)
    }

    fn correction_input(&self) -> CorrectionInput {
        let dovi = self
            .metadata
            .dovi
            .as_ref()
            .filter(|_| self.is_shader_path())
            .map(|d| DoviCorrection {
                reshape: !d.has_identity_reshaping(),
                lms_to_rgb: Mat3::from_row_major(&d.color.rgb_to_lms)
                    .inverse()
                    .unwrap_or(Mat3::IDENTITY),
            });
        CorrectionInput {
            color: self.color,
            dovi,
            hdr_passthrough: self.output_hdr,
            convert_to_sdr: self.settings.convert_to_sdr,
            tone_mapping: self.settings.tone_mapping,
            source_peak: self.source_peak(),
            target_peak: self.settings.sdr_display_nits,
        }
    }

    /// Content peak in nits used by tone mapping
    fn source_peak(&self) -> f32 {
        if let Some(dovi) = self.metadata.dovi.as_ref().filter(|_| self.is_shader_path()) {
            if dovi.color.source_max_pq > 0 {
                return transfer::pq_to_linear(dovi.color.source_max_pq as f32 / 4095.0);
            }
        }
        if let Some(nits) = self.metadata.content_peak_nits() {
            return nits as f32;
        }
        if self.color.transfer == TransferFunction::Hlg {
            HLG_PEAK_NITS
        } else {
            DEFAULT_CONTENT_PEAK_NITS
        }
    }

    fn build_transform(&self) -> ColorTransform {
        let desc = match &self.geometry {
            Some(g) => g.descriptor(),
            None => return ColorTransform::identity(),
        };
        let dovi = self
            .metadata
            .dovi
            .as_ref()
            .filter(|_| self.is_shader_path())
            .map(|d| &d.color);
        ColorMatrixBuilder::new(self.settings.output_range.nominal()).build(
            desc,
            &self.color,
            &self.settings.procamp,
            dovi,
        )
    }

    /// Rebuild matrix, correction plan and conversion program
    fn rebuild_color(&mut self) -> Result<()> {
        let geometry = self
            .geometry
            .ok_or_else(|| Error::InvalidState("no media type negotiated".into()))?;
        self.transform = self.build_transform();
        self.plan = CorrectionPlan::derive(&self.correction_input());
        self.stats.matrix_rebuilds += 1;

        let chroma = self.settings.chroma_upsampling;
        if let Some(strategy) = self.strategy.as_mut() {
            strategy
                .build_color_stage(
                    &mut self.device,
                    &mut self.programs,
                    geometry.descriptor(),
                    chroma,
                    &self.transform,
                    &self.plan,
                )
                .map_err(builtin_failure)?;
        }
        self.upload_plan_constants()?;
        self.upload_curves()
    }

    /// Rebuild only the matrix and its constants
    fn rebuild_matrix(&mut self) -> Result<()> {
        self.transform = self.build_transform();
        self.stats.matrix_rebuilds += 1;
        tracing::trace!("Color matrix rebuilt");
        if self.is_shader_path() {
            self.device
                .upload_constants(slots::COLOR, &self.transform.constant_bytes())?;
        }
        Ok(())
    }

    /// Re-derive the correction plan after a peak or Dolby Vision change
    fn rebuild_plan(&mut self) -> Result<()> {
        let plan = CorrectionPlan::derive(&self.correction_input());
        if plan == self.plan {
            return Ok(());
        }
        let program_changed = plan.program_key() != self.plan.program_key();
        self.plan = plan;
        if program_changed {
            if let (Some(strategy), Some(geometry)) = (self.strategy.as_mut(), self.geometry) {
                strategy
                    .build_color_stage(
                        &mut self.device,
                        &mut self.programs,
                        geometry.descriptor(),
                        self.settings.chroma_upsampling,
                        &self.transform,
                        &self.plan,
                    )
                    .map_err(builtin_failure)?;
            }
            // membership only changes when the plan becomes empty or not
            self.refresh_pipeline()?;
        }
        self.upload_plan_constants()
    }

    fn upload_plan_constants(&mut self) -> Result<()> {
        if let Some(constants) = self.plan.tonemap_constants() {
            self.device
                .upload_constants(slots::TONEMAP, bytemuck::bytes_of(&constants))?;
        }
        Ok(())
    }

    fn upload_curves(&mut self) -> Result<()> {
        if !self.plan.has_reshape() {
            return Ok(());
        }
        if let Some(dovi) = &self.metadata.dovi {
            let curves = dovi.curve_buffer();
            self.device
                .upload_constants(slots::DOVI_CURVES, bytemuck::cast_slice(&curves))?;
            self.stats.curve_uploads += 1;
        }
        Ok(())
    }

    fn apply_metadata_changes(&mut self, changes: &MetadataChanges) -> Result<()> {
        if !changes.any() {
            return Ok(());
        }
        if changes.dovi_started && self.dovi_needs_reinit() {
            if self.strategy_kind() == Some(StrategyKind::VideoProcessor) {
                tracing::info!("Dolby Vision metadata received, switching to the shader path");
                self.dovi_switched = true;
                self.force_shader = true;
            } else {
                tracing::info!("Dolby Vision metadata received, reconfiguring the output");
            }
            self.teardown();
            self.state = ProcessorState::MediaTypeNegotiated;
            let signals = self.initialize()?;
            self.pending_signals.merge(signals);
            return Ok(());
        }

        let shader_dovi = self.is_shader_path() && self.metadata.dovi.is_some();
        if shader_dovi && changes.dovi.affects_matrix() {
            self.rebuild_matrix()?;
        }
        let peaks = changes.hdr10 || changes.light_level;
        if peaks || (shader_dovi && changes.dovi.affects_curves()) {
            self.rebuild_plan()?;
        }
        if shader_dovi && changes.dovi.curves {
            self.upload_curves()?;
        }
        Ok(())
    }

    /// Whether Dolby Vision showing up invalidates the negotiated stream
    fn dovi_needs_reinit(&self) -> bool {
        let on_vp = self.strategy_kind() == Some(StrategyKind::VideoProcessor);
        if on_vp && !self.dovi_switched {
            return true;
        }
        let surface = self
            .geometry
            .map(|g| self.surface_format(g.descriptor().bit_depth));
        self.output_mode() != (self.output_hdr, self.swap_chain_bits)
            || surface.is_some_and(|f| f != self.internal_format)
    }

    fn pipeline_membership_changed(&mut self) -> Result<()> {
        self.scaling_dirty = true;
        if self.state != ProcessorState::Ready {
            return Ok(());
        }
        let result = self.refresh_pipeline();
        self.check(result)
    }

    fn source_rect(&self) -> Rect {
        self.geometry
            .map(|g| g.source_rect)
            .unwrap_or_default()
    }

    fn destination_rect(&self) -> Rect {
        if let Some(rect) = self.video_rect {
            return rect;
        }
        let window = self
            .window
            .unwrap_or_else(|| self.source_rect().size());
        Rect::from_size(window)
    }

    fn stage_request(&self, decision: &ScalingDecision) -> StageRequest {
        let front = match &self.strategy {
            Some(strategy) => strategy.front_stage(
                self.transform.enabled || !self.plan.is_empty(),
                self.settings.vp_scaling,
            ),
            None => FrontStage::None,
        };
        let correction = self
            .strategy
            .as_ref()
            .is_some_and(|s| s.needs_correction_stage(&self.plan));
        let dither = self.settings.dither
            && self.swap_chain_bits == 8
            && self.internal_format.component_bits() > 8;
        StageRequest::new(front)
            .with_scaling(decision.passes)
            .with_correction(correction)
            .with_post_shaders(self.post_shaders.len())
            .with_interlace_pack(
                self.settings.stereo_transform == StereoTransform::HalfOverUnderToInterlace,
            )
            .with_dither(dither)
    }

    /// Recompute the scaling decision and the stage list when dirty
    fn refresh_pipeline(&mut self) -> Result<()> {
        let src = self.source_rect();
        let dst = self.destination_rect();
        let decision = self.settings.scaling_policy().decide(src, dst, self.rotation);
        if self.scaling.as_ref() != Some(&decision) {
            tracing::debug!(
                "Scaling {} -> {} ({:?}): {:?}",
                decision.source,
                decision.destination,
                decision.rotation,
                decision.passes
            );
        }
        self.scaling = Some(decision);

        let request = self.stage_request(&decision);
        let extents = StageExtents {
            source: src.size(),
            destination: dst.size(),
        };
        if self.sequencer.update(request, extents) {
            self.stats.pipeline_rebuilds += 1;
            self.allocate_buffers()?;
        }

        // compile every stage program now so failures surface here
        let kinds: Vec<StageKind> = self.sequencer.stages().stages.iter().map(|s| s.kind).collect();
        for kind in kinds {
            self.stage_shader(kind)?;
        }
        self.scaling_dirty = false;
        Ok(())
    }

    /// Match the buffer pool to the stage list, reusing textures of equal size
    fn allocate_buffers(&mut self) -> Result<()> {
        let wanted: Vec<Resolution> = self
            .sequencer
            .stages()
            .buffers
            .iter()
            .map(|b| b.size)
            .collect();
        let mut old = std::mem::take(&mut self.buffers);
        let mut pool = Vec::with_capacity(wanted.len());

        for size in wanted {
            if let Some(pos) = old.iter().position(|b| b.size == size) {
                pool.push(old.swap_remove(pos));
                continue;
            }
            match self
                .device
                .create_texture(&TextureDesc::target(size, self.internal_format))
            {
                Ok(texture) => {
                    tracing::debug!("Allocated {} {:?} buffer", size, self.internal_format);
                    pool.push(PooledBuffer { size, texture });
                }
                Err(e) => {
                    for buffer in pool.into_iter().chain(old) {
                        self.device.release_texture(buffer.texture);
                    }
                    self.sequencer.reset();
                    return Err(e);
                }
            }
        }
        for buffer in old {
            self.device.release_texture(buffer.texture);
        }
        self.buffers = pool;
        Ok(())
    }

    fn stage_shader(&mut self, kind: StageKind) -> Result<Option<ShaderHandle>> {
        let builtin = match kind {
            StageKind::VideoProcessor { .. } => return Ok(None),
            StageKind::ColorConversion => {
                return self
                    .strategy
                    .as_ref()
                    .and_then(RenderStrategy::conversion_shader)
                    .map(Some)
                    .ok_or_else(|| Error::InvalidState("conversion program missing".into()));
            }
            StageKind::PostShader(index) => {
                return self
                    .post_shaders
                    .get(index)
                    .map(|s| Some(s.handle))
                    .ok_or_else(|| Error::InvalidState(format!("post shader {} missing", index)));
            }
            StageKind::Correction => {
                let plan = &self.plan;
                return self
                    .programs
                    .get_or_compile(&mut self.device, &plan.program_key(), "correction", || {
                        plan.to_hlsl()
                    })
                    .map(Some)
                    .map_err(builtin_failure);
            }
            StageKind::Copy => BuiltinShader::Copy,
            StageKind::Resize { axis, kernel } => BuiltinShader::Resize { axis, kernel },
            StageKind::InterlacePack => BuiltinShader::InterlacePack,
            StageKind::Dither => BuiltinShader::Dither,
        };
        self.programs
            .get_or_compile(&mut self.device, &builtin.program_key(), &builtin.name(), || {
                builtin.to_hlsl()
            })
            .map(Some)
            .map_err(builtin_failure)
    }

    fn render(&mut self, sample: &FrameSample) -> Result<()> {
        if self.scaling_dirty {
            self.refresh_pipeline()?;
        }
        let geometry = self
            .geometry
            .ok_or_else(|| Error::InvalidState("no media type negotiated".into()))?;
        let strategy = self
            .strategy
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no render strategy".into()))?;
        strategy.upload(&mut self.device, &sample.data, geometry.pitch)?;
        self.execute(&geometry)?;
        self.stats.frames_processed += 1;
        tracing::trace!("Frame {} rendered", self.stats.frames_processed);
        Ok(())
    }

    /// Issue every pass of the stage list
    ///
    /// Rotation and flips are applied by the first resize pass, or by the
    /// first pass when nothing resizes.
    fn execute(&mut self, geometry: &VideoGeometry) -> Result<()> {
        let list = self.sequencer.stages().clone();
        let src = self.source_rect();
        let dst = self.destination_rect();
        let geometry_stage = list.stages.iter().position(|s| s.kind.is_resize()).unwrap_or(0);
        let frame_inputs = self
            .strategy
            .as_ref()
            .map(RenderStrategy::inputs)
            .unwrap_or_default();
        let chroma_period = geometry.descriptor().subsampling.chroma_period();

        for (i, stage) in list.stages.iter().enumerate() {
            let (target, viewport) = match stage.output {
                StageOutput::Target => (RenderTarget::Output, dst),
                StageOutput::Buffer(b) => (
                    RenderTarget::Texture(self.buffer(b)?),
                    Rect::from_size(stage.size),
                ),
            };
            let (inputs, region, texture_size) = match list.input_of(i) {
                Some(b) => {
                    let previous = list.stages[i - 1].size;
                    (vec![self.buffer(b)?], Rect::from_size(previous), previous)
                }
                None => (frame_inputs.clone(), src, geometry.size()),
            };
            let (rotation, flip_h, flip_v) = if i == geometry_stage {
                (self.rotation, self.flip_h, self.flip_v)
            } else {
                (Rotation::R0, false, false)
            };

            if let StageKind::VideoProcessor { .. } = stage.kind {
                let blt = VideoProcessorBlt {
                    input: inputs.first().copied().ok_or_else(|| {
                        Error::InvalidState("video processor input missing".into())
                    })?,
                    target,
                    source: region,
                    destination: viewport,
                    rotation,
                    field: 0,
                };
                if let Some(strategy) = &self.strategy {
                    strategy.process(&mut self.device, &blt)?;
                }
                continue;
            }

            let shader = self
                .stage_shader(stage.kind)?
                .ok_or_else(|| Error::InvalidState(format!("no program for {:?}", stage.kind)))?;
            let period = if stage.kind == StageKind::ColorConversion {
                chroma_period
            } else {
                (1, 1)
            };
            let constants = GeometryConstants::new(
                (texture_size.width, texture_size.height),
                (viewport.width(), viewport.height()),
                period,
            );
            self.device
                .upload_constants(slots::GEOMETRY, bytemuck::bytes_of(&constants))?;
            self.device.draw(&DrawCall {
                shader,
                inputs,
                target,
                viewport,
                texcoords: quad_texcoords(region, texture_size, rotation, flip_h, flip_v),
            })?;
        }
        Ok(())
    }

    fn buffer(&self, index: usize) -> Result<TextureHandle> {
        self.buffers
            .get(index)
            .map(|b| b.texture)
            .ok_or_else(|| Error::InvalidState(format!("intermediate buffer {} missing", index)))
    }

    /// Release stream resources; compiled programs stay cached
    fn teardown(&mut self) {
        if let Some(mut strategy) = self.strategy.take() {
            strategy.release(&mut self.device);
        }
        for buffer in self.buffers.drain(..) {
            self.device.release_texture(buffer.texture);
        }
        self.sequencer.reset();
        self.scaling = None;
        self.scaling_dirty = true;
    }

    fn enter_error(&mut self, e: &Error) {
        tracing::error!("Renderer failed: {}", e);
        self.teardown();
        self.state = ProcessorState::Error;
    }

    /// Move to `Error` on fatal failures
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() && self.state != ProcessorState::Error {
                self.enter_error(e);
            }
        }
        result
    }
}

impl<D: GpuDevice> std::fmt::Debug for FrameProcessor<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProcessor")
            .field("state", &self.state)
            .field("strategy", &self.strategy_kind())
            .field("color", &self.color)
            .field("stages", &self.sequencer.stages().len())
            .field("output_hdr", &self.output_hdr)
            .field("frames", &self.stats.frames_processed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::classify::{fourcc, Guid};
    use crate::format::{BitmapInfoHeader, VideoInfoHeader2};
    use crate::hdr::{DoviMetadata, Hdr10Metadata, SideDataTag};
    use crate::processing::ColorPrimaries;

    fn nv12(width: i32, height: i32) -> MediaType {
        let code = fourcc(b'N', b'V', b'1', b'2');
        MediaType::video_info2(
            Guid::from_fourcc(code),
            VideoInfoHeader2 {
                bmi: BitmapInfoHeader {
                    width,
                    height,
                    bit_count: 12,
                    compression: code,
                    size_image: (width * height * 3 / 2) as u32,
                },
                ..Default::default()
            },
        )
    }

    fn processor() -> FrameProcessor<RecordingDevice> {
        FrameProcessor::new(RecordingDevice::new(GpuVendor::Intel), RendererSettings::default())
    }

    #[test]
    fn test_configure_reaches_ready() {
        let mut p = processor();
        assert_eq!(p.state(), ProcessorState::Uninitialized);
        let signals = p.configure(nv12(1280, 720)).unwrap();
        assert!(!signals.any());
        assert_eq!(p.state(), ProcessorState::Ready);
        assert_eq!(p.strategy_kind(), Some(StrategyKind::VideoProcessor));
        assert_eq!(p.color_info().matrix, TransferMatrix::Bt709);
    }

    #[test]
    fn test_rejected_media_type_keeps_state() {
        let mut p = processor();
        let mut bad = nv12(1280, 720);
        bad.subtype = Guid::from_fourcc(fourcc(b'X', b'X', b'X', b'X'));
        if let crate::format::FormatBlock::VideoInfo2(ref mut h) = bad.format {
            h.bmi.compression = fourcc(b'X', b'X', b'X', b'X');
        }
        let err = p.configure(bad).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
        assert_eq!(p.state(), ProcessorState::Uninitialized);
    }

    #[test]
    fn test_process_requires_ready() {
        let mut p = processor();
        let err = p.process_frame(&FrameSample::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_window_change_rebuilds_scaling_only() {
        let mut p = processor();
        p.configure(nv12(1920, 1080)).unwrap();
        let rebuilds = p.stats().pipeline_rebuilds;
        p.process_frame(&FrameSample::new(vec![0u8; 16])).unwrap();
        assert_eq!(p.stats().pipeline_rebuilds, rebuilds);

        p.set_window_size(Resolution::UHD_4K);
        p.process_frame(&FrameSample::new(vec![0u8; 16])).unwrap();
        assert_eq!(p.stats().pipeline_rebuilds, rebuilds + 1);
        assert!(p.scaling_decision().unwrap().is_resize());
    }

    #[test]
    fn test_hdr10_metadata_updates_peak_without_rebuild() {
        let mut p = FrameProcessor::new(
            RecordingDevice::new(GpuVendor::Intel),
            RendererSettings::default().with_video_processor(false),
        );
        let mut mt = nv12(1920, 1080);
        if let crate::format::FormatBlock::VideoInfo2(ref mut h) = mt.format {
            h.control_flags = 0x80 | (2 << 12) | (4 << 15) | (9 << 22) | (16 << 27);
        }
        p.configure(mt).unwrap();
        assert_eq!(p.color_info().primaries, ColorPrimaries::Bt2020);
        let rebuilds = p.stats().pipeline_rebuilds;

        let sample = FrameSample::new(vec![0u8; 16]).with_side_data(SideData::new(
            SideDataTag::Hdr10,
            Hdr10Metadata::with_max_luminance(4000.0).to_bytes(),
        ));
        p.process_frame(&sample).unwrap();
        let tm = p.correction_plan().tonemap_constants().unwrap();
        assert_eq!(tm.source_peak, 4000.0);
        assert_eq!(p.stats().pipeline_rebuilds, rebuilds);
    }

    #[test]
    fn test_dovi_switches_to_shader_once() {
        let mut p = processor();
        p.configure(nv12(1920, 1080)).unwrap();
        assert_eq!(p.strategy_kind(), Some(StrategyKind::VideoProcessor));

        let block = SideData::new(SideDataTag::DolbyVision, DoviMetadata::identity(10).to_bytes());
        let sample = FrameSample::new(vec![0u8; 16]).with_side_data(block);
        p.process_frame(&sample).unwrap();
        assert_eq!(p.strategy_kind(), Some(StrategyKind::Shader));
        assert!(p.color_transform().enabled);
        // SDR display: the output mode stays put
        assert!(!p.take_reconfigure().any());

        p.process_frame(&sample).unwrap();
        assert_eq!(p.strategy_kind(), Some(StrategyKind::Shader));
        assert_eq!(p.frames_processed(), 2);
    }

    #[test]
    fn test_dovi_on_hdr_display_raises_swap_chain() {
        let device = RecordingDevice::new(GpuVendor::Intel).with_hdr_output(true);
        let mut p = FrameProcessor::new(device, RendererSettings::default());
        let signals = p.configure(nv12(1920, 1080)).unwrap();
        assert!(!signals.any());
        assert!(!p.output_hdr());
        assert_eq!(p.swap_chain_bits(), 8);

        let block = SideData::new(SideDataTag::DolbyVision, DoviMetadata::identity(10).to_bytes());
        p.process_frame(&FrameSample::new(vec![0u8; 16]).with_side_data(block))
            .unwrap();

        let signals = p.take_reconfigure();
        assert!(signals.device);
        assert!(signals.swap_chain);
        assert!(p.output_hdr());
        assert_eq!(p.swap_chain_bits(), 10);
        assert_eq!(p.strategy_kind(), Some(StrategyKind::Shader));
        assert_eq!(p.take_reconfigure(), ReconfigureSignals::default());
    }

    #[test]
    fn test_dovi_on_shader_path_reconfigures_output() {
        let device = RecordingDevice::new(GpuVendor::Intel).with_hdr_output(true);
        let settings = RendererSettings::default().with_video_processor(false);
        let mut p = FrameProcessor::new(device, settings);
        p.configure(nv12(1920, 1080)).unwrap();
        assert_eq!(p.internal_format(), SurfaceFormat::Bgra8);

        let block = SideData::new(SideDataTag::DolbyVision, DoviMetadata::identity(10).to_bytes());
        let sample = FrameSample::new(vec![0u8; 16]).with_side_data(block);
        p.process_frame(&sample).unwrap();
        assert!(p.take_reconfigure().swap_chain);
        assert_eq!(p.internal_format(), SurfaceFormat::Rgba16f);
        assert_eq!(p.state(), ProcessorState::Ready);

        // the same block again is not a new stream
        p.process_frame(&sample).unwrap();
        assert!(!p.take_reconfigure().any());
    }

    #[test]
    fn test_signals_merge() {
        let mut signals = ReconfigureSignals {
            device: true,
            swap_chain: false,
        };
        signals.merge(ReconfigureSignals {
            device: false,
            swap_chain: true,
        });
        assert!(signals.device && signals.swap_chain);
    }

    #[test]
    fn test_settings_sync() {
        let mut p = processor();
        p.configure(nv12(1920, 1080)).unwrap();
        let handle = SettingsHandle::new(p.settings().clone());
        p.sync_settings(&handle).unwrap();

        handle.update(|s| s.stereo_transform = StereoTransform::HalfOverUnderToInterlace);
        p.sync_settings(&handle).unwrap();
        assert!(p.stage_list().contains(StageKind::InterlacePack));
        assert_eq!(p.post_scale_steps(), 1);

        handle.update(|s| s.prefer_video_processor = false);
        p.sync_settings(&handle).unwrap();
        assert_eq!(p.strategy_kind(), Some(StrategyKind::Shader));
    }

    #[test]
    fn test_teardown_releases_everything() {
        let mut p = processor();
        p.set_window_size(Resolution::UHD_4K);
        p.configure(nv12(1920, 1080)).unwrap();
        assert!(p.device().live_textures() > 0);
        p.configure(nv12(1280, 720)).unwrap();
        // input texture plus the buffers of the new stream only
        let expected = 1 + p.stage_list().buffers.len();
        assert_eq!(p.device().live_textures(), expected);
    }
}
