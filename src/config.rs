//! Configuration types for GhostRender
//!
//! Settings are read from TOML and never written back. A UI thread edits them
//! through a [`SettingsHandle`]; the frame thread takes one snapshot per frame.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::format::SurfaceFormat;
use crate::processing::{
    ChromaUpsampling, Downscaler, NominalRange, ProcAmp, ScalingPolicy, ToneMapping, Upscaler,
};
use crate::processing::transfer::SDR_WHITE_NITS;
use crate::render::vendor::VendorPolicy;

/// Format of the intermediate render targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TextureFormat {
    /// Follow the source: 8-bit stays 8-bit, 10-bit gets 10-bit, HDR and deeper get float
    #[default]
    Auto,
    Unorm8,
    Unorm10,
    Float16,
}

impl TextureFormat {
    /// Surface format for a source of `source_bits` depth
    pub fn surface(&self, source_bits: u8, hdr: bool) -> SurfaceFormat {
        match self {
            TextureFormat::Unorm8 => SurfaceFormat::Bgra8,
            TextureFormat::Unorm10 => SurfaceFormat::Rgb10a2,
            TextureFormat::Float16 => SurfaceFormat::Rgba16f,
            TextureFormat::Auto if hdr || source_bits > 10 => SurfaceFormat::Rgba16f,
            TextureFormat::Auto if source_bits > 8 => SurfaceFormat::Rgb10a2,
            TextureFormat::Auto => SurfaceFormat::Bgra8,
        }
    }
}

/// Output levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OutputRange {
    /// 0-255
    #[default]
    Pc,
    /// 16-235
    Tv,
}

impl OutputRange {
    pub fn nominal(&self) -> NominalRange {
        match self {
            OutputRange::Pc => NominalRange::Full,
            OutputRange::Tv => NominalRange::Limited,
        }
    }
}

/// Stereo transform applied after scaling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StereoTransform {
    #[default]
    None,
    /// Half-over-under frames to row-interleaved output
    HalfOverUnderToInterlace,
}

/// Swap chain bit depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SwapChainBits {
    /// 10-bit for HDR output or deep internal formats, 8-bit otherwise
    #[default]
    Auto,
    Eight,
    Ten,
}

/// Renderer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Use the hardware video processor when it can take the stream
    pub prefer_video_processor: bool,
    /// Let the video processor scale too
    pub vp_scaling: bool,
    pub upscaler: Upscaler,
    pub downscaler: Downscaler,
    /// Keep upscaling kernels down to 50% before switching to the downscaler
    pub interpolate_at_50pct: bool,
    pub chroma_upsampling: ChromaUpsampling,
    pub texture_format: TextureFormat,
    pub output_range: OutputRange,
    /// Tone-map HDR to SDR when the display is SDR
    pub convert_to_sdr: bool,
    /// Send HDR to HDR-capable displays untouched
    pub hdr_passthrough: bool,
    pub tone_mapping: ToneMapping,
    /// Peak of the SDR display in nits
    pub sdr_display_nits: f32,
    /// Dither when the swap chain is shallower than the internal format
    pub dither: bool,
    pub stereo_transform: StereoTransform,
    /// Deinterlace in the video processor
    pub deinterlace: bool,
    pub swap_chain_bits: SwapChainBits,
    pub procamp: ProcAmp,
    pub vendor_policy: VendorPolicy,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            prefer_video_processor: true,
            vp_scaling: false,
            upscaler: Upscaler::CatmullRom,
            downscaler: Downscaler::Bicubic,
            interpolate_at_50pct: true,
            chroma_upsampling: ChromaUpsampling::Bilinear,
            texture_format: TextureFormat::Auto,
            output_range: OutputRange::Pc,
            convert_to_sdr: true,
            hdr_passthrough: true,
            tone_mapping: ToneMapping::Bt2390,
            sdr_display_nits: SDR_WHITE_NITS,
            dither: true,
            stereo_transform: StereoTransform::None,
            deinterlace: true,
            swap_chain_bits: SwapChainBits::Auto,
            procamp: ProcAmp::default(),
            vendor_policy: VendorPolicy::default(),
        }
    }
}

impl RendererSettings {
    /// Parse settings from TOML text; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: RendererSettings = toml::from_str(text)?;
        settings.validated()
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    fn validated(mut self) -> Result<Self> {
        if !(self.sdr_display_nits.is_finite() && self.sdr_display_nits > 0.0) {
            return Err(crate::error::Error::Config(format!(
                "sdr_display_nits must be positive, got {}",
                self.sdr_display_nits
            )));
        }
        self.procamp = self.procamp.clamped();
        Ok(self)
    }

    pub fn scaling_policy(&self) -> ScalingPolicy {
        ScalingPolicy::new(self.upscaler, self.downscaler)
            .with_interpolate_at_50pct(self.interpolate_at_50pct)
    }

    pub fn with_video_processor(mut self, prefer: bool) -> Self {
        self.prefer_video_processor = prefer;
        self
    }

    pub fn with_vp_scaling(mut self, enabled: bool) -> Self {
        self.vp_scaling = enabled;
        self
    }

    pub fn with_scalers(mut self, upscaler: Upscaler, downscaler: Downscaler) -> Self {
        self.upscaler = upscaler;
        self.downscaler = downscaler;
        self
    }

    pub fn with_interpolate_at_50pct(mut self, enabled: bool) -> Self {
        self.interpolate_at_50pct = enabled;
        self
    }

    pub fn with_chroma_upsampling(mut self, chroma: ChromaUpsampling) -> Self {
        self.chroma_upsampling = chroma;
        self
    }

    pub fn with_texture_format(mut self, format: TextureFormat) -> Self {
        self.texture_format = format;
        self
    }

    pub fn with_output_range(mut self, range: OutputRange) -> Self {
        self.output_range = range;
        self
    }

    pub fn with_convert_to_sdr(mut self, enabled: bool) -> Self {
        self.convert_to_sdr = enabled;
        self
    }

    pub fn with_hdr_passthrough(mut self, enabled: bool) -> Self {
        self.hdr_passthrough = enabled;
        self
    }

    pub fn with_tone_mapping(mut self, op: ToneMapping) -> Self {
        self.tone_mapping = op;
        self
    }

    pub fn with_dither(mut self, enabled: bool) -> Self {
        self.dither = enabled;
        self
    }

    pub fn with_stereo_transform(mut self, transform: StereoTransform) -> Self {
        self.stereo_transform = transform;
        self
    }

    pub fn with_swap_chain_bits(mut self, bits: SwapChainBits) -> Self {
        self.swap_chain_bits = bits;
        self
    }

    pub fn with_procamp(mut self, procamp: ProcAmp) -> Self {
        self.procamp = procamp.clamped();
        self
    }

    pub fn with_vendor_policy(mut self, policy: VendorPolicy) -> Self {
        self.vendor_policy = policy;
        self
    }
}

/// Settings shared between a UI thread and the frame thread
///
/// Every write bumps a generation counter so readers can tell whether their
/// snapshot is stale without comparing the whole struct.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<RendererSettings>>,
    generation: Arc<AtomicU64>,
}

impl SettingsHandle {
    pub fn new(settings: RendererSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Apply an edit and bump the generation
    pub fn update(&self, edit: impl FnOnce(&mut RendererSettings)) {
        let mut settings = self.inner.write();
        edit(&mut settings);
        settings.procamp = settings.procamp.clamped();
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Replace the settings wholesale
    pub fn replace(&self, settings: RendererSettings) {
        self.update(|s| *s = settings);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Generation and a copy of the settings, read consistently
    pub fn snapshot(&self) -> (u64, RendererSettings) {
        let settings = self.inner.read();
        (self.generation(), settings.clone())
    }
}
