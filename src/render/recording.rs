//! Recording device
//!
//! A [`GpuDevice`] that performs no GPU work. Every call is appended to a
//! log, which makes it usable for dry runs from the CLI and for asserting the
//! exact call sequence in tests. Failures can be injected per operation.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::format::SurfaceFormat;

use super::backend::{
    DrawCall, GpuDevice, ShaderHandle, TextureDesc, TextureHandle, VideoProcessorBlt,
    VideoProcessorDesc,
};
use super::vendor::GpuVendor;

/// Recorded device call
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateTexture(TextureHandle, TextureDesc),
    ReleaseTexture(TextureHandle),
    UploadFrame { planes: usize, bytes: usize },
    CompileShader(ShaderHandle, String),
    ReleaseShader(ShaderHandle),
    UploadConstants { slot: u32, bytes: usize },
    Draw(DrawCall),
    CreateVideoProcessor(VideoProcessorDesc),
    ReleaseVideoProcessor,
    VideoProcessorBlt(VideoProcessorBlt),
}

/// Device that logs calls instead of executing them
#[derive(Debug)]
pub struct RecordingDevice {
    vendor: GpuVendor,
    vp_formats: HashSet<SurfaceFormat>,
    hdr_output: bool,
    calls: Vec<DeviceCall>,
    next_handle: u64,
    live_textures: HashMap<TextureHandle, TextureDesc>,
    live_shaders: HashMap<ShaderHandle, String>,
    constants: HashMap<u32, Vec<u8>>,
    vp_active: bool,
    // Injected failures
    fail_textures: bool,
    fail_shaders: HashSet<String>,
    reject_vp_colorspace: bool,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new(GpuVendor::Amd)
    }
}

impl RecordingDevice {
    /// Device whose video processor takes every common input surface
    pub fn new(vendor: GpuVendor) -> Self {
        let vp_formats = [
            SurfaceFormat::Nv12,
            SurfaceFormat::P010,
            SurfaceFormat::P016,
            SurfaceFormat::P210,
            SurfaceFormat::P216,
            SurfaceFormat::Yuy2,
            SurfaceFormat::Y210,
            SurfaceFormat::Y216,
            SurfaceFormat::Ayuv,
            SurfaceFormat::Y410,
            SurfaceFormat::Y416,
            SurfaceFormat::Bgra8,
            SurfaceFormat::Bgrx8,
            SurfaceFormat::Rgb10a2,
            SurfaceFormat::Rgba16f,
        ]
        .into_iter()
        .collect();

        Self {
            vendor,
            vp_formats,
            hdr_output: false,
            calls: Vec::new(),
            next_handle: 1,
            live_textures: HashMap::new(),
            live_shaders: HashMap::new(),
            constants: HashMap::new(),
            vp_active: false,
            fail_textures: false,
            fail_shaders: HashSet::new(),
            reject_vp_colorspace: false,
        }
    }

    /// Device without a usable video processor
    pub fn without_video_processor(vendor: GpuVendor) -> Self {
        let mut device = Self::new(vendor);
        device.vp_formats.clear();
        device
    }

    pub fn with_hdr_output(mut self, enabled: bool) -> Self {
        self.hdr_output = enabled;
        self
    }

    pub fn with_vp_formats(mut self, formats: impl IntoIterator<Item = SurfaceFormat>) -> Self {
        self.vp_formats = formats.into_iter().collect();
        self
    }

    /// Make every texture creation fail
    pub fn fail_texture_creation(&mut self, fail: bool) {
        self.fail_textures = fail;
    }

    /// Make compiling the shader called `name` fail
    pub fn fail_shader(&mut self, name: impl Into<String>) {
        self.fail_shaders.insert(name.into());
    }

    /// Make video processor creation reject the stream colorimetry
    pub fn reject_vp_colorspace(&mut self, reject: bool) {
        self.reject_vp_colorspace = reject;
    }

    pub fn set_hdr_output(&mut self, enabled: bool) {
        self.hdr_output = enabled;
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Drain the call log
    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn live_textures(&self) -> usize {
        self.live_textures.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.live_shaders.len()
    }

    /// Name a live shader was compiled under
    pub fn shader_name(&self, shader: ShaderHandle) -> Option<&str> {
        self.live_shaders.get(&shader).map(String::as_str)
    }

    /// Last data uploaded to a constant slot
    pub fn constants(&self, slot: u32) -> Option<&[u8]> {
        self.constants.get(&slot).map(Vec::as_slice)
    }

    pub fn video_processor_active(&self) -> bool {
        self.vp_active
    }

    /// Names of the shaders drawn, in order
    pub fn drawn_shaders(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::Draw(d) => self.shader_name(d.shader),
                _ => None,
            })
            .collect()
    }

    fn handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }
}

impl GpuDevice for RecordingDevice {
    fn vendor(&self) -> GpuVendor {
        self.vendor
    }

    fn supports_vp_input(&self, format: SurfaceFormat) -> bool {
        self.vp_formats.contains(&format)
    }

    fn supports_hdr_output(&self) -> bool {
        self.hdr_output
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        if self.fail_textures {
            return Err(Error::ResourceCreation(format!(
                "texture {} {:?}",
                desc.size, desc.format
            )));
        }
        if desc.size.is_empty() {
            return Err(Error::ResourceCreation("zero-sized texture".into()));
        }
        let handle = TextureHandle(self.handle());
        self.live_textures.insert(handle, *desc);
        self.calls.push(DeviceCall::CreateTexture(handle, *desc));
        Ok(handle)
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if self.live_textures.remove(&texture).is_some() {
            self.calls.push(DeviceCall::ReleaseTexture(texture));
        }
    }

    fn upload_frame(&mut self, planes: &[TextureHandle], data: &[u8], _pitch: u32) -> Result<()> {
        if let Some(missing) = planes.iter().find(|p| !self.live_textures.contains_key(p)) {
            return Err(Error::InvalidState(format!("upload to released texture {:?}", missing)));
        }
        self.calls.push(DeviceCall::UploadFrame {
            planes: planes.len(),
            bytes: data.len(),
        });
        Ok(())
    }

    fn compile_shader(&mut self, name: &str, source: &str) -> Result<ShaderHandle> {
        if self.fail_shaders.contains(name) {
            return Err(Error::ShaderCompile {
                name: name.to_string(),
                reason: "compilation rejected".into(),
            });
        }
        if source.trim().is_empty() {
            return Err(Error::ShaderCompile {
                name: name.to_string(),
                reason: "empty source".into(),
            });
        }
        let handle = ShaderHandle(self.handle());
        self.live_shaders.insert(handle, name.to_string());
        self.calls.push(DeviceCall::CompileShader(handle, name.to_string()));
        Ok(handle)
    }

    fn release_shader(&mut self, shader: ShaderHandle) {
        if self.live_shaders.remove(&shader).is_some() {
            self.calls.push(DeviceCall::ReleaseShader(shader));
        }
    }

    fn upload_constants(&mut self, slot: u32, data: &[u8]) -> Result<()> {
        self.constants.insert(slot, data.to_vec());
        self.calls.push(DeviceCall::UploadConstants {
            slot,
            bytes: data.len(),
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        if !self.live_shaders.contains_key(&call.shader) {
            return Err(Error::InvalidState(format!("draw with released shader {:?}", call.shader)));
        }
        self.calls.push(DeviceCall::Draw(call.clone()));
        Ok(())
    }

    fn create_video_processor(&mut self, desc: &VideoProcessorDesc) -> Result<()> {
        if !self.supports_vp_input(desc.input_format) {
            return Err(Error::ResourceCreation(format!(
                "video processor input {:?}",
                desc.input_format
            )));
        }
        if self.reject_vp_colorspace {
            return Err(Error::IncompatibleColorspace(desc.color.to_string()));
        }
        self.vp_active = true;
        self.calls.push(DeviceCall::CreateVideoProcessor(*desc));
        Ok(())
    }

    fn release_video_processor(&mut self) {
        if self.vp_active {
            self.vp_active = false;
            self.calls.push(DeviceCall::ReleaseVideoProcessor);
        }
    }

    fn video_processor_blt(&mut self, blt: &VideoProcessorBlt) -> Result<()> {
        if !self.vp_active {
            return Err(Error::InvalidState("video processor not created".into()));
        }
        self.calls.push(DeviceCall::VideoProcessorBlt(*blt));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Resolution;

    #[test]
    fn test_texture_lifecycle() {
        let mut device = RecordingDevice::default();
        let tex = device
            .create_texture(&TextureDesc::target(Resolution::HD_720P, SurfaceFormat::Rgba16f))
            .unwrap();
        assert_eq!(device.live_textures(), 1);
        device.release_texture(tex);
        device.release_texture(tex);
        assert_eq!(device.live_textures(), 0);
        assert_eq!(device.calls().len(), 2);
    }

    #[test]
    fn test_injected_failures() {
        let mut device = RecordingDevice::default();
        device.fail_texture_creation(true);
        let err = device
            .create_texture(&TextureDesc::input(Resolution::HD_720P, SurfaceFormat::R8))
            .unwrap_err();
        assert!(err.is_fatal());

        device.fail_shader("sharpen");
        let err = device.compile_shader("sharpen", "float4 main() {}").unwrap_err();
        assert!(matches!(err, Error::ShaderCompile { .. }));
        assert!(device.compile_shader("other", "float4 main() {}").is_ok());
    }

    #[test]
    fn test_vp_input_support() {
        let device = RecordingDevice::new(GpuVendor::Intel);
        assert!(device.supports_vp_input(SurfaceFormat::Nv12));
        assert!(!device.supports_vp_input(SurfaceFormat::R16));
        let none = RecordingDevice::without_video_processor(GpuVendor::Intel);
        assert!(!none.supports_vp_input(SurfaceFormat::Nv12));
    }
}
