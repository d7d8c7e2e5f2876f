//! Stream-level behavior of the frame processor against a recording device

use std::io::Write;

use ghostrender::config::StereoTransform;
use ghostrender::hdr::{DoviMetadata, Hdr10Metadata};
use ghostrender::pipeline::ConvertStep;
use ghostrender::processing::{ColorPrimaries, ExtendedColorInfo, TransferFunction, TransferMatrix};
use ghostrender::render::{GpuVendor, ReconfigureSignals};
use ghostrender::{
    ColorFormat, Error, FrameProcessor, FrameSample, MediaType, ProcessorState, RecordingDevice,
    RendererSettings, Resolution, Rotation, SideData, SideDataTag, StageKind, StrategyKind,
    SwapChainBits,
};

fn media(format: ColorFormat, width: u32, height: u32) -> MediaType {
    MediaType::for_format(format, width, height).unwrap()
}

fn processor(settings: RendererSettings) -> FrameProcessor<RecordingDevice> {
    FrameProcessor::new(RecordingDevice::new(GpuVendor::Intel), settings)
}

fn frame() -> FrameSample {
    FrameSample::new(vec![0u8; 64])
}

#[test]
fn test_nv12_hd_takes_video_processor_without_resize() {
    let mut p = processor(RendererSettings::default());
    p.set_window_size(Resolution::FHD_1080P);
    p.configure(media(ColorFormat::Nv12, 1920, 1080)).unwrap();
    p.process_frame(&frame()).unwrap();

    assert_eq!(p.state(), ProcessorState::Ready);
    assert_eq!(p.strategy_kind(), Some(StrategyKind::VideoProcessor));
    assert_eq!(p.color_info().matrix, TransferMatrix::Bt709);
    assert!(!p.scaling_decision().unwrap().is_resize());
    assert!(!p.stage_list().has_resize());
    assert_eq!(p.post_scale_steps(), 0);
    assert_eq!(p.frames_processed(), 1);
}

#[test]
fn test_hdr10_to_sdr_tone_maps_and_remaps_gamut() {
    let settings = RendererSettings::default()
        .with_swap_chain_bits(SwapChainBits::Eight)
        .with_convert_to_sdr(true);
    let mut p = processor(settings);
    p.configure(media(ColorFormat::P010, 3840, 2160).with_color_info(&ExtendedColorInfo::HDR10))
        .unwrap();

    let sample = frame().with_side_data(SideData::new(
        SideDataTag::Hdr10,
        Hdr10Metadata::with_max_luminance(1000.0).to_bytes(),
    ));
    p.process_frame(&sample).unwrap();

    assert!(!p.output_hdr());
    assert_eq!(p.swap_chain_bits(), 8);
    assert!(p.color_transform().enabled);
    let plan = p.correction_plan();
    assert!(plan.has_tone_map());
    assert!(plan
        .gamut_step(ColorPrimaries::Bt2020, ColorPrimaries::Bt709)
        .is_some());
    assert!(p.stage_list().contains(StageKind::Correction));
}

#[test]
fn test_hdr10_to_sdr_on_shader_path_orders_steps() {
    let settings = RendererSettings::default()
        .with_video_processor(false)
        .with_swap_chain_bits(SwapChainBits::Eight);
    let mut p = processor(settings);
    p.configure(media(ColorFormat::P010, 3840, 2160).with_color_info(&ExtendedColorInfo::HDR10))
        .unwrap();
    p.process_frame(&frame()).unwrap();

    assert_eq!(p.strategy_kind(), Some(StrategyKind::Shader));
    assert!(!p.output_hdr());
    // tone mapping runs on BT.2020 light, the remap follows
    let steps = &p.correction_plan().steps;
    assert_eq!(steps.len(), 4);
    assert_eq!(steps[0], ConvertStep::Linearize(TransferFunction::Pq));
    assert!(matches!(steps[1], ConvertStep::ToneMap { .. }));
    assert!(matches!(
        steps[2],
        ConvertStep::GamutRemap {
            from: ColorPrimaries::Bt2020,
            to: ColorPrimaries::Bt709,
            ..
        }
    ));
    assert_eq!(steps[3], ConvertStep::Delinearize(TransferFunction::Gamma22));

    // the steps live in the conversion program, not a separate pass
    assert!(p.stage_list().contains(StageKind::ColorConversion));
    assert!(!p.stage_list().contains(StageKind::Correction));
}

#[test]
fn test_hdr_display_passes_hdr10_through() {
    let device = RecordingDevice::new(GpuVendor::Amd).with_hdr_output(true);
    let mut p = FrameProcessor::new(device, RendererSettings::default());
    let signals = p
        .configure(media(ColorFormat::P010, 1920, 1080).with_color_info(&ExtendedColorInfo::HDR10))
        .unwrap();

    assert!(signals.device);
    assert!(p.output_hdr());
    assert_eq!(p.swap_chain_bits(), 10);
    assert!(!p.correction_plan().has_tone_map());
}

#[test]
fn test_post_scale_steps_count_every_optional_stage() {
    for correction in [false, true] {
        for shaders in 0..=2usize {
            for interlace in [false, true] {
                for dither in [false, true] {
                    let stereo = if interlace {
                        StereoTransform::HalfOverUnderToInterlace
                    } else {
                        StereoTransform::None
                    };
                    let settings = RendererSettings::default()
                        .with_dither(dither)
                        .with_stereo_transform(stereo);
                    let color = if correction {
                        ExtendedColorInfo::HDR10
                    } else {
                        ExtendedColorInfo::BT709
                    };

                    let mut p = processor(settings);
                    p.configure(media(ColorFormat::P010, 1920, 1080).with_color_info(&color))
                        .unwrap();
                    for i in 0..shaders {
                        let name = format!("user{}", i);
                        p.add_post_shader(&name, "float4 main() : SV_Target { return 0; }")
                            .unwrap();
                    }
                    p.process_frame(&frame()).unwrap();

                    let expected =
                        correction as usize + shaders + interlace as usize + dither as usize;
                    assert_eq!(
                        p.post_scale_steps(),
                        expected,
                        "correction={} shaders={} interlace={} dither={}",
                        correction,
                        shaders,
                        interlace,
                        dither
                    );
                    assert_eq!(p.stage_list().contains(StageKind::Correction), correction);
                    assert_eq!(p.stage_list().contains(StageKind::Dither), dither);
                }
            }
        }
    }
}

#[test]
fn test_quarter_turn_maps_height_to_width() {
    let mut p = processor(RendererSettings::default());
    p.set_window_size(Resolution::new(500, 1000));
    p.set_rotation(Rotation::R90);
    p.configure(media(ColorFormat::Nv12, 1000, 500)).unwrap();
    p.process_frame(&frame()).unwrap();

    let decision = p.scaling_decision().unwrap();
    assert!(!decision.x.is_resize());
    assert!(!decision.y.is_resize());
    assert!(!p.stage_list().has_resize());
}

#[test]
fn test_short_dovi_block_is_ignored() {
    let mut p = processor(RendererSettings::default());
    p.configure(media(ColorFormat::P010, 1920, 1080).with_color_info(&ExtendedColorInfo::HDR10))
        .unwrap();
    let before = *p.color_transform();
    let kind = p.strategy_kind();

    let mut bytes = DoviMetadata::identity(10).to_bytes();
    bytes.truncate(bytes.len() / 2);
    let sample = frame().with_side_data(SideData::new(SideDataTag::DolbyVision, bytes));
    p.process_frame(&sample).unwrap();

    assert_eq!(*p.color_transform(), before);
    assert_eq!(p.strategy_kind(), kind);
    assert_eq!(p.state(), ProcessorState::Ready);
    assert!(p.metadata().dovi.is_none());
}

#[test]
fn test_short_dovi_block_keeps_previous_dovi_matrix() {
    let mut p = processor(RendererSettings::default().with_video_processor(false));
    p.configure(media(ColorFormat::P010, 1920, 1080).with_color_info(&ExtendedColorInfo::HDR10))
        .unwrap();
    let hdr10 = *p.color_transform();

    let mut dovi = DoviMetadata::identity(10);
    dovi.color.ycc_to_rgb[0] = 1.1;
    dovi.color.ycc_offset = [0.07, 0.5, 0.5];
    let good = frame().with_side_data(SideData::new(SideDataTag::DolbyVision, dovi.to_bytes()));
    p.process_frame(&good).unwrap();
    let with_dovi = *p.color_transform();
    assert_ne!(with_dovi, hdr10);
    assert_eq!(p.metadata().dovi.as_ref(), Some(&dovi));

    let mut bytes = DoviMetadata::identity(10).to_bytes();
    bytes.truncate(bytes.len() / 2);
    let short = frame().with_side_data(SideData::new(SideDataTag::DolbyVision, bytes));
    p.process_frame(&short).unwrap();

    assert_eq!(*p.color_transform(), with_dovi);
    assert_eq!(p.metadata().dovi.as_ref(), Some(&dovi));
    assert_eq!(p.state(), ProcessorState::Ready);
}

#[test]
fn test_dovi_on_sdr_stream_asks_host_for_hdr_swap_chain() {
    let device = RecordingDevice::new(GpuVendor::Amd).with_hdr_output(true);
    let mut p = FrameProcessor::new(device, RendererSettings::default());
    p.configure(media(ColorFormat::Nv12, 1920, 1080).with_color_info(&ExtendedColorInfo::BT709))
        .unwrap();
    assert_eq!(p.take_reconfigure(), ReconfigureSignals::default());

    let block = SideData::new(SideDataTag::DolbyVision, DoviMetadata::identity(8).to_bytes());
    p.process_frame(&frame().with_side_data(block)).unwrap();

    let signals = p.take_reconfigure();
    assert!(signals.swap_chain);
    assert!(signals.device);
    assert!(p.output_hdr());
    assert_eq!(p.swap_chain_bits(), 10);
    assert!(!p.take_reconfigure().any());
}

#[test]
fn test_state_transitions() {
    let mut p = processor(RendererSettings::default());
    assert_eq!(p.state(), ProcessorState::Uninitialized);
    assert!(matches!(
        p.process_frame(&frame()),
        Err(Error::InvalidState(_))
    ));

    p.configure(media(ColorFormat::Nv12, 1280, 720)).unwrap();
    assert_eq!(p.state(), ProcessorState::Ready);

    // a new media type replaces the stream
    p.configure(media(ColorFormat::Yuy2, 720, 576)).unwrap();
    assert_eq!(p.state(), ProcessorState::Ready);
    assert_eq!(p.color_info().matrix, TransferMatrix::Bt601);
}

#[test]
fn test_rejected_colorspace_falls_back_to_shader() {
    let mut device = RecordingDevice::new(GpuVendor::Intel);
    device.reject_vp_colorspace(true);
    let mut p = FrameProcessor::new(device, RendererSettings::default());
    p.configure(media(ColorFormat::Nv12, 1920, 1080)).unwrap();

    assert_eq!(p.state(), ProcessorState::Ready);
    assert_eq!(p.strategy_kind(), Some(StrategyKind::Shader));
    assert!(!p.device().video_processor_active());
    p.process_frame(&frame()).unwrap();
}

#[test]
fn test_texture_failure_is_fatal_until_device_reset() {
    let mut p = processor(RendererSettings::default());
    p.configure(media(ColorFormat::Nv12, 1920, 1080)).unwrap();

    p.device_mut().fail_texture_creation(true);
    let err = p.renegotiate().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(p.state(), ProcessorState::Error);
    assert!(matches!(
        p.configure(media(ColorFormat::Nv12, 1280, 720)),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(
        p.process_frame(&frame()),
        Err(Error::InvalidState(_))
    ));

    p.reset_device(RecordingDevice::new(GpuVendor::Intel)).unwrap();
    assert_eq!(p.state(), ProcessorState::Ready);
    p.process_frame(&frame()).unwrap();
}

#[test]
fn test_post_shader_compile_failure_keeps_pipeline() {
    let mut p = processor(RendererSettings::default());
    p.configure(media(ColorFormat::Nv12, 1920, 1080)).unwrap();
    let stages = p.stage_list().clone();

    p.device_mut().fail_shader("broken");
    let err = p
        .add_post_shader("broken", "float4 main() : SV_Target { return 0; }")
        .unwrap_err();
    assert!(matches!(err, Error::ShaderCompile { .. }));
    assert_eq!(p.state(), ProcessorState::Ready);
    assert_eq!(p.stage_list(), &stages);
    assert_eq!(p.post_shader_count(), 0);

    p.add_post_shader("sharpen", "float4 main() : SV_Target { return 1; }")
        .unwrap();
    assert_eq!(p.post_scale_steps(), 1);
    assert!(p.stage_list().contains(StageKind::PostShader(0)));
}

#[test]
fn test_ycgco_uses_shader_path() {
    let color = ExtendedColorInfo {
        matrix: TransferMatrix::YCgCo,
        ..ExtendedColorInfo::BT709
    };
    let mut p = processor(RendererSettings::default());
    p.configure(media(ColorFormat::Nv12, 1920, 1080).with_color_info(&color))
        .unwrap();
    assert_eq!(p.strategy_kind(), Some(StrategyKind::Shader));
    assert!(p.color_transform().enabled);
}

#[test]
fn test_vendor_rule_avoids_video_processor() {
    let device = RecordingDevice::new(GpuVendor::Nvidia);
    let mut p = FrameProcessor::new(device, RendererSettings::default());
    p.configure(media(ColorFormat::Xrgb32, 1919, 1080)).unwrap();
    assert_eq!(p.strategy_kind(), Some(StrategyKind::Shader));

    // even widths are fine
    p.configure(media(ColorFormat::Xrgb32, 1920, 1080)).unwrap();
    assert_eq!(p.strategy_kind(), Some(StrategyKind::VideoProcessor));
}

#[test]
fn test_settings_file_drives_processor() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "prefer_video_processor = false").unwrap();
    writeln!(file, "stereo_transform = \"half-over-under-to-interlace\"").unwrap();

    let settings = RendererSettings::load(file.path()).unwrap();
    let mut p = processor(settings);
    p.configure(media(ColorFormat::Nv12, 1920, 1080)).unwrap();

    assert_eq!(p.strategy_kind(), Some(StrategyKind::Shader));
    assert!(p.stage_list().contains(StageKind::InterlacePack));
}
