//! Render pass sequencing
//!
//! Orders the optional stages of a frame into render passes and assigns
//! each pass an output: the last pass writes the presentation target, every
//! other pass writes an intermediate buffer from a ping-pong pool kept per
//! buffer size.

use tracing::debug;

use crate::processing::scale::{Axis, ScaleKernel, ScalingPasses};
use crate::types::Resolution;

/// First stage of the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontStage {
    /// Hardware video processor; `scaling` when it also resizes
    VideoProcessor { scaling: bool },
    /// Color conversion shader
    ColorConversion,
    /// RGB input that needs no conversion
    None,
}

/// One render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    VideoProcessor { scaling: bool },
    ColorConversion,
    /// Plain copy when nothing else would write the target
    Copy,
    Resize { axis: Axis, kernel: ScaleKernel },
    Correction,
    /// User post-scale shader by registration index
    PostShader(usize),
    InterlacePack,
    Dither,
}

impl StageKind {
    pub fn is_post_scale(&self) -> bool {
        matches!(
            self,
            StageKind::Correction
                | StageKind::PostShader(_)
                | StageKind::InterlacePack
                | StageKind::Dither
        )
    }

    pub fn is_resize(&self) -> bool {
        matches!(self, StageKind::Resize { .. })
    }
}

/// Where a pass writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageOutput {
    /// Intermediate buffer by pool index
    Buffer(usize),
    /// Externally supplied render target
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stage {
    pub kind: StageKind,
    pub output: StageOutput,
    /// Size of the area this pass renders
    pub size: Resolution,
}

/// Intermediate buffer the pipeline needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub size: Resolution,
}

/// Inputs of [`PipelineSequencer::build`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageRequest {
    pub front: FrontStage,
    pub scaling: ScalingPasses,
    pub correction: bool,
    pub post_shaders: usize,
    pub interlace_pack: bool,
    pub dither: bool,
}

impl StageRequest {
    /// Request with only a front stage
    pub fn new(front: FrontStage) -> Self {
        Self {
            front,
            scaling: ScalingPasses::Blit,
            correction: false,
            post_shaders: 0,
            interlace_pack: false,
            dither: false,
        }
    }

    pub fn with_scaling(mut self, scaling: ScalingPasses) -> Self {
        self.scaling = scaling;
        self
    }

    pub fn with_correction(mut self, enabled: bool) -> Self {
        self.correction = enabled;
        self
    }

    pub fn with_post_shaders(mut self, count: usize) -> Self {
        self.post_shaders = count;
        self
    }

    pub fn with_interlace_pack(mut self, enabled: bool) -> Self {
        self.interlace_pack = enabled;
        self
    }

    pub fn with_dither(mut self, enabled: bool) -> Self {
        self.dither = enabled;
        self
    }
}

/// Extents the stages render at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageExtents {
    /// Source rectangle size, unrotated
    pub source: Resolution,
    /// Destination rectangle size
    pub destination: Resolution,
}

/// Ordered passes plus the buffers they write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStageList {
    pub stages: Vec<Stage>,
    pub buffers: Vec<BufferDesc>,
}

impl PipelineStageList {
    /// Stages after scaling: correction, user shaders, interlace pack, dither
    pub fn post_scale_steps(&self) -> usize {
        self.stages.iter().filter(|s| s.kind.is_post_scale()).count()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn contains(&self, kind: StageKind) -> bool {
        self.stages.iter().any(|s| s.kind == kind)
    }

    pub fn has_resize(&self) -> bool {
        self.stages.iter().any(|s| s.kind.is_resize())
    }

    /// Buffer a stage reads from (`None` for the first stage, which reads the frame)
    pub fn input_of(&self, index: usize) -> Option<usize> {
        index
            .checked_sub(1)
            .and_then(|prev| match self.stages.get(prev)?.output {
                StageOutput::Buffer(b) => Some(b),
                StageOutput::Target => None,
            })
    }
}

/// Ordered stage kinds for a request
pub fn sequence(request: &StageRequest) -> Vec<StageKind> {
    let mut kinds = Vec::with_capacity(4 + request.post_shaders);
    let mut resize_fused = false;
    match request.front {
        FrontStage::VideoProcessor { scaling } => {
            kinds.push(StageKind::VideoProcessor { scaling });
            resize_fused = scaling;
        }
        FrontStage::ColorConversion => kinds.push(StageKind::ColorConversion),
        FrontStage::None => {}
    }

    if !resize_fused {
        match request.scaling {
            ScalingPasses::Blit => {}
            ScalingPasses::OnePass { axis, kernel } => {
                kinds.push(StageKind::Resize { axis, kernel })
            }
            ScalingPasses::TwoPass { x, y, .. } => {
                kinds.push(StageKind::Resize {
                    axis: Axis::X,
                    kernel: x,
                });
                kinds.push(StageKind::Resize {
                    axis: Axis::Y,
                    kernel: y,
                });
            }
        }
    }

    if request.correction {
        kinds.push(StageKind::Correction);
    }
    kinds.extend((0..request.post_shaders).map(StageKind::PostShader));
    if request.interlace_pack {
        kinds.push(StageKind::InterlacePack);
    }
    if request.dither {
        kinds.push(StageKind::Dither);
    }

    if kinds.is_empty() {
        kinds.push(StageKind::Copy);
    }
    kinds
}

/// Size each stage renders at
fn stage_sizes(
    kinds: &[StageKind],
    scaling: &ScalingPasses,
    extents: &StageExtents,
) -> Vec<Resolution> {
    let last_resize = kinds.iter().rposition(StageKind::is_resize);
    kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| match (kind, last_resize) {
            (StageKind::Resize { axis: Axis::X, .. }, Some(last)) if i < last => scaling
                .intermediate()
                .unwrap_or(extents.destination),
            (_, Some(last)) if i < last => extents.source,
            _ => extents.destination,
        })
        .collect()
}

/// Builds stage lists and owns the intermediate buffer layout
#[derive(Debug, Default)]
pub struct PipelineSequencer {
    current: Option<(StageRequest, StageExtents)>,
    list: PipelineStageList,
}

impl PipelineSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the stage list and assign outputs
    ///
    /// Each non-final stage writes a buffer of its size class that differs
    /// from the buffer it reads, so at most two buffers exist per class and
    /// never more than `stages - 1` in total.
    pub fn build(request: &StageRequest, extents: &StageExtents) -> PipelineStageList {
        let kinds = sequence(request);
        let sizes = stage_sizes(&kinds, &request.scaling, extents);

        let mut buffers: Vec<BufferDesc> = Vec::new();
        let mut stages = Vec::with_capacity(kinds.len());
        let mut previous: Option<usize> = None;
        let last = kinds.len() - 1;

        for (i, (kind, size)) in kinds.iter().zip(&sizes).enumerate() {
            let output = if i == last {
                StageOutput::Target
            } else {
                let slot = buffers
                    .iter()
                    .enumerate()
                    .position(|(b, desc)| desc.size == *size && Some(b) != previous)
                    .unwrap_or_else(|| {
                        buffers.push(BufferDesc { size: *size });
                        buffers.len() - 1
                    });
                previous = Some(slot);
                StageOutput::Buffer(slot)
            };
            stages.push(Stage {
                kind: *kind,
                output,
                size: *size,
            });
        }

        PipelineStageList { stages, buffers }
    }

    /// Rebuild if membership or extents changed; returns whether it did
    pub fn update(&mut self, request: StageRequest, extents: StageExtents) -> bool {
        if self.current == Some((request, extents)) {
            return false;
        }
        self.list = Self::build(&request, &extents);
        debug!(
            "Pipeline rebuilt: {} stages, {} buffers, {} post-scale steps",
            self.list.len(),
            self.list.buffers.len(),
            self.list.post_scale_steps()
        );
        self.current = Some((request, extents));
        true
    }

    pub fn stages(&self) -> &PipelineStageList {
        &self.list
    }

    pub fn post_scale_steps(&self) -> usize {
        self.list.post_scale_steps()
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.list = PipelineStageList::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::scale::{Downscaler, Upscaler};

    fn extents() -> StageExtents {
        StageExtents {
            source: Resolution::FHD_1080P,
            destination: Resolution::UHD_4K,
        }
    }

    const UP: ScaleKernel = ScaleKernel::Up(Upscaler::CatmullRom);

    #[test]
    fn test_post_scale_step_combinations() {
        for correction in [false, true] {
            for shaders in 0..=2usize {
                for pack in [false, true] {
                    for dither in [false, true] {
                        let request = StageRequest::new(FrontStage::ColorConversion)
                            .with_correction(correction)
                            .with_post_shaders(shaders)
                            .with_interlace_pack(pack)
                            .with_dither(dither);
                        let list = PipelineSequencer::build(&request, &extents());
                        let expected =
                            correction as usize + shaders + pack as usize + dither as usize;
                        assert_eq!(list.post_scale_steps(), expected);
                        assert!(list.buffers.len() <= list.len() - 1);
                    }
                }
            }
        }
    }

    #[test]
    fn test_fixed_stage_order() {
        let request = StageRequest::new(FrontStage::ColorConversion)
            .with_scaling(ScalingPasses::OnePass {
                axis: Axis::Both,
                kernel: UP,
            })
            .with_correction(true)
            .with_post_shaders(2)
            .with_interlace_pack(true)
            .with_dither(true);
        let kinds: Vec<_> = sequence(&request);
        assert_eq!(
            kinds,
            vec![
                StageKind::ColorConversion,
                StageKind::Resize {
                    axis: Axis::Both,
                    kernel: UP
                },
                StageKind::Correction,
                StageKind::PostShader(0),
                StageKind::PostShader(1),
                StageKind::InterlacePack,
                StageKind::Dither,
            ]
        );
    }

    #[test]
    fn test_single_stage_writes_target() {
        let request = StageRequest::new(FrontStage::VideoProcessor { scaling: false });
        let list = PipelineSequencer::build(&request, &extents());
        assert_eq!(list.len(), 1);
        assert_eq!(list.stages[0].output, StageOutput::Target);
        assert!(list.buffers.is_empty());
        assert_eq!(list.input_of(0), None);
    }

    #[test]
    fn test_vp_scaling_fuses_resize() {
        let request = StageRequest::new(FrontStage::VideoProcessor { scaling: true }).with_scaling(
            ScalingPasses::OnePass {
                axis: Axis::Both,
                kernel: UP,
            },
        );
        let list = PipelineSequencer::build(&request, &extents());
        assert!(!list.has_resize());
        assert_eq!(list.stages[0].size, Resolution::UHD_4K);
    }

    #[test]
    fn test_identity_rgb_without_stages_copies() {
        let list = PipelineSequencer::build(&StageRequest::new(FrontStage::None), &extents());
        assert_eq!(list.stages[0].kind, StageKind::Copy);
        assert_eq!(list.stages[0].output, StageOutput::Target);
    }

    #[test]
    fn test_ping_pong_reuse() {
        let request = StageRequest::new(FrontStage::ColorConversion)
            .with_scaling(ScalingPasses::OnePass {
                axis: Axis::Both,
                kernel: UP,
            })
            .with_correction(true)
            .with_post_shaders(2)
            .with_dither(true);
        let list = PipelineSequencer::build(&request, &extents());
        // conversion at source size, then four destination-size stages ping-pong over two buffers
        assert_eq!(list.len(), 6);
        assert_eq!(list.buffers.len(), 3);
        assert_eq!(list.buffers[0].size, Resolution::FHD_1080P);
        assert!(list.buffers[1..].iter().all(|b| b.size == Resolution::UHD_4K));
        for i in 1..list.len() {
            let output = list.stages[i].output;
            if let (Some(input), StageOutput::Buffer(out)) = (list.input_of(i), output) {
                assert_ne!(input, out, "stage {} reads and writes buffer {}", i, out);
            }
        }
        assert_eq!(list.stages.last().unwrap().output, StageOutput::Target);
    }

    #[test]
    fn test_two_pass_intermediate_size() {
        let request =
            StageRequest::new(FrontStage::ColorConversion).with_scaling(ScalingPasses::TwoPass {
                x: ScaleKernel::Down(Downscaler::Bicubic),
                y: UP,
                intermediate: Resolution::new(960, 1080),
            });
        let ext = StageExtents {
            source: Resolution::FHD_1080P,
            destination: Resolution::new(960, 2160),
        };
        let list = PipelineSequencer::build(&request, &ext);
        assert_eq!(list.len(), 3);
        assert_eq!(list.stages[0].size, Resolution::FHD_1080P);
        assert_eq!(list.stages[1].size, Resolution::new(960, 1080));
        assert_eq!(list.stages[2].size, Resolution::new(960, 2160));
        assert_eq!(list.buffers.len(), 2);
    }

    #[test]
    fn test_update_rebuilds_only_on_change() {
        let mut seq = PipelineSequencer::new();
        let request = StageRequest::new(FrontStage::ColorConversion).with_dither(true);
        assert!(seq.update(request, extents()));
        assert!(!seq.update(request, extents()));
        assert!(seq.update(request.with_post_shaders(1), extents()));
        let resized = StageExtents {
            destination: Resolution::HD_720P,
            ..extents()
        };
        assert!(seq.update(request.with_post_shaders(1), resized));
        assert_eq!(seq.stages().stages.last().unwrap().size, Resolution::HD_720P);
    }
}
