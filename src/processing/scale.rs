//! Scaling decisions
//!
//! Chooses a resampling kernel per destination axis and collapses the two
//! axes into a blit, one pass or two passes. Nothing here touches the GPU;
//! the decision only describes what the pipeline has to run.

use serde::{Deserialize, Serialize};

use crate::types::{Rect, Resolution, Rotation};

/// Upscaling kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Upscaler {
    /// Nearest neighbor (fastest, pixelated)
    Nearest,
    /// Mitchell-Netravali (B=1/3, C=1/3)
    Mitchell,
    /// Catmull-Rom (B=0, C=1/2)
    #[default]
    CatmullRom,
    Lanczos2,
    /// Lanczos3 (best quality, slowest separable)
    Lanczos3,
    /// 2D EWA Jinc, radius 2
    Jinc2,
}

/// Downscaling kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Downscaler {
    Box,
    Bilinear,
    Hamming,
    #[default]
    Bicubic,
    BicubicSharp,
    Lanczos,
}

/// Chroma upsampling for subsampled formats on the shader path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChromaUpsampling {
    Nearest,
    #[default]
    Bilinear,
    CatmullRom,
}

/// Kernel selected for one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleKernel {
    Up(Upscaler),
    Down(Downscaler),
}

impl ScaleKernel {
    /// Name of the resampling shader
    pub fn shader_name(&self) -> &'static str {
        match self {
            ScaleKernel::Up(Upscaler::Nearest) => "resize_nearest",
            ScaleKernel::Up(Upscaler::Mitchell) => "resize_mitchell4",
            ScaleKernel::Up(Upscaler::CatmullRom) => "resize_catmull4",
            ScaleKernel::Up(Upscaler::Lanczos2) => "resize_lanczos2",
            ScaleKernel::Up(Upscaler::Lanczos3) => "resize_lanczos3",
            ScaleKernel::Up(Upscaler::Jinc2) => "resize_jinc2",
            ScaleKernel::Down(Downscaler::Box) => "downscale_box",
            ScaleKernel::Down(Downscaler::Bilinear) => "downscale_bilinear",
            ScaleKernel::Down(Downscaler::Hamming) => "downscale_hamming",
            ScaleKernel::Down(Downscaler::Bicubic) => "downscale_bicubic",
            ScaleKernel::Down(Downscaler::BicubicSharp) => "downscale_bicubic_sharp",
            ScaleKernel::Down(Downscaler::Lanczos) => "downscale_lanczos",
        }
    }

    /// Support radius in source pixels at scale 1
    pub fn radius(&self) -> f32 {
        match self {
            ScaleKernel::Up(Upscaler::Nearest) => 0.5,
            ScaleKernel::Up(Upscaler::Lanczos3) | ScaleKernel::Down(Downscaler::Lanczos) => 3.0,
            ScaleKernel::Down(Downscaler::Box) | ScaleKernel::Down(Downscaler::Bilinear) => 1.0,
            _ => 2.0,
        }
    }

    pub fn is_downscale(&self) -> bool {
        matches!(self, ScaleKernel::Down(_))
    }
}

/// Decision for one destination axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisScaling {
    NoResize,
    Resize(ScaleKernel),
}

impl AxisScaling {
    pub fn kernel(&self) -> Option<ScaleKernel> {
        match self {
            AxisScaling::NoResize => None,
            AxisScaling::Resize(k) => Some(*k),
        }
    }

    pub fn is_resize(&self) -> bool {
        matches!(self, AxisScaling::Resize(_))
    }
}

/// Axis handled by a single resize pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Both,
}

/// How the resize stage is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalingPasses {
    /// Copy with rotation/flip through the quad's texture coordinates
    Blit,
    OnePass { axis: Axis, kernel: ScaleKernel },
    /// X first into `intermediate`, then Y
    TwoPass {
        x: ScaleKernel,
        y: ScaleKernel,
        intermediate: Resolution,
    },
}

impl ScalingPasses {
    pub fn pass_count(&self) -> usize {
        match self {
            ScalingPasses::Blit | ScalingPasses::OnePass { .. } => 1,
            ScalingPasses::TwoPass { .. } => 2,
        }
    }

    /// Intermediate target needed between the passes, if any
    pub fn intermediate(&self) -> Option<Resolution> {
        match self {
            ScalingPasses::TwoPass { intermediate, .. } => Some(*intermediate),
            _ => None,
        }
    }
}

/// Result of [`ScalingPolicy::decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScalingDecision {
    /// Destination X
    pub x: AxisScaling,
    /// Destination Y
    pub y: AxisScaling,
    pub passes: ScalingPasses,
    pub rotation: Rotation,
    /// Source extent seen from the destination axes
    pub source: Resolution,
    pub destination: Resolution,
}

impl ScalingDecision {
    pub fn is_resize(&self) -> bool {
        self.x.is_resize() || self.y.is_resize()
    }
}

/// User kernel preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub upscaler: Upscaler,
    pub downscaler: Downscaler,
    /// Interpolate (upscale kernel) down to 50% before switching to the downscaler
    pub interpolate_at_50pct: bool,
}

impl ScalingPolicy {
    pub fn new(upscaler: Upscaler, downscaler: Downscaler) -> Self {
        Self {
            upscaler,
            downscaler,
            interpolate_at_50pct: false,
        }
    }

    pub fn with_interpolate_at_50pct(mut self, enabled: bool) -> Self {
        self.interpolate_at_50pct = enabled;
        self
    }

    fn axis(&self, src: u32, dst: u32) -> AxisScaling {
        let k: u64 = if self.interpolate_at_50pct { 2 } else { 1 };
        if src == dst {
            AxisScaling::NoResize
        } else if src as u64 > k * dst as u64 {
            AxisScaling::Resize(ScaleKernel::Down(self.downscaler))
        } else {
            AxisScaling::Resize(ScaleKernel::Up(self.upscaler))
        }
    }

    /// Decide how `src` is resampled onto `dst` under `rotation`
    pub fn decide(&self, src: Rect, dst: Rect, rotation: Rotation) -> ScalingDecision {
        let source = if rotation.is_transposed() {
            src.size().transposed()
        } else {
            src.size()
        };
        let destination = dst.size();

        let x = self.axis(source.width, destination.width);
        let y = self.axis(source.height, destination.height);

        let passes = match (x.kernel(), y.kernel()) {
            (None, None) => ScalingPasses::Blit,
            (Some(kernel), None) => ScalingPasses::OnePass {
                axis: Axis::X,
                kernel,
            },
            (None, Some(kernel)) => ScalingPasses::OnePass {
                axis: Axis::Y,
                kernel,
            },
            (Some(kx), Some(ky)) if kx == ky => ScalingPasses::OnePass {
                axis: Axis::Both,
                kernel: kx,
            },
            (Some(kx), Some(ky)) => ScalingPasses::TwoPass {
                x: kx,
                y: ky,
                intermediate: Resolution::new(destination.width, source.height),
            },
        };

        ScalingDecision {
            x,
            y,
            passes,
            rotation,
            source,
            destination,
        }
    }
}

/// Texture coordinates of the four quad corners
///
/// Corner order is top-left, top-right, bottom-left, bottom-right of the
/// destination. Flips are applied to the source before rotating clockwise.
pub fn quad_texcoords(
    src: Rect,
    texture: Resolution,
    rotation: Rotation,
    flip_h: bool,
    flip_v: bool,
) -> [[f32; 2]; 4] {
    let tw = texture.width.max(1) as f32;
    let th = texture.height.max(1) as f32;
    let (mut u0, mut u1) = (src.left as f32 / tw, src.right as f32 / tw);
    let (mut v0, mut v1) = (src.top as f32 / th, src.bottom as f32 / th);
    if flip_h {
        std::mem::swap(&mut u0, &mut u1);
    }
    if flip_v {
        std::mem::swap(&mut v0, &mut v1);
    }

    let tl = [u0, v0];
    let tr = [u1, v0];
    let bl = [u0, v1];
    let br = [u1, v1];
    match rotation {
        Rotation::R0 => [tl, tr, bl, br],
        Rotation::R90 => [bl, tl, br, tr],
        Rotation::R180 => [br, bl, tr, tl],
        Rotation::R270 => [tr, br, tl, bl],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ScalingPolicy {
        ScalingPolicy::new(Upscaler::CatmullRom, Downscaler::Bicubic)
    }

    const SRC: Rect = Rect::new(0, 0, 1920, 1080);

    #[test]
    fn test_same_size_is_blit() {
        let d = policy().decide(SRC, SRC, Rotation::R0);
        assert_eq!(d.x, AxisScaling::NoResize);
        assert_eq!(d.y, AxisScaling::NoResize);
        assert_eq!(d.passes, ScalingPasses::Blit);
        assert!(!d.is_resize());
    }

    #[test]
    fn test_half_size_downscales() {
        let d = policy().decide(SRC, Rect::new(0, 0, 960, 540), Rotation::R0);
        let down = AxisScaling::Resize(ScaleKernel::Down(Downscaler::Bicubic));
        assert_eq!(d.x, down);
        assert_eq!(d.y, down);
        assert_eq!(
            d.passes,
            ScalingPasses::OnePass {
                axis: Axis::Both,
                kernel: ScaleKernel::Down(Downscaler::Bicubic)
            }
        );
    }

    #[test]
    fn test_double_size_upscales() {
        let d = policy().decide(SRC, Rect::new(0, 0, 3840, 2160), Rotation::R0);
        let up = AxisScaling::Resize(ScaleKernel::Up(Upscaler::CatmullRom));
        assert_eq!(d.x, up);
        assert_eq!(d.y, up);
    }

    #[test]
    fn test_exact_half_with_interpolation_is_not_downscale() {
        let p = policy().with_interpolate_at_50pct(true);
        let d = p.decide(SRC, Rect::new(0, 0, 960, 540), Rotation::R0);
        assert!(!d.x.kernel().unwrap().is_downscale());
        assert!(!d.y.kernel().unwrap().is_downscale());

        // one pixel more than 2x crosses the strict comparison
        let d = p.decide(Rect::new(0, 0, 1921, 1080), Rect::new(0, 0, 960, 540), Rotation::R0);
        assert!(d.x.kernel().unwrap().is_downscale());
        assert!(!d.y.kernel().unwrap().is_downscale());
    }

    #[test]
    fn test_mixed_axes_need_two_passes() {
        let d = policy().decide(SRC, Rect::new(0, 0, 960, 2160), Rotation::R0);
        assert_eq!(
            d.passes,
            ScalingPasses::TwoPass {
                x: ScaleKernel::Down(Downscaler::Bicubic),
                y: ScaleKernel::Up(Upscaler::CatmullRom),
                intermediate: Resolution::new(960, 1080),
            }
        );
        assert_eq!(d.passes.pass_count(), 2);
    }

    #[test]
    fn test_single_axis_resize() {
        let d = policy().decide(SRC, Rect::new(0, 0, 1920, 800), Rotation::R0);
        assert_eq!(d.x, AxisScaling::NoResize);
        assert_eq!(
            d.passes,
            ScalingPasses::OnePass {
                axis: Axis::Y,
                kernel: ScaleKernel::Up(Upscaler::CatmullRom)
            }
        );
        assert!(d.passes.intermediate().is_none());
    }

    #[test]
    fn test_rotation_swaps_axes() {
        let src = Rect::new(0, 0, 1000, 500);
        let dst = Rect::new(0, 0, 500, 1000);
        for rotation in [Rotation::R90, Rotation::R270] {
            let d = policy().decide(src, dst, rotation);
            assert_eq!(d.x, AxisScaling::NoResize);
            assert_eq!(d.y, AxisScaling::NoResize);
            assert_eq!(d.passes, ScalingPasses::Blit);
        }
        let d = policy().decide(src, dst, Rotation::R180);
        assert!(d.x.kernel().unwrap().is_downscale());
        assert!(!d.y.kernel().unwrap().is_downscale());
    }

    #[test]
    fn test_rotated_two_pass_intermediate() {
        let d = policy().decide(
            Rect::new(0, 0, 1000, 500),
            Rect::new(0, 0, 250, 2000),
            Rotation::R90,
        );
        // mapped source is 500x1000: X downscales 500 -> 250, Y upscales 1000 -> 2000
        assert_eq!(d.passes.intermediate(), Some(Resolution::new(250, 1000)));
    }

    #[test]
    fn test_offset_rects_use_extents() {
        let d = policy().decide(
            Rect::new(8, 8, 1928, 1088),
            Rect::new(100, 50, 2020, 1130),
            Rotation::R0,
        );
        assert_eq!(d.passes, ScalingPasses::Blit);
    }

    #[test]
    fn test_quad_texcoords() {
        let tex = Resolution::new(100, 50);
        let full = Rect::from_size(tex);
        let q = quad_texcoords(full, tex, Rotation::R0, false, false);
        assert_eq!(q, [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]);

        // destination top-left shows the source bottom-left after 90 degrees clockwise
        let q = quad_texcoords(full, tex, Rotation::R90, false, false);
        assert_eq!(q[0], [0.0, 1.0]);
        assert_eq!(q[3], [1.0, 0.0]);

        let q = quad_texcoords(full, tex, Rotation::R0, false, true);
        assert_eq!(q[0], [0.0, 1.0]);

        let crop = quad_texcoords(Rect::new(0, 0, 50, 50), tex, Rotation::R180, false, false);
        assert_eq!(crop[0], [0.5, 1.0]);
    }
}
