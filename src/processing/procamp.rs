//! Brightness / contrast / hue / saturation controls

use serde::{Deserialize, Serialize};

/// Valid range and default of one control
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcAmpRange {
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub step: f32,
}

impl ProcAmpRange {
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            self.default
        } else {
            value.clamp(self.min, self.max)
        }
    }
}

pub const BRIGHTNESS_RANGE: ProcAmpRange = ProcAmpRange {
    min: -100.0,
    max: 100.0,
    default: 0.0,
    step: 1.0,
};

pub const CONTRAST_RANGE: ProcAmpRange = ProcAmpRange {
    min: 0.0,
    max: 2.0,
    default: 1.0,
    step: 0.01,
};

/// Degrees
pub const HUE_RANGE: ProcAmpRange = ProcAmpRange {
    min: -180.0,
    max: 180.0,
    default: 0.0,
    step: 1.0,
};

pub const SATURATION_RANGE: ProcAmpRange = ProcAmpRange {
    min: 0.0,
    max: 2.0,
    default: 1.0,
    step: 0.01,
};

/// ProcAmp values, always within their ranges
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcAmp {
    /// -100..100, added to the output in 1/255 steps
    pub brightness: f32,
    /// Output gain
    pub contrast: f32,
    /// Chroma rotation in degrees
    pub hue: f32,
    /// Chroma gain
    pub saturation: f32,
}

impl Default for ProcAmp {
    fn default() -> Self {
        Self {
            brightness: BRIGHTNESS_RANGE.default,
            contrast: CONTRAST_RANGE.default,
            hue: HUE_RANGE.default,
            saturation: SATURATION_RANGE.default,
        }
    }
}

impl ProcAmp {
    /// Build from caller values, clamping each into range
    pub fn new(brightness: f32, contrast: f32, hue: f32, saturation: f32) -> Self {
        Self {
            brightness,
            contrast,
            hue,
            saturation,
        }
        .clamped()
    }

    pub fn clamped(self) -> Self {
        Self {
            brightness: BRIGHTNESS_RANGE.clamp(self.brightness),
            contrast: CONTRAST_RANGE.clamp(self.contrast),
            hue: HUE_RANGE.clamp(self.hue),
            saturation: SATURATION_RANGE.clamp(self.saturation),
        }
    }

    pub fn with_brightness(mut self, value: f32) -> Self {
        self.brightness = BRIGHTNESS_RANGE.clamp(value);
        self
    }

    pub fn with_contrast(mut self, value: f32) -> Self {
        self.contrast = CONTRAST_RANGE.clamp(value);
        self
    }

    pub fn with_hue(mut self, value: f32) -> Self {
        self.hue = HUE_RANGE.clamp(value);
        self
    }

    pub fn with_saturation(mut self, value: f32) -> Self {
        self.saturation = SATURATION_RANGE.clamp(value);
        self
    }

    /// Brightness as an offset on normalized output
    pub fn brightness_offset(&self) -> f64 {
        self.brightness as f64 / 255.0
    }

    pub fn hue_radians(&self) -> f64 {
        (self.hue as f64).to_radians()
    }

    /// Brightness and contrast leave the picture untouched
    pub fn is_neutral_levels(&self) -> bool {
        self.brightness.abs() <= 1e-4 && (self.contrast - 1.0).abs() <= 1e-4
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = ProcAmp::default();
        assert_eq!(p.brightness, 0.0);
        assert_eq!(p.contrast, 1.0);
        assert_eq!(p.hue, 0.0);
        assert_eq!(p.saturation, 1.0);
        assert!(p.is_neutral_levels());
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        let p = ProcAmp::new(250.0, -1.0, 720.0, 3.5);
        assert_eq!(p.brightness, 100.0);
        assert_eq!(p.contrast, 0.0);
        assert_eq!(p.hue, 180.0);
        assert_eq!(p.saturation, 2.0);

        let p = ProcAmp::default().with_brightness(f32::NAN);
        assert_eq!(p.brightness, 0.0);
    }

    #[test]
    fn test_neutral_epsilon() {
        assert!(ProcAmp::default().with_contrast(1.00005).is_neutral_levels());
        assert!(!ProcAmp::default().with_contrast(1.01).is_neutral_levels());
        assert!(!ProcAmp::default().with_brightness(1.0).is_neutral_levels());
    }
}
