//! Common types used throughout GhostRender

use serde::{Deserialize, Serialize};

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    // Common resolutions
    pub const HD_720P: Self = Self::new(1280, 720);
    pub const FHD_1080P: Self = Self::new(1920, 1080);
    pub const UHD_4K: Self = Self::new(3840, 2160);

    /// Swap width and height
    pub fn transposed(&self) -> Self {
        Self::new(self.height, self.width)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::FHD_1080P
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
        let width = w.trim().parse().map_err(|_| format!("bad width '{}'", w))?;
        let height = h.trim().parse().map_err(|_| format!("bad height '{}'", h))?;
        Ok(Self::new(width, height))
    }
}

/// Rectangle in pixels, right/bottom exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle at the origin covering `res`
    pub const fn from_size(res: Resolution) -> Self {
        Self::new(0, 0, res.width as i32, res.height as i32)
    }

    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }

    pub fn size(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({},{})-({},{})",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Clockwise picture rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    /// Parse a rotation in degrees; anything not a multiple of 90 is rejected
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::R0),
            90 => Some(Rotation::R90),
            180 => Some(Rotation::R180),
            270 => Some(Rotation::R270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> i32 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }

    /// Source X maps to destination Y (and vice versa)
    pub fn is_transposed(&self) -> bool {
        matches!(self, Rotation::R90 | Rotation::R270)
    }
}

/// Field order of a video sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FieldOrder {
    #[default]
    Progressive,
    TopFieldFirst,
    BottomFieldFirst,
}

impl FieldOrder {
    pub fn is_interlaced(&self) -> bool {
        !matches!(self, FieldOrder::Progressive)
    }
}

impl std::fmt::Display for FieldOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldOrder::Progressive => write!(f, "progressive"),
            FieldOrder::TopFieldFirst => write!(f, "top field first"),
            FieldOrder::BottomFieldFirst => write!(f, "bottom field first"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_size() {
        let rect = Rect::new(10, 20, 1930, 1100);
        assert_eq!(rect.size(), Resolution::FHD_1080P);
        assert!(Rect::new(5, 5, 5, 10).is_empty());
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("1920x1080".parse::<Resolution>(), Ok(Resolution::FHD_1080P));
        assert!("1920".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_rotation_degrees() {
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::R270));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::R90));
        assert_eq!(Rotation::from_degrees(45), None);
        assert!(Rotation::R270.is_transposed());
        assert!(!Rotation::R180.is_transposed());
    }
}
