//! Vendor workaround policy
//!
//! Some drivers mishandle particular inputs in their hardware video
//! processor. Each known case is a [`VendorRule`]; a matching rule routes the
//! stream through the shader path. The table is serde-configurable so rules
//! can be added or removed without a rebuild.

use serde::{Deserialize, Serialize};

use crate::format::{ColorFormat, ColorSystem, PixelFormatDescriptor};

/// GPU vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    /// Any other PCI vendor id
    Other(u32),
}

impl GpuVendor {
    pub const NVIDIA_ID: u32 = 0x10DE;
    pub const AMD_ID: u32 = 0x1002;
    pub const INTEL_ID: u32 = 0x8086;

    pub fn from_pci_id(id: u32) -> Self {
        match id {
            Self::NVIDIA_ID => GpuVendor::Nvidia,
            Self::AMD_ID => GpuVendor::Amd,
            Self::INTEL_ID => GpuVendor::Intel,
            other => GpuVendor::Other(other),
        }
    }

    pub fn pci_id(&self) -> u32 {
        match self {
            GpuVendor::Nvidia => Self::NVIDIA_ID,
            GpuVendor::Amd => Self::AMD_ID,
            GpuVendor::Intel => Self::INTEL_ID,
            GpuVendor::Other(id) => *id,
        }
    }
}

impl std::fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuVendor::Nvidia => write!(f, "NVIDIA"),
            GpuVendor::Amd => write!(f, "AMD"),
            GpuVendor::Intel => write!(f, "Intel"),
            GpuVendor::Other(id) => write!(f, "vendor {:#06x}", id),
        }
    }
}

/// Condition under which a vendor's video processor is avoided
///
/// All set conditions must hold for the rule to match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRule {
    pub vendor: GpuVendor,
    /// Only frames with an odd width
    #[serde(default)]
    pub odd_width: bool,
    /// Only this color system
    #[serde(default)]
    pub color_system: Option<ColorSystem>,
    /// Only these formats (empty = any)
    #[serde(default)]
    pub formats: Vec<ColorFormat>,
    /// Shown in logs when the rule fires
    #[serde(default)]
    pub reason: String,
}

impl VendorRule {
    pub fn matches(&self, vendor: GpuVendor, desc: &PixelFormatDescriptor, width: u32) -> bool {
        self.vendor == vendor
            && (!self.odd_width || width % 2 == 1)
            && self.color_system.map_or(true, |cs| cs == desc.color_system)
            && (self.formats.is_empty() || self.formats.contains(&desc.format))
    }
}

/// Ordered rule table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorPolicy {
    #[serde(default)]
    pub rules: Vec<VendorRule>,
}

impl Default for VendorPolicy {
    fn default() -> Self {
        Self {
            rules: vec![VendorRule {
                vendor: GpuVendor::Nvidia,
                odd_width: true,
                color_system: Some(ColorSystem::Rgb),
                formats: Vec::new(),
                reason: "video processor corrupts RGB input with odd width".into(),
            }],
        }
    }
}

impl VendorPolicy {
    /// Table without any rules
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: VendorRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// First rule that keeps this input off the video processor
    pub fn disqualifying_rule(
        &self,
        vendor: GpuVendor,
        desc: &PixelFormatDescriptor,
        width: u32,
    ) -> Option<&VendorRule> {
        self.rules.iter().find(|r| r.matches(vendor, desc, width))
    }
}
