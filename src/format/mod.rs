//! Input format handling
//!
//! - Static pixel format catalog
//! - FourCC / subtype classification
//! - Legacy and extended video-info headers

pub mod catalog;
pub mod classify;
pub mod media_type;

pub use catalog::{
    lookup, lookup_raw, ChannelOrder, ColorFormat, ColorSystem, PixelFormatDescriptor, PlaneLayout,
    Subsampling, SurfaceFormat,
};
pub use classify::{classify, Guid};
pub use media_type::{
    BitmapInfoHeader, FormatBlock, MediaType, VideoGeometry, VideoInfoHeader, VideoInfoHeader2,
};
