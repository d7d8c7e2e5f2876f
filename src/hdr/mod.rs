//! HDR and Dolby Vision dynamic metadata

pub mod dovi;
pub mod metadata;

pub use dovi::{CurveSegment, DoviChanges, DoviColorMetadata, DoviMetadata, ReshapeCurve};
pub use metadata::{
    ContentLightLevel, DynamicMetadata, Hdr10Metadata, MetadataChanges, SideData, SideDataTag,
    StereoOffsets,
};
