//! Pure imaging building blocks: render parameters, receipts, crop
//! geometry and the pixel codec seam.

pub mod codec;
pub mod geometry;
pub mod params;
pub mod receipt;

pub use codec::{EncodeOptions, ImageCodec, ProbedImage, RasterCodec};
pub use geometry::{compute_crop, CropPlan, CropRect, CropRequest};
pub use params::{
    AspectRatio, FitMode, OutputType, ParameterLimits, RenderParameterSet, RenderQuery,
};
pub use receipt::{receipt_prefix, Receipt};
