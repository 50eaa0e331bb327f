pub mod cache_entry;
pub mod image;

pub use cache_entry::{CacheEntry, InvalidationReport};
pub use image::{
    BindOutcome, DeleteOutcome, ImageAsset, ImageMetadata, LinkKey, UploadedFile, UpsertOutcome,
    UpsertRequest, DEFAULT_FOCUS,
};
