//! Repository layer for image, link and cache metadata
//!
//! Repositories own the SQL for their tables and nothing else. They take a
//! `&mut SqliteConnection` so callers decide whether a call runs on a pooled
//! connection or inside a transaction shared with other repositories.

pub mod cache_entry;
pub mod image;

pub use cache_entry::{CacheEntryRepository, CacheInsert};
pub use image::{ImageRepository, NewImageFile};
