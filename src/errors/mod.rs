//! Centralized error handling for the image service
//!
//! This module unifies error types across the imaging, storage, cache and
//! web layers so every failure maps onto one of a small set of categories
//! with a well-defined HTTP status.
//!
//! # Error Categories
//!
//! - **Validation Errors**: malformed render parameters or upload payloads
//! - **Not Found Errors**: unknown image ids or link triples
//! - **Codec Errors**: undecodable sources, encode failures
//! - **Geometry Errors**: crop/fit requests that resolve to an empty image
//! - **Transaction Errors**: failed or cancelled metadata mutations
//! - **Cache Errors**: derivative file or metadata row failures
//!
//! # Usage
//!
//! ```rust
//! use pluto_images::errors::{AppError, AppResult};
//!
//! fn example_function(width: u32) -> AppResult<u32> {
//!     if width == 0 {
//!         return Err(AppError::validation("width must be positive"));
//!     }
//!     Ok(width)
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for Repository Results
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Convenience type alias for Codec Results
pub type CodecResult<T> = Result<T, CodecError>;

/// Convenience type alias for Cache Results
pub type CacheResult<T> = Result<T, CacheError>;
